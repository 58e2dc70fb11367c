//! Password hashing and password-lifecycle policy.

use argon2::password_hash::{PasswordHasher as _, SaltString};
use argon2::{Algorithm, Argon2, Params, Version};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;

use sentinel_core::{DomainError, DomainResult};

use crate::{UserIdentifier, UserRecord};

/// Newtype for a submitted password so it never ends up in logs.
#[derive(Clone, Deserialize)]
#[serde(transparent)]
pub struct Password(String);

impl Password {
    pub fn new(password: impl Into<String>) -> Self {
        Self(password.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn validate(&self) -> DomainResult<()> {
        if self.0.is_empty() {
            return Err(DomainError::validation("password must not be empty"));
        }
        Ok(())
    }
}

impl core::fmt::Debug for Password {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("Password(***)")
    }
}

/// Stored, one-way password hash.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PasswordHash(String);

impl PasswordHash {
    pub fn new(hash: impl Into<String>) -> Self {
        Self(hash.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("password hashing failed: {0}")]
pub struct PasswordHashError(String);

impl PasswordHashError {
    pub fn new(msg: impl Into<String>) -> Self {
        Self(msg.into())
    }
}

/// Pluggable password hashing primitive.
///
/// `hash` must be deterministic: equal passwords yield equal hashes.
pub trait PasswordHasher: Send + Sync {
    fn hash(&self, password: &Password) -> Result<PasswordHash, PasswordHashError>;

    /// Constant-time comparison of `hash(password)` against `stored`.
    fn verify(&self, password: &Password, stored: &PasswordHash) -> bool {
        match self.hash(password) {
            Ok(candidate) => candidate.as_str().as_bytes().ct_eq(stored.as_str().as_bytes()).into(),
            Err(_) => false,
        }
    }
}

impl<H> PasswordHasher for std::sync::Arc<H>
where
    H: PasswordHasher + ?Sized,
{
    fn hash(&self, password: &Password) -> Result<PasswordHash, PasswordHashError> {
        (**self).hash(password)
    }

    fn verify(&self, password: &Password, stored: &PasswordHash) -> bool {
        (**self).verify(password, stored)
    }
}

const SALT_CONTEXT: &[u8] = b"sentinel/password-salt/v1";

/// Argon2id cost parameters.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HashCost {
    pub memory_kib: u32,
    pub iterations: u32,
    pub parallelism: u32,
}

impl Default for HashCost {
    fn default() -> Self {
        Self {
            memory_kib: Params::DEFAULT_M_COST,
            iterations: Params::DEFAULT_T_COST,
            parallelism: Params::DEFAULT_P_COST,
        }
    }
}

/// Argon2id with the service pepper as the secret key.
///
/// The salt is derived from the pepper, so hashes are deterministic per
/// deployment and output is a PHC string (`$argon2id$v=19$...`).
#[derive(Clone)]
pub struct Argon2PasswordHasher {
    pepper: Vec<u8>,
    salt: SaltString,
    params: Params,
}

impl Argon2PasswordHasher {
    pub fn new(pepper: impl AsRef<[u8]>, cost: HashCost) -> Result<Self, PasswordHashError> {
        let pepper = pepper.as_ref().to_vec();
        if pepper.is_empty() {
            return Err(PasswordHashError::new("pepper must not be empty"));
        }

        let params = Params::new(cost.memory_kib, cost.iterations, cost.parallelism, None)
            .map_err(|e| PasswordHashError::new(format!("invalid argon2 parameters: {e}")))?;

        let mut digest = Sha256::new();
        digest.update(SALT_CONTEXT);
        digest.update(&pepper);
        let salt = SaltString::encode_b64(&digest.finalize()[..16])
            .map_err(|e| PasswordHashError::new(e.to_string()))?;

        Ok(Self { pepper, salt, params })
    }

    fn argon2(&self) -> Result<Argon2<'_>, PasswordHashError> {
        Argon2::new_with_secret(&self.pepper, Algorithm::Argon2id, Version::V0x13, self.params.clone())
            .map_err(|e| PasswordHashError::new(e.to_string()))
    }
}

impl core::fmt::Debug for Argon2PasswordHasher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Argon2PasswordHasher")
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

impl PasswordHasher for Argon2PasswordHasher {
    fn hash(&self, password: &Password) -> Result<PasswordHash, PasswordHashError> {
        let phc = self
            .argon2()?
            .hash_password(password.as_str().as_bytes(), &self.salt)
            .map_err(|e| PasswordHashError::new(e.to_string()))?;
        Ok(PasswordHash::new(phc.to_string()))
    }
}

/// Password lifecycle rules.
///
/// A password is expired when the user's flag is set (new users, resets) or
/// when it is older than `expires_in_days`. `expires_in_days == 0` disables
/// age-based expiry.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct PasswordPolicy {
    pub expires_in_days: u32,
}

impl PasswordPolicy {
    pub fn new(expires_in_days: u32) -> Self {
        Self { expires_in_days }
    }

    /// When the user's current password stops being valid by age.
    ///
    /// `None` when age-based expiry is disabled, or when the deadline lies
    /// beyond the representable calendar.
    pub fn expires_at(&self, user: &UserRecord) -> Option<DateTime<Utc>> {
        if self.expires_in_days == 0 {
            return None;
        }
        Duration::try_days(i64::from(self.expires_in_days))
            .and_then(|age| user.password_set_at.checked_add_signed(age))
    }

    pub fn is_expired(&self, user: &UserRecord, now: DateTime<Utc>) -> bool {
        user.password_expired || self.expires_at(user).is_some_and(|at| now >= at)
    }

    pub fn mark_expired(&self, user: &mut UserRecord) {
        user.password_expired = true;
    }

    /// Reject everything but login and self password change while expired.
    pub fn ensure_current(&self, user: &UserRecord, now: DateTime<Utc>) -> DomainResult<()> {
        if self.is_expired(user, now) {
            return Err(DomainError::PasswordExpired);
        }
        Ok(())
    }

    /// Self-service password change. Clears the expired flag.
    pub fn change_password(
        &self,
        actor: &UserIdentifier,
        user: &UserRecord,
        new_hash: PasswordHash,
        now: DateTime<Utc>,
    ) -> DomainResult<UserRecord> {
        if actor != &user.identifier {
            return Err(DomainError::forbidden(format!(
                "only '{}' may change their own password",
                user.identifier
            )));
        }

        Ok(UserRecord {
            password_hash: new_hash,
            password_expired: false,
            password_set_at: now,
            ..user.clone()
        })
    }
}

impl Default for PasswordPolicy {
    fn default() -> Self {
        Self::new(93)
    }
}
