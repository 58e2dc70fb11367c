use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_core::DomainResult;

use crate::identifier::validate_identifier;
use crate::{Password, PasswordHash, RoleIdentifier};

/// Identifier of the bootstrap administrator.
pub const ADMIN_USER: &str = "antony";

/// User identifier (unique within a tenant).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserIdentifier(String);

impl UserIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn admin() -> Self {
        Self::new(ADMIN_USER)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.0 == ADMIN_USER
    }

    pub fn validate(&self) -> DomainResult<()> {
        validate_identifier("user", &self.0)
    }
}

impl core::fmt::Display for UserIdentifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Stored user record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRecord {
    pub identifier: UserIdentifier,
    pub role: RoleIdentifier,
    pub password_hash: PasswordHash,
    pub password_expired: bool,
    pub password_set_at: DateTime<Utc>,
}

impl UserRecord {
    /// New users must change their password before doing anything but logging in.
    pub fn create(
        identifier: UserIdentifier,
        role: RoleIdentifier,
        password_hash: PasswordHash,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            identifier,
            role,
            password_hash,
            password_expired: true,
            password_set_at: now,
        }
    }

    pub fn with_role(&self, role: RoleIdentifier) -> Self {
        Self {
            role,
            ..self.clone()
        }
    }

    pub fn view(&self) -> User {
        User {
            identifier: self.identifier.clone(),
            role: self.role.clone(),
        }
    }
}

/// Public view of a user (no credential material).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub identifier: UserIdentifier,
    pub role: RoleIdentifier,
}

/// Payload for creating a user.
#[derive(Debug, Clone, Deserialize)]
pub struct UserWithPassword {
    pub identifier: UserIdentifier,
    pub role: RoleIdentifier,
    pub password: Password,
}

impl UserWithPassword {
    pub fn new(identifier: impl Into<String>, role: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            identifier: UserIdentifier::new(identifier),
            role: RoleIdentifier::new(role),
            password: Password::new(password),
        }
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.identifier.validate()?;
        self.role.validate()?;
        self.password.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sentinel_core::DomainError;

    #[test]
    fn created_users_start_with_an_expired_password() {
        let record = UserRecord::create(
            UserIdentifier::new("Ahmes1"),
            RoleIdentifier::new("scribe-2"),
            PasswordHash::new("h"),
            Utc::now(),
        );
        assert!(record.password_expired);
        assert_eq!(record.view().role.as_str(), "scribe-2");
    }

    #[test]
    fn with_role_keeps_credentials() {
        let record = UserRecord::create(
            UserIdentifier::new("Ahmes1"),
            RoleIdentifier::new("scribe-2"),
            PasswordHash::new("h"),
            Utc::now(),
        );
        let moved = record.with_role(RoleIdentifier::new("scribe-1"));
        assert_eq!(moved.password_hash, record.password_hash);
        assert_eq!(moved.role.as_str(), "scribe-1");
    }

    #[test]
    fn create_payload_validation() {
        assert!(UserWithPassword::new("Ahmes1", "scribe-2", "fractions").validate().is_ok());
        assert!(matches!(
            UserWithPassword::new("Ahmes1", "scribe-2", "").validate(),
            Err(DomainError::Validation(_))
        ));
        assert!(UserWithPassword::new("x", "scribe-2", "fractions").validate().is_err());
    }

    #[test]
    fn password_is_not_serialized_in_debug_output() {
        let payload = UserWithPassword::new("Ahmes1", "scribe-2", "fractions");
        assert!(!format!("{payload:?}").contains("fractions"));
    }
}
