//! Bearer access tokens.
//!
//! `TokenCodec` is the pluggable signing format; `TokenService` owns the TTL,
//! the tenant binding and the revocation set.

use std::collections::{HashMap, HashSet};
use std::sync::{PoisonError, RwLock};

use chrono::{DateTime, Duration, SubsecRound, Utc};
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::Serialize;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use sentinel_core::TenantId;

use crate::claims::{TokenValidationError, validate_claims};
use crate::{TokenClaims, UserContext, UserRecord};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenError {
    #[error("no access token presented")]
    Missing,

    #[error("malformed access token")]
    Malformed,

    #[error("access token has expired")]
    Expired,

    #[error("access token not yet valid")]
    NotYetValid,

    #[error("access token has been revoked")]
    Revoked,

    #[error("access token was issued for another tenant")]
    TenantMismatch,

    #[error("failed to encode access token: {0}")]
    Encoding(String),

    #[error("token ttl must be positive and keep expiry within the calendar")]
    InvalidTtl,
}

impl From<TokenValidationError> for TokenError {
    fn from(value: TokenValidationError) -> Self {
        match value {
            TokenValidationError::Expired => TokenError::Expired,
            TokenValidationError::NotYetValid => TokenError::NotYetValid,
            TokenValidationError::InvalidTimeWindow => TokenError::Malformed,
        }
    }
}

/// Signs and verifies serialized claims.
pub trait TokenCodec: Send + Sync {
    fn issuer(&self) -> &str;

    fn encode(&self, claims: &TokenClaims) -> Result<String, TokenError>;

    /// Verify the signature and return the claims. Time checks are left to the caller.
    fn decode(&self, token: &str) -> Result<TokenClaims, TokenError>;
}

/// HS256 JWT codec.
#[derive(Clone)]
pub struct JwtTokenCodec {
    issuer: String,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl JwtTokenCodec {
    pub fn hs256(secret: impl AsRef<[u8]>, issuer: impl Into<String>) -> Self {
        let issuer = issuer.into();
        let secret = secret.as_ref();

        let mut validation = Validation::new(Algorithm::HS256);
        // Expiry is checked by `validate_claims` against the injected clock.
        validation.validate_exp = false;
        validation.required_spec_claims = HashSet::new();
        validation.set_issuer(&[issuer.as_str()]);

        Self {
            issuer,
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }
}

impl core::fmt::Debug for JwtTokenCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JwtTokenCodec")
            .field("issuer", &self.issuer)
            .finish_non_exhaustive()
    }
}

impl TokenCodec for JwtTokenCodec {
    fn issuer(&self) -> &str {
        &self.issuer
    }

    fn encode(&self, claims: &TokenClaims) -> Result<String, TokenError> {
        encode(&Header::new(Algorithm::HS256), claims, &self.encoding_key)
            .map_err(|e| TokenError::Encoding(e.to_string()))
    }

    fn decode(&self, token: &str) -> Result<TokenClaims, TokenError> {
        decode::<TokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| {
                debug!(error = %e, "rejected access token");
                TokenError::Malformed
            })
    }
}

/// Result of a successful login.
#[derive(Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Authentication {
    pub access_token: String,
    pub token_expiry: DateTime<Utc>,
    /// When the current password stops being valid by age, if age-based expiry is on.
    pub password_expiration: Option<DateTime<Utc>>,
}

impl core::fmt::Debug for Authentication {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Authentication")
            .field("access_token", &"***")
            .field("token_expiry", &self.token_expiry)
            .field("password_expiration", &self.password_expiration)
            .finish()
    }
}

pub struct TokenService<C> {
    codec: C,
    ttl: Duration,
    /// Revoked token ids and the instant after which they can be forgotten.
    revoked: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl<C> TokenService<C>
where
    C: TokenCodec,
{
    /// Tokens always expire: a non-positive TTL is rejected.
    pub fn new(codec: C, ttl: Duration) -> Result<Self, TokenError> {
        if ttl <= Duration::zero() {
            return Err(TokenError::InvalidTtl);
        }
        Ok(Self {
            codec,
            ttl,
            revoked: RwLock::new(HashMap::new()),
        })
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn issue(
        &self,
        tenant_id: TenantId,
        user: &UserRecord,
        now: DateTime<Utc>,
        password_expiration: Option<DateTime<Utc>>,
    ) -> Result<Authentication, TokenError> {
        // Claims carry whole seconds; keep the reported expiry consistent with them.
        let issued_at = now.trunc_subsecs(0);
        let expires_at = issued_at.checked_add_signed(self.ttl).ok_or(TokenError::InvalidTtl)?;
        let claims = TokenClaims {
            iss: self.codec.issuer().to_string(),
            sub: user.identifier.clone(),
            tenant_id,
            role: user.role.clone(),
            jti: Uuid::now_v7(),
            issued_at,
            expires_at,
        };

        let access_token = self.codec.encode(&claims)?;
        Ok(Authentication {
            access_token,
            token_expiry: claims.expires_at,
            password_expiration,
        })
    }

    /// Resolve a bearer token presented within `tenant_id`.
    pub fn validate(
        &self,
        tenant_id: TenantId,
        token: &str,
        now: DateTime<Utc>,
    ) -> Result<UserContext, TokenError> {
        let token = token.trim();
        if token.is_empty() {
            return Err(TokenError::Missing);
        }

        let claims = self.codec.decode(token)?;
        validate_claims(&claims, now)?;

        if claims.tenant_id != tenant_id {
            return Err(TokenError::TenantMismatch);
        }

        let revoked = self.revoked.read().unwrap_or_else(PoisonError::into_inner);
        if revoked.contains_key(&claims.jti) {
            return Err(TokenError::Revoked);
        }

        Ok(UserContext {
            tenant_id: claims.tenant_id,
            user: claims.sub,
            role: claims.role,
            token_id: claims.jti,
            expires_at: claims.expires_at,
        })
    }

    /// Revoke the token behind `context`. Entries for tokens that have expired anyway are pruned.
    pub fn revoke(&self, context: &UserContext, now: DateTime<Utc>) {
        let mut revoked = self.revoked.write().unwrap_or_else(PoisonError::into_inner);
        revoked.retain(|_, expires_at| *expires_at > now);
        revoked.insert(context.token_id, context.expires_at);
    }

    pub fn revoked_count(&self) -> usize {
        self.revoked.read().unwrap_or_else(PoisonError::into_inner).len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PasswordHash, RoleIdentifier, UserIdentifier};
    use chrono::TimeZone;

    fn service() -> TokenService<JwtTokenCodec> {
        TokenService::new(JwtTokenCodec::hs256("test-secret", "sentinel"), Duration::seconds(300)).unwrap()
    }

    fn user() -> UserRecord {
        UserRecord::create(
            UserIdentifier::new("antony"),
            RoleIdentifier::admin(),
            PasswordHash::new("h"),
            Utc::now(),
        )
    }

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn issued_token_validates_within_its_tenant() {
        let svc = service();
        let tenant = TenantId::new();
        let auth = svc.issue(tenant, &user(), t0(), None).unwrap();

        let ctx = svc.validate(tenant, &auth.access_token, t0()).unwrap();
        assert_eq!(ctx.user.as_str(), "antony");
        assert_eq!(ctx.role, RoleIdentifier::admin());
        assert_eq!(ctx.expires_at, auth.token_expiry);
        assert_eq!(auth.token_expiry, t0() + Duration::seconds(300));
    }

    #[test]
    fn token_from_another_tenant_is_rejected() {
        let svc = service();
        let auth = svc.issue(TenantId::new(), &user(), t0(), None).unwrap();
        assert_eq!(
            svc.validate(TenantId::new(), &auth.access_token, t0()),
            Err(TokenError::TenantMismatch)
        );
    }

    #[test]
    fn expired_missing_and_garbage_tokens_are_rejected() {
        let svc = service();
        let tenant = TenantId::new();
        let auth = svc.issue(tenant, &user(), t0(), None).unwrap();

        assert_eq!(
            svc.validate(tenant, &auth.access_token, t0() + Duration::seconds(300)),
            Err(TokenError::Expired)
        );
        assert_eq!(svc.validate(tenant, "  ", t0()), Err(TokenError::Missing));
        assert_eq!(svc.validate(tenant, "not.a.jwt", t0()), Err(TokenError::Malformed));
    }

    #[test]
    fn token_signed_with_another_secret_is_rejected() {
        let tenant = TenantId::new();
        let other = TokenService::new(JwtTokenCodec::hs256("other-secret", "sentinel"), Duration::seconds(60)).unwrap();
        let auth = other.issue(tenant, &user(), t0(), None).unwrap();
        assert_eq!(service().validate(tenant, &auth.access_token, t0()), Err(TokenError::Malformed));
    }

    #[test]
    fn token_from_another_issuer_is_rejected() {
        let tenant = TenantId::new();
        let other = TokenService::new(JwtTokenCodec::hs256("test-secret", "someone-else"), Duration::seconds(60)).unwrap();
        let auth = other.issue(tenant, &user(), t0(), None).unwrap();
        assert_eq!(service().validate(tenant, &auth.access_token, t0()), Err(TokenError::Malformed));
    }

    #[test]
    fn revoked_tokens_fail_and_are_pruned_after_expiry() {
        let svc = service();
        let tenant = TenantId::new();
        let auth = svc.issue(tenant, &user(), t0(), None).unwrap();
        let ctx = svc.validate(tenant, &auth.access_token, t0()).unwrap();

        svc.revoke(&ctx, t0());
        assert_eq!(svc.validate(tenant, &auth.access_token, t0()), Err(TokenError::Revoked));

        let later = svc.issue(tenant, &user(), t0() + Duration::seconds(400), None).unwrap();
        let later_ctx = svc.validate(tenant, &later.access_token, t0() + Duration::seconds(400)).unwrap();
        svc.revoke(&later_ctx, t0() + Duration::seconds(400));
        assert_eq!(svc.revoked_count(), 1);
    }

    #[test]
    fn zero_ttl_is_rejected() {
        assert!(matches!(
            TokenService::new(JwtTokenCodec::hs256("s", "sentinel"), Duration::zero()),
            Err(TokenError::InvalidTtl)
        ));
    }

    #[test]
    fn expiry_past_the_calendar_is_an_invalid_ttl() {
        let svc = TokenService::new(JwtTokenCodec::hs256("test-secret", "sentinel"), Duration::MAX).unwrap();
        assert_eq!(
            svc.issue(TenantId::new(), &user(), t0(), None).unwrap_err(),
            TokenError::InvalidTtl
        );
    }

    #[test]
    fn authentication_debug_hides_the_token() {
        let auth = service().issue(TenantId::new(), &user(), t0(), None).unwrap();
        assert!(!format!("{auth:?}").contains(&auth.access_token));
    }
}
