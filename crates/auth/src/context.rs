use chrono::{DateTime, Utc};
use uuid::Uuid;

use sentinel_core::TenantId;

use crate::{RoleIdentifier, TokenError, UserIdentifier};

/// The caller, as established by a validated access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserContext {
    pub tenant_id: TenantId,
    pub user: UserIdentifier,
    pub role: RoleIdentifier,
    pub token_id: Uuid,
    pub expires_at: DateTime<Utc>,
}

impl UserContext {
    /// Fails once the token's validity window has closed.
    pub fn ensure_live(&self, now: DateTime<Utc>) -> Result<(), TokenError> {
        if now >= self.expires_at {
            return Err(TokenError::Expired);
        }
        Ok(())
    }

    pub fn is(&self, user: &UserIdentifier) -> bool {
        &self.user == user
    }
}

/// Who is calling: an anonymous guest (login only) or an authenticated user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Principal {
    Guest,
    User(UserContext),
}

impl Principal {
    pub fn user(&self) -> Option<&UserContext> {
        match self {
            Principal::Guest => None,
            Principal::User(ctx) => Some(ctx),
        }
    }

    pub fn is_guest(&self) -> bool {
        matches!(self, Principal::Guest)
    }
}
