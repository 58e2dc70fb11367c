//! Errors surfaced by the identity service façade.

use thiserror::Error;

use sentinel_auth::{PasswordHashError, TokenError};
use sentinel_core::DomainError;

use crate::config::ConfigError;
use crate::store::StoreError;

/// Stable result kinds callers (transports, tests) match on.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Unauthenticated,
    Forbidden,
    PasswordExpired,
    Conflict,
    NotFound,
    Validation,
    AlreadyInitialized,
    Unavailable,
    Internal,
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("unauthenticated: {0}")]
    Token(#[from] TokenError),

    #[error("storage unavailable: {0}")]
    Unavailable(StoreError),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ServiceError::Domain(e) => match e {
                DomainError::Unauthenticated => ErrorKind::Unauthenticated,
                DomainError::Forbidden(_) => ErrorKind::Forbidden,
                DomainError::PasswordExpired => ErrorKind::PasswordExpired,
                DomainError::Conflict(_) => ErrorKind::Conflict,
                DomainError::NotFound(_) => ErrorKind::NotFound,
                DomainError::Validation(_) | DomainError::InvalidId(_) => ErrorKind::Validation,
                DomainError::AlreadyInitialized => ErrorKind::AlreadyInitialized,
            },
            ServiceError::Token(TokenError::Encoding(_) | TokenError::InvalidTtl) => ErrorKind::Internal,
            ServiceError::Token(_) => ErrorKind::Unauthenticated,
            ServiceError::Unavailable(_) => ErrorKind::Unavailable,
            ServiceError::Config(_) | ServiceError::Internal(_) => ErrorKind::Internal,
        }
    }
}

impl From<PasswordHashError> for ServiceError {
    fn from(value: PasswordHashError) -> Self {
        ServiceError::Internal(value.to_string())
    }
}

impl From<StoreError> for ServiceError {
    fn from(value: StoreError) -> Self {
        match value {
            StoreError::Unavailable(_) => ServiceError::Unavailable(value),
            // Conflicts that survive the service's own re-read loop are reported as conflicts.
            StoreError::VersionConflict(msg) => ServiceError::Domain(DomainError::Conflict(msg)),
            StoreError::Serialization(msg) => ServiceError::Internal(msg),
        }
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;
