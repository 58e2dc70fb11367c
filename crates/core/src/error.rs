//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Each variant is a distinct, stable outcome that callers are expected to
/// match on. Infrastructure failures (storage timeouts, lock poisoning) belong
/// to the infra layer and are never folded into these variants.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Missing, malformed, expired or revoked credentials, or a failed login.
    #[error("unauthenticated")]
    Unauthenticated,

    /// Authenticated, but the caller lacks the required permission.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Authenticated and permitted, but a mandatory password change is pending.
    #[error("password expired")]
    PasswordExpired,

    /// An identifier already exists (or a concurrent write won the race).
    #[error("conflict: {0}")]
    Conflict(String),

    /// A referenced user or role does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A value failed validation (malformed input, duplicate permission entries).
    #[error("validation failed: {0}")]
    Validation(String),

    /// Bootstrap initialization was invoked for an already initialized tenant.
    #[error("tenant already initialized")]
    AlreadyInitialized,

    /// An identifier could not be parsed.
    #[error("invalid identifier: {0}")]
    InvalidId(String),
}

impl DomainError {
    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }
}
