//! Shared identifier rules for users and roles.

use sentinel_core::{DomainError, DomainResult};

pub const MIN_IDENTIFIER_LEN: usize = 2;
pub const MAX_IDENTIFIER_LEN: usize = 32;

/// Identifiers are 2–32 characters of ASCII letters, digits, `_`, `.` or `-`.
pub fn validate_identifier(kind: &str, value: &str) -> DomainResult<()> {
    let len = value.chars().count();
    if !(MIN_IDENTIFIER_LEN..=MAX_IDENTIFIER_LEN).contains(&len) {
        return Err(DomainError::validation(format!(
            "{kind} identifier must be {MIN_IDENTIFIER_LEN}-{MAX_IDENTIFIER_LEN} characters long"
        )));
    }

    if let Some(bad) = value
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(DomainError::validation(format!(
            "{kind} identifier contains invalid character {bad:?}"
        )));
    }

    Ok(())
}
