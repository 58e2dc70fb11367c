use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use sentinel_core::{DomainError, DomainResult};

use crate::identifier::validate_identifier;
use crate::{Permission, PermittableGroupId};

/// Identifier of the role granted to the bootstrap administrator.
pub const ADMIN_ROLE: &str = "pharaoh";

/// Role identifier (unique within a tenant, immutable once created).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoleIdentifier(String);

impl RoleIdentifier {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn admin() -> Self {
        Self::new(ADMIN_ROLE)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_admin(&self) -> bool {
        self.0 == ADMIN_ROLE
    }

    pub fn validate(&self) -> DomainResult<()> {
        validate_identifier("role", &self.0)
    }
}

impl core::fmt::Display for RoleIdentifier {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A named, ordered list of permissions.
///
/// Each endpoint group may appear at most once. The list is replaced as a
/// whole on change; entries are never merged.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Role {
    pub identifier: RoleIdentifier,
    pub permissions: Vec<Permission>,
}

impl Role {
    pub fn new(identifier: RoleIdentifier, permissions: Vec<Permission>) -> Self {
        Self {
            identifier,
            permissions,
        }
    }

    /// The well-known administrator role: every operation on every identity group.
    pub fn admin() -> Self {
        Self::new(
            RoleIdentifier::admin(),
            vec![
                Permission::all(PermittableGroupId::IDENTITY_MANAGEMENT),
                Permission::all(PermittableGroupId::ROLE_MANAGEMENT),
                Permission::all(PermittableGroupId::SELF_MANAGEMENT),
            ],
        )
    }

    pub fn validate(&self) -> DomainResult<()> {
        self.identifier.validate()?;

        let mut groups = HashSet::with_capacity(self.permissions.len());
        for permission in &self.permissions {
            let group = permission.group();
            if group.as_str().trim().is_empty() {
                return Err(DomainError::validation("permission endpoint group must not be empty"));
            }
            if !groups.insert(group) {
                return Err(DomainError::validation(format!(
                    "duplicate permission entries for endpoint group '{group}'"
                )));
            }
        }

        Ok(())
    }
}
