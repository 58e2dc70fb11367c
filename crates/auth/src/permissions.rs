use std::borrow::Cow;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::AllowedOperation;

/// Identifier of a permittable endpoint group.
///
/// Groups are opaque strings; the identity service itself protects three
/// well-known groups (see the associated constants).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PermittableGroupId(Cow<'static, str>);

impl PermittableGroupId {
    /// Managing roles and their permissions.
    pub const ROLE_MANAGEMENT: PermittableGroupId = PermittableGroupId(Cow::Borrowed("identity__v1__roles"));

    /// Managing other users.
    pub const IDENTITY_MANAGEMENT: PermittableGroupId = PermittableGroupId(Cow::Borrowed("identity__v1__users"));

    /// Acting on one's own user record. Implicitly granted to every user.
    pub const SELF_MANAGEMENT: PermittableGroupId = PermittableGroupId(Cow::Borrowed("identity__v1__self"));

    pub fn new(name: impl Into<Cow<'static, str>>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl core::fmt::Display for PermittableGroupId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(&self.0)
    }
}

/// A grant of operations over one endpoint group.
///
/// Pure value: roles own their own copies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Permission {
    pub permittable_endpoint_group_identifier: PermittableGroupId,
    pub allowed_operations: BTreeSet<AllowedOperation>,
}

impl Permission {
    pub fn new(
        group: PermittableGroupId,
        operations: impl IntoIterator<Item = AllowedOperation>,
    ) -> Self {
        Self {
            permittable_endpoint_group_identifier: group,
            allowed_operations: operations.into_iter().collect(),
        }
    }

    /// Every operation over `group`.
    pub fn all(group: PermittableGroupId) -> Self {
        Self::new(group, AllowedOperation::ALL)
    }

    pub fn group(&self) -> &PermittableGroupId {
        &self.permittable_endpoint_group_identifier
    }

    pub fn allows(&self, group: &PermittableGroupId, operation: AllowedOperation) -> bool {
        self.group() == group && self.allowed_operations.contains(&operation)
    }
}
