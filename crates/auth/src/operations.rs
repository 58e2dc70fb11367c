use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// Operation a permission can grant over an endpoint group.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AllowedOperation {
    Read,
    Change,
    Create,
    Delete,
}

impl AllowedOperation {
    pub const ALL: [AllowedOperation; 4] = [
        AllowedOperation::Read,
        AllowedOperation::Change,
        AllowedOperation::Create,
        AllowedOperation::Delete,
    ];

    pub fn all() -> BTreeSet<AllowedOperation> {
        Self::ALL.into_iter().collect()
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            AllowedOperation::Read => "READ",
            AllowedOperation::Change => "CHANGE",
            AllowedOperation::Create => "CREATE",
            AllowedOperation::Delete => "DELETE",
        }
    }
}

impl core::fmt::Display for AllowedOperation {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}
