use serde::Serialize;

use sentinel_core::{DomainError, DomainResult};

use crate::{AllowedOperation, Permission, PermittableGroupId, UserContext, UserIdentifier};

/// What an operation requires of its caller.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub group: PermittableGroupId,
    pub operation: AllowedOperation,
}

impl Requirement {
    pub fn new(group: PermittableGroupId, operation: AllowedOperation) -> Self {
        Self { group, operation }
    }
}

impl core::fmt::Display for Requirement {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}/{}", self.group, self.operation)
    }
}

/// A role's permissions plus the implicit SELF_MANAGEMENT grant every user holds.
pub fn effective_permissions(role_permissions: &[Permission]) -> Vec<Permission> {
    let mut permissions = role_permissions.to_vec();
    if !permissions
        .iter()
        .any(|p| p.group() == &PermittableGroupId::SELF_MANAGEMENT)
    {
        permissions.push(Permission::all(PermittableGroupId::SELF_MANAGEMENT));
    }
    permissions
}

/// Decide whether `ctx` may perform `requirement`.
///
/// `acting_on` names the user record the operation targets, if any. Acting on
/// one's own record is always allowed. Otherwise the role's permissions must
/// contain an entry for the group that includes the operation.
///
/// Pure: no IO, no panics.
pub fn authorize(
    ctx: &UserContext,
    role_permissions: &[Permission],
    requirement: &Requirement,
    acting_on: Option<&UserIdentifier>,
) -> DomainResult<()> {
    if acting_on.is_some_and(|target| ctx.is(target)) {
        return Ok(());
    }

    if role_permissions
        .iter()
        .any(|p| p.allows(&requirement.group, requirement.operation))
    {
        Ok(())
    } else {
        Err(DomainError::forbidden(format!(
            "'{}' lacks {requirement}",
            ctx.user
        )))
    }
}

/// Detailed, serializable account of an authorization decision.
#[derive(Debug, Clone, Serialize)]
pub struct AuthorizationExplanation {
    pub user: UserIdentifier,
    pub requirement: Requirement,
    pub granted: bool,
    pub reason: String,
    pub effective_permissions: Vec<String>,
    pub denial: Option<DenialKind>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DenialKind {
    /// The role has no entry for the endpoint group.
    MissingGroup,
    /// The role has an entry for the group, but not for the operation.
    MissingOperation,
}

/// Explain the decision `authorize` makes for the same inputs.
pub fn explain_authorization(
    ctx: &UserContext,
    role_permissions: &[Permission],
    requirement: &Requirement,
    acting_on: Option<&UserIdentifier>,
) -> AuthorizationExplanation {
    let mut effective: Vec<String> = effective_permissions(role_permissions)
        .iter()
        .flat_map(|p| {
            p.allowed_operations
                .iter()
                .map(move |op| format!("{}/{op}", p.group()))
        })
        .collect();
    effective.sort();

    let explain = |granted: bool, reason: String, denial: Option<DenialKind>| AuthorizationExplanation {
        user: ctx.user.clone(),
        requirement: requirement.clone(),
        granted,
        reason,
        effective_permissions: effective.clone(),
        denial,
    };

    if acting_on.is_some_and(|target| ctx.is(target)) {
        return explain(
            true,
            format!("'{}' is acting on their own record", ctx.user),
            None,
        );
    }

    let entry = role_permissions
        .iter()
        .find(|p| p.group() == &requirement.group);

    match entry {
        Some(p) if p.allowed_operations.contains(&requirement.operation) => explain(
            true,
            format!("role '{}' grants {requirement}", ctx.role),
            None,
        ),
        Some(p) => explain(
            false,
            format!(
                "role '{}' grants {:?} on '{}' but not {}",
                ctx.role,
                p.allowed_operations.iter().map(|op| op.as_str()).collect::<Vec<_>>(),
                requirement.group,
                requirement.operation
            ),
            Some(DenialKind::MissingOperation),
        ),
        None => explain(
            false,
            format!("role '{}' has no permission for '{}'", ctx.role, requirement.group),
            Some(DenialKind::MissingGroup),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::RoleIdentifier;
    use chrono::Utc;
    use sentinel_core::TenantId;
    use uuid::Uuid;

    fn ctx(user: &str, role: &str) -> UserContext {
        UserContext {
            tenant_id: TenantId::new(),
            user: UserIdentifier::new(user),
            role: RoleIdentifier::new(role),
            token_id: Uuid::now_v7(),
            expires_at: Utc::now(),
        }
    }

    fn role_management_create() -> Requirement {
        Requirement::new(PermittableGroupId::ROLE_MANAGEMENT, AllowedOperation::Create)
    }

    #[test]
    fn granted_when_role_has_group_and_operation() {
        let perms = vec![Permission::all(PermittableGroupId::ROLE_MANAGEMENT)];
        assert!(authorize(&ctx("Ahmes1", "scribe-1"), &perms, &role_management_create(), None).is_ok());
    }

    #[test]
    fn self_only_role_cannot_create_roles() {
        let perms = vec![Permission::all(PermittableGroupId::SELF_MANAGEMENT)];
        let err = authorize(&ctx("Ahmes1", "scribe-2"), &perms, &role_management_create(), None).unwrap_err();
        assert!(matches!(err, DomainError::Forbidden(_)));
    }

    #[test]
    fn acting_on_self_is_always_allowed() {
        let requirement = Requirement::new(PermittableGroupId::IDENTITY_MANAGEMENT, AllowedOperation::Read);
        let me = ctx("Ahmes1", "scribe-2");
        assert!(authorize(&me, &[], &requirement, Some(&UserIdentifier::new("Ahmes1"))).is_ok());
        assert!(authorize(&me, &[], &requirement, Some(&UserIdentifier::new("antony"))).is_err());
    }

    #[test]
    fn effective_permissions_add_self_management_once() {
        let effective = effective_permissions(&[]);
        assert_eq!(effective, vec![Permission::all(PermittableGroupId::SELF_MANAGEMENT)]);

        let explicit = vec![Permission::new(PermittableGroupId::SELF_MANAGEMENT, [AllowedOperation::Read])];
        assert_eq!(effective_permissions(&explicit), explicit);
    }

    #[test]
    fn explanation_distinguishes_missing_group_from_missing_operation() {
        let me = ctx("Ahmes1", "scribe-1");
        let read_only = vec![Permission::new(PermittableGroupId::ROLE_MANAGEMENT, [AllowedOperation::Read])];

        let e = explain_authorization(&me, &read_only, &role_management_create(), None);
        assert!(!e.granted);
        assert_eq!(e.denial, Some(DenialKind::MissingOperation));

        let e = explain_authorization(&me, &[], &role_management_create(), None);
        assert_eq!(e.denial, Some(DenialKind::MissingGroup));
        assert!(e.effective_permissions.iter().all(|p| p.starts_with("identity__v1__self/")));
    }

    #[test]
    fn explanation_agrees_with_authorize() {
        let me = ctx("Ahmes1", "scribe-1");
        let perms = vec![Permission::all(PermittableGroupId::ROLE_MANAGEMENT)];
        for op in AllowedOperation::ALL {
            for group in [PermittableGroupId::ROLE_MANAGEMENT, PermittableGroupId::IDENTITY_MANAGEMENT] {
                let req = Requirement::new(group, op);
                assert_eq!(
                    explain_authorization(&me, &perms, &req, None).granted,
                    authorize(&me, &perms, &req, None).is_ok()
                );
            }
        }
    }
}
