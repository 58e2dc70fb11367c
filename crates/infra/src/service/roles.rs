use tracing::info;

use sentinel_auth::events::{RoleChanged, RoleCreated, RoleDeleted};
use sentinel_auth::{AllowedOperation, IdentityEvent, PermittableGroupId, Requirement, Role, RoleIdentifier, TokenCodec};
use sentinel_core::{DomainError, ExpectedVersion};

use super::{IdentityService, Plan};
use crate::error::ServiceResult;
use crate::store::{IdentityStore, RecordWrite};

fn role_management(operation: AllowedOperation) -> Requirement {
    Requirement::new(PermittableGroupId::ROLE_MANAGEMENT, operation)
}

fn ensure_not_admin(identifier: &RoleIdentifier) -> Result<(), DomainError> {
    if identifier.is_admin() {
        return Err(DomainError::forbidden(format!("role '{identifier}' is protected")));
    }
    Ok(())
}

impl<S, C> IdentityService<S, C>
where
    S: IdentityStore,
    C: TokenCodec,
{
    /// Requires ROLE_MANAGEMENT/CREATE. Duplicate endpoint groups are a validation error.
    pub fn create_role(&self, role: Role) -> ServiceResult<()> {
        let caller = self.guard(role_management(AllowedOperation::Create), None)?;
        role.validate()?;

        let tenant_id = caller.tenant_id;
        self.mutate(tenant_id, Some(&caller), "create_role", || {
            if self.read("get_role", || self.store.get_role(tenant_id, &role.identifier))?.is_some() {
                return Err(DomainError::conflict(format!("role '{}' already exists", role.identifier)).into());
            }

            Ok(Plan::new(
                vec![RecordWrite::PutRole {
                    record: role.clone(),
                    expected: ExpectedVersion::Absent,
                }],
                vec![IdentityEvent::RoleCreated(RoleCreated {
                    role: role.identifier.clone(),
                    occurred_at: self.clock.now(),
                })],
                (),
            ))
        })?;

        info!(
            tenant_id = %tenant_id,
            role = %role.identifier,
            permissions = role.permissions.len(),
            created_by = %caller.context.user,
            "role created"
        );
        Ok(())
    }

    pub fn get_role(&self, identifier: &RoleIdentifier) -> ServiceResult<Role> {
        let caller = self.guard(role_management(AllowedOperation::Read), None)?;
        let role = self
            .read("get_role", || self.store.get_role(caller.tenant_id, identifier))?
            .ok_or_else(|| DomainError::not_found(format!("role '{identifier}'")))?;
        Ok(role.into_record())
    }

    pub fn list_roles(&self) -> ServiceResult<Vec<Role>> {
        let caller = self.guard(role_management(AllowedOperation::Read), None)?;
        let roles = self.read("list_roles", || self.store.list_roles(caller.tenant_id))?;
        Ok(roles.into_iter().map(|r| r.into_record()).collect())
    }

    /// Replace a role's permission list wholesale. Requires ROLE_MANAGEMENT/CHANGE.
    ///
    /// `identifier` and `role.identifier` must agree; role identifiers are immutable.
    pub fn change_role(&self, identifier: &RoleIdentifier, role: Role) -> ServiceResult<()> {
        let caller = self.guard(role_management(AllowedOperation::Change), None)?;
        if &role.identifier != identifier {
            return Err(DomainError::validation(format!(
                "role identifier '{}' does not match '{identifier}'",
                role.identifier
            ))
            .into());
        }
        ensure_not_admin(identifier)?;
        role.validate()?;

        let tenant_id = caller.tenant_id;
        self.mutate(tenant_id, Some(&caller), "change_role", || {
            let current = self
                .read("get_role", || self.store.get_role(tenant_id, identifier))?
                .ok_or_else(|| DomainError::not_found(format!("role '{identifier}'")))?;

            Ok(Plan::new(
                vec![RecordWrite::PutRole {
                    record: role.clone(),
                    expected: current.expected(),
                }],
                vec![IdentityEvent::RoleChanged(RoleChanged {
                    role: identifier.clone(),
                    occurred_at: self.clock.now(),
                })],
                (),
            ))
        })?;

        info!(tenant_id = %tenant_id, role = %identifier, "role changed");
        Ok(())
    }

    /// Requires ROLE_MANAGEMENT/DELETE. Fails with `Conflict` while any user holds the role.
    pub fn delete_role(&self, identifier: &RoleIdentifier) -> ServiceResult<()> {
        let caller = self.guard(role_management(AllowedOperation::Delete), None)?;
        ensure_not_admin(identifier)?;

        let tenant_id = caller.tenant_id;
        self.mutate(tenant_id, Some(&caller), "delete_role", || {
            let current = self
                .read("get_role", || self.store.get_role(tenant_id, identifier))?
                .ok_or_else(|| DomainError::not_found(format!("role '{identifier}'")))?;

            let holders = self
                .read("list_users", || self.store.list_users(tenant_id))?
                .into_iter()
                .filter(|u| &u.record.role == identifier)
                .count();
            if holders > 0 {
                return Err(DomainError::conflict(format!("role '{identifier}' is still assigned to {holders} user(s)")).into());
            }

            Ok(Plan::new(
                vec![RecordWrite::DeleteRole {
                    identifier: identifier.clone(),
                    expected: current.expected(),
                }],
                vec![IdentityEvent::RoleDeleted(RoleDeleted {
                    role: identifier.clone(),
                    occurred_at: self.clock.now(),
                })],
                (),
            ))
        })?;

        info!(tenant_id = %tenant_id, role = %identifier, "role deleted");
        Ok(())
    }
}
