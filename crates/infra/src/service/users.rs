use tracing::info;

use sentinel_auth::events::{UserCreated, UserPasswordChanged, UserRoleChanged};
use sentinel_auth::{
    AllowedOperation, IdentityEvent, Password, Permission, PermittableGroupId, Requirement, RoleIdentifier,
    TokenCodec, User, UserIdentifier, UserRecord, UserWithPassword, effective_permissions,
};
use sentinel_core::{DomainError, ExpectedVersion};

use super::{IdentityService, Plan};
use crate::error::ServiceResult;
use crate::store::{IdentityStore, RecordWrite};

fn identity(operation: AllowedOperation) -> Requirement {
    Requirement::new(PermittableGroupId::IDENTITY_MANAGEMENT, operation)
}

impl<S, C> IdentityService<S, C>
where
    S: IdentityStore,
    C: TokenCodec,
{
    /// Create a user with an expired password. Requires IDENTITY_MANAGEMENT/CREATE.
    pub fn create_user(&self, user: UserWithPassword) -> ServiceResult<()> {
        let caller = self.guard(identity(AllowedOperation::Create), None)?;
        user.validate()?;

        let tenant_id = caller.tenant_id;
        let hash = self.hash(&user.password)?;

        self.mutate(tenant_id, Some(&caller), "create_user", || {
            if self.read("get_user", || self.store.get_user(tenant_id, &user.identifier))?.is_some() {
                return Err(DomainError::conflict(format!("user '{}' already exists", user.identifier)).into());
            }
            let role = self
                .read("get_role", || self.store.get_role(tenant_id, &user.role))?
                .ok_or_else(|| DomainError::not_found(format!("role '{}'", user.role)))?;

            let now = self.clock.now();
            let record = UserRecord::create(user.identifier.clone(), user.role.clone(), hash.clone(), now);

            Ok(Plan::new(
                vec![
                    RecordWrite::PutUser {
                        record,
                        expected: ExpectedVersion::Absent,
                    },
                    // Assigning bumps the role's version so a concurrent delete re-checks its holders.
                    RecordWrite::PutRole {
                        expected: role.expected(),
                        record: role.record,
                    },
                ],
                vec![IdentityEvent::UserCreated(UserCreated {
                    user: user.identifier.clone(),
                    role: user.role.clone(),
                    occurred_at: now,
                })],
                (),
            ))
        })?;

        info!(
            tenant_id = %tenant_id,
            user = %user.identifier,
            role = %user.role,
            created_by = %caller.context.user,
            "user created"
        );
        Ok(())
    }

    /// IDENTITY_MANAGEMENT/READ, or the user themself.
    pub fn get_user(&self, identifier: &UserIdentifier) -> ServiceResult<User> {
        let caller = self.guard(identity(AllowedOperation::Read), Some(identifier))?;
        let user = self
            .read("get_user", || self.store.get_user(caller.tenant_id, identifier))?
            .ok_or_else(|| DomainError::not_found(format!("user '{identifier}'")))?;
        Ok(user.record.view())
    }

    pub fn list_users(&self) -> ServiceResult<Vec<User>> {
        let caller = self.guard(identity(AllowedOperation::Read), None)?;
        let users = self.read("list_users", || self.store.list_users(caller.tenant_id))?;
        Ok(users.iter().map(|u| u.record.view()).collect())
    }

    /// Reassign a user's role. Requires IDENTITY_MANAGEMENT/CHANGE; the
    /// administrator's role is fixed.
    pub fn change_user_role(&self, identifier: &UserIdentifier, role: &RoleIdentifier) -> ServiceResult<()> {
        let caller = self.guard(identity(AllowedOperation::Change), None)?;
        if identifier.is_admin() {
            return Err(DomainError::forbidden(format!("the role of '{identifier}' cannot be changed")).into());
        }

        let tenant_id = caller.tenant_id;
        self.mutate(tenant_id, Some(&caller), "change_user_role", || {
            let user = self
                .read("get_user", || self.store.get_user(tenant_id, identifier))?
                .ok_or_else(|| DomainError::not_found(format!("user '{identifier}'")))?;
            let target = self
                .read("get_role", || self.store.get_role(tenant_id, role))?
                .ok_or_else(|| DomainError::not_found(format!("role '{role}'")))?;

            let now = self.clock.now();
            Ok(Plan::new(
                vec![
                    RecordWrite::PutUser {
                        expected: user.expected(),
                        record: user.record.with_role(role.clone()),
                    },
                    RecordWrite::PutRole {
                        expected: target.expected(),
                        record: target.record,
                    },
                ],
                vec![IdentityEvent::UserRoleChanged(UserRoleChanged {
                    user: identifier.clone(),
                    role: role.clone(),
                    occurred_at: now,
                })],
                (),
            ))
        })?;

        info!(tenant_id = %tenant_id, user = %identifier, role = %role, "user role changed");
        Ok(())
    }

    /// Self-service password change; clears the expired flag.
    ///
    /// Allowed while the caller's password is expired. Changing someone
    /// else's password is `Forbidden` regardless of role.
    pub fn change_user_password(&self, identifier: &UserIdentifier, password: Password) -> ServiceResult<()> {
        let caller = self.authenticate()?;
        if &caller.context.user != identifier {
            return Err(DomainError::forbidden(format!("only '{identifier}' may change their own password")).into());
        }

        let tenant_id = caller.tenant_id;
        let hash = self.hash(&password)?;

        self.mutate(tenant_id, Some(&caller), "change_user_password", || {
            let user = self
                .read("get_user", || self.store.get_user(tenant_id, identifier))?
                .ok_or(DomainError::Unauthenticated)?;

            let now = self.clock.now();
            let changed = self
                .policy
                .change_password(&caller.context.user, &user.record, hash.clone(), now)?;

            Ok(Plan::new(
                vec![RecordWrite::PutUser {
                    record: changed,
                    expected: user.expected(),
                }],
                vec![IdentityEvent::UserPasswordChanged(UserPasswordChanged {
                    user: identifier.clone(),
                    occurred_at: now,
                })],
                (),
            ))
        })?;

        info!(tenant_id = %tenant_id, user = %identifier, "password changed");
        Ok(())
    }

    /// Effective permissions of a user, including the implicit self-management grant.
    pub fn get_user_permissions(&self, identifier: &UserIdentifier) -> ServiceResult<Vec<Permission>> {
        let caller = self.guard(identity(AllowedOperation::Read), Some(identifier))?;
        let user = self
            .read("get_user", || self.store.get_user(caller.tenant_id, identifier))?
            .ok_or_else(|| DomainError::not_found(format!("user '{identifier}'")))?;

        let permissions = self.role_permissions(caller.tenant_id, &user.record.role)?;
        Ok(effective_permissions(&permissions))
    }
}
