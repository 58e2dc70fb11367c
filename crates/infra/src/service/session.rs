use tracing::{debug, info};

use sentinel_auth::events::{RoleCreated, UserAuthenticated, UserCreated, UserLoggedOut};
use sentinel_auth::{
    Authentication, IdentityEvent, Password, PasswordHasher, Role, TokenCodec, UserIdentifier, UserRecord,
};
use sentinel_core::{DomainError, ExpectedVersion};

use super::{IdentityService, Plan};
use crate::error::ServiceResult;
use crate::retry::retry_transient;
use crate::store::{IdentityStore, RecordWrite, StoreError, UncommittedEvent};

impl<S, C> IdentityService<S, C>
where
    S: IdentityStore,
    C: TokenCodec,
{
    /// One-time bootstrap: creates the `pharaoh` role and the `antony` administrator.
    ///
    /// The administrator's password is current (not expired) so it can act
    /// immediately. A second call fails with `AlreadyInitialized` and writes nothing.
    pub fn initialize(&self, admin_password: Password) -> ServiceResult<()> {
        let tenant_id = Self::scope()?.tenant_id;
        let admin = UserIdentifier::admin();
        let hash = self.hash(&admin_password)?;
        let now = self.clock.now();

        if self.read("get_user", || self.store.get_user(tenant_id, &admin))?.is_some() {
            return Err(DomainError::AlreadyInitialized.into());
        }

        let role = Role::admin();
        let mut record = UserRecord::create(admin.clone(), role.identifier.clone(), hash, now);
        record.password_expired = false;

        let events = [
            IdentityEvent::RoleCreated(RoleCreated {
                role: role.identifier.clone(),
                occurred_at: now,
            }),
            IdentityEvent::UserCreated(UserCreated {
                user: admin.clone(),
                role: role.identifier.clone(),
                occurred_at: now,
            }),
        ];
        let outbox = events
            .iter()
            .map(UncommittedEvent::from_typed)
            .collect::<Result<Vec<_>, _>>()?;
        let writes = vec![
            RecordWrite::PutRole {
                record: role,
                expected: ExpectedVersion::Absent,
            },
            RecordWrite::PutUser {
                record,
                expected: ExpectedVersion::Absent,
            },
        ];

        match retry_transient(&self.retry, "initialize", || {
            self.store.commit(tenant_id, writes.clone(), outbox.clone())
        }) {
            Ok(_) => {
                info!(tenant_id = %tenant_id, user = %admin, "tenant initialized");
                Ok(())
            }
            // Lost the race against a concurrent bootstrap.
            Err(StoreError::VersionConflict(_)) => Err(DomainError::AlreadyInitialized.into()),
            Err(err) => Err(err.into()),
        }
    }

    /// Verify credentials and issue an access token.
    ///
    /// Unknown users and wrong passwords fail identically. Users whose password
    /// has expired still get a token, which is only good for changing it.
    pub fn login(&self, identifier: &UserIdentifier, password: &Password) -> ServiceResult<Authentication> {
        let tenant_id = Self::scope()?.tenant_id;
        let now = self.clock.now();

        let record = self.read("get_user", || self.store.get_user(tenant_id, identifier))?;
        let verified = match &record {
            Some(user) => self.hasher.verify(password, &user.record.password_hash),
            None => {
                // Keep the work done for unknown users comparable to a real check.
                let _ = self.hasher.hash(password);
                false
            }
        };

        let user = match record {
            Some(user) if verified => user.into_record(),
            _ => {
                debug!(tenant_id = %tenant_id, user = %identifier, "login rejected");
                return Err(DomainError::Unauthenticated.into());
            }
        };

        let authentication = self
            .tokens
            .issue(tenant_id, &user, now, self.policy.expires_at(&user))?;

        self.mutate(tenant_id, None, "login", || {
            Ok(Plan::new(
                vec![],
                vec![IdentityEvent::Authenticated(UserAuthenticated {
                    user: user.identifier.clone(),
                    occurred_at: now,
                })],
                (),
            ))
        })?;

        info!(
            tenant_id = %tenant_id,
            user = %user.identifier,
            password_expired = self.policy.is_expired(&user, now),
            "user authenticated"
        );
        Ok(authentication)
    }

    /// Revoke the caller's current token. Allowed while the password is expired.
    pub fn logout(&self) -> ServiceResult<()> {
        let caller = self.authenticate()?;
        let now = self.clock.now();

        self.tokens.revoke(&caller.context, now);

        let user = caller.context.user.clone();
        self.mutate(caller.tenant_id, None, "logout", || {
            Ok(Plan::new(
                vec![],
                vec![IdentityEvent::LoggedOut(UserLoggedOut {
                    user: user.clone(),
                    occurred_at: now,
                })],
                (),
            ))
        })?;

        info!(tenant_id = %caller.tenant_id, user = %user, "user logged out");
        Ok(())
    }
}

