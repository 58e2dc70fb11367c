//! Identity service façade.
//!
//! Every operation follows the same pipeline:
//!
//! ```text
//! CallScope (tenant + credentials)
//!   ↓
//! 1. Validate the bearer token               → Unauthenticated
//!   ↓
//! 2. Authorize against the caller's live role → Forbidden
//!   ↓
//! 3. Enforce the password lifecycle           → PasswordExpired
//!   ↓
//! 4. Plan record writes + events, re-check the token, commit atomically
//!    (version conflicts re-read and re-plan)
//! ```
//!
//! Login and bootstrap skip steps 1-3. Self password change and logout skip
//! steps 2-3. Events are written to the tenant outbox in the same commit as
//! the mutation and reach the bus through the `OutboxRelay`; the caller never
//! waits on delivery.

mod roles;
mod session;
mod users;

use std::sync::Arc;

use tracing::{debug, info};

use sentinel_auth::{
    CallContext, CallScope, Credentials, IdentityEvent, JwtTokenCodec, Password, PasswordHasher, PasswordPolicy, Permission, Requirement, RoleIdentifier, TokenCodec, TokenError,
    TokenService, UserContext, UserIdentifier, UserRecord, authorize, explain_authorization,
};
use sentinel_core::{Clock, DomainError, SystemClock, TenantId, Versioned};

use crate::config::IdentityConfig;
use crate::error::{ServiceError, ServiceResult};
use crate::retry::{RetryConfig, retry_transient};
use crate::store::{IdentityStore, RecordWrite, StoreError, UncommittedEvent};

/// Re-plans allowed after optimistic version conflicts before giving up.
const MAX_COMMIT_ATTEMPTS: u32 = 8;

/// An authenticated caller, resolved against the store.
#[derive(Debug, Clone)]
struct Caller {
    tenant_id: TenantId,
    token: String,
    context: UserContext,
    record: Versioned<UserRecord>,
}

/// Planned outcome of a mutation attempt.
struct Plan<T> {
    writes: Vec<RecordWrite>,
    events: Vec<IdentityEvent>,
    output: T,
}

impl<T> Plan<T> {
    fn new(writes: Vec<RecordWrite>, events: Vec<IdentityEvent>, output: T) -> Self {
        Self {
            writes,
            events,
            output,
        }
    }
}

pub struct IdentityService<S, C = JwtTokenCodec> {
    store: S,
    tokens: TokenService<C>,
    hasher: Arc<dyn PasswordHasher>,
    policy: PasswordPolicy,
    clock: Arc<dyn Clock>,
    retry: RetryConfig,
}

impl<S> IdentityService<S, JwtTokenCodec>
where
    S: IdentityStore,
{
    /// Build the service with HS256 tokens and Argon2id password hashing from `config`.
    pub fn new(store: S, config: &IdentityConfig) -> ServiceResult<Self> {
        config.validate()?;

        let codec = JwtTokenCodec::hs256(config.token.signing_secret.as_bytes(), config.token.issuer.clone());
        let tokens = TokenService::new(codec, config.token.ttl()?)?;
        let hasher = config.password.hasher()?;

        info!(
            issuer = %config.token.issuer,
            ttl_seconds = config.token.ttl_seconds,
            password_expires_in_days = config.password.expires_in_days,
            read_consistency = ?config.store.read_consistency,
            write_consistency = ?config.store.write_consistency,
            delete_consistency = ?config.store.delete_consistency,
            "identity service configured"
        );

        Ok(Self::from_parts(
            store,
            tokens,
            Arc::new(hasher),
            config.password.policy(),
            Arc::new(SystemClock),
            config.retry.to_retry_config(),
        ))
    }
}

impl<S, C> IdentityService<S, C>
where
    S: IdentityStore,
    C: TokenCodec,
{
    pub fn from_parts(
        store: S,
        tokens: TokenService<C>,
        hasher: Arc<dyn PasswordHasher>,
        policy: PasswordPolicy,
        clock: Arc<dyn Clock>,
        retry: RetryConfig,
    ) -> Self {
        Self {
            store,
            tokens,
            hasher,
            policy,
            clock,
            retry,
        }
    }

    /// Replace the time source (tests move time deterministically).
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn password_policy(&self) -> PasswordPolicy {
        self.policy
    }

    // ─────────────────────────────────────────────────────────────────────
    // Pipeline helpers
    // ─────────────────────────────────────────────────────────────────────

    fn scope() -> ServiceResult<CallContext> {
        CallScope::current().ok_or(ServiceError::Domain(DomainError::Unauthenticated))
    }

    fn read<T>(&self, operation: &str, f: impl FnMut() -> Result<T, StoreError>) -> ServiceResult<T> {
        retry_transient(&self.retry, operation, f).map_err(ServiceError::from)
    }

    fn hash(&self, password: &Password) -> ServiceResult<sentinel_auth::PasswordHash> {
        password.validate()?;
        Ok(self.hasher.hash(password)?)
    }

    /// Step 1: resolve the scope's bearer token to a live user.
    fn authenticate(&self) -> ServiceResult<Caller> {
        let scope = Self::scope()?;
        let (claimed, token) = match scope.credentials {
            Credentials::Guest => return Err(TokenError::Missing.into()),
            Credentials::Bearer { user, token } => (user, token),
        };

        let context = self.tokens.validate(scope.tenant_id, &token, self.clock.now())?;
        if context.user != claimed {
            debug!(tenant_id = %scope.tenant_id, user = %claimed, "token subject does not match caller");
            return Err(DomainError::Unauthenticated.into());
        }

        let record = self
            .read("get_user", || self.store.get_user(scope.tenant_id, &context.user))?
            .ok_or(DomainError::Unauthenticated)?;

        Ok(Caller {
            tenant_id: scope.tenant_id,
            token,
            context,
            record,
        })
    }

    /// Steps 1-3 for an operation guarded by `requirement`.
    fn guard(&self, requirement: Requirement, acting_on: Option<&UserIdentifier>) -> ServiceResult<Caller> {
        let caller = self.authenticate()?;

        let permissions = self.role_permissions(caller.tenant_id, &caller.record.record.role)?;
        if authorize(&caller.context, &permissions, &requirement, acting_on).is_err() {
            let explanation = explain_authorization(&caller.context, &permissions, &requirement, acting_on);
            debug!(
                tenant_id = %caller.tenant_id,
                user = %caller.context.user,
                role = %caller.record.record.role,
                requirement = %requirement,
                denial = ?explanation.denial,
                "authorization denied"
            );
            return Err(DomainError::forbidden(explanation.reason).into());
        }

        self.policy.ensure_current(&caller.record.record, self.clock.now())?;
        Ok(caller)
    }

    /// Permissions of `role` as currently stored. A missing role grants nothing.
    fn role_permissions(&self, tenant_id: TenantId, role: &RoleIdentifier) -> ServiceResult<Vec<Permission>> {
        Ok(self
            .read("get_role", || self.store.get_role(tenant_id, role))?
            .map(|r| r.record.permissions)
            .unwrap_or_default())
    }

    /// Step 4: plan, re-check the caller's token, commit. Re-plans on version conflicts.
    fn mutate<T>(
        &self,
        tenant_id: TenantId,
        caller: Option<&Caller>,
        operation: &'static str,
        mut plan: impl FnMut() -> ServiceResult<Plan<T>>,
    ) -> ServiceResult<T> {
        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let Plan {
                writes,
                events,
                output,
            } = plan()?;

            // A token that expired or was revoked while planning must not commit.
            if let Some(caller) = caller {
                self.tokens.validate(tenant_id, &caller.token, self.clock.now())?;
            }

            let outbox = events
                .iter()
                .map(UncommittedEvent::from_typed)
                .collect::<Result<Vec<_>, _>>()?;

            match retry_transient(&self.retry, operation, || {
                self.store.commit(tenant_id, writes.clone(), outbox.clone())
            }) {
                Ok(_) => return Ok(output),
                Err(StoreError::VersionConflict(msg)) => {
                    debug!(tenant_id = %tenant_id, operation, attempt, reason = %msg, "version conflict, re-planning");
                }
                Err(err) => return Err(err.into()),
            }
        }

        Err(DomainError::conflict(format!("{operation}: too much contention, gave up after {MAX_COMMIT_ATTEMPTS} attempts")).into())
    }
}
