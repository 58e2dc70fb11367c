//! Per-thread call scope.
//!
//! The transport layer resolves the tenant and the caller's credentials and
//! enters a scope; business operations read them from `CallScope::current()`
//! instead of taking them as arguments. Dropping the guard restores whatever
//! scope was active before, on every exit path including unwinding.

use std::cell::RefCell;
use std::marker::PhantomData;

use sentinel_core::TenantId;

use crate::UserIdentifier;

/// Credentials presented by the caller.
#[derive(Clone, PartialEq, Eq)]
pub enum Credentials {
    /// No token: only login and bootstrap are reachable.
    Guest,
    /// Bearer token claimed to belong to `user`.
    Bearer { user: UserIdentifier, token: String },
}

impl core::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Credentials::Guest => f.write_str("Guest"),
            Credentials::Bearer { user, .. } => f
                .debug_struct("Bearer")
                .field("user", user)
                .field("token", &"***")
                .finish(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallContext {
    pub tenant_id: TenantId,
    pub credentials: Credentials,
}

impl CallContext {
    pub fn guest(tenant_id: TenantId) -> Self {
        Self {
            tenant_id,
            credentials: Credentials::Guest,
        }
    }

    pub fn bearer(tenant_id: TenantId, user: UserIdentifier, token: impl Into<String>) -> Self {
        Self {
            tenant_id,
            credentials: Credentials::Bearer {
                user,
                token: token.into(),
            },
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<CallContext>> = const { RefCell::new(None) };
}

pub struct CallScope;

impl CallScope {
    /// Make `context` current until the returned guard is dropped.
    #[must_use = "the scope ends when the guard is dropped"]
    pub fn enter(context: CallContext) -> CallScopeGuard {
        let previous = CURRENT.with(|current| current.replace(Some(context)));
        CallScopeGuard {
            previous,
            _not_send: PhantomData,
        }
    }

    #[must_use = "the scope ends when the guard is dropped"]
    pub fn guest(tenant_id: TenantId) -> CallScopeGuard {
        Self::enter(CallContext::guest(tenant_id))
    }

    #[must_use = "the scope ends when the guard is dropped"]
    pub fn user(tenant_id: TenantId, user: UserIdentifier, token: impl Into<String>) -> CallScopeGuard {
        Self::enter(CallContext::bearer(tenant_id, user, token))
    }

    pub fn current() -> Option<CallContext> {
        CURRENT.with(|current| current.borrow().clone())
    }

    pub fn tenant() -> Option<TenantId> {
        CURRENT.with(|current| current.borrow().as_ref().map(|ctx| ctx.tenant_id))
    }
}

/// Restores the enclosing scope on drop. Bound to the thread that created it.
#[derive(Debug)]
pub struct CallScopeGuard {
    previous: Option<CallContext>,
    _not_send: PhantomData<*const ()>,
}

impl Drop for CallScopeGuard {
    fn drop(&mut self) {
        let previous = self.previous.take();
        // `try_with` tolerates drops during thread-local teardown.
        let _ = CURRENT.try_with(|current| {
            *current.borrow_mut() = previous;
        });
    }
}
