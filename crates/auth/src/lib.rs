//! `sentinel-auth` — pure identity and access-control domain.
//!
//! This crate is intentionally decoupled from transport and storage: it holds
//! value records, password and token primitives, the authorization evaluator
//! and the identity domain events.

pub mod authorize;
pub mod claims;
pub mod context;
pub mod events;
pub mod identifier;
pub mod operations;
pub mod password;
pub mod permissions;
pub mod roles;
pub mod scope;
pub mod tokens;
pub mod user;

pub use authorize::{
    AuthorizationExplanation, DenialKind, Requirement, authorize, effective_permissions, explain_authorization,
};
pub use claims::{TokenClaims, TokenValidationError, validate_claims};
pub use context::{Principal, UserContext};
pub use events::{
    IdentityEvent, OPERATION_AUTHENTICATE, OPERATION_DELETE_ROLE, OPERATION_LOGOUT, OPERATION_POST_ROLE, OPERATION_POST_USER,
    OPERATION_PUT_ROLE, OPERATION_PUT_USER_PASSWORD, OPERATION_PUT_USER_ROLEIDENTIFIER,
};
pub use operations::AllowedOperation;
pub use password::{
    Argon2PasswordHasher, HashCost, Password, PasswordHash, PasswordHashError, PasswordHasher, PasswordPolicy,
};
pub use permissions::{Permission, PermittableGroupId};
pub use roles::{ADMIN_ROLE, Role, RoleIdentifier};
pub use scope::{CallContext, CallScope, CallScopeGuard, Credentials};
pub use tokens::{Authentication, JwtTokenCodec, TokenCodec, TokenError, TokenService};
pub use user::{ADMIN_USER, User, UserIdentifier, UserRecord, UserWithPassword};
