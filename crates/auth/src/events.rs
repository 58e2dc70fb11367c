use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use sentinel_events::Event;

use crate::{RoleIdentifier, UserIdentifier};

pub const OPERATION_AUTHENTICATE: &str = "authenticate";
pub const OPERATION_LOGOUT: &str = "logout";
pub const OPERATION_POST_USER: &str = "post-user";
pub const OPERATION_PUT_USER_ROLEIDENTIFIER: &str = "put-user-roleidentifier";
pub const OPERATION_PUT_USER_PASSWORD: &str = "put-user-password";
pub const OPERATION_POST_ROLE: &str = "post-role";
pub const OPERATION_PUT_ROLE: &str = "put-role";
pub const OPERATION_DELETE_ROLE: &str = "delete-role";

// ─────────────────────────────────────────────────────────────────────────────
// Events
// ─────────────────────────────────────────────────────────────────────────────

/// A user logged in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAuthenticated {
    pub user: UserIdentifier,
    pub occurred_at: DateTime<Utc>,
}

/// A user revoked their current token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLoggedOut {
    pub user: UserIdentifier,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    pub user: UserIdentifier,
    pub role: RoleIdentifier,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRoleChanged {
    pub user: UserIdentifier,
    pub role: RoleIdentifier,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserPasswordChanged {
    pub user: UserIdentifier,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleCreated {
    pub role: RoleIdentifier,
    pub occurred_at: DateTime<Utc>,
}

/// The role's permission list was replaced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleChanged {
    pub role: RoleIdentifier,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleDeleted {
    pub role: RoleIdentifier,
    pub occurred_at: DateTime<Utc>,
}

/// All identity events. Each carries the identifier it is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum IdentityEvent {
    Authenticated(UserAuthenticated),
    LoggedOut(UserLoggedOut),
    UserCreated(UserCreated),
    UserRoleChanged(UserRoleChanged),
    UserPasswordChanged(UserPasswordChanged),
    RoleCreated(RoleCreated),
    RoleChanged(RoleChanged),
    RoleDeleted(RoleDeleted),
}

impl Event for IdentityEvent {
    fn event_type(&self) -> &'static str {
        match self {
            IdentityEvent::Authenticated(_) => OPERATION_AUTHENTICATE,
            IdentityEvent::LoggedOut(_) => OPERATION_LOGOUT,
            IdentityEvent::UserCreated(_) => OPERATION_POST_USER,
            IdentityEvent::UserRoleChanged(_) => OPERATION_PUT_USER_ROLEIDENTIFIER,
            IdentityEvent::UserPasswordChanged(_) => OPERATION_PUT_USER_PASSWORD,
            IdentityEvent::RoleCreated(_) => OPERATION_POST_ROLE,
            IdentityEvent::RoleChanged(_) => OPERATION_PUT_ROLE,
            IdentityEvent::RoleDeleted(_) => OPERATION_DELETE_ROLE,
        }
    }

    fn subject(&self) -> &str {
        match self {
            IdentityEvent::Authenticated(e) => e.user.as_str(),
            IdentityEvent::LoggedOut(e) => e.user.as_str(),
            IdentityEvent::UserCreated(e) => e.user.as_str(),
            IdentityEvent::UserRoleChanged(e) => e.user.as_str(),
            IdentityEvent::UserPasswordChanged(e) => e.user.as_str(),
            IdentityEvent::RoleCreated(e) => e.role.as_str(),
            IdentityEvent::RoleChanged(e) => e.role.as_str(),
            IdentityEvent::RoleDeleted(e) => e.role.as_str(),
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            IdentityEvent::Authenticated(e) => e.occurred_at,
            IdentityEvent::LoggedOut(e) => e.occurred_at,
            IdentityEvent::UserCreated(e) => e.occurred_at,
            IdentityEvent::UserRoleChanged(e) => e.occurred_at,
            IdentityEvent::UserPasswordChanged(e) => e.occurred_at,
            IdentityEvent::RoleCreated(e) => e.occurred_at,
            IdentityEvent::RoleChanged(e) => e.occurred_at,
            IdentityEvent::RoleDeleted(e) => e.occurred_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subject_is_the_user_or_role_identifier() {
        let now = Utc::now();
        let created = IdentityEvent::UserCreated(UserCreated {
            user: UserIdentifier::new("Ahmes1"),
            role: RoleIdentifier::new("scribe-2"),
            occurred_at: now,
        });
        assert_eq!(created.event_type(), OPERATION_POST_USER);
        assert_eq!(created.subject(), "Ahmes1");

        let role = IdentityEvent::RoleCreated(RoleCreated {
            role: RoleIdentifier::new("scribe-1"),
            occurred_at: now,
        });
        assert_eq!(role.event_type(), "post-role");
        assert_eq!(role.subject(), "scribe-1");
    }

    #[test]
    fn events_serialize_with_their_variant_name() {
        let event = IdentityEvent::UserPasswordChanged(UserPasswordChanged {
            user: UserIdentifier::new("Ahmes1"),
            occurred_at: Utc::now(),
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["UserPasswordChanged"]["user"], "Ahmes1");

        let back: IdentityEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
