use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::{Duration as ChronoDuration, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use proptest::prelude::*;
use serde_json::Value as JsonValue;
use uuid::Uuid;

use sentinel_auth::{
    CallScope, CallScopeGuard, OPERATION_AUTHENTICATE, OPERATION_POST_ROLE, OPERATION_POST_USER,
    OPERATION_PUT_USER_PASSWORD, OPERATION_PUT_USER_ROLEIDENTIFIER, Password, Permission, PermittableGroupId,
    Role, RoleIdentifier, TokenClaims, UserIdentifier, UserWithPassword,
};
use sentinel_core::TenantId;
use sentinel_events::{EventEnvelope, EventRecorder, InMemoryEventBus};
use sentinel_infra::{ErrorKind, IdentityConfig, IdentityService, InMemoryIdentityStore, OutboxRelay, WorkerHandle};

const SIGNING_SECRET: &str = "component-secret";
const ADMIN_PASSWORD: &str = "golden_osiris";
const AHMES_PASSWORD: &str = "fractions";
const AHMES_FRIENDS_PASSWORD: &str = "sekhem";
const EVENT_WAIT: Duration = Duration::from_secs(5);

/// A freshly provisioned tenant with its event relay running.
struct TestTenant {
    service: IdentityService<Arc<InMemoryIdentityStore>>,
    recorder: EventRecorder,
    tenant_id: TenantId,
    relay: Option<WorkerHandle>,
}

impl TestTenant {
    fn provision() -> Self {
        sentinel_observability::init_for_tests();

        let mut config = IdentityConfig::with_secrets(SIGNING_SECRET, "component-pepper");
        config.password.hash_memory_kib = 64;
        config.password.hash_iterations = 1;
        let store = Arc::new(InMemoryIdentityStore::new());
        let bus = Arc::new(InMemoryEventBus::<EventEnvelope<JsonValue>>::new());
        let recorder = EventRecorder::attach(&bus).expect("failed to attach recorder");
        let relay = OutboxRelay::new(store.clone(), bus, config.outbox.batch_size)
            .spawn("component-relay", config.outbox.poll_interval())
            .expect("failed to spawn relay");
        let service = IdentityService::new(store, &config).expect("invalid config");

        let tenant_id = TenantId::new();
        {
            let _guest = CallScope::guest(tenant_id);
            service
                .initialize(Password::new(ADMIN_PASSWORD))
                .expect("failed to initialize tenant");
        }

        Self {
            service,
            recorder,
            tenant_id,
            relay: Some(relay),
        }
    }

    fn event_observed(&self, event_type: &str, subject: &str) -> bool {
        self.recorder.wait(self.tenant_id, event_type, subject, EVENT_WAIT)
    }

    fn log_in(&self, user: &str, password: &str) -> CallScopeGuard {
        let token = {
            let _guest = CallScope::guest(self.tenant_id);
            self.service
                .login(&UserIdentifier::new(user), &Password::new(password))
                .unwrap_or_else(|e| panic!("login of {user} failed: {e}"))
                .access_token
        };
        assert!(self.event_observed(OPERATION_AUTHENTICATE, user));
        CallScope::user(self.tenant_id, UserIdentifier::new(user), token)
    }

    fn create_user_with_nonexpired_password(&self, user: &str, role: &str, password: &str) {
        {
            let _antony = self.log_in("antony", ADMIN_PASSWORD);
            self.service
                .create_user(UserWithPassword::new(user, role, password))
                .unwrap();
            assert!(self.event_observed(OPERATION_POST_USER, user));
        }

        let _user = self.log_in(user, password);
        self.service
            .change_user_password(&UserIdentifier::new(user), Password::new(password))
            .unwrap();
        assert!(self.event_observed(OPERATION_PUT_USER_PASSWORD, user));
    }
}

impl Drop for TestTenant {
    fn drop(&mut self) {
        if let Some(relay) = self.relay.take() {
            relay.shutdown();
        }
    }
}

fn mint_token(secret: &str, tenant_id: TenantId, user: &str, role: &str) -> String {
    let now = Utc::now();
    let claims = TokenClaims {
        iss: "sentinel".to_string(),
        sub: UserIdentifier::new(user),
        tenant_id,
        role: RoleIdentifier::new(role),
        jti: Uuid::now_v7(),
        issued_at: now,
        expires_at: now + ChronoDuration::minutes(10),
    };

    jsonwebtoken::encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )
    .expect("failed to encode jwt")
}

fn provision_scribes(tenant: &TestTenant) {
    let _antony = tenant.log_in("antony", ADMIN_PASSWORD);
    tenant
        .service
        .create_role(Role::new(
            RoleIdentifier::new("scribe-1"),
            vec![Permission::all(PermittableGroupId::ROLE_MANAGEMENT)],
        ))
        .unwrap();
    tenant
        .service
        .create_role(Role::new(
            RoleIdentifier::new("scribe-2"),
            vec![Permission::all(PermittableGroupId::SELF_MANAGEMENT)],
        ))
        .unwrap();
    assert!(tenant.event_observed(OPERATION_POST_ROLE, "scribe-1"));
    assert!(tenant.event_observed(OPERATION_POST_ROLE, "scribe-2"));
}

#[test]
fn administrator_can_act_right_after_bootstrap() -> anyhow::Result<()> {
    let tenant = TestTenant::provision();
    let _antony = tenant.log_in("antony", ADMIN_PASSWORD);

    let users = tenant.service.list_users().context("administrator lists users")?;
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].identifier.as_str(), "antony");
    assert_eq!(users[0].role.as_str(), "pharaoh");
    Ok(())
}

#[test]
fn scribe_gains_role_management_when_reassigned() {
    let tenant = TestTenant::provision();
    provision_scribes(&tenant);
    tenant.create_user_with_nonexpired_password("Ahmes1", "scribe-2", AHMES_PASSWORD);

    {
        let _ahmes = tenant.log_in("Ahmes1", AHMES_PASSWORD);
        let err = tenant
            .service
            .create_role(Role::new(RoleIdentifier::new("scribe-3"), vec![]))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Forbidden);

        // Self-management is always granted.
        let me = tenant.service.get_user(&UserIdentifier::new("Ahmes1")).unwrap();
        assert_eq!(me.role.as_str(), "scribe-2");
    }

    {
        let _antony = tenant.log_in("antony", ADMIN_PASSWORD);
        tenant
            .service
            .change_user_role(&UserIdentifier::new("Ahmes1"), &RoleIdentifier::new("scribe-1"))
            .unwrap();
        assert!(tenant.event_observed(OPERATION_PUT_USER_ROLEIDENTIFIER, "Ahmes1"));
    }

    let _ahmes = tenant.log_in("Ahmes1", AHMES_PASSWORD);
    tenant
        .service
        .create_role(Role::new(RoleIdentifier::new("scribe-3"), vec![]))
        .unwrap();
    assert!(tenant.event_observed(OPERATION_POST_ROLE, "scribe-3"));

    let permissions = tenant
        .service
        .get_user_permissions(&UserIdentifier::new("Ahmes1"))
        .unwrap();
    let groups: Vec<_> = permissions.iter().map(|p| p.group().clone()).collect();
    assert!(groups.contains(&PermittableGroupId::ROLE_MANAGEMENT));
    assert!(groups.contains(&PermittableGroupId::SELF_MANAGEMENT));
}

#[test]
fn users_cannot_read_each_other_without_identity_management() {
    let tenant = TestTenant::provision();
    provision_scribes(&tenant);
    tenant.create_user_with_nonexpired_password("Ahmes1", "scribe-2", AHMES_PASSWORD);
    tenant.create_user_with_nonexpired_password("Ahmes2", "scribe-2", AHMES_FRIENDS_PASSWORD);

    let _ahmes = tenant.log_in("Ahmes1", AHMES_PASSWORD);
    let err = tenant.service.get_user(&UserIdentifier::new("Ahmes2")).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
    let err = tenant
        .service
        .change_user_password(&UserIdentifier::new("Ahmes2"), Password::new("hijacked"))
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Forbidden);
}

#[test]
fn forged_and_foreign_tokens_are_rejected() {
    let tenant = TestTenant::provision();

    {
        let forged = mint_token("not-the-secret", tenant.tenant_id, "antony", "pharaoh");
        let _forged = CallScope::user(tenant.tenant_id, UserIdentifier::new("antony"), forged);
        assert_eq!(tenant.service.list_users().unwrap_err().kind(), ErrorKind::Unauthenticated);
    }

    {
        let foreign = mint_token(SIGNING_SECRET, TenantId::new(), "antony", "pharaoh");
        let _foreign = CallScope::user(tenant.tenant_id, UserIdentifier::new("antony"), foreign);
        assert_eq!(tenant.service.list_users().unwrap_err().kind(), ErrorKind::Unauthenticated);
    }

    {
        // Correctly signed, but the caller claims to be someone else.
        let token = mint_token(SIGNING_SECRET, tenant.tenant_id, "antony", "pharaoh");
        let _spoofed = CallScope::user(tenant.tenant_id, UserIdentifier::new("Ahmes1"), token);
        assert_eq!(tenant.service.list_users().unwrap_err().kind(), ErrorKind::Unauthenticated);
    }

    let _guest = CallScope::guest(tenant.tenant_id);
    assert_eq!(tenant.service.list_users().unwrap_err().kind(), ErrorKind::Unauthenticated);
}

#[test]
fn tenants_are_isolated() -> anyhow::Result<()> {
    let first = TestTenant::provision();
    let second = TestTenant::provision();
    provision_scribes(&first);

    let _antony = second.log_in("antony", ADMIN_PASSWORD);
    let roles = second.service.list_roles().context("second tenant lists roles")?;
    assert_eq!(roles.len(), 1);
    assert!(roles[0].identifier.is_admin());

    let missing = second
        .service
        .get_role(&RoleIdentifier::new("scribe-1"))
        .expect_err("scribe-1 belongs to the first tenant");
    assert_eq!(missing.kind(), ErrorKind::NotFound);
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(16))]

    #[test]
    fn only_the_current_password_authenticates(
        password in "[a-zA-Z0-9_]{1,24}",
        guess in "[a-zA-Z0-9_]{1,24}",
    ) {
        let tenant = TestTenant::provision();
        provision_scribes(&tenant);
        {
            let _antony = tenant.log_in("antony", ADMIN_PASSWORD);
            tenant
                .service
                .create_user(UserWithPassword::new("Ahmes1", "scribe-2", password.as_str()))
                .unwrap();
        }

        let _guest = CallScope::guest(tenant.tenant_id);
        let attempt = tenant
            .service
            .login(&UserIdentifier::new("Ahmes1"), &Password::new(guess.as_str()));
        if guess == password {
            prop_assert!(attempt.is_ok());
        } else {
            prop_assert_eq!(attempt.unwrap_err().kind(), ErrorKind::Unauthenticated);
        }

        let correct = tenant
            .service
            .login(&UserIdentifier::new("Ahmes1"), &Password::new(password.as_str()))
            .unwrap();
        prop_assert!(correct.password_expiration.is_some());
    }
}
