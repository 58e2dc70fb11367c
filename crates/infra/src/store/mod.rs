//! Persistence collaborator for tenant-scoped user and role records.
//!
//! ## Model
//!
//! Every record is stored with a version. Version `0` means "absent"; the
//! first write produces version `1` and every later write (or delete) bumps
//! it. Writers send back the version they read (`ExpectedVersion`), so two
//! racing updates of the same record cannot both succeed.
//!
//! ## Transactional outbox
//!
//! `commit()` applies a batch of record writes **and** appends the domain
//! events describing them, atomically. An event can therefore never be
//! observed for a mutation that did not commit, and a committed mutation
//! never loses its event. The outbox relay later drains pending events to the
//! bus (`pending_events` / `acknowledge`).
//!
//! ## Errors
//!
//! - `VersionConflict`: an expectation did not hold; nothing was written.
//! - `Unavailable`: transient backend failure (timeouts, lock poisoning).
//!   Callers may retry. Never used for "record not found", which is `Ok(None)`.

mod in_memory;

pub use in_memory::InMemoryIdentityStore;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

use sentinel_auth::{Role, RoleIdentifier, UserIdentifier, UserRecord};
use sentinel_core::{EventId, ExpectedVersion, TenantId, Versioned};
use sentinel_events::{Event, EventEnvelope};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("version conflict: {0}")]
    VersionConflict(String),

    #[error("store unavailable: {0}")]
    Unavailable(String),

    #[error("serialization failed: {0}")]
    Serialization(String),
}

impl StoreError {
    /// Transient failures worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Unavailable(_))
    }
}

/// One record mutation inside a `commit`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordWrite {
    PutUser {
        record: UserRecord,
        expected: ExpectedVersion,
    },
    PutRole {
        record: Role,
        expected: ExpectedVersion,
    },
    DeleteRole {
        identifier: RoleIdentifier,
        expected: ExpectedVersion,
    },
}

/// An event ready to be appended to a tenant outbox (no sequence number yet).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UncommittedEvent {
    pub event_id: EventId,
    pub event_type: String,
    pub subject: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,
    pub payload: JsonValue,
}

impl UncommittedEvent {
    /// Serialize a typed event, keeping the metadata consumers key on.
    pub fn from_typed<E>(event: &E) -> Result<Self, StoreError>
    where
        E: Event + Serialize,
    {
        let payload = serde_json::to_value(event)
            .map_err(|e| StoreError::Serialization(format!("payload serialization failed: {e}")))?;

        Ok(Self {
            event_id: EventId::new(),
            event_type: event.event_type().to_string(),
            subject: event.subject().to_string(),
            event_version: event.version(),
            occurred_at: event.occurred_at(),
            payload,
        })
    }
}

/// An outbox entry with its position in the tenant's outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEvent {
    pub event_id: EventId,
    pub tenant_id: TenantId,

    /// Monotonically increasing position in the tenant outbox, starting at 1.
    pub sequence_number: u64,

    pub event_type: String,
    pub subject: String,
    pub event_version: u32,
    pub occurred_at: DateTime<Utc>,

    pub payload: JsonValue,
}

impl StoredEvent {
    /// Convert into the envelope published on the bus.
    pub fn to_envelope(&self) -> EventEnvelope<JsonValue> {
        EventEnvelope::new(
            self.event_id,
            self.tenant_id,
            self.event_type.clone(),
            self.subject.clone(),
            self.sequence_number,
            self.occurred_at,
            self.payload.clone(),
        )
    }
}

/// Tenant-partitioned user/role store with a transactional outbox.
pub trait IdentityStore: Send + Sync {
    fn get_user(
        &self,
        tenant_id: TenantId,
        identifier: &UserIdentifier,
    ) -> Result<Option<Versioned<UserRecord>>, StoreError>;

    /// All users of a tenant, ordered by identifier.
    fn list_users(&self, tenant_id: TenantId) -> Result<Vec<Versioned<UserRecord>>, StoreError>;

    fn get_role(
        &self,
        tenant_id: TenantId,
        identifier: &RoleIdentifier,
    ) -> Result<Option<Versioned<Role>>, StoreError>;

    /// All roles of a tenant, ordered by identifier.
    fn list_roles(&self, tenant_id: TenantId) -> Result<Vec<Versioned<Role>>, StoreError>;

    /// Apply `writes` and append `outbox` atomically (all or nothing).
    ///
    /// Returns the appended outbox entries with their sequence numbers.
    fn commit(
        &self,
        tenant_id: TenantId,
        writes: Vec<RecordWrite>,
        outbox: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, StoreError>;

    /// Up to `limit` unacknowledged outbox entries, oldest first.
    fn pending_events(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<StoredEvent>, StoreError>;

    /// Mark every entry with `sequence_number <= up_to_sequence` as delivered.
    fn acknowledge(&self, tenant_id: TenantId, up_to_sequence: u64) -> Result<(), StoreError>;

    /// Tenants that currently have unacknowledged outbox entries.
    fn tenants_with_pending(&self) -> Result<Vec<TenantId>, StoreError>;
}

impl<S> IdentityStore for Arc<S>
where
    S: IdentityStore + ?Sized,
{
    fn get_user(
        &self,
        tenant_id: TenantId,
        identifier: &UserIdentifier,
    ) -> Result<Option<Versioned<UserRecord>>, StoreError> {
        (**self).get_user(tenant_id, identifier)
    }

    fn list_users(&self, tenant_id: TenantId) -> Result<Vec<Versioned<UserRecord>>, StoreError> {
        (**self).list_users(tenant_id)
    }

    fn get_role(
        &self,
        tenant_id: TenantId,
        identifier: &RoleIdentifier,
    ) -> Result<Option<Versioned<Role>>, StoreError> {
        (**self).get_role(tenant_id, identifier)
    }

    fn list_roles(&self, tenant_id: TenantId) -> Result<Vec<Versioned<Role>>, StoreError> {
        (**self).list_roles(tenant_id)
    }

    fn commit(
        &self,
        tenant_id: TenantId,
        writes: Vec<RecordWrite>,
        outbox: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).commit(tenant_id, writes, outbox)
    }

    fn pending_events(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
        (**self).pending_events(tenant_id, limit)
    }

    fn acknowledge(&self, tenant_id: TenantId, up_to_sequence: u64) -> Result<(), StoreError> {
        (**self).acknowledge(tenant_id, up_to_sequence)
    }

    fn tenants_with_pending(&self) -> Result<Vec<TenantId>, StoreError> {
        (**self).tenants_with_pending()
    }
}
