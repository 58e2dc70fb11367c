use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use dashmap::DashMap;

use sentinel_auth::{Role, RoleIdentifier, UserIdentifier, UserRecord};
use sentinel_core::{ExpectedVersion, TenantId, Versioned};

use super::{IdentityStore, RecordWrite, StoreError, StoredEvent, UncommittedEvent};

/// A record slot. Deleted records keep a tombstone so versions never repeat.
#[derive(Debug, Clone)]
struct Slot<T> {
    version: u64,
    record: Option<T>,
}

impl<T: Clone> Slot<T> {
    /// Version used for expectation checks: tombstones count as absent.
    fn visible_version(&self) -> u64 {
        if self.record.is_some() { self.version } else { 0 }
    }

    fn live(&self) -> Option<Versioned<T>> {
        self.record.as_ref().map(|r| Versioned::new(self.version, r.clone()))
    }
}

#[derive(Debug, Default)]
struct Partition {
    users: BTreeMap<UserIdentifier, Slot<UserRecord>>,
    roles: BTreeMap<RoleIdentifier, Slot<Role>>,
    outbox: VecDeque<StoredEvent>,
    last_sequence: u64,
}

fn check<T: Clone>(slot: Option<&Slot<T>>, expected: ExpectedVersion, what: &str) -> Result<u64, StoreError> {
    let actual = slot.map(Slot::visible_version).unwrap_or(0);
    if !expected.matches(actual) {
        return Err(StoreError::VersionConflict(format!(
            "{what} (expected: {expected:?}, actual: {actual})"
        )));
    }
    Ok(slot.map(|s| s.version).unwrap_or(0) + 1)
}

/// In-memory identity store.
///
/// Tenants are sharded in a `DashMap`; each tenant partition has its own
/// `RwLock`, so tenants never contend with each other. Intended for tests/dev:
/// nothing survives a process restart.
#[derive(Debug, Default)]
pub struct InMemoryIdentityStore {
    partitions: DashMap<TenantId, Arc<RwLock<Partition>>>,
    injected_failures: AtomicU32,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` store calls fail with `StoreError::Unavailable`.
    pub fn inject_unavailable(&self, count: u32) {
        self.injected_failures.store(count, Ordering::SeqCst);
    }

    fn maybe_fail(&self) -> Result<(), StoreError> {
        let injected = self
            .injected_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
        match injected {
            Ok(_) => Err(StoreError::Unavailable("injected failure".to_string())),
            Err(_) => Ok(()),
        }
    }

    fn partition(&self, tenant_id: TenantId) -> Arc<RwLock<Partition>> {
        self.partitions.entry(tenant_id).or_default().clone()
    }

    fn existing(&self, tenant_id: TenantId) -> Option<Arc<RwLock<Partition>>> {
        self.partitions.get(&tenant_id).map(|p| p.clone())
    }

    fn read(partition: &RwLock<Partition>) -> Result<RwLockReadGuard<'_, Partition>, StoreError> {
        partition
            .read()
            .map_err(|_| StoreError::Unavailable("tenant partition lock poisoned".to_string()))
    }

    fn write(partition: &RwLock<Partition>) -> Result<RwLockWriteGuard<'_, Partition>, StoreError> {
        partition
            .write()
            .map_err(|_| StoreError::Unavailable("tenant partition lock poisoned".to_string()))
    }

    fn with_partition<T>(
        &self,
        tenant_id: TenantId,
        empty: T,
        f: impl FnOnce(&Partition) -> T,
    ) -> Result<T, StoreError> {
        self.maybe_fail()?;
        match self.existing(tenant_id) {
            Some(partition) => {
                let guard = Self::read(&partition)?;
                Ok(f(&guard))
            }
            None => Ok(empty),
        }
    }
}

impl IdentityStore for InMemoryIdentityStore {
    fn get_user(
        &self,
        tenant_id: TenantId,
        identifier: &UserIdentifier,
    ) -> Result<Option<Versioned<UserRecord>>, StoreError> {
        self.with_partition(tenant_id, None, |p| p.users.get(identifier).and_then(Slot::live))
    }

    fn list_users(&self, tenant_id: TenantId) -> Result<Vec<Versioned<UserRecord>>, StoreError> {
        self.with_partition(tenant_id, Vec::new(), |p| p.users.values().filter_map(Slot::live).collect())
    }

    fn get_role(
        &self,
        tenant_id: TenantId,
        identifier: &RoleIdentifier,
    ) -> Result<Option<Versioned<Role>>, StoreError> {
        self.with_partition(tenant_id, None, |p| p.roles.get(identifier).and_then(Slot::live))
    }

    fn list_roles(&self, tenant_id: TenantId) -> Result<Vec<Versioned<Role>>, StoreError> {
        self.with_partition(tenant_id, Vec::new(), |p| p.roles.values().filter_map(Slot::live).collect())
    }

    fn commit(
        &self,
        tenant_id: TenantId,
        writes: Vec<RecordWrite>,
        outbox: Vec<UncommittedEvent>,
    ) -> Result<Vec<StoredEvent>, StoreError> {
        self.maybe_fail()?;

        let partition = self.partition(tenant_id);
        let mut p = Self::write(&partition)?;

        // Validate every expectation before touching anything.
        let mut versions = Vec::with_capacity(writes.len());
        for write in &writes {
            let next = match write {
                RecordWrite::PutUser { record, expected } => check(
                    p.users.get(&record.identifier),
                    *expected,
                    &format!("user '{}'", record.identifier),
                )?,
                RecordWrite::PutRole { record, expected } => check(
                    p.roles.get(&record.identifier),
                    *expected,
                    &format!("role '{}'", record.identifier),
                )?,
                RecordWrite::DeleteRole { identifier, expected } => {
                    check(p.roles.get(identifier), *expected, &format!("role '{identifier}'"))?
                }
            };
            versions.push(next);
        }

        for (write, version) in writes.into_iter().zip(versions) {
            match write {
                RecordWrite::PutUser { record, .. } => {
                    p.users.insert(
                        record.identifier.clone(),
                        Slot {
                            version,
                            record: Some(record),
                        },
                    );
                }
                RecordWrite::PutRole { record, .. } => {
                    p.roles.insert(
                        record.identifier.clone(),
                        Slot {
                            version,
                            record: Some(record),
                        },
                    );
                }
                RecordWrite::DeleteRole { identifier, .. } => {
                    p.roles.insert(identifier, Slot { version, record: None });
                }
            }
        }

        let mut stored = Vec::with_capacity(outbox.len());
        for event in outbox {
            p.last_sequence += 1;
            let entry = StoredEvent {
                event_id: event.event_id,
                tenant_id,
                sequence_number: p.last_sequence,
                event_type: event.event_type,
                subject: event.subject,
                event_version: event.event_version,
                occurred_at: event.occurred_at,
                payload: event.payload,
            };
            p.outbox.push_back(entry.clone());
            stored.push(entry);
        }

        Ok(stored)
    }

    fn pending_events(&self, tenant_id: TenantId, limit: usize) -> Result<Vec<StoredEvent>, StoreError> {
        self.with_partition(tenant_id, Vec::new(), |p| p.outbox.iter().take(limit).cloned().collect())
    }

    fn acknowledge(&self, tenant_id: TenantId, up_to_sequence: u64) -> Result<(), StoreError> {
        self.maybe_fail()?;
        if let Some(partition) = self.existing(tenant_id) {
            let mut p = Self::write(&partition)?;
            while p
                .outbox
                .front()
                .is_some_and(|e| e.sequence_number <= up_to_sequence)
            {
                p.outbox.pop_front();
            }
        }
        Ok(())
    }

    fn tenants_with_pending(&self) -> Result<Vec<TenantId>, StoreError> {
        self.maybe_fail()?;
        let mut tenants = Vec::new();
        for entry in self.partitions.iter() {
            if !Self::read(entry.value())?.outbox.is_empty() {
                tenants.push(*entry.key());
            }
        }
        Ok(tenants)
    }
}
