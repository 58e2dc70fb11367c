use std::io;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Duration;

use serde_json::Value as JsonValue;
use tracing::{debug, warn};

use sentinel_core::TenantId;
use sentinel_events::{EventBus, EventEnvelope};

use crate::store::{IdentityStore, StoreError};

/// Handle to control and join a background worker.
#[derive(Debug)]
pub struct WorkerHandle {
    shutdown: mpsc::Sender<()>,
    join: Option<thread::JoinHandle<()>>,
}

impl WorkerHandle {
    /// Request graceful shutdown and wait for the worker to stop.
    pub fn shutdown(mut self) {
        let _ = self.shutdown.send(());
        if let Some(j) = self.join.take() {
            let _ = j.join();
        }
    }
}

/// Drains tenant outboxes onto the event bus.
///
/// - Entries are published in sequence order per tenant
/// - An entry is acknowledged only after it was published, so a crash between
///   the two re-publishes it (at-least-once; consumers deduplicate)
/// - A publish failure stops that tenant's batch; the rest is retried next tick
#[derive(Debug)]
pub struct OutboxRelay<S, B> {
    store: S,
    bus: B,
    batch_size: usize,
}

impl<S, B> OutboxRelay<S, B>
where
    S: IdentityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    pub fn new(store: S, bus: B, batch_size: usize) -> Self {
        Self {
            store,
            bus,
            batch_size: batch_size.max(1),
        }
    }

    /// Relay one batch per tenant. Returns the number of envelopes published.
    pub fn relay_once(&self) -> Result<usize, StoreError> {
        let mut published = 0;
        for tenant_id in self.store.tenants_with_pending()? {
            published += self.relay_tenant(tenant_id)?;
        }
        Ok(published)
    }

    fn relay_tenant(&self, tenant_id: TenantId) -> Result<usize, StoreError> {
        let pending = self.store.pending_events(tenant_id, self.batch_size)?;

        let mut last_published = None;
        for event in &pending {
            match self.bus.publish(event.to_envelope()) {
                Ok(()) => last_published = Some(event.sequence_number),
                Err(err) => {
                    warn!(
                        tenant_id = %tenant_id,
                        event_type = %event.event_type,
                        sequence_number = event.sequence_number,
                        error = ?err,
                        "event publication failed; will retry"
                    );
                    break;
                }
            }
        }

        let Some(up_to) = last_published else {
            return Ok(0);
        };
        self.store.acknowledge(tenant_id, up_to)?;

        let count = pending
            .iter()
            .take_while(|e| e.sequence_number <= up_to)
            .count();
        debug!(tenant_id = %tenant_id, count, up_to, "relayed outbox events");
        Ok(count)
    }
}

impl<S, B> OutboxRelay<S, B>
where
    S: IdentityStore + 'static,
    B: EventBus<EventEnvelope<JsonValue>> + 'static,
{
    /// Run the relay on a background thread, polling every `poll_interval`.
    ///
    /// On shutdown the relay makes one final pass so committed events are not
    /// left waiting for the next process.
    pub fn spawn(self, name: &str, poll_interval: Duration) -> io::Result<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
        let worker = name.to_string();

        let join = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || relay_loop(&worker, &self, shutdown_rx, poll_interval))?;

        Ok(WorkerHandle {
            shutdown: shutdown_tx,
            join: Some(join),
        })
    }
}

fn relay_loop<S, B>(
    name: &str,
    relay: &OutboxRelay<S, B>,
    shutdown_rx: mpsc::Receiver<()>,
    poll_interval: Duration,
) where
    S: IdentityStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    loop {
        if let Err(err) = relay.relay_once() {
            warn!(worker = name, error = %err, "outbox relay pass failed");
        }

        match shutdown_rx.recv_timeout(poll_interval) {
            Err(RecvTimeoutError::Timeout) => continue,
            Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    if let Err(err) = relay.relay_once() {
        warn!(worker = name, error = %err, "final outbox relay pass failed");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use chrono::Utc;

    use sentinel_auth::IdentityEvent;
    use sentinel_auth::events::{RoleCreated, UserPasswordChanged};
    use sentinel_auth::{RoleIdentifier, UserIdentifier};
    use sentinel_events::{EventRecorder, InMemoryBusError, InMemoryEventBus, Subscription};

    use super::*;
    use crate::store::{InMemoryIdentityStore, UncommittedEvent};

    type Bus = InMemoryEventBus<EventEnvelope<JsonValue>>;

    fn role_created(name: &str) -> UncommittedEvent {
        UncommittedEvent::from_typed(&IdentityEvent::RoleCreated(RoleCreated {
            role: RoleIdentifier::new(name),
            occurred_at: Utc::now(),
        }))
        .unwrap()
    }

    /// Fails every publish after the first `allowed`.
    struct FlakyBus {
        inner: Bus,
        allowed: AtomicUsize,
    }

    impl EventBus<EventEnvelope<JsonValue>> for FlakyBus {
        type Error = InMemoryBusError;

        fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
            let ok = self
                .allowed
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok();
            if ok { self.inner.publish(message) } else { Err(InMemoryBusError::Poisoned) }
        }

        fn subscribe(&self) -> Subscription<EventEnvelope<JsonValue>> {
            self.inner.subscribe()
        }
    }

    #[test]
    fn relay_publishes_in_order_and_acknowledges() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let bus = Arc::new(Bus::new());
        let sub = bus.subscribe();
        let tenant = TenantId::new();
        store
            .commit(tenant, vec![], vec![role_created("scribe-1"), role_created("scribe-2")])
            .unwrap();

        let relay = OutboxRelay::new(store.clone(), bus.clone(), 10);
        assert_eq!(relay.relay_once().unwrap(), 2);
        assert_eq!(relay.relay_once().unwrap(), 0);

        let first = sub.try_recv().unwrap();
        let second = sub.try_recv().unwrap();
        assert_eq!((first.subject(), first.sequence_number()), ("scribe-1", 1));
        assert_eq!((second.subject(), second.sequence_number()), ("scribe-2", 2));
        assert_eq!(first.tenant_id(), tenant);
        assert!(store.tenants_with_pending().unwrap().is_empty());
    }

    #[test]
    fn failed_publication_is_retried_without_losing_events() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let bus = Arc::new(FlakyBus {
            inner: Bus::new(),
            allowed: AtomicUsize::new(1),
        });
        let recorder = EventRecorder::attach(&bus).unwrap();
        let tenant = TenantId::new();
        store
            .commit(tenant, vec![], vec![role_created("scribe-1"), role_created("scribe-2")])
            .unwrap();

        let relay = OutboxRelay::new(store.clone(), bus.clone(), 10);
        assert_eq!(relay.relay_once().unwrap(), 1);
        assert_eq!(store.pending_events(tenant, 10).unwrap().len(), 1);

        bus.allowed.store(10, Ordering::SeqCst);
        assert_eq!(relay.relay_once().unwrap(), 1);
        assert!(recorder.wait(tenant, "post-role", "scribe-2", Duration::from_secs(2)));
    }

    #[test]
    fn redelivery_is_deduplicated_by_consumers() {
        let bus = Arc::new(Bus::new());
        let recorder = EventRecorder::attach(&bus).unwrap();
        let tenant = TenantId::new();
        let event = UncommittedEvent::from_typed(&IdentityEvent::UserPasswordChanged(UserPasswordChanged {
            user: UserIdentifier::new("Ahmes1"),
            occurred_at: Utc::now(),
        }))
        .unwrap();

        // Two stores holding the same event id simulate a crash between publish and ack.
        for _ in 0..2 {
            let store = Arc::new(InMemoryIdentityStore::new());
            store.commit(tenant, vec![], vec![event.clone()]).unwrap();
            OutboxRelay::new(store, bus.clone(), 10).relay_once().unwrap();
        }

        assert!(recorder.wait(tenant, "put-user-password", "Ahmes1", Duration::from_secs(2)));
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while recorder.duplicates() < 1 && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(recorder.events().len(), 1);
        assert_eq!(recorder.duplicates(), 1);
    }

    #[test]
    fn spawned_relay_delivers_and_shuts_down() {
        let store = Arc::new(InMemoryIdentityStore::new());
        let bus = Arc::new(Bus::new());
        let recorder = EventRecorder::attach(&bus).unwrap();
        let tenant = TenantId::new();

        let handle = OutboxRelay::new(store.clone(), bus.clone(), 10)
            .spawn("outbox-relay-test", Duration::from_millis(10))
            .unwrap();

        store.commit(tenant, vec![], vec![role_created("scribe-1")]).unwrap();
        assert!(recorder.wait(tenant, "post-role", "scribe-1", Duration::from_secs(2)));

        handle.shutdown();
    }
}
