//! Idempotent event consumer with bounded waiting.
//!
//! `EventRecorder` drains a bus subscription on a background thread and keeps
//! the set of `(tenant, event type, subject)` keys it has observed. Duplicate
//! deliveries collapse onto the same key, so callers can wait for "the user
//! `Ahmes` was created" without caring how many times the relay delivered it.

use std::collections::HashSet;
use std::sync::mpsc::RecvTimeoutError;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError, Weak};
use std::thread;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use tracing::{debug, trace};

use sentinel_core::TenantId;

use crate::bus::{EventBus, Subscription};
use crate::EventEnvelope;

const POLL_TICK: Duration = Duration::from_millis(100);

type RecordKey = (TenantId, String, String);

/// A deduplicated observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub tenant_id: TenantId,
    pub event_type: String,
    pub subject: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct RecorderState {
    seen: HashSet<RecordKey>,
    events: Vec<RecordedEvent>,
    duplicates: u64,
}

#[derive(Debug, Default)]
struct Shared {
    state: Mutex<RecorderState>,
    changed: Condvar,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, RecorderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[derive(Debug)]
pub struct EventRecorder {
    shared: Arc<Shared>,
}

impl EventRecorder {
    /// Subscribe to `bus` and start recording on a background thread.
    ///
    /// Only messages published after this call are observed. The background
    /// thread stops once the recorder is dropped or the bus goes away.
    pub fn attach<B, M>(bus: &B) -> std::io::Result<Self>
    where
        B: EventBus<EventEnvelope<M>> + ?Sized,
        M: Send + 'static,
    {
        let shared = Arc::new(Shared::default());
        let subscription = bus.subscribe();
        let weak = Arc::downgrade(&shared);

        thread::Builder::new()
            .name("event-recorder".to_string())
            .spawn(move || record_loop(subscription, weak))?;

        Ok(Self { shared })
    }

    /// Record an envelope directly (used by in-process consumers and tests).
    pub fn record<M>(&self, envelope: &EventEnvelope<M>) {
        observe(&self.shared, envelope);
    }

    /// Wait up to `timeout` for `(event_type, subject)` to be observed in `tenant_id`.
    ///
    /// Returns immediately if it was already observed since the last `clear()`.
    pub fn wait(
        &self,
        tenant_id: TenantId,
        event_type: &str,
        subject: &str,
        timeout: Duration,
    ) -> bool {
        let key = (tenant_id, event_type.to_string(), subject.to_string());
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.lock();

        loop {
            if state.seen.contains(&key) {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                debug!(tenant_id = %tenant_id, event_type, subject, "timed out waiting for event");
                return false;
            }
            state = self
                .shared
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }

    /// Whether `(event_type, subject)` has been observed in `tenant_id`.
    pub fn contains(&self, tenant_id: TenantId, event_type: &str, subject: &str) -> bool {
        let key = (tenant_id, event_type.to_string(), subject.to_string());
        self.shared.lock().seen.contains(&key)
    }

    /// Deduplicated observations, in arrival order.
    pub fn events(&self) -> Vec<RecordedEvent> {
        self.shared.lock().events.clone()
    }

    /// Number of deliveries that collapsed onto an already observed key.
    pub fn duplicates(&self) -> u64 {
        self.shared.lock().duplicates
    }

    /// Forget everything observed so far.
    pub fn clear(&self) {
        let mut state = self.shared.lock();
        state.seen.clear();
        state.events.clear();
        state.duplicates = 0;
    }
}

fn observe<M>(shared: &Shared, envelope: &EventEnvelope<M>) {
    let key = (
        envelope.tenant_id(),
        envelope.event_type().to_string(),
        envelope.subject().to_string(),
    );

    let mut state = shared.lock();
    if state.seen.insert(key) {
        state.events.push(RecordedEvent {
            tenant_id: envelope.tenant_id(),
            event_type: envelope.event_type().to_string(),
            subject: envelope.subject().to_string(),
            occurred_at: envelope.occurred_at(),
        });
        shared.changed.notify_all();
    } else {
        state.duplicates += 1;
        trace!(
            event_type = envelope.event_type(),
            subject = envelope.subject(),
            "duplicate delivery ignored"
        );
    }
}

fn record_loop<M>(subscription: Subscription<EventEnvelope<M>>, shared: Weak<Shared>) {
    loop {
        match subscription.recv_timeout(POLL_TICK) {
            Ok(envelope) => match shared.upgrade() {
                Some(shared) => observe(&shared, &envelope),
                None => break,
            },
            Err(RecvTimeoutError::Timeout) => {
                if shared.strong_count() == 0 {
                    break;
                }
            }
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}
