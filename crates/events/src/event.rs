use chrono::{DateTime, Utc};

/// A domain event describing a committed state change.
///
/// Events are:
/// - **immutable** (treat them as facts)
/// - **versioned** (schema evolution)
/// - designed to be **append-only**
pub trait Event: Clone + core::fmt::Debug + Send + Sync + 'static {
    /// Stable event name/type identifier (e.g. "post-user").
    fn event_type(&self) -> &'static str;

    /// Identifier of the user or role the event is about.
    ///
    /// Together with the event type and tenant this forms the key consumers
    /// deduplicate and wait on.
    fn subject(&self) -> &str;

    /// Schema version for this event type.
    fn version(&self) -> u32;

    /// When the event occurred (business time).
    fn occurred_at(&self) -> DateTime<Utc>;
}
