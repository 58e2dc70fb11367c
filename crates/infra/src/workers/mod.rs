//! Background workers.

pub mod outbox_relay;

pub use outbox_relay::{OutboxRelay, WorkerHandle};
