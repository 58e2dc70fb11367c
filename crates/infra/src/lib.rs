//! Infrastructure layer: persistence, event delivery, configuration and the
//! identity service façade.

pub mod config;
pub mod error;
pub mod retry;
pub mod service;
pub mod store;
pub mod workers;


pub use config::{ConfigError, ConsistencyLevel, IdentityConfig};
pub use error::{ErrorKind, ServiceError, ServiceResult};
pub use retry::{RetryConfig, retry_transient};
pub use service::IdentityService;
pub use store::{IdentityStore, InMemoryIdentityStore, RecordWrite, StoreError, StoredEvent, UncommittedEvent};
pub use workers::{OutboxRelay, WorkerHandle};
