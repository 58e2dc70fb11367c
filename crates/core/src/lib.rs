//! `sentinel-core` — shared building blocks for the identity service.
//!
//! This crate contains **pure** primitives (no infrastructure concerns).

pub mod clock;
pub mod error;
pub mod id;
pub mod version;

pub use clock::{Clock, ManualClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{EventId, TenantId};
pub use version::{ExpectedVersion, Versioned};
