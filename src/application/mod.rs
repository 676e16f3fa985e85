//! Application layer - orchestration of domain logic.
//!
//! This layer owns the mutable, time-dependent state:
//! - Rate gate and cadence monitor (decision making)
//! - Per-key gate registry
//! - Priority scheduler and its background driver
//! - Windowed event store and its observers
//! - Call governor (composition of gate and store)
//!
//! ## Ports
//!
//! The application layer defines ports (traits) that infrastructure
//! adapters must implement. This keeps the application layer independent
//! from infrastructure details.

pub mod cadence;
#[cfg(feature = "async")]
pub mod driver;
pub mod gate;
pub mod governor;
pub mod metrics;
#[cfg(feature = "async")]
pub mod observer;
pub mod ports;
pub mod registry;
pub mod scheduler;
pub mod store;
