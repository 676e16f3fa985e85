//! Domain layer - pure temporal logic with no runtime dependencies.
//!
//! This layer contains the value types the rest of the crate is built from:
//! - Time points and spans
//! - Intervals and Allen's interval relations
//! - Call events and order-independent aggregators
//! - The explicit invocation contract
//!
//! All types in this layer are pure and easily testable.

pub mod aggregate;
pub mod event;
pub mod interval;
pub mod invocable;
pub mod time;
