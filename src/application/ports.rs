//! Ports (interfaces) for the application layer.
//!
//! In hexagonal architecture, ports define the interfaces that the application
//! layer needs. Infrastructure adapters implement these ports.

use crate::domain::time::{Span, TimePoint};
use std::fmt::Debug;

#[cfg(feature = "async")]
use std::{future::Future, pin::Pin};

/// Port for obtaining current time.
///
/// This abstraction allows gates, schedulers and stores to share one notion
/// of "now" without depending on a particular time source.
/// Infrastructure provides concrete implementations (SystemClock, MockClock).
pub trait Clock: Send + Sync + Debug {
    /// The time point type this clock produces.
    type Instant: TimePoint;

    /// Get the current time point.
    fn now(&self) -> Self::Instant;
}

/// Future returned by [`Sleep::sleep_async`].
#[cfg(feature = "async")]
pub type SleepFuture<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Port for suspending the caller for a span of time.
///
/// Blocking callers use [`Sleep::sleep`]; async callers use
/// [`Sleep::sleep_async`], which yields to the runtime instead of parking
/// the thread.
pub trait Sleep<S: Span>: Send + Sync + Debug {
    /// Block the current thread for `span`.
    fn sleep(&self, span: S);

    /// Suspend the current task for `span`.
    #[cfg(feature = "async")]
    fn sleep_async(&self, span: S) -> SleepFuture<'_>;
}
