//! Clock and sleep adapters backed by the operating system.
//!
//! # Testing
//!
//! See `MockClock` (in `crate::infrastructure::mocks`) for a controllable test
//! clock that also sleeps by advancing itself. Available with the
//! `test-helpers` feature or in test builds:
//!
//! ```toml
//! [dev-dependencies]
//! tempo-governor = { version = "*", features = ["test-helpers"] }
//! ```

use crate::application::ports::Clock;
use crate::application::ports::Sleep;
use std::time::{Duration, Instant};

#[cfg(feature = "async")]
use crate::application::ports::SleepFuture;

/// System clock implementation using `Instant::now()`.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl SystemClock {
    /// Create a new system clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for SystemClock {
    type Instant = Instant;

    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// Sleeps on the OS thread, or on the tokio timer in async contexts.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemSleeper;

impl SystemSleeper {
    /// Create a new system sleeper.
    pub fn new() -> Self {
        Self
    }
}

impl Sleep<Duration> for SystemSleeper {
    fn sleep(&self, span: Duration) {
        if !span.is_zero() {
            std::thread::sleep(span);
        }
    }

    #[cfg(feature = "async")]
    fn sleep_async(&self, span: Duration) -> SleepFuture<'_> {
        Box::pin(tokio::time::sleep(span))
    }
}
