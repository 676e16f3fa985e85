//! Mock clock for testing.

use crate::application::ports::{Clock, Sleep};
use crate::domain::time::TimePoint;
use std::sync::{Arc, Mutex, MutexGuard};

#[cfg(feature = "async")]
use crate::application::ports::SleepFuture;

/// Mock clock for testing.
///
/// Allows tests to control time progression explicitly, enabling deterministic
/// testing of gates, schedulers and windowed stores. Works with any
/// [`TimePoint`]: use `u64` ticks for scenario tests or `Instant` when a test
/// needs to mix with real durations.
///
/// The clock is also a [`Sleep`] adapter: sleeping advances the clock by the
/// requested span and returns immediately, so every wait path runs without
/// real delays.
///
/// # Examples
///
/// ```
/// use tempo_governor::infrastructure::mocks::MockClock;
/// use tempo_governor::application::ports::{Clock, Sleep};
///
/// let clock = MockClock::new(0u64);
///
/// // Time starts at the specified point
/// assert_eq!(clock.now(), 0);
///
/// // Advance time explicitly
/// clock.advance(10);
/// assert_eq!(clock.now(), 10);
///
/// // Sleeping moves time forward too
/// clock.sleep(5);
/// assert_eq!(clock.now(), 15);
///
/// // Or set to a specific point
/// clock.set(100);
/// assert_eq!(clock.now(), 100);
/// ```
///
/// # Thread Safety
///
/// `MockClock` is thread-safe and can be cloned to share across threads.
/// All clones share the same underlying time value, so advancing time in
/// one clone affects all clones.
///
/// ```
/// use tempo_governor::infrastructure::mocks::MockClock;
/// use tempo_governor::application::ports::Clock;
/// use std::time::{Duration, Instant};
/// use std::thread;
///
/// let start = Instant::now();
/// let clock = MockClock::new(start);
/// let clock_clone = clock.clone();
///
/// let handle = thread::spawn(move || {
///     clock_clone.advance(Duration::from_secs(5));
/// });
///
/// handle.join().unwrap();
/// assert_eq!(clock.now(), start + Duration::from_secs(5));
/// ```
#[derive(Debug, Clone)]
pub struct MockClock<T> {
    current_time: Arc<Mutex<T>>,
}

impl<T: TimePoint> MockClock<T> {
    /// Create a mock clock starting at a specific time point.
    pub fn new(start: T) -> Self {
        Self {
            current_time: Arc::new(Mutex::new(start)),
        }
    }

    /// Advance the clock by a span.
    ///
    /// # Panics
    /// Panics if the time point overflows.
    pub fn advance(&self, span: T::Span) {
        let mut time = self.lock();
        *time = time
            .checked_add(span)
            .expect("MockClock overflowed while advancing");
    }

    /// Set the clock to a specific time point, forwards or backwards.
    pub fn set(&self, point: T) {
        *self.lock() = point;
    }

    fn lock(&self) -> MutexGuard<'_, T> {
        self.current_time
            .lock()
            .expect("MockClock mutex poisoned - a test thread panicked while holding the lock")
    }
}

impl<T: TimePoint> Clock for MockClock<T> {
    type Instant = T;

    fn now(&self) -> T {
        *self.lock()
    }
}

impl<T: TimePoint> Sleep<T::Span> for MockClock<T> {
    fn sleep(&self, span: T::Span) {
        self.advance(span);
    }

    #[cfg(feature = "async")]
    fn sleep_async(&self, span: T::Span) -> SleepFuture<'_> {
        Box::pin(async move {
            self.advance(span);
            // Let other tasks observe the new time before resuming.
            tokio::task::yield_now().await;
        })
    }
}
