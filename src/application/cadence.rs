//! After-the-fact cadence checking.
//!
//! Where a [`RateGate`](crate::application::gate::RateGate) stops calls that
//! come too early, a [`CadenceMonitor`] flags calls that complete too late.
//! The call has already happened by then, so the violation carries its value.

use crate::application::gate::{GateConfig, InitialPolicy};
use crate::application::ports::Clock;
use crate::domain::time::TimePoint;
use std::fmt;
use std::sync::{Mutex, PoisonError};

/// A call that completed later than the expected cadence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverLimit<S, V> {
    /// Time since the previous completion
    pub elapsed: S,
    /// The configured period
    pub expected: S,
    /// What the late call produced
    pub value: V,
}

impl<S, V> OverLimit<S, V> {
    /// Take the produced value, discarding the timing information.
    pub fn into_value(self) -> V {
        self.value
    }
}

impl<S: fmt::Debug, V> fmt::Display for OverLimit<S, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "completed after {:?}, expected at most {:?}",
            self.elapsed, self.expected
        )
    }
}

impl<S: fmt::Debug, V: fmt::Debug> std::error::Error for OverLimit<S, V> {}

/// Tracks completion times and reports calls that exceed the period.
///
/// The last completion always advances, whether or not the cadence held.
#[derive(Debug)]
pub struct CadenceMonitor<T: TimePoint> {
    period: T::Span,
    last: Mutex<Option<T>>,
}

impl<T: TimePoint> CadenceMonitor<T> {
    /// Create a monitor sharing a gate's configuration.
    ///
    /// With [`InitialPolicy::PreventBurst`] the clock is read once here and
    /// the first completion is measured from construction. Otherwise the
    /// first completion is never late.
    pub fn new(config: GateConfig<T::Span>, clock: &dyn Clock<Instant = T>) -> Self {
        let last = match config.initial_policy() {
            InitialPolicy::ForceImmediate => None,
            InitialPolicy::PreventBurst => Some(clock.now()),
        };
        Self {
            period: config.period(),
            last: Mutex::new(last),
        }
    }

    /// Record a completion at `now` carrying `value`.
    ///
    /// # Errors
    /// Returns [`OverLimit`] with the value when more than one period passed
    /// since the previous completion.
    pub fn complete<V>(&self, now: T, value: V) -> Result<V, OverLimit<T::Span, V>> {
        let previous = {
            let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
            let previous = *last;
            if previous.map_or(true, |prev| now > prev) {
                *last = Some(now);
            }
            previous
        };

        match previous {
            Some(prev) => {
                let elapsed = now.saturating_since(prev);
                if elapsed > self.period {
                    tracing::debug!(?elapsed, expected = ?self.period, "cadence exceeded");
                    return Err(OverLimit {
                        elapsed,
                        expected: self.period,
                        value,
                    });
                }
                Ok(value)
            }
            None => Ok(value),
        }
    }

    /// Time of the last completion, if any.
    pub fn last(&self) -> Option<T> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// The expected cadence.
    pub fn period(&self) -> T::Span {
        self.period
    }
}
