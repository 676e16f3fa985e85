//! Minimum-period rate gate.
//!
//! A [`RateGate`] enforces a minimum span between successive proceeds.
//! The read-decide-write step runs under a single lock, so two callers can
//! never both observe the same previous proceed and both go through.
//!
//! # Tie-breaking
//!
//! Decisions are fully serialized. When two callers decide at the same
//! instant, exactly one proceeds; the other sees zero elapsed time and
//! receives `Wait(period)`.

use crate::application::ports::Clock;
use crate::domain::time::{Span, TimePoint};
use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

/// How the gate treats the very first decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum InitialPolicy {
    /// The first call proceeds immediately, as if the previous proceed
    /// happened a full period ago.
    #[default]
    ForceImmediate,
    /// The gate starts closed, as if a call proceeded at construction.
    PreventBurst,
}

/// Error returned when gate configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateConfigError {
    /// Period must be greater than zero
    ZeroPeriod,
}

impl fmt::Display for GateConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GateConfigError::ZeroPeriod => write!(f, "period must be greater than 0"),
        }
    }
}

impl std::error::Error for GateConfigError {}

/// Configuration shared by [`RateGate`] and
/// [`CadenceMonitor`](crate::application::cadence::CadenceMonitor).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateConfig<S> {
    period: S,
    initial_policy: InitialPolicy,
}

impl<S: Span> GateConfig<S> {
    /// Create a config with the given minimum period.
    ///
    /// # Errors
    /// Returns `GateConfigError::ZeroPeriod` if `period` is zero.
    pub fn new(period: S) -> Result<Self, GateConfigError> {
        if period.is_zero() {
            return Err(GateConfigError::ZeroPeriod);
        }
        Ok(Self {
            period,
            initial_policy: InitialPolicy::default(),
        })
    }

    /// Set how the first decision is treated.
    pub fn with_initial_policy(mut self, policy: InitialPolicy) -> Self {
        self.initial_policy = policy;
        self
    }

    /// Minimum span between proceeds.
    pub fn period(&self) -> S {
        self.period
    }

    /// The configured initial policy.
    pub fn initial_policy(&self) -> InitialPolicy {
        self.initial_policy
    }
}

/// Outcome of a gate decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision<S> {
    /// The call may run now; the gate has recorded it
    Proceed,
    /// The call must wait this long before trying again
    Wait(S),
}

impl<S: Copy> GateDecision<S> {
    /// Check if the decision lets the call run.
    pub fn is_proceed(&self) -> bool {
        matches!(self, GateDecision::Proceed)
    }

    /// Remaining wait, if any.
    pub fn wait_time(&self) -> Option<S> {
        match self {
            GateDecision::Proceed => None,
            GateDecision::Wait(span) => Some(*span),
        }
    }
}

/// A call attempted before the period elapsed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnderLimit<S> {
    /// Time since the previous proceed
    pub elapsed: S,
    /// The configured period
    pub expected: S,
}

impl<S: Span> UnderLimit<S> {
    /// How long the caller must wait before the gate opens.
    pub fn remaining(&self) -> S {
        self.expected.saturating_sub(self.elapsed)
    }
}

impl<S: fmt::Debug> fmt::Display for UnderLimit<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "called after {:?}, expected at least {:?}",
            self.elapsed, self.expected
        )
    }
}

impl<S: fmt::Debug> std::error::Error for UnderLimit<S> {}

/// A stateful decision point enforcing a minimum period between proceeds.
///
/// # Example
/// ```
/// use tempo_governor::{GateConfig, GateDecision, RateGate};
/// use tempo_governor::infrastructure::mocks::MockClock;
/// use std::sync::Arc;
///
/// let clock = Arc::new(MockClock::new(0u64));
/// let gate: RateGate<u64> = RateGate::new(GateConfig::new(5).unwrap(), clock);
///
/// assert_eq!(gate.decide(0), GateDecision::Proceed);
/// assert_eq!(gate.decide(3), GateDecision::Wait(2));
/// assert_eq!(gate.decide(5), GateDecision::Proceed);
/// ```
#[derive(Debug)]
pub struct RateGate<T: TimePoint> {
    config: GateConfig<T::Span>,
    clock: Arc<dyn Clock<Instant = T>>,
    /// Time of the last proceed; `None` until the first one.
    last: Mutex<Option<T>>,
}

impl<T: TimePoint> RateGate<T> {
    /// Create a gate reading time from `clock`.
    ///
    /// With [`InitialPolicy::PreventBurst`] the clock is read once here to
    /// close the gate for the first period.
    pub fn new(config: GateConfig<T::Span>, clock: Arc<dyn Clock<Instant = T>>) -> Self {
        let last = match config.initial_policy {
            InitialPolicy::ForceImmediate => None,
            InitialPolicy::PreventBurst => Some(clock.now()),
        };
        Self {
            config,
            clock,
            last: Mutex::new(last),
        }
    }

    /// Decide whether a call at `now` may proceed.
    ///
    /// On `Proceed` the gate records `now` as the last proceed. A `now`
    /// earlier than the last proceed counts as zero elapsed time, so the
    /// recorded time never moves backwards.
    pub fn decide(&self, now: T) -> GateDecision<T::Span> {
        match self.try_proceed(now) {
            Ok(()) => GateDecision::Proceed,
            Err(under) => {
                let wait = under.remaining();
                tracing::debug!(?wait, elapsed = ?under.elapsed, "rate gate closed");
                GateDecision::Wait(wait)
            }
        }
    }

    /// Like [`RateGate::decide`], reporting a closed gate as an error.
    ///
    /// A rejection leaves the gate untouched.
    pub fn try_proceed(&self, now: T) -> Result<(), UnderLimit<T::Span>> {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let period = self.config.period;

        if let Some(prev) = *last {
            let elapsed = now.saturating_since(prev);
            if elapsed < period {
                return Err(UnderLimit {
                    elapsed,
                    expected: period,
                });
            }
        }

        *last = Some(now);
        Ok(())
    }

    /// Decide using the gate's own clock.
    pub fn decide_now(&self) -> GateDecision<T::Span> {
        self.decide(self.clock.now())
    }

    /// Try to proceed using the gate's own clock.
    pub fn try_proceed_now(&self) -> Result<(), UnderLimit<T::Span>> {
        self.try_proceed(self.clock.now())
    }

    /// Time of the last proceed, if any.
    pub fn last(&self) -> Option<T> {
        *self.last.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Check if a call at `now` would proceed, without recording anything.
    pub fn is_open_at(&self, now: T) -> bool {
        match self.last() {
            None => true,
            Some(prev) => now.saturating_since(prev) >= self.config.period,
        }
    }

    /// Minimum span between proceeds.
    pub fn period(&self) -> T::Span {
        self.config.period
    }

    /// The gate's configuration.
    pub fn config(&self) -> &GateConfig<T::Span> {
        &self.config
    }

    /// The clock this gate reads.
    pub fn clock(&self) -> &Arc<dyn Clock<Instant = T>> {
        &self.clock
    }
}
