//! Rate-governed invocation.
//!
//! A [`CallGovernor`] composes a [`RateGate`], a [`WindowedEventStore`] of
//! [`CallEvent`]s and, optionally, a [`CadenceMonitor`]:
//!
//! 1. The gate decides. A refused call either sleeps and retries once or is
//!    surfaced as [`GovernorError::UnderLimit`], depending on [`WaitPolicy`].
//!    Refused attempts record nothing.
//! 2. A `Called` event is recorded and the invocable runs.
//! 3. One `Returned` event is recorded per produced value, or a single failed
//!    `Returned` event if the call raised.
//! 4. If cadence checking is enabled, a late completion becomes
//!    [`GovernorError::OverLimit`], carrying the output.

use crate::application::cadence::CadenceMonitor;
use crate::application::gate::{RateGate, UnderLimit};
use crate::application::metrics::GovernorMetrics;
use crate::application::ports::Sleep;
use crate::application::store::{StoreError, WindowedEventStore};
use crate::domain::aggregate::Aggregator;
use crate::domain::event::CallEvent;
use crate::domain::invocable::{BlockingDeferredError, Invocable, InvocableKind, InvokeError, Output};
use crate::domain::time::TimePoint;
use std::fmt;
use std::sync::Arc;

/// What to do when the gate refuses a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum WaitPolicy {
    /// Sleep for the remaining period, then try once more
    BlockAndRetry,
    /// Return [`GovernorError::UnderLimit`] immediately
    #[default]
    RejectWithDuration,
}

/// Errors returned by [`CallGovernor`] invocations.
#[derive(Debug)]
pub enum GovernorError<T: TimePoint, V> {
    /// The call was refused because the period had not elapsed
    UnderLimit {
        /// Time since the previous proceed
        elapsed: T::Span,
        /// The configured period
        expected: T::Span,
    },
    /// The call completed later than the expected cadence
    OverLimit {
        /// Time since the previous completion
        elapsed: T::Span,
        /// The configured period
        expected: T::Span,
        /// What the call produced
        value: Output<V>,
    },
    /// The invocable failed
    Failure(InvokeError),
    /// The `Called` event could not be recorded, so the call did not run
    Record(StoreError<T>),
}

impl<T: TimePoint, V> GovernorError<T, V> {
    /// The output of a late call, if this is an `OverLimit`.
    pub fn into_value(self) -> Option<Output<V>> {
        match self {
            GovernorError::OverLimit { value, .. } => Some(value),
            _ => None,
        }
    }

    /// Check if the call was refused before running.
    pub fn is_under_limit(&self) -> bool {
        matches!(self, GovernorError::UnderLimit { .. })
    }
}

impl<T: TimePoint, V> From<UnderLimit<T::Span>> for GovernorError<T, V> {
    fn from(under: UnderLimit<T::Span>) -> Self {
        GovernorError::UnderLimit {
            elapsed: under.elapsed,
            expected: under.expected,
        }
    }
}

impl<T: TimePoint, V> fmt::Display for GovernorError<T, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GovernorError::UnderLimit { elapsed, expected } => {
                write!(f, "called after {:?}, expected at least {:?}", elapsed, expected)
            }
            GovernorError::OverLimit {
                elapsed, expected, ..
            } => write!(f, "completed after {:?}, expected at most {:?}", elapsed, expected),
            GovernorError::Failure(e) => write!(f, "governed call failed: {}", e),
            GovernorError::Record(e) => write!(f, "failed to record call: {}", e),
        }
    }
}

impl<T: TimePoint, V: fmt::Debug> std::error::Error for GovernorError<T, V> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            GovernorError::Failure(e) => Some(e.as_ref()),
            GovernorError::Record(e) => Some(e),
            _ => None,
        }
    }
}

/// Error returned when governor configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GovernorBuildError {
    /// `WaitPolicy::BlockAndRetry` needs a sleeper to wait with
    MissingSleeper,
}

impl fmt::Display for GovernorBuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GovernorBuildError::MissingSleeper => {
                write!(f, "block-and-retry wait policy requires a sleeper")
            }
        }
    }
}

impl std::error::Error for GovernorBuildError {}

/// Builder for [`CallGovernor`].
pub struct GovernorBuilder<T: TimePoint, A, V, G> {
    gate: Arc<RateGate<T>>,
    store: Arc<WindowedEventStore<T, CallEvent<A, V>, G>>,
    wait_policy: WaitPolicy,
    sleeper: Option<Arc<dyn Sleep<T::Span>>>,
    check_cadence: bool,
    metrics: Option<GovernorMetrics>,
}

impl<T, A, V, G> GovernorBuilder<T, A, V, G>
where
    T: TimePoint,
    G: Aggregator<CallEvent<A, V>>,
{
    /// Set what happens when the gate refuses a call.
    pub fn with_wait_policy(mut self, policy: WaitPolicy) -> Self {
        self.wait_policy = policy;
        self
    }

    /// Set how the governor waits under [`WaitPolicy::BlockAndRetry`].
    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleep<T::Span>>) -> Self {
        self.sleeper = Some(sleeper);
        self
    }

    /// Report completions later than the gate's period as
    /// [`GovernorError::OverLimit`].
    pub fn with_cadence_check(mut self) -> Self {
        self.check_cadence = true;
        self
    }

    /// Count outcomes into existing metrics, e.g. shared between governors.
    pub fn with_metrics(mut self, metrics: GovernorMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Build the governor.
    ///
    /// # Errors
    /// Returns `GovernorBuildError::MissingSleeper` if the wait policy is
    /// `BlockAndRetry` and no sleeper was given.
    pub fn build(self) -> Result<CallGovernor<T, A, V, G>, GovernorBuildError> {
        if self.wait_policy == WaitPolicy::BlockAndRetry && self.sleeper.is_none() {
            return Err(GovernorBuildError::MissingSleeper);
        }
        let cadence = self
            .check_cadence
            .then(|| CadenceMonitor::new(*self.gate.config(), self.gate.clock().as_ref()));
        Ok(CallGovernor {
            gate: self.gate,
            store: self.store,
            wait_policy: self.wait_policy,
            sleeper: self.sleeper,
            cadence,
            metrics: self.metrics.unwrap_or_default(),
        })
    }
}

/// Runs invocables behind a rate gate and records every call.
///
/// # Example
/// ```
/// use tempo_governor::{
///     CallGovernor, CallTally, GateConfig, GovernorError, Invocable, Output, RateGate,
///     WindowedEventStore,
/// };
/// use tempo_governor::infrastructure::mocks::MockClock;
/// use std::sync::Arc;
///
/// let clock = MockClock::new(0u64);
/// let gate: Arc<RateGate<u64>> =
///     Arc::new(RateGate::new(GateConfig::new(5).unwrap(), Arc::new(clock.clone())));
/// let store = Arc::new(
///     WindowedEventStore::builder(60, Arc::new(clock.clone())).build().unwrap(),
/// );
/// let governor: CallGovernor<u64, u32, u32, CallTally> =
///     CallGovernor::builder(gate, store).build().unwrap();
///
/// let double = Invocable::immediate(|x: u32| Ok(x * 2));
/// assert_eq!(governor.invoke_blocking(&double, 21).unwrap(), Output::Value(42));
/// assert!(matches!(
///     governor.invoke_blocking(&double, 1),
///     Err(GovernorError::UnderLimit { elapsed: 0, expected: 5 })
/// ));
///
/// let tally = governor.store().total().unwrap();
/// assert_eq!((tally.called, tally.returned), (1, 1));
/// ```
pub struct CallGovernor<T: TimePoint, A, V, G> {
    gate: Arc<RateGate<T>>,
    store: Arc<WindowedEventStore<T, CallEvent<A, V>, G>>,
    wait_policy: WaitPolicy,
    sleeper: Option<Arc<dyn Sleep<T::Span>>>,
    cadence: Option<CadenceMonitor<T>>,
    metrics: GovernorMetrics,
}

impl<T, A, V, G> CallGovernor<T, A, V, G>
where
    T: TimePoint,
    A: Clone,
    V: Clone,
    G: Aggregator<CallEvent<A, V>>,
{
    /// Create a builder around a gate and a call event store.
    ///
    /// Defaults:
    /// - Wait policy: [`WaitPolicy::RejectWithDuration`]
    /// - Cadence check: off
    pub fn builder(
        gate: Arc<RateGate<T>>,
        store: Arc<WindowedEventStore<T, CallEvent<A, V>, G>>,
    ) -> GovernorBuilder<T, A, V, G> {
        GovernorBuilder {
            gate,
            store,
            wait_policy: WaitPolicy::default(),
            sleeper: None,
            check_cadence: false,
            metrics: None,
        }
    }

    /// Invoke on the current thread.
    ///
    /// Deferred invocables fail with [`BlockingDeferredError`] without
    /// consuming the gate.
    ///
    /// # Errors
    /// See [`GovernorError`].
    pub fn invoke_blocking(
        &self,
        invocable: &Invocable<A, V>,
        args: A,
    ) -> Result<Output<V>, GovernorError<T, V>> {
        if invocable.kind() == InvocableKind::Deferred {
            return Err(GovernorError::Failure(Box::new(BlockingDeferredError)));
        }

        if let Err(under) = self.gate.try_proceed_now() {
            let sleeper = self.retry_sleeper(under)?;
            sleeper.sleep(under.remaining());
            self.retry_gate()?;
        }
        self.metrics.record_proceeded();

        self.record_called(&args)?;
        let result = invocable.call_blocking_observed(args, |item| self.record_returned(item));
        self.finish(result)
    }

    /// Invoke, awaiting deferred invocables and sleeping asynchronously.
    ///
    /// # Errors
    /// See [`GovernorError`].
    #[cfg(feature = "async")]
    pub async fn invoke(
        &self,
        invocable: &Invocable<A, V>,
        args: A,
    ) -> Result<Output<V>, GovernorError<T, V>> {
        if let Err(under) = self.gate.try_proceed_now() {
            let sleeper = self.retry_sleeper(under)?;
            sleeper.sleep_async(under.remaining()).await;
            self.retry_gate()?;
        }
        self.metrics.record_proceeded();

        self.record_called(&args)?;
        let result = invocable
            .call_observed(args, |item| self.record_returned(item))
            .await;
        self.finish(result)
    }

    /// The sleeper to wait with, or the refusal if the policy rejects.
    fn retry_sleeper(
        &self,
        under: UnderLimit<T::Span>,
    ) -> Result<&Arc<dyn Sleep<T::Span>>, GovernorError<T, V>> {
        match (self.wait_policy, &self.sleeper) {
            (WaitPolicy::BlockAndRetry, Some(sleeper)) => {
                self.metrics.record_waited();
                tracing::debug!(wait = ?under.remaining(), "governor waiting for gate");
                Ok(sleeper)
            }
            _ => {
                self.metrics.record_rejected();
                Err(under.into())
            }
        }
    }

    fn retry_gate(&self) -> Result<(), GovernorError<T, V>> {
        self.gate.try_proceed_now().map_err(|under| {
            self.metrics.record_rejected();
            tracing::debug!(elapsed = ?under.elapsed, "governor retry refused");
            GovernorError::from(under)
        })
    }

    fn record_called(&self, args: &A) -> Result<(), GovernorError<T, V>> {
        self.store
            .insert(&CallEvent::called(args.clone()))
            .map(|_| ())
            .map_err(|e| {
                tracing::warn!(error = %e, "call event rejected by store");
                GovernorError::Record(e)
            })
    }

    fn record_returned(&self, item: &Result<V, InvokeError>) {
        let event = match item {
            Ok(value) => CallEvent::returned(value.clone()),
            Err(e) => CallEvent::failed(e.to_string()),
        };
        // The call already ran; its result is returned even if recording fails.
        if let Err(e) = self.store.insert(&event) {
            tracing::warn!(error = %e, "return event rejected by store");
        }
    }

    fn finish(
        &self,
        result: Result<Output<V>, InvokeError>,
    ) -> Result<Output<V>, GovernorError<T, V>> {
        let output = result.map_err(|e| {
            self.metrics.record_failed();
            tracing::warn!(error = %e, "governed call failed");
            GovernorError::Failure(e)
        })?;

        match &self.cadence {
            Some(monitor) => {
                let now = self.gate.clock().now();
                monitor.complete(now, output).map_err(|over| {
                    self.metrics.record_cadence_violation();
                    GovernorError::OverLimit {
                        elapsed: over.elapsed,
                        expected: over.expected,
                        value: over.value,
                    }
                })
            }
            None => Ok(output),
        }
    }

    /// The governing gate.
    pub fn gate(&self) -> &Arc<RateGate<T>> {
        &self.gate
    }

    /// The store receiving call events.
    pub fn store(&self) -> &Arc<WindowedEventStore<T, CallEvent<A, V>, G>> {
        &self.store
    }

    /// Outcome counters.
    pub fn metrics(&self) -> &GovernorMetrics {
        &self.metrics
    }

    /// The configured wait policy.
    pub fn wait_policy(&self) -> WaitPolicy {
        self.wait_policy
    }
}

impl<T: TimePoint, A, V, G> fmt::Debug for CallGovernor<T, A, V, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallGovernor")
            .field("gate", &self.gate)
            .field("wait_policy", &self.wait_policy)
            .field("cadence", &self.cadence)
            .field("metrics", &self.metrics)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::gate::GateConfig;
    use crate::application::ports::Clock;
    use crate::domain::aggregate::CallTally;
    use crate::infrastructure::mocks::MockClock;

    type Governor = CallGovernor<u64, u32, u32, CallTally>;
    type CallStore = WindowedEventStore<u64, CallEvent<u32, u32>, CallTally>;

    fn parts(period: u64) -> (Arc<RateGate<u64>>, Arc<CallStore>, MockClock<u64>) {
        let clock = MockClock::new(0u64);
        let gate = Arc::new(RateGate::new(
            GateConfig::new(period).unwrap(),
            Arc::new(clock.clone()),
        ));
        let store = Arc::new(
            WindowedEventStore::builder(100, Arc::new(clock.clone()))
                .build()
                .unwrap(),
        );
        (gate, store, clock)
    }

    fn double() -> Invocable<u32, u32> {
        Invocable::immediate(|x: u32| Ok(x * 2))
    }

    #[test]
    fn test_reject_records_nothing() {
        let (gate, store, clock) = parts(5);
        let governor: Governor = CallGovernor::builder(gate, store).build().unwrap();

        governor.invoke_blocking(&double(), 1).unwrap();
        clock.advance(3);
        let err = governor.invoke_blocking(&double(), 2).unwrap_err();

        assert!(err.is_under_limit());
        assert_eq!(err.to_string(), "called after 3, expected at least 5");
        let tally = governor.store().total().unwrap();
        assert_eq!(tally, CallTally { called: 1, returned: 1, failed: 0 });
        assert_eq!(governor.metrics().rejected(), 1);
    }

    #[test]
    fn test_block_and_retry_sleeps_remaining() {
        let (gate, store, clock) = parts(5);
        let governor: Governor = CallGovernor::builder(gate, store)
            .with_wait_policy(WaitPolicy::BlockAndRetry)
            .with_sleeper(Arc::new(clock.clone()))
            .build()
            .unwrap();

        governor.invoke_blocking(&double(), 1).unwrap();
        clock.advance(2);
        assert_eq!(governor.invoke_blocking(&double(), 4).unwrap(), Output::Value(8));

        assert_eq!(clock.now(), 5);
        assert_eq!(governor.gate().last(), Some(5));
        assert_eq!(governor.metrics().waited(), 1);
        assert_eq!(governor.store().total().unwrap().called, 2);
    }

    #[test]
    fn test_block_and_retry_requires_sleeper() {
        let (gate, store, _) = parts(5);
        let result: Result<Governor, _> = CallGovernor::builder(gate, store)
            .with_wait_policy(WaitPolicy::BlockAndRetry)
            .build();
        assert_eq!(result.unwrap_err(), GovernorBuildError::MissingSleeper);
    }

    #[test]
    fn test_failure_is_recorded() {
        let (gate, store, _) = parts(5);
        let governor: Governor = CallGovernor::builder(gate, store).build().unwrap();
        let failing = Invocable::immediate(|_: u32| Err("boom".into()));

        let err = governor.invoke_blocking(&failing, 1).unwrap_err();
        assert!(matches!(err, GovernorError::Failure(_)));
        assert_eq!(err.to_string(), "governed call failed: boom");

        let tally = governor.store().total().unwrap();
        assert_eq!(tally, CallTally { called: 1, returned: 0, failed: 1 });
        assert_eq!(governor.metrics().failed(), 1);
    }

    #[test]
    fn test_stream_records_each_value() {
        let (gate, store, _) = parts(5);
        let governor: Governor = CallGovernor::builder(gate, store).build().unwrap();
        let counting = Invocable::stream(|n: u32| (0..n).map(Ok));

        let output = governor.invoke_blocking(&counting, 3).unwrap();
        assert_eq!(output, Output::Sequence(vec![0, 1, 2]));
        assert_eq!(governor.store().total().unwrap().returned, 3);
    }

    #[test]
    fn test_deferred_in_blocking_keeps_gate() {
        let (gate, store, _) = parts(5);
        let governor: Governor = CallGovernor::builder(gate, store).build().unwrap();
        let deferred = Invocable::deferred(|x: u32| async move { Ok(x) });

        let err = governor.invoke_blocking(&deferred, 1).unwrap_err();
        assert!(matches!(err, GovernorError::Failure(_)));
        assert_eq!(governor.gate().last(), None);
        assert!(governor.store().is_empty());
    }

    #[test]
    fn test_cadence_violation_carries_output() {
        let (gate, store, clock) = parts(5);
        let governor: Governor = CallGovernor::builder(gate, store)
            .with_cadence_check()
            .build()
            .unwrap();

        governor.invoke_blocking(&double(), 1).unwrap();
        clock.advance(8);
        let err = governor.invoke_blocking(&double(), 10).unwrap_err();

        assert_eq!(err.to_string(), "completed after 8, expected at most 5");
        assert_eq!(err.into_value(), Some(Output::Value(20)));
        assert_eq!(governor.metrics().cadence_violations(), 1);
    }

    #[test]
    fn test_record_failure_stops_call() {
        let clock = MockClock::new(0u64);
        let gate = Arc::new(RateGate::new(GateConfig::new(5).unwrap(), Arc::new(clock.clone())));
        let store = Arc::new(
            WindowedEventStore::builder(10, Arc::new(clock.clone()))
                .with_origin(50)
                .build()
                .unwrap(),
        );
        let governor: Governor = CallGovernor::builder(gate, store).build().unwrap();

        let err = governor.invoke_blocking(&double(), 1).unwrap_err();
        assert!(matches!(
            err,
            GovernorError::Record(StoreError::Stale { earliest: 50, .. })
        ));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_async_invoke_deferred() {
        let (gate, store, clock) = parts(5);
        let governor: Governor = CallGovernor::builder(gate, store)
            .with_wait_policy(WaitPolicy::BlockAndRetry)
            .with_sleeper(Arc::new(clock.clone()))
            .build()
            .unwrap();
        let deferred = Invocable::deferred(|x: u32| async move {
            tokio::task::yield_now().await;
            Ok(x + 1)
        });

        assert_eq!(governor.invoke(&deferred, 1).await.unwrap(), Output::Value(2));
        assert_eq!(governor.invoke(&deferred, 2).await.unwrap(), Output::Value(3));
        assert_eq!(clock.now(), 5);

        let tally = governor.store().total().unwrap();
        assert_eq!(tally, CallTally { called: 2, returned: 2, failed: 0 });
    }
}
