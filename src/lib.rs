//! # tempo-governor
//!
//! Temporal control primitives for governing when work runs and recording
//! what happened over time.
//!
//! The crate is built from a small set of cooperating parts, all driven by an
//! injectable [`Clock`] so that behavior is deterministic under test:
//!
//! - [`Interval`] and [`Relation`]: half-open time intervals and Allen's
//!   thirteen interval relations
//! - [`RateGate`]: enforces a minimum period between calls
//! - [`CadenceMonitor`]: flags calls that complete later than the period
//! - [`Scheduler`]: runs timed, prioritized and periodic actions, either
//!   blocking or as a cooperative trampoline
//! - [`WindowedEventStore`]: folds events into tumbling time buckets
//! - [`CallGovernor`]: gate + store, recording every governed call
//!
//! ## Quick Start
//!
//! ```rust
//! use tempo_governor::{GateConfig, GateDecision, RateGate, SystemClock};
//! use std::sync::Arc;
//! use std::time::{Duration, Instant};
//!
//! let gate: RateGate<Instant> = RateGate::new(
//!     GateConfig::new(Duration::from_millis(100)).unwrap(),
//!     Arc::new(SystemClock::new()),
//! );
//!
//! assert!(gate.decide_now().is_proceed());
//! match gate.decide_now() {
//!     GateDecision::Proceed => unreachable!("period has not elapsed"),
//!     GateDecision::Wait(remaining) => assert!(remaining <= Duration::from_millis(100)),
//! }
//! ```
//!
//! ## Time
//!
//! Every component is generic over a [`TimePoint`]. `std::time::Instant`
//! (with `Duration` spans) is used in production; plain `u64` ticks make
//! tests and simulations exact. The mock clock in
//! `infrastructure::mocks` (feature `test-helpers`) also implements
//! [`Sleep`] by advancing itself, so blocking waits complete instantly.
//!
//! ## Initial Policy
//!
//! A gate either lets the very first call through
//! ([`InitialPolicy::ForceImmediate`], the default) or starts closed for one
//! period ([`InitialPolicy::PreventBurst`]):
//!
//! ```rust
//! # use tempo_governor::{GateConfig, GateDecision, InitialPolicy, RateGate};
//! # use tempo_governor::infrastructure::mocks::MockClock;
//! # use std::sync::Arc;
//! let config = GateConfig::new(10u64)
//!     .unwrap()
//!     .with_initial_policy(InitialPolicy::PreventBurst);
//! let gate: RateGate<u64> = RateGate::new(config, Arc::new(MockClock::new(0u64)));
//!
//! assert_eq!(gate.decide(3), GateDecision::Wait(7));
//! ```
//!
//! ## Scheduling
//!
//! ```rust
//! use tempo_governor::{Invocable, RunOutcome, Scheduler, SchedulerMode};
//! use tempo_governor::infrastructure::mocks::MockClock;
//! use std::sync::Arc;
//!
//! let clock = MockClock::new(0u64);
//! let scheduler: Scheduler<u64, &str, ()> =
//!     Scheduler::builder(Arc::new(clock.clone()), Arc::new(clock.clone()))
//!         .with_mode(SchedulerMode::Cooperative)
//!         .build();
//!
//! let print = Invocable::immediate(|msg: &str| {
//!     println!("{}", msg);
//!     Ok(())
//! });
//! scheduler.schedule(10, 0, print.clone(), "later");
//! scheduler.schedule(0, 0, print, "now");
//!
//! assert_eq!(scheduler.run().unwrap(), RunOutcome::Pending(10));
//! clock.advance(10);
//! assert_eq!(scheduler.run().unwrap(), RunOutcome::Drained);
//! ```
//!
//! In async code, [`SchedulerHandle::spawn`] drives a scheduler from a
//! background task until `shutdown().await`.
//!
//! ## Windowed Aggregation
//!
//! Buckets are aligned to an origin and created only when an event lands in
//! them. [`WindowedEventStore::iterate_past`] yields the open bucket first,
//! then closed buckets newest to oldest; `observe` gives async consumers an
//! independent cursor over bucket openings and closings.
//!
//! ## Error Handling
//!
//! Errors never disappear: a refused call returns [`GovernorError::UnderLimit`]
//! with the elapsed and expected spans, a late one returns
//! [`GovernorError::OverLimit`] together with its output, and user failures
//! are carried as boxed errors. In blocking mode a failing scheduled action
//! aborts [`Scheduler::run`]; in cooperative mode it is delivered to the
//! completion hook.
//!
//! ## Feature Flags
//!
//! - `async` (default): async invocation, the scheduler driver and store
//!   observers, on tokio
//! - `serde`: serialization for intervals, buckets and aggregates
//! - `test-helpers`: exposes `infrastructure::mocks`

// Domain layer - pure temporal logic
pub mod domain;

// Application layer - orchestration
pub mod application;

// Infrastructure layer - external adapters
pub mod infrastructure;

// Re-export commonly used types for convenience
pub use domain::{
    aggregate::{checked_merge, Aggregator, CallTally, Counter, Tally},
    event::{CallEvent, Stamped},
    interval::{Interval, Relation},
    invocable::{BlockingDeferredError, Invocable, InvocableKind, InvokeError, Output},
    time::{Span, TimePoint},
};

pub use application::{
    cadence::{CadenceMonitor, OverLimit},
    gate::{GateConfig, GateConfigError, GateDecision, InitialPolicy, RateGate, UnderLimit},
    governor::{CallGovernor, GovernorBuildError, GovernorBuilder, GovernorError, WaitPolicy},
    metrics::{GovernorMetrics, MetricsSnapshot},
    ports::{Clock, Sleep},
    registry::GateRegistry,
    scheduler::{
        Completion, CompletionHook, EventId, RunOutcome, Scheduler, SchedulerBuilder,
        SchedulerError, SchedulerMode,
    },
    store::{
        Bucket, PastIter, StoreBuilder, StoreConfigError, StoreError, WindowedEventStore,
    },
};

#[cfg(feature = "async")]
pub use application::{
    driver::{SchedulerHandle, ShutdownError},
    observer::{NextBucket, ObserveError, StoreObserver},
};

pub use infrastructure::clock::{SystemClock, SystemSleeper};
