//! Priority scheduler for timed actions.
//!
//! Pending actions sit in a min-heap keyed by `(due, priority, insertion
//! order)`. [`Scheduler::run`] pops every due action and executes it. When the
//! next action lies in the future, the configured [`SchedulerMode`] decides
//! what happens:
//!
//! - `Blocking`: sleep until it is due, then keep going
//! - `Cooperative`: return [`RunOutcome::Pending`] with the remaining delay so
//!   an outer driver can re-enter later without occupying the thread
//!
//! The heap lock is only held to peek, pop and push. Actions run with the lock
//! released, so an action may schedule or cancel other actions.
//!
//! Periodic actions are re-enqueued at `now + period` after each successful
//! run, where `now` is read once the action has completed. A failing action,
//! periodic or not, is removed and never retried.

use crate::application::ports::{Clock, Sleep};
use crate::domain::invocable::{Invocable, InvokeError, Output};
use crate::domain::time::{Span, TimePoint};
use ahash::AHashMap;
use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[cfg(feature = "async")]
use tokio_util::sync::CancellationToken;

/// Identifies a scheduled action; stable across periodic re-runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EventId(u64);

impl EventId {
    /// The raw identifier.
    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What `run` does when the next action is not yet due.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerMode {
    /// Sleep until the action is due. Action failures abort the run.
    #[default]
    Blocking,
    /// Return the remaining delay to the caller. Action failures are reported
    /// through the completion hook and the run continues.
    Cooperative,
}

/// Why a run returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome<S> {
    /// No actions are left
    Drained,
    /// The next action is due after this delay (cooperative mode)
    Pending(S),
    /// [`Scheduler::halt`] was called
    Halted,
    /// The cancellation token fired
    Cancelled,
}

/// Result of one executed action, delivered to the completion hook.
#[derive(Debug)]
pub struct Completion<T, V> {
    /// The action that ran
    pub id: EventId,
    /// When it was due
    pub due: T,
    /// What it produced
    pub result: Result<Output<V>, InvokeError>,
}

/// Callback receiving every [`Completion`].
pub type CompletionHook<T, V> = Arc<dyn Fn(Completion<T, V>) + Send + Sync>;

/// Errors surfaced by the scheduler.
#[derive(Debug)]
pub enum SchedulerError {
    /// A periodic action was scheduled with a zero period
    ZeroPeriod,
    /// A due time could not be represented
    TimeOverflow,
    /// An action failed while running in blocking mode
    ActionFailed {
        /// The failed action
        id: EventId,
        /// The action's error
        source: InvokeError,
    },
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::ZeroPeriod => write!(f, "period must be greater than 0"),
            SchedulerError::TimeOverflow => write!(f, "due time overflowed the clock's range"),
            SchedulerError::ActionFailed { id, source } => {
                write!(f, "scheduled action {} failed: {}", id, source)
            }
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::ActionFailed { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

struct Pending<T: TimePoint, A, V> {
    id: EventId,
    due: T,
    priority: u32,
    seq: u64,
    period: Option<T::Span>,
    action: Invocable<A, V>,
    payload: A,
}

impl<T: TimePoint, A, V> Pending<T, A, V> {
    fn key(&self) -> (T, u32, u64) {
        (self.due, self.priority, self.seq)
    }
}

// Reversed so that the max-heap pops the smallest key first.
impl<T: TimePoint, A, V> Ord for Pending<T, A, V> {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        other.key().cmp(&self.key())
    }
}

impl<T: TimePoint, A, V> PartialOrd for Pending<T, A, V> {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

impl<T: TimePoint, A, V> PartialEq for Pending<T, A, V> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<T: TimePoint, A, V> Eq for Pending<T, A, V> {}

struct Queue<T: TimePoint, A, V> {
    heap: BinaryHeap<Pending<T, A, V>>,
    next_seq: u64,
    /// Actions currently executing, and whether each was cancelled meanwhile.
    /// Several runners may share one scheduler, so this is keyed by id.
    running: AHashMap<EventId, bool>,
}

enum Next<T: TimePoint, A, V> {
    Empty,
    NotYet(T::Span),
    Due(Pending<T, A, V>),
}

/// A priority queue of timed actions with a cooperative run loop.
///
/// # Example
/// ```
/// use tempo_governor::{Invocable, RunOutcome, Scheduler, SchedulerMode};
/// use tempo_governor::infrastructure::mocks::MockClock;
/// use std::sync::Arc;
///
/// let clock = MockClock::new(0u64);
/// let scheduler: Scheduler<u64, &str, ()> = Scheduler::builder(
///     Arc::new(clock.clone()),
///     Arc::new(clock.clone()),
/// )
/// .with_mode(SchedulerMode::Cooperative)
/// .build();
///
/// let greet = Invocable::immediate(|name: &str| {
///     println!("hello {name}");
///     Ok(())
/// });
/// scheduler.schedule(10, 0, greet, "world");
///
/// assert_eq!(scheduler.run().unwrap(), RunOutcome::Pending(10));
/// clock.advance(10);
/// assert_eq!(scheduler.run().unwrap(), RunOutcome::Drained);
/// ```
pub struct Scheduler<T: TimePoint, A, V> {
    queue: Mutex<Queue<T, A, V>>,
    next_id: AtomicU64,
    clock: Arc<dyn Clock<Instant = T>>,
    sleeper: Arc<dyn Sleep<T::Span>>,
    mode: SchedulerMode,
    on_complete: Option<CompletionHook<T, V>>,
    halted: AtomicBool,
    #[cfg(feature = "async")]
    wakeup: tokio::sync::Notify,
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder<T: TimePoint, A, V> {
    clock: Arc<dyn Clock<Instant = T>>,
    sleeper: Arc<dyn Sleep<T::Span>>,
    mode: SchedulerMode,
    on_complete: Option<CompletionHook<T, V>>,
    _payload: PhantomData<fn(A)>,
}

impl<T: TimePoint, A, V> SchedulerBuilder<T, A, V> {
    /// Set the run mode.
    pub fn with_mode(mut self, mode: SchedulerMode) -> Self {
        self.mode = mode;
        self
    }

    /// Receive the result of every executed action.
    pub fn with_completion_hook<F>(mut self, hook: F) -> Self
    where
        F: Fn(Completion<T, V>) + Send + Sync + 'static,
    {
        self.on_complete = Some(Arc::new(hook));
        self
    }

    /// Build the scheduler.
    pub fn build(self) -> Scheduler<T, A, V> {
        Scheduler {
            queue: Mutex::new(Queue {
                heap: BinaryHeap::new(),
                next_seq: 0,
                running: AHashMap::default(),
            }),
            next_id: AtomicU64::new(1),
            clock: self.clock,
            sleeper: self.sleeper,
            mode: self.mode,
            on_complete: self.on_complete,
            halted: AtomicBool::new(false),
            #[cfg(feature = "async")]
            wakeup: tokio::sync::Notify::new(),
        }
    }
}

impl<T: TimePoint, A, V> Scheduler<T, A, V> {
    /// Create a builder with the given time source and sleeper.
    ///
    /// Defaults:
    /// - Mode: blocking
    /// - Completion hook: none
    pub fn builder(
        clock: Arc<dyn Clock<Instant = T>>,
        sleeper: Arc<dyn Sleep<T::Span>>,
    ) -> SchedulerBuilder<T, A, V> {
        SchedulerBuilder {
            clock,
            sleeper,
            mode: SchedulerMode::default(),
            on_complete: None,
            _payload: PhantomData,
        }
    }

    /// Schedule `action(payload)` to run at `due`.
    ///
    /// Among actions due at the same time, lower `priority` values run first;
    /// equal priorities run in scheduling order.
    pub fn schedule(&self, due: T, priority: u32, action: Invocable<A, V>, payload: A) -> EventId {
        self.push(due, priority, None, action, payload)
    }

    /// Schedule `action(payload)` to run after `delay`.
    ///
    /// # Errors
    /// Returns `SchedulerError::TimeOverflow` if `now + delay` overflows.
    pub fn schedule_in(
        &self,
        delay: T::Span,
        priority: u32,
        action: Invocable<A, V>,
        payload: A,
    ) -> Result<EventId, SchedulerError> {
        let due = self
            .clock
            .now()
            .checked_add(delay)
            .ok_or(SchedulerError::TimeOverflow)?;
        Ok(self.schedule(due, priority, action, payload))
    }

    /// Schedule an action that first runs at `due` and then every `period`
    /// after each completion, until cancelled or failed.
    ///
    /// # Errors
    /// Returns `SchedulerError::ZeroPeriod` if `period` is zero.
    pub fn schedule_periodic(
        &self,
        due: T,
        priority: u32,
        period: T::Span,
        action: Invocable<A, V>,
        payload: A,
    ) -> Result<EventId, SchedulerError> {
        if period.is_zero() {
            return Err(SchedulerError::ZeroPeriod);
        }
        Ok(self.push(due, priority, Some(period), action, payload))
    }

    /// Cancel a pending action, or stop a periodic action from being
    /// re-enqueued if it is running right now.
    ///
    /// Returns `false` if the action is unknown or already finished.
    pub fn cancel(&self, id: EventId) -> bool {
        let mut queue = self.lock();
        if let Some(cancelled) = queue.running.get_mut(&id) {
            *cancelled = true;
            return true;
        }
        let before = queue.heap.len();
        queue.heap.retain(|pending| pending.id != id);
        queue.heap.len() != before
    }

    /// Stop the current run loop before its next action.
    ///
    /// The flag is consumed by the run that observes it.
    pub fn halt(&self) {
        self.halted.store(true, Ordering::SeqCst);
        #[cfg(feature = "async")]
        self.wakeup.notify_one();
    }

    /// Number of pending actions.
    pub fn len(&self) -> usize {
        self.lock().heap.len()
    }

    /// Check if no actions are pending.
    pub fn is_empty(&self) -> bool {
        self.lock().heap.is_empty()
    }

    /// Due time of the earliest pending action.
    pub fn next_due(&self) -> Option<T> {
        self.lock().heap.peek().map(|pending| pending.due)
    }

    /// The configured run mode.
    pub fn mode(&self) -> SchedulerMode {
        self.mode
    }

    /// The scheduler's clock.
    pub fn clock(&self) -> &Arc<dyn Clock<Instant = T>> {
        &self.clock
    }

    /// The scheduler's sleeper.
    pub fn sleeper(&self) -> &Arc<dyn Sleep<T::Span>> {
        &self.sleeper
    }

    fn lock(&self) -> MutexGuard<'_, Queue<T, A, V>> {
        self.queue.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push(
        &self,
        due: T,
        priority: u32,
        period: Option<T::Span>,
        action: Invocable<A, V>,
        payload: A,
    ) -> EventId {
        let id = EventId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.enqueue(id, due, priority, period, action, payload);
        tracing::trace!(%id, ?due, priority, "action scheduled");
        id
    }

    fn enqueue(
        &self,
        id: EventId,
        due: T,
        priority: u32,
        period: Option<T::Span>,
        action: Invocable<A, V>,
        payload: A,
    ) {
        {
            let mut queue = self.lock();
            let seq = queue.next_seq;
            queue.next_seq += 1;
            queue.heap.push(Pending {
                id,
                due,
                priority,
                seq,
                period,
                action,
                payload,
            });
        }
        #[cfg(feature = "async")]
        self.wakeup.notify_one();
    }

    fn pop_due(&self, now: T) -> Next<T, A, V> {
        let mut queue = self.lock();
        let due = match queue.heap.peek() {
            None => return Next::Empty,
            Some(pending) => pending.due,
        };
        if due > now {
            return Next::NotYet(due.saturating_since(now));
        }
        match queue.heap.pop() {
            Some(pending) => {
                queue.running.insert(pending.id, false);
                Next::Due(pending)
            }
            None => Next::Empty,
        }
    }

    /// Settle an executed action: re-enqueue periodic work and report the
    /// result.
    fn finish(
        &self,
        pending: Pending<T, A, V>,
        result: Result<Output<V>, InvokeError>,
    ) -> Result<(), SchedulerError> {
        let cancelled = {
            let mut queue = self.lock();
            queue.running.remove(&pending.id).unwrap_or(false)
        };

        let Pending {
            id,
            due,
            priority,
            period,
            action,
            payload,
            ..
        } = pending;

        if let (Ok(_), Some(period), false) = (&result, period, cancelled) {
            match self.clock.now().checked_add(period) {
                Some(next) => self.enqueue(id, next, priority, Some(period), action, payload),
                None => tracing::warn!(%id, "periodic action dropped: next due time overflows"),
            }
        }

        match result {
            Ok(output) => {
                self.report(Completion {
                    id,
                    due,
                    result: Ok(output),
                });
                Ok(())
            }
            Err(source) => {
                tracing::warn!(%id, error = %source, "scheduled action failed");
                match self.mode {
                    SchedulerMode::Blocking => Err(SchedulerError::ActionFailed { id, source }),
                    SchedulerMode::Cooperative => {
                        self.report(Completion {
                            id,
                            due,
                            result: Err(source),
                        });
                        Ok(())
                    }
                }
            }
        }
    }

    fn report(&self, completion: Completion<T, V>) {
        if let Some(hook) = &self.on_complete {
            hook(completion);
        }
    }
}

impl<T: TimePoint, A: Clone, V> Scheduler<T, A, V> {
    /// Execute due actions on the current thread.
    ///
    /// Deferred invocables cannot be awaited here and fail like any other
    /// action; use [`Scheduler::run_async`] for them.
    ///
    /// # Errors
    /// In blocking mode, returns `SchedulerError::ActionFailed` for the first
    /// action that fails. The failed action has already been removed.
    pub fn run(&self) -> Result<RunOutcome<T::Span>, SchedulerError> {
        loop {
            if self.halted.swap(false, Ordering::SeqCst) {
                return Ok(RunOutcome::Halted);
            }

            match self.pop_due(self.clock.now()) {
                Next::Empty => return Ok(RunOutcome::Drained),
                Next::NotYet(delay) => match self.mode {
                    SchedulerMode::Blocking => {
                        tracing::debug!(?delay, "scheduler sleeping until next action");
                        self.sleeper.sleep(delay);
                    }
                    SchedulerMode::Cooperative => return Ok(RunOutcome::Pending(delay)),
                },
                Next::Due(pending) => {
                    let result = pending.action.call_blocking(pending.payload.clone());
                    self.finish(pending, result)?;
                }
            }
        }
    }
}

#[cfg(feature = "async")]
impl<T, A, V> Scheduler<T, A, V>
where
    T: TimePoint,
    A: Clone + Send,
    V: Send,
{
    /// Execute due actions, awaiting deferred invocables.
    ///
    /// In blocking mode the loop suspends until the next action is due, a new
    /// action is scheduled, or `cancel` fires. Cancellation never interrupts a
    /// running action and leaves the queue intact.
    ///
    /// # Errors
    /// Same as [`Scheduler::run`].
    pub async fn run_async(
        &self,
        cancel: &CancellationToken,
    ) -> Result<RunOutcome<T::Span>, SchedulerError> {
        loop {
            if self.halted.swap(false, Ordering::SeqCst) {
                return Ok(RunOutcome::Halted);
            }
            if cancel.is_cancelled() {
                return Ok(RunOutcome::Cancelled);
            }

            match self.pop_due(self.clock.now()) {
                Next::Empty => return Ok(RunOutcome::Drained),
                Next::NotYet(delay) => match self.mode {
                    SchedulerMode::Blocking => {
                        tokio::select! {
                            _ = cancel.cancelled() => return Ok(RunOutcome::Cancelled),
                            _ = self.sleeper.sleep_async(delay) => {}
                            _ = self.wakeup.notified() => {}
                        }
                    }
                    SchedulerMode::Cooperative => return Ok(RunOutcome::Pending(delay)),
                },
                Next::Due(pending) => {
                    let result = pending.action.call(pending.payload.clone()).await;
                    self.finish(pending, result)?;
                    tokio::task::yield_now().await;
                }
            }
        }
    }

    /// Wait until an action is scheduled or the scheduler is halted.
    pub(crate) async fn notified(&self) {
        self.wakeup.notified().await;
    }
}

impl<T: TimePoint, A, V> fmt::Debug for Scheduler<T, A, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("mode", &self.mode)
            .field("pending", &self.len())
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::mocks::MockClock;

    type Log = Arc<Mutex<Vec<&'static str>>>;

    fn scheduler(mode: SchedulerMode) -> (Scheduler<u64, &'static str, ()>, MockClock<u64>) {
        let clock = MockClock::new(0u64);
        let scheduler = Scheduler::builder(Arc::new(clock.clone()), Arc::new(clock.clone()))
            .with_mode(mode)
            .build();
        (scheduler, clock)
    }

    fn recorder(log: &Log) -> Invocable<&'static str, ()> {
        let log = Arc::clone(log);
        Invocable::immediate(move |name| {
            log.lock().unwrap().push(name);
            Ok(())
        })
    }

    fn failing() -> Invocable<&'static str, ()> {
        Invocable::immediate(|name: &'static str| Err(format!("{name} broke").into()))
    }

    #[test]
    fn test_runs_in_due_then_priority_then_insertion_order() {
        let (sched, _) = scheduler(SchedulerMode::Blocking);
        let log = Log::default();

        sched.schedule(5, 1, recorder(&log), "c");
        sched.schedule(5, 0, recorder(&log), "b");
        sched.schedule(1, 9, recorder(&log), "a");
        sched.schedule(5, 1, recorder(&log), "d");

        assert_eq!(sched.run().unwrap(), RunOutcome::Drained);
        assert_eq!(*log.lock().unwrap(), vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_blocking_mode_sleeps_until_due() {
        let (sched, clock) = scheduler(SchedulerMode::Blocking);
        let log = Log::default();
        sched.schedule(30, 0, recorder(&log), "late");

        assert_eq!(sched.run().unwrap(), RunOutcome::Drained);
        assert_eq!(clock.now(), 30);
        assert_eq!(*log.lock().unwrap(), vec!["late"]);
    }

    #[test]
    fn test_cooperative_mode_returns_delay() {
        let (sched, clock) = scheduler(SchedulerMode::Cooperative);
        let log = Log::default();
        sched.schedule(0, 0, recorder(&log), "now");
        sched.schedule(12, 0, recorder(&log), "later");

        assert_eq!(sched.run().unwrap(), RunOutcome::Pending(12));
        assert_eq!(*log.lock().unwrap(), vec!["now"]);
        assert_eq!(clock.now(), 0);

        clock.advance(12);
        assert_eq!(sched.run().unwrap(), RunOutcome::Drained);
        assert_eq!(sched.len(), 0);
    }

    #[test]
    fn test_periodic_reenqueues_after_completion() {
        let (sched, clock) = scheduler(SchedulerMode::Cooperative);
        let log = Log::default();
        let id = sched
            .schedule_periodic(0, 0, 10, recorder(&log), "tick")
            .unwrap();

        assert_eq!(sched.run().unwrap(), RunOutcome::Pending(10));
        assert_eq!(sched.next_due(), Some(10));

        clock.advance(13);
        assert_eq!(sched.run().unwrap(), RunOutcome::Pending(10));
        assert_eq!(sched.next_due(), Some(23));

        assert!(sched.cancel(id));
        assert!(sched.is_empty());
        assert_eq!(log.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_zero_period_rejected() {
        let (sched, _) = scheduler(SchedulerMode::Blocking);
        let err = sched
            .schedule_periodic(0, 0, 0, failing(), "x")
            .unwrap_err();
        assert!(matches!(err, SchedulerError::ZeroPeriod));
    }

    #[test]
    fn test_blocking_failure_aborts_and_removes() {
        let (sched, _) = scheduler(SchedulerMode::Blocking);
        let log = Log::default();
        sched.schedule(0, 0, failing(), "first");
        sched.schedule(1, 0, recorder(&log), "second");

        let err = sched.run().unwrap_err();
        assert_eq!(err.to_string(), "scheduled action #1 failed: first broke");
        assert_eq!(sched.len(), 1);

        assert_eq!(sched.run().unwrap(), RunOutcome::Drained);
        assert_eq!(*log.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn test_cooperative_failure_goes_to_hook() {
        let clock = MockClock::new(0u64);
        let failures = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::clone(&failures);
        let sched: Scheduler<u64, &'static str, ()> =
            Scheduler::builder(Arc::new(clock.clone()), Arc::new(clock.clone()))
                .with_mode(SchedulerMode::Cooperative)
                .with_completion_hook(move |done: Completion<u64, ()>| {
                    if let Err(e) = done.result {
                        seen.lock().unwrap().push(e.to_string());
                    }
                })
                .build();

        let id = sched.schedule_periodic(0, 0, 5, failing(), "p").unwrap();
        assert_eq!(sched.run().unwrap(), RunOutcome::Drained);
        assert_eq!(*failures.lock().unwrap(), vec!["p broke".to_string()]);
        // Failed periodic actions are not retried.
        assert!(!sched.cancel(id));
    }

    #[test]
    fn test_reentrant_schedule_from_action() {
        let clock = MockClock::new(0u64);
        let sched: Arc<Scheduler<u64, u32, ()>> = Arc::new(
            Scheduler::builder(Arc::new(clock.clone()), Arc::new(clock.clone()))
                .with_mode(SchedulerMode::Cooperative)
                .build(),
        );
        let count = Arc::new(AtomicU64::new(0));

        // Each run schedules a follow-up until the countdown reaches zero.
        let weak = Arc::downgrade(&sched);
        let counter = Arc::clone(&count);
        let chain: Arc<Mutex<Option<Invocable<u32, ()>>>> = Arc::new(Mutex::new(None));
        let chain_inner = Arc::clone(&chain);
        let action = Invocable::immediate(move |remaining: u32| {
            counter.fetch_add(1, Ordering::SeqCst);
            if remaining > 0 {
                let next = chain_inner.lock().unwrap().clone();
                if let (Some(s), Some(next)) = (weak.upgrade(), next) {
                    s.schedule(0, 0, next, remaining - 1);
                }
            }
            Ok(())
        });
        *chain.lock().unwrap() = Some(action.clone());

        sched.schedule(0, 0, action, 3);
        assert_eq!(sched.run().unwrap(), RunOutcome::Drained);
        assert_eq!(count.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn test_cancel_periodic_while_running() {
        let clock = MockClock::new(0u64);
        let sched: Arc<Scheduler<u64, (), ()>> = Arc::new(
            Scheduler::builder(Arc::new(clock.clone()), Arc::new(clock.clone()))
                .with_mode(SchedulerMode::Cooperative)
                .build(),
        );
        let weak = Arc::downgrade(&sched);
        let action = Invocable::immediate(move |_| {
            if let Some(s) = weak.upgrade() {
                // The first scheduled id is 1.
                assert!(s.cancel(EventId(1)));
            }
            Ok(())
        });

        sched.schedule_periodic(0, 0, 5, action, ()).unwrap();
        assert_eq!(sched.run().unwrap(), RunOutcome::Drained);
        assert!(sched.is_empty());
    }

    #[test]
    fn test_cancel_tracks_each_running_action() {
        use std::sync::Barrier;
        use std::thread;

        let clock = MockClock::new(0u64);
        let sched: Arc<Scheduler<u64, u64, ()>> = Arc::new(
            Scheduler::builder(Arc::new(clock.clone()), Arc::new(clock.clone()))
                .with_mode(SchedulerMode::Cooperative)
                .build(),
        );
        let both_running = Arc::new(Barrier::new(2));
        let cancel_done = Arc::new(Barrier::new(2));
        let cancelled = Arc::new(Mutex::new(None));

        let weak = Arc::downgrade(&sched);
        let action = {
            let both_running = Arc::clone(&both_running);
            let cancel_done = Arc::clone(&cancel_done);
            let cancelled = Arc::clone(&cancelled);
            Invocable::immediate(move |victim: u64| {
                both_running.wait();
                // Payload 0 marks the action that cancels its sibling.
                if victim != 0 {
                    if let Some(s) = weak.upgrade() {
                        *cancelled.lock().unwrap() = Some(s.cancel(EventId(victim)));
                    }
                }
                cancel_done.wait();
                Ok(())
            })
        };

        let first = sched.schedule_periodic(0, 0, 5, action.clone(), 0).unwrap();
        let second = sched
            .schedule_periodic(0, 1, 5, action, first.as_u64())
            .unwrap();

        let runners: Vec<_> = (0..2)
            .map(|_| {
                let sched = Arc::clone(&sched);
                thread::spawn(move || sched.run().unwrap())
            })
            .collect();
        for runner in runners {
            // Whichever runner finishes first may find the queue empty.
            assert!(matches!(
                runner.join().unwrap(),
                RunOutcome::Pending(_) | RunOutcome::Drained
            ));
        }

        assert_eq!(*cancelled.lock().unwrap(), Some(true));
        assert_eq!(sched.len(), 1);
        assert_eq!(sched.next_due(), Some(5));
        assert!(!sched.cancel(first));
        assert!(sched.cancel(second));
        assert!(sched.is_empty());
    }

    #[test]
    fn test_halt_is_consumed() {
        let (sched, _) = scheduler(SchedulerMode::Blocking);
        let log = Log::default();
        sched.schedule(0, 0, recorder(&log), "x");

        sched.halt();
        assert_eq!(sched.run().unwrap(), RunOutcome::Halted);
        assert_eq!(sched.run().unwrap(), RunOutcome::Drained);
        assert_eq!(log.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_deferred_fails_in_sync_run() {
        let (sched, _) = scheduler(SchedulerMode::Blocking);
        let deferred = Invocable::deferred(|_: &'static str| async { Ok(()) });
        sched.schedule(0, 0, deferred, "async");

        let err = sched.run().unwrap_err();
        assert!(matches!(err, SchedulerError::ActionFailed { .. }));
        assert!(sched.is_empty());
    }

    #[test]
    fn test_schedule_in_is_relative() {
        let (sched, clock) = scheduler(SchedulerMode::Cooperative);
        clock.set(100);
        sched.schedule_in(7, 0, failing(), "x").unwrap();
        assert_eq!(sched.next_due(), Some(107));
        assert!(matches!(
            sched.schedule_in(u64::MAX, 0, failing(), "y"),
            Err(SchedulerError::TimeOverflow)
        ));
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_run_async_awaits_deferred() {
        let (sched, clock) = scheduler(SchedulerMode::Blocking);
        let log = Log::default();
        let inner = Arc::clone(&log);
        let deferred = Invocable::deferred(move |name: &'static str| {
            let log = Arc::clone(&inner);
            async move {
                tokio::task::yield_now().await;
                log.lock().unwrap().push(name);
                Ok(())
            }
        });
        sched.schedule(20, 0, deferred, "awaited");

        let cancel = CancellationToken::new();
        assert_eq!(sched.run_async(&cancel).await.unwrap(), RunOutcome::Drained);
        assert_eq!(clock.now(), 20);
        assert_eq!(*log.lock().unwrap(), vec!["awaited"]);
    }

    #[cfg(feature = "async")]
    #[tokio::test]
    async fn test_run_async_cancelled_keeps_queue() {
        let (sched, _) = scheduler(SchedulerMode::Blocking);
        sched.schedule(50, 0, failing(), "never");

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert_eq!(
            sched.run_async(&cancel).await.unwrap(),
            RunOutcome::Cancelled
        );
        assert_eq!(sched.len(), 1);
    }
}
