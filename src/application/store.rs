//! Windowed, aggregating event store.
//!
//! Events are folded into fixed-width tumbling buckets aligned to an origin:
//! `[origin + k * timeframe, origin + (k + 1) * timeframe)`. Only the newest
//! bucket is open and mutable. Once time passes its stop it is closed, frozen
//! behind an `Arc`, and appended to a copy-on-write list that readers snapshot
//! without blocking writers for longer than a pointer clone.
//!
//! Buckets are created lazily: a window that receives no events has no
//! bucket. Nothing is deleted automatically; callers trim history with
//! [`WindowedEventStore::drain_before`] or shrink it with
//! [`WindowedEventStore::compact`].

use crate::application::ports::Clock;
use crate::domain::aggregate::{checked_merge, Aggregator};
use crate::domain::interval::Interval;
use crate::domain::time::{Span, TimePoint};
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

#[cfg(feature = "async")]
use crate::application::observer::StoreObserver;
#[cfg(feature = "async")]
use crate::application::ports::Sleep;
#[cfg(feature = "async")]
use tokio::sync::watch;

/// A time window and the aggregate of every event that fell into it.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Bucket<T, G> {
    interval: Interval<T>,
    value: G,
}

impl<T: Ord + Copy, G> Bucket<T, G> {
    /// Create a bucket over `interval` holding `value`.
    pub fn new(interval: Interval<T>, value: G) -> Self {
        Self { interval, value }
    }

    /// The window this bucket covers.
    pub fn interval(&self) -> Interval<T> {
        self.interval
    }

    /// The aggregate of the bucket's events.
    pub fn value(&self) -> &G {
        &self.value
    }

    /// Take the aggregate.
    pub fn into_value(self) -> G {
        self.value
    }

    /// Check if events at `now` still land in this bucket.
    pub fn is_open_at(&self, now: T) -> bool {
        self.interval.contains(now)
    }
}

/// Error returned when store configuration validation fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreConfigError {
    /// Timeframe must be greater than zero
    ZeroTimeframe,
}

impl fmt::Display for StoreConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreConfigError::ZeroTimeframe => write!(f, "timeframe must be greater than 0"),
        }
    }
}

impl std::error::Error for StoreConfigError {}

/// Errors returned by store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError<T> {
    /// The event's time lies before the open bucket or before the origin
    Stale {
        /// Time the event was attributed to
        at: T,
        /// Earliest time still accepting events
        earliest: T,
    },
    /// A bucket boundary could not be represented
    Overflow,
    /// Compaction factor must be greater than zero
    ZeroFactor,
    /// Merging two aggregates gave different results depending on order
    MergeFailure {
        /// The window being merged
        interval: Interval<T>,
    },
}

impl<T: fmt::Debug> fmt::Display for StoreError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreError::Stale { at, earliest } => {
                write!(f, "event at {:?} is older than {:?}", at, earliest)
            }
            StoreError::Overflow => write!(f, "bucket boundary overflowed the clock's range"),
            StoreError::ZeroFactor => write!(f, "compaction factor must be greater than 0"),
            StoreError::MergeFailure { interval } => {
                write!(f, "non-commutative merge detected in {}", interval)
            }
        }
    }
}

impl<T: fmt::Debug> std::error::Error for StoreError<T> {}

#[derive(Debug)]
struct ClosedEntry<T, G> {
    /// Close order; compacted entries keep the highest seq of their members.
    seq: u64,
    bucket: Arc<Bucket<T, G>>,
}

impl<T, G> Clone for ClosedEntry<T, G> {
    fn clone(&self) -> Self {
        Self {
            seq: self.seq,
            bucket: Arc::clone(&self.bucket),
        }
    }
}

#[derive(Debug)]
struct History<T, G> {
    /// Ordered by interval start.
    entries: Arc<Vec<ClosedEntry<T, G>>>,
    next_seq: u64,
}

type Factory<G> = Arc<dyn Fn() -> G + Send + Sync>;

/// Builder for [`WindowedEventStore`].
pub struct StoreBuilder<T: TimePoint, E, G> {
    timeframe: T::Span,
    clock: Arc<dyn Clock<Instant = T>>,
    origin: Option<T>,
    factory: Option<Factory<G>>,
    _events: PhantomData<fn(&E)>,
}

impl<T: TimePoint, E, G: Aggregator<E>> StoreBuilder<T, E, G> {
    /// Align windows to `origin` instead of the clock reading at build time.
    pub fn with_origin(mut self, origin: T) -> Self {
        self.origin = Some(origin);
        self
    }

    /// Create new bucket aggregates with `factory` instead of `G::default`.
    pub fn with_aggregator_factory<F>(mut self, factory: F) -> Self
    where
        F: Fn() -> G + Send + Sync + 'static,
    {
        self.factory = Some(Arc::new(factory));
        self
    }

    /// Build the store.
    ///
    /// # Errors
    /// Returns `StoreConfigError::ZeroTimeframe` if the timeframe is zero.
    pub fn build(self) -> Result<WindowedEventStore<T, E, G>, StoreConfigError> {
        if self.timeframe.is_zero() {
            return Err(StoreConfigError::ZeroTimeframe);
        }
        let origin = self.origin.unwrap_or_else(|| self.clock.now());
        Ok(WindowedEventStore {
            timeframe: self.timeframe,
            origin,
            clock: self.clock,
            factory: self.factory,
            open: Mutex::new(None),
            history: RwLock::new(History {
                entries: Arc::new(Vec::new()),
                next_seq: 1,
            }),
            #[cfg(feature = "async")]
            changes: watch::channel(0).0,
            _events: PhantomData,
        })
    }
}

/// An append-only store of time buckets over events of type `E`,
/// aggregated with `G`.
///
/// # Example
/// ```
/// use tempo_governor::{Counter, WindowedEventStore};
/// use tempo_governor::infrastructure::mocks::MockClock;
/// use std::sync::Arc;
///
/// let clock = MockClock::new(0u64);
/// let store: WindowedEventStore<u64, &str, Counter> =
///     WindowedEventStore::builder(10, Arc::new(clock.clone()))
///         .build()
///         .unwrap();
///
/// for tick in [1, 2, 3, 11] {
///     clock.set(tick);
///     store.insert(&"event").unwrap();
/// }
///
/// let counts: Vec<u64> = store.iterate_past().map(|b| b.value().count()).collect();
/// assert_eq!(counts, vec![1, 3]);
/// ```
pub struct WindowedEventStore<T: TimePoint, E, G> {
    timeframe: T::Span,
    origin: T,
    clock: Arc<dyn Clock<Instant = T>>,
    factory: Option<Factory<G>>,
    open: Mutex<Option<Bucket<T, G>>>,
    history: RwLock<History<T, G>>,
    /// Bumped whenever a bucket opens or closes.
    #[cfg(feature = "async")]
    changes: watch::Sender<u64>,
    _events: PhantomData<fn(&E)>,
}

impl<T: TimePoint, E, G: Aggregator<E>> WindowedEventStore<T, E, G> {
    /// Create a builder for a store with buckets `timeframe` wide.
    ///
    /// Defaults:
    /// - Origin: the clock reading when the store is built
    /// - Aggregator factory: `G::default`
    pub fn builder(timeframe: T::Span, clock: Arc<dyn Clock<Instant = T>>) -> StoreBuilder<T, E, G> {
        StoreBuilder {
            timeframe,
            clock,
            origin: None,
            factory: None,
            _events: PhantomData,
        }
    }

    /// Record `event` at the clock's current time.
    ///
    /// The clock is read while the open bucket is locked, so concurrent
    /// inserts are attributed in lock order and none is lost.
    ///
    /// Returns the interval of the bucket the event landed in.
    ///
    /// # Errors
    /// See [`WindowedEventStore::insert_at`].
    pub fn insert(&self, event: &E) -> Result<Interval<T>, StoreError<T>> {
        let mut open = self.lock_open();
        let now = self.clock.now();
        self.insert_locked(&mut open, event, now)
    }

    /// Record `event` at an explicit time.
    ///
    /// # Errors
    /// Returns `StoreError::Stale` if `now` precedes the open bucket, the
    /// newest closed bucket's stop, or the origin; closed buckets are
    /// immutable. Returns `StoreError::Overflow`
    /// if the window containing `now` cannot be represented.
    pub fn insert_at(&self, event: &E, now: T) -> Result<Interval<T>, StoreError<T>> {
        let mut open = self.lock_open();
        self.insert_locked(&mut open, event, now)
    }

    fn insert_locked(
        &self,
        open: &mut Option<Bucket<T, G>>,
        event: &E,
        now: T,
    ) -> Result<Interval<T>, StoreError<T>> {
        if let Some(bucket) = open.as_mut() {
            if bucket.interval.contains(now) {
                bucket.value.observe(event);
                tracing::trace!(?now, interval = %bucket.interval, "event recorded");
                return Ok(bucket.interval);
            }
            if now < bucket.interval.start() {
                return Err(StoreError::Stale {
                    at: now,
                    earliest: bucket.interval.start(),
                });
            }
        }
        let earliest = match self.read_history().entries.last() {
            Some(entry) => entry.bucket.interval.stop().max(self.origin),
            None => self.origin,
        };
        if now < earliest {
            return Err(StoreError::Stale { at: now, earliest });
        }

        let interval =
            Interval::aligned(now, self.origin, self.timeframe).ok_or(StoreError::Overflow)?;
        let mut fresh = Bucket::new(interval, self.fresh_value());
        fresh.value.observe(event);
        tracing::debug!(%interval, "bucket opened");

        if let Some(previous) = open.replace(fresh) {
            self.close(previous);
        }
        self.notify();
        Ok(interval)
    }

    fn fresh_value(&self) -> G {
        self.factory.as_ref().map_or_else(G::default, |factory| factory())
    }

    /// Close the open bucket if `now` has passed its stop.
    ///
    /// Returns `true` if a bucket was closed.
    pub fn roll(&self, now: T) -> bool {
        let mut open = self.lock_open();
        let expired = matches!(open.as_ref(), Some(bucket) if bucket.interval.stop() <= now);
        if expired {
            if let Some(bucket) = open.take() {
                self.close(bucket);
                self.notify();
            }
        }
        expired
    }

    /// Close the open bucket if the clock has passed its stop.
    pub fn roll_now(&self) -> bool {
        self.roll(self.clock.now())
    }

    fn close(&self, bucket: Bucket<T, G>) {
        tracing::debug!(interval = %bucket.interval, "bucket closed");
        let mut history = self.write_history();
        let seq = history.next_seq;
        history.next_seq += 1;
        Arc::make_mut(&mut history.entries).push(ClosedEntry {
            seq,
            bucket: Arc::new(bucket),
        });
    }

    #[cfg(feature = "async")]
    fn notify(&self) {
        self.changes.send_modify(|generation| *generation += 1);
    }

    #[cfg(not(feature = "async"))]
    fn notify(&self) {}

    /// Snapshot of the open bucket and the closed history, taken together.
    fn snapshot(&self) -> (Option<Bucket<T, G>>, Arc<Vec<ClosedEntry<T, G>>>) {
        let open = self.lock_open();
        let entries = Arc::clone(&self.read_history().entries);
        (open.clone(), entries)
    }

    /// Iterate from the newest bucket to the oldest.
    ///
    /// The current bucket comes first, as an immutable snapshot, followed by
    /// closed buckets. An expired open bucket is closed before iterating.
    /// Later inserts do not affect an iterator already created.
    pub fn iterate_past(&self) -> PastIter<T, G> {
        self.roll_now();
        let (open, entries) = self.snapshot();
        PastIter {
            current: open.map(Arc::new),
            remaining: entries.len(),
            entries,
        }
    }

    /// The open bucket, as a snapshot.
    pub fn current(&self) -> Option<Bucket<T, G>> {
        self.lock_open().clone()
    }

    /// Buckets lying within `range`, oldest first.
    ///
    /// A bucket qualifies when it starts, finishes, equals or lies during
    /// `range`.
    pub fn slice(&self, range: Interval<T>) -> Vec<Arc<Bucket<T, G>>> {
        let (open, entries) = self.snapshot();
        entries
            .iter()
            .map(|entry| Arc::clone(&entry.bucket))
            .chain(open.map(Arc::new))
            .filter(|bucket| bucket.interval.relate(&range).is_within())
            .collect()
    }

    /// Remove and return closed buckets that end at or before `cutoff`,
    /// oldest first.
    pub fn drain_before(&self, cutoff: T) -> Vec<Arc<Bucket<T, G>>> {
        let mut history = self.write_history();
        let split = history
            .entries
            .partition_point(|entry| entry.bucket.interval.stop() <= cutoff);
        if split == 0 {
            return Vec::new();
        }
        let entries = Arc::make_mut(&mut history.entries);
        let drained: Vec<_> = entries.drain(..split).map(|entry| entry.bucket).collect();
        tracing::debug!(count = drained.len(), ?cutoff, "history drained");
        drained
    }

    /// Merge closed buckets ending at or before `before` into windows
    /// `factor` times wider, aligned to the origin.
    ///
    /// A bucket is merged only into the wide window containing it entirely;
    /// the merged bucket spans exactly its members. Returns the number of
    /// buckets removed.
    ///
    /// # Errors
    /// Returns `StoreError::ZeroFactor` for a zero factor, and in debug
    /// builds `StoreError::MergeFailure` if the aggregator is found not to
    /// commute. History is left unchanged on error.
    pub fn compact(&self, before: T, factor: u32) -> Result<usize, StoreError<T>> {
        if factor == 0 {
            return Err(StoreError::ZeroFactor);
        }
        let width = self
            .timeframe
            .checked_mul(factor)
            .ok_or(StoreError::Overflow)?;

        let mut history = self.write_history();
        let mut compacted: Vec<ClosedEntry<T, G>> = Vec::with_capacity(history.entries.len());
        let mut group: Vec<ClosedEntry<T, G>> = Vec::new();
        let mut group_window: Option<Interval<T>> = None;

        for entry in history.entries.iter() {
            let interval = entry.bucket.interval;
            let eligible = interval.stop() <= before;
            let window = if eligible {
                Interval::aligned(interval.start(), self.origin, width)
                    .filter(|window| interval.stop() <= window.stop())
            } else {
                None
            };

            match window {
                Some(window) if group_window == Some(window) => group.push(entry.clone()),
                Some(window) => {
                    self.flush_group(&mut group, &mut compacted)?;
                    group.push(entry.clone());
                    group_window = Some(window);
                }
                None => {
                    self.flush_group(&mut group, &mut compacted)?;
                    group_window = None;
                    compacted.push(entry.clone());
                }
            }
        }
        self.flush_group(&mut group, &mut compacted)?;

        let removed = history.entries.len() - compacted.len();
        if removed > 0 {
            tracing::debug!(removed, factor, "history compacted");
            history.entries = Arc::new(compacted);
        }
        Ok(removed)
    }

    fn flush_group(
        &self,
        group: &mut Vec<ClosedEntry<T, G>>,
        out: &mut Vec<ClosedEntry<T, G>>,
    ) -> Result<(), StoreError<T>> {
        let mut members = group.drain(..);
        let Some(first) = members.next() else {
            return Ok(());
        };

        let mut seq = first.seq;
        let mut start = first.bucket.interval.start();
        let mut stop = first.bucket.interval.stop();
        let mut value = first.bucket.value.clone();
        let mut merged_any = false;

        for member in members {
            let interval = member.bucket.interval;
            value = checked_merge::<E, G>(&value, &member.bucket.value).ok_or_else(|| {
                tracing::warn!(%interval, "aggregator merge is not commutative");
                StoreError::MergeFailure { interval }
            })?;
            seq = seq.max(member.seq);
            start = start.min(interval.start());
            stop = stop.max(interval.stop());
            merged_any = true;
        }

        if merged_any {
            out.push(ClosedEntry {
                seq,
                bucket: Arc::new(Bucket::new(Interval::new(start, stop), value)),
            });
        } else {
            out.push(first);
        }
        Ok(())
    }

    /// Merge every bucket, open and closed, into one aggregate.
    ///
    /// # Errors
    /// Returns `StoreError::MergeFailure` if the aggregator is found not to
    /// commute (debug builds only).
    pub fn total(&self) -> Result<G, StoreError<T>> {
        let (open, entries) = self.snapshot();
        // Seeded with the identity; a factory seed already lives in each bucket.
        let mut total = G::default();
        for bucket in entries.iter().map(|entry| entry.bucket.as_ref()).chain(open.as_ref()) {
            total = checked_merge::<E, G>(&total, &bucket.value).ok_or(StoreError::MergeFailure {
                interval: bucket.interval,
            })?;
        }
        Ok(total)
    }

    /// Number of buckets, open and closed.
    pub fn len(&self) -> usize {
        let open = usize::from(self.lock_open().is_some());
        open + self.read_history().entries.len()
    }

    /// Check if no event was ever kept.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Width of newly created buckets.
    pub fn timeframe(&self) -> T::Span {
        self.timeframe
    }

    /// Time point bucket boundaries are aligned to.
    pub fn origin(&self) -> T {
        self.origin
    }

    /// The store's clock.
    pub fn clock(&self) -> &Arc<dyn Clock<Instant = T>> {
        &self.clock
    }

    /// Closed buckets with a close sequence above `cursor`, oldest first.
    #[cfg(feature = "async")]
    pub(crate) fn closed_after(&self, cursor: u64) -> Option<(u64, Arc<Bucket<T, G>>)> {
        let history = self.read_history();
        let index = history.entries.partition_point(|entry| entry.seq <= cursor);
        history
            .entries
            .get(index)
            .map(|entry| (entry.seq, Arc::clone(&entry.bucket)))
    }

    #[cfg(feature = "async")]
    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    fn lock_open(&self) -> MutexGuard<'_, Option<Bucket<T, G>>> {
        self.open.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn read_history(&self) -> std::sync::RwLockReadGuard<'_, History<T, G>> {
        self.history.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_history(&self) -> std::sync::RwLockWriteGuard<'_, History<T, G>> {
        self.history.write().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(feature = "async")]
impl<T: TimePoint, E, G: Aggregator<E>> WindowedEventStore<T, E, G> {
    /// Create an independent observer with its own not-yet-seen cursor.
    ///
    /// A new observer first replays closed history, oldest first, then the
    /// open bucket, then waits for changes. `sleeper` is used to wait for the
    /// open bucket's stop.
    pub fn observe(self: &Arc<Self>, sleeper: Arc<dyn Sleep<T::Span>>) -> StoreObserver<T, E, G> {
        StoreObserver::new(Arc::clone(self), sleeper)
    }
}

impl<T: TimePoint, E, G> fmt::Debug for WindowedEventStore<T, E, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WindowedEventStore")
            .field("timeframe", &self.timeframe)
            .field("origin", &self.origin)
            .field("clock", &self.clock)
            .finish_non_exhaustive()
    }
}

/// Lazy iterator over buckets, newest first.
///
/// Created by [`WindowedEventStore::iterate_past`].
#[derive(Debug)]
pub struct PastIter<T, G> {
    current: Option<Arc<Bucket<T, G>>>,
    entries: Arc<Vec<ClosedEntry<T, G>>>,
    remaining: usize,
}

impl<T, G> Iterator for PastIter<T, G> {
    type Item = Arc<Bucket<T, G>>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(current) = self.current.take() {
            return Some(current);
        }
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        self.entries
            .get(self.remaining)
            .map(|entry| Arc::clone(&entry.bucket))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let len = self.remaining + usize::from(self.current.is_some());
        (len, Some(len))
    }
}
