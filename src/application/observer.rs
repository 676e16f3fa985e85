//! Async observation of a [`WindowedEventStore`].
//!
//! Each [`StoreObserver`] keeps its own cursor. It first replays closed
//! history oldest first, then reports the open bucket, and afterwards waits
//! for a bucket to open or close. While a bucket is open the observer also
//! sleeps until its stop, so a window that simply runs out is reported as
//! closed without any further insert.

use crate::application::ports::Sleep;
use crate::application::store::{Bucket, WindowedEventStore};
use crate::domain::aggregate::Aggregator;
use crate::domain::interval::Interval;
use crate::domain::time::TimePoint;
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

/// A bucket change reported by [`StoreObserver::await_next`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NextBucket<T, G> {
    /// A bucket became the open bucket; the value is a snapshot
    Opened(Arc<Bucket<T, G>>),
    /// A bucket was closed and will not change again
    Closed(Arc<Bucket<T, G>>),
}

impl<T, G> NextBucket<T, G> {
    /// The reported bucket.
    pub fn bucket(&self) -> &Arc<Bucket<T, G>> {
        match self {
            NextBucket::Opened(bucket) | NextBucket::Closed(bucket) => bucket,
        }
    }

    /// Check if the bucket was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, NextBucket::Closed(_))
    }
}

/// Error returned when observation stops.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObserveError {
    /// The cancellation token fired
    Cancelled,
}

impl fmt::Display for ObserveError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObserveError::Cancelled => write!(f, "observation cancelled"),
        }
    }
}

impl std::error::Error for ObserveError {}

/// Independent, cancellable view of a store's bucket changes.
///
/// Created by [`WindowedEventStore::observe`].
pub struct StoreObserver<T: TimePoint, E, G> {
    store: Arc<WindowedEventStore<T, E, G>>,
    sleeper: Arc<dyn Sleep<T::Span>>,
    changes: watch::Receiver<u64>,
    /// Highest close sequence already reported.
    closed_cursor: u64,
    open_seen: Option<Interval<T>>,
}

impl<T: TimePoint, E, G: Aggregator<E>> StoreObserver<T, E, G> {
    pub(crate) fn new(
        store: Arc<WindowedEventStore<T, E, G>>,
        sleeper: Arc<dyn Sleep<T::Span>>,
    ) -> Self {
        let changes = store.subscribe();
        Self {
            store,
            sleeper,
            changes,
            closed_cursor: 0,
            open_seen: None,
        }
    }

    /// Wait for the next bucket this observer has not seen.
    ///
    /// # Errors
    /// Returns `ObserveError::Cancelled` once `cancel` fires.
    pub async fn await_next(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<NextBucket<T, G>, ObserveError> {
        loop {
            if cancel.is_cancelled() {
                return Err(ObserveError::Cancelled);
            }

            let now = self.store.clock().now();
            self.store.roll(now);
            self.changes.borrow_and_update();

            if let Some((seq, bucket)) = self.store.closed_after(self.closed_cursor) {
                self.closed_cursor = seq;
                tracing::trace!(interval = %bucket.interval(), "observer saw closed bucket");
                return Ok(NextBucket::Closed(bucket));
            }

            let open = self.store.current();
            if let Some(open) = &open {
                if self.open_seen != Some(open.interval()) {
                    self.open_seen = Some(open.interval());
                    return Ok(NextBucket::Opened(Arc::new(open.clone())));
                }
            }

            let until_stop = open.map(|bucket| bucket.interval().stop().saturating_since(now));
            let sleeper = Arc::clone(&self.sleeper);
            let expiry = async move {
                match until_stop {
                    Some(span) => sleeper.sleep_async(span).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                _ = cancel.cancelled() => return Err(ObserveError::Cancelled),
                _ = self.changes.changed() => {}
                _ = expiry => {}
            }
        }
    }

    /// The observed store.
    pub fn store(&self) -> &Arc<WindowedEventStore<T, E, G>> {
        &self.store
    }
}

impl<T: TimePoint, E, G> fmt::Debug for StoreObserver<T, E, G> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StoreObserver")
            .field("closed_cursor", &self.closed_cursor)
            .field("open_seen", &self.open_seen)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::ports::Clock;
    use crate::domain::aggregate::Counter;
    use crate::infrastructure::mocks::MockClock;
    use std::time::Duration;

    type CountStore = WindowedEventStore<u64, &'static str, Counter>;

    fn store() -> (Arc<CountStore>, MockClock<u64>) {
        let clock = MockClock::new(0u64);
        let store = WindowedEventStore::builder(10, Arc::new(clock.clone()))
            .build()
            .unwrap();
        (Arc::new(store), clock)
    }

    #[tokio::test]
    async fn test_replays_history_then_open_bucket() {
        let (store, clock) = store();
        for t in [1, 12, 25] {
            clock.set(t);
            store.insert(&"x").unwrap();
        }

        let mut observer = store.observe(Arc::new(clock.clone()));
        let cancel = CancellationToken::new();

        let first = observer.await_next(&cancel).await.unwrap();
        assert!(first.is_closed());
        assert_eq!(first.bucket().interval(), Interval::new(0, 10));

        let second = observer.await_next(&cancel).await.unwrap();
        assert_eq!(second.bucket().interval(), Interval::new(10, 20));

        let third = observer.await_next(&cancel).await.unwrap();
        assert!(!third.is_closed());
        assert_eq!(third.bucket().interval(), Interval::new(20, 30));
    }

    #[tokio::test]
    async fn test_open_bucket_reported_closed_when_it_expires() {
        let (store, clock) = store();
        clock.set(3);
        store.insert(&"x").unwrap();

        let mut observer = store.observe(Arc::new(clock.clone()));
        let cancel = CancellationToken::new();

        assert!(matches!(
            observer.await_next(&cancel).await,
            Ok(NextBucket::Opened(_))
        ));

        // The mock sleeper advances the clock to the bucket's stop.
        let closed = observer.await_next(&cancel).await.unwrap();
        assert!(closed.is_closed());
        assert_eq!(closed.bucket().value().count(), 1);
        assert!(clock.now() >= 10);
    }

    #[tokio::test]
    async fn test_observers_are_independent() {
        let (store, clock) = store();
        clock.set(1);
        store.insert(&"x").unwrap();
        clock.set(11);
        store.insert(&"x").unwrap();

        let cancel = CancellationToken::new();
        let mut early = store.observe(Arc::new(clock.clone()));
        let first = early.await_next(&cancel).await.unwrap();

        let mut late = store.observe(Arc::new(clock.clone()));
        assert_eq!(late.await_next(&cancel).await.unwrap(), first);
    }

    #[tokio::test]
    async fn test_wakes_on_insert() {
        let (store, clock) = store();
        let mut observer = store.observe(Arc::new(clock.clone()));
        let cancel = CancellationToken::new();

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(10)).await;
                store.insert_at(&"x", 4).unwrap();
            })
        };

        let next = observer.await_next(&cancel).await.unwrap();
        assert_eq!(next.bucket().interval(), Interval::new(0, 10));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn test_cancellation() {
        let (store, clock) = store();
        let mut observer = store.observe(Arc::new(clock));
        let cancel = CancellationToken::new();

        let waiter = tokio::spawn({
            let cancel = cancel.clone();
            async move { observer.await_next(&cancel).await }
        });
        cancel.cancel();

        assert_eq!(waiter.await.unwrap(), Err(ObserveError::Cancelled));
    }
}
