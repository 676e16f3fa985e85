//! Order-independent aggregation of observations.
//!
//! A bucket never stores the events that fall into it, only an aggregate.
//! Aggregates must merge commutatively and associatively so that neither the
//! arrival order inside a bucket nor the order in which buckets are later
//! compacted changes the result.

use crate::domain::event::CallEvent;
use ahash::AHashMap;
use std::fmt::Debug;
use std::hash::Hash;

/// A commutative monoid over observations of type `E`.
///
/// `Default` is the identity element.
pub trait Aggregator<E>: Clone + PartialEq + Debug + Default + Send + Sync {
    /// Fold a single observation into the aggregate.
    fn observe(&mut self, event: &E);

    /// Combine another aggregate into this one.
    ///
    /// Must satisfy `a.merge(b) == b.merge(a)`.
    fn merge(&mut self, other: &Self);
}

/// Merge two aggregates, verifying in debug builds that the merge commutes.
///
/// Returns `None` if the aggregator is found to be non-commutative, which is
/// a configuration error on the caller's side.
pub fn checked_merge<E, G: Aggregator<E>>(left: &G, right: &G) -> Option<G> {
    let mut merged = left.clone();
    merged.merge(right);

    if cfg!(debug_assertions) {
        let mut swapped = right.clone();
        swapped.merge(left);
        if swapped != merged {
            return None;
        }
    }

    Some(merged)
}

/// Counts observations of any kind.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Counter {
    count: u64,
}

impl Counter {
    /// Create a counter with an initial count.
    pub fn new(count: u64) -> Self {
        Self { count }
    }

    /// Number of observations folded in.
    pub fn count(&self) -> u64 {
        self.count
    }
}

impl<E> Aggregator<E> for Counter {
    fn observe(&mut self, _event: &E) {
        self.count = self.count.saturating_add(1);
    }

    fn merge(&mut self, other: &Self) {
        self.count = self.count.saturating_add(other.count);
    }
}

/// Counts observations per distinct value, like a multiset.
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(
    feature = "serde",
    serde(bound(
        serialize = "K: serde::Serialize + Eq + Hash",
        deserialize = "K: serde::Deserialize<'de> + Eq + Hash"
    ))
)]
pub struct Tally<K> {
    counts: AHashMap<K, u64>,
}

impl<K: Eq + Hash> PartialEq for Tally<K> {
    fn eq(&self, other: &Self) -> bool {
        self.counts == other.counts
    }
}

impl<K: Eq + Hash> Eq for Tally<K> {}

impl<K> Default for Tally<K> {
    fn default() -> Self {
        Self {
            counts: AHashMap::default(),
        }
    }
}

impl<K: Eq + Hash> Tally<K> {
    /// Number of times `key` was observed.
    pub fn get(&self, key: &K) -> u64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    /// Total observations across all keys.
    pub fn total(&self) -> u64 {
        self.counts.values().sum()
    }

    /// Number of distinct keys observed.
    pub fn distinct(&self) -> usize {
        self.counts.len()
    }

    /// Iterate over `(key, count)` pairs in arbitrary order.
    pub fn iter(&self) -> impl Iterator<Item = (&K, u64)> {
        self.counts.iter().map(|(k, c)| (k, *c))
    }
}

impl<K> Aggregator<K> for Tally<K>
where
    K: Eq + Hash + Clone + Debug + Send + Sync,
{
    fn observe(&mut self, event: &K) {
        let slot = self.counts.entry(event.clone()).or_insert(0);
        *slot = slot.saturating_add(1);
    }

    fn merge(&mut self, other: &Self) {
        for (key, count) in &other.counts {
            let slot = self.counts.entry(key.clone()).or_insert(0);
            *slot = slot.saturating_add(*count);
        }
    }
}

/// Counts calls, successful returns and failed returns.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CallTally {
    /// `Called` events
    pub called: u64,
    /// Successful `Returned` events
    pub returned: u64,
    /// Failed `Returned` events
    pub failed: u64,
}

impl CallTally {
    /// Total events observed.
    pub fn total(&self) -> u64 {
        self.called + self.returned + self.failed
    }
}

impl<A, V> Aggregator<CallEvent<A, V>> for CallTally {
    fn observe(&mut self, event: &CallEvent<A, V>) {
        match event {
            CallEvent::Called { .. } => self.called += 1,
            CallEvent::Returned { result: Ok(_) } => self.returned += 1,
            CallEvent::Returned { result: Err(_) } => self.failed += 1,
        }
    }

    fn merge(&mut self, other: &Self) {
        self.called += other.called;
        self.returned += other.returned;
        self.failed += other.failed;
    }
}
