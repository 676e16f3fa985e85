//! Per-key rate gates.
//!
//! A [`GateRegistry`] lazily creates one [`RateGate`] per key, all sharing a
//! configuration and a clock, so that distinct callers (users, endpoints,
//! tenants) are throttled independently.

use crate::application::gate::{GateConfig, GateDecision, RateGate};
use crate::application::ports::Clock;
use crate::domain::time::TimePoint;
use ahash::RandomState;
use dashmap::DashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

/// Concurrent map of keys to their own rate gate.
///
/// Backed by a `DashMap`, so decisions for different keys rarely contend.
/// Gates are shared behind `Arc` and can be handed out with
/// [`GateRegistry::gate`].
///
/// # Example
/// ```
/// use tempo_governor::{GateConfig, GateDecision, GateRegistry};
/// use tempo_governor::infrastructure::mocks::MockClock;
/// use std::sync::Arc;
///
/// let clock = Arc::new(MockClock::new(0u64));
/// let registry: GateRegistry<&str, u64> = GateRegistry::new(GateConfig::new(10).unwrap(), clock);
///
/// assert_eq!(registry.decide("alice", 0), GateDecision::Proceed);
/// assert_eq!(registry.decide("bob", 0), GateDecision::Proceed);
/// assert_eq!(registry.decide("alice", 4), GateDecision::Wait(6));
/// ```
pub struct GateRegistry<K, T: TimePoint> {
    gates: DashMap<K, Arc<RateGate<T>>, RandomState>,
    config: GateConfig<T::Span>,
    clock: Arc<dyn Clock<Instant = T>>,
}

impl<K, T> GateRegistry<K, T>
where
    K: Eq + Hash + Clone,
    T: TimePoint,
{
    /// Create an empty registry whose gates all use `config`.
    pub fn new(config: GateConfig<T::Span>, clock: Arc<dyn Clock<Instant = T>>) -> Self {
        Self {
            gates: DashMap::with_hasher(RandomState::new()),
            config,
            clock,
        }
    }

    /// Get the gate for `key`, creating it on first use.
    pub fn gate(&self, key: &K) -> Arc<RateGate<T>> {
        if let Some(gate) = self.gates.get(key) {
            return Arc::clone(gate.value());
        }
        let gate = self
            .gates
            .entry(key.clone())
            .or_insert_with(|| Arc::new(RateGate::new(self.config, Arc::clone(&self.clock))));
        Arc::clone(gate.value())
    }

    /// Decide whether a call for `key` at `now` may proceed.
    pub fn decide(&self, key: K, now: T) -> GateDecision<T::Span> {
        self.gate(&key).decide(now)
    }

    /// Decide for `key` using the registry's clock.
    pub fn decide_now(&self, key: K) -> GateDecision<T::Span> {
        self.decide(key, self.clock.now())
    }

    /// Drop gates that would let a call at `now` through anyway.
    ///
    /// Gates configured with
    /// [`InitialPolicy::PreventBurst`](crate::application::gate::InitialPolicy::PreventBurst)
    /// start closed again when recreated. Returns the number removed.
    pub fn evict_idle(&self, now: T) -> usize {
        let before = self.gates.len();
        self.gates.retain(|_, gate| !gate.is_open_at(now));
        let removed = before.saturating_sub(self.gates.len());
        if removed > 0 {
            tracing::debug!(removed, "idle gates evicted");
        }
        removed
    }

    /// Remove the gate for `key`.
    pub fn remove(&self, key: &K) -> Option<Arc<RateGate<T>>> {
        self.gates.remove(key).map(|(_, gate)| gate)
    }

    /// Number of tracked keys.
    pub fn len(&self) -> usize {
        self.gates.len()
    }

    /// Check if no key is tracked.
    pub fn is_empty(&self) -> bool {
        self.gates.is_empty()
    }

    /// Remove every gate.
    pub fn clear(&self) {
        self.gates.clear();
    }

    /// The configuration new gates are created with.
    pub fn config(&self) -> &GateConfig<T::Span> {
        &self.config
    }
}

impl<K: Eq + Hash, T: TimePoint> fmt::Debug for GateRegistry<K, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateRegistry")
            .field("gates", &self.gates.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::application::gate::InitialPolicy;
    use crate::infrastructure::mocks::MockClock;
    use std::thread;

    fn registry(period: u64) -> (GateRegistry<String, u64>, MockClock<u64>) {
        let clock = MockClock::new(0u64);
        let registry = GateRegistry::new(GateConfig::new(period).unwrap(), Arc::new(clock.clone()));
        (registry, clock)
    }

    #[test]
    fn test_registry_creation() {
        let (registry, _) = registry(5);
        assert_eq!(registry.len(), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_debug_reports_gate_count() {
        let (registry, _) = registry(5);
        registry.decide("a".to_string(), 0);
        let debug = format!("{:?}", registry);
        assert!(debug.starts_with("GateRegistry"));
        assert!(debug.contains("gates: 1"));
    }

    #[test]
    fn test_keys_are_independent() {
        let (registry, _) = registry(5);
        assert!(registry.decide("a".to_string(), 0).is_proceed());
        assert!(registry.decide("b".to_string(), 1).is_proceed());
        assert_eq!(registry.decide("a".to_string(), 2), GateDecision::Wait(3));
        assert_eq!(registry.len(), 2);
    }

    #[test]
    fn test_gate_is_shared() {
        let (registry, _) = registry(5);
        let key = "shared".to_string();
        let gate = registry.gate(&key);
        assert!(gate.decide(0).is_proceed());
        assert_eq!(registry.decide(key, 1), GateDecision::Wait(4));
    }

    #[test]
    fn test_evict_idle() {
        let (registry, clock) = registry(10);
        registry.decide("old".to_string(), 0);
        registry.decide("new".to_string(), 8);

        assert_eq!(registry.evict_idle(12), 1);
        assert_eq!(registry.len(), 1);
        assert!(registry.remove(&"new".to_string()).is_some());

        clock.set(20);
        assert!(registry.decide_now("old".to_string()).is_proceed());
    }

    #[test]
    fn test_prevent_burst_per_key() {
        let clock = MockClock::new(100u64);
        let config = GateConfig::new(10)
            .unwrap()
            .with_initial_policy(InitialPolicy::PreventBurst);
        let registry: GateRegistry<u32, u64> = GateRegistry::new(config, Arc::new(clock.clone()));

        assert_eq!(registry.decide_now(1), GateDecision::Wait(10));
        clock.advance(10);
        assert!(registry.decide_now(1).is_proceed());
    }

    #[test]
    fn test_clear() {
        let (registry, _) = registry(5);
        for i in 0..10 {
            registry.decide(format!("key-{}", i), 0);
        }
        assert_eq!(registry.len(), 10);
        registry.clear();
        assert!(registry.is_empty());
    }

    #[test]
    fn test_concurrent_single_proceed_per_key() {
        let (registry, _) = registry(100);
        let registry = Arc::new(registry);
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..50)
                        .filter(|i| registry.decide(format!("k{}", i), 0).is_proceed())
                        .count()
                })
            })
            .collect();

        let proceeded: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(proceeded, 50);
        assert_eq!(registry.len(), 50);
    }
}
