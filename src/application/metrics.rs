//! Counters for governed calls.
//!
//! Provides a cheap, shareable view of how a
//! [`CallGovernor`](crate::application::governor::CallGovernor) has been
//! treating its calls, for monitoring and debugging.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Counters tracking governor outcomes.
///
/// All counters use atomic operations; clones share the same counters.
#[derive(Debug, Clone)]
pub struct GovernorMetrics {
    inner: Arc<MetricsInner>,
}

#[derive(Debug, Default)]
struct MetricsInner {
    /// Calls the gate let through
    proceeded: AtomicU64,
    /// Calls refused with a wait time
    rejected: AtomicU64,
    /// Calls that blocked before proceeding
    waited: AtomicU64,
    /// Invocations that returned an error
    failed: AtomicU64,
    /// Completions later than the expected cadence
    cadence_violations: AtomicU64,
}

impl GovernorMetrics {
    /// Create zeroed counters.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::default()),
        }
    }

    pub(crate) fn record_proceeded(&self) {
        self.inner.proceeded.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.inner.rejected.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_waited(&self) {
        self.inner.waited.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_failed(&self) {
        self.inner.failed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_cadence_violation(&self) {
        self.inner.cadence_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Calls the gate let through.
    pub fn proceeded(&self) -> u64 {
        self.inner.proceeded.load(Ordering::Relaxed)
    }

    /// Calls refused with a wait time.
    pub fn rejected(&self) -> u64 {
        self.inner.rejected.load(Ordering::Relaxed)
    }

    /// Times a caller slept before the gate opened.
    pub fn waited(&self) -> u64 {
        self.inner.waited.load(Ordering::Relaxed)
    }

    /// Invocations that returned an error.
    pub fn failed(&self) -> u64 {
        self.inner.failed.load(Ordering::Relaxed)
    }

    /// Completions later than the expected cadence.
    pub fn cadence_violations(&self) -> u64 {
        self.inner.cadence_violations.load(Ordering::Relaxed)
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            proceeded: self.proceeded(),
            rejected: self.rejected(),
            waited: self.waited(),
            failed: self.failed(),
            cadence_violations: self.cadence_violations(),
        }
    }

    /// Reset all counters to zero.
    pub fn reset(&self) {
        self.inner.proceeded.store(0, Ordering::Relaxed);
        self.inner.rejected.store(0, Ordering::Relaxed);
        self.inner.waited.store(0, Ordering::Relaxed);
        self.inner.failed.store(0, Ordering::Relaxed);
        self.inner.cadence_violations.store(0, Ordering::Relaxed);
    }
}

impl Default for GovernorMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// A point-in-time snapshot of governor counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
    /// Calls the gate let through
    pub proceeded: u64,
    /// Calls refused with a wait time
    pub rejected: u64,
    /// Times a caller slept before the gate opened
    pub waited: u64,
    /// Invocations that returned an error
    pub failed: u64,
    /// Completions later than the expected cadence
    pub cadence_violations: u64,
}

impl MetricsSnapshot {
    /// Calls that reached the gate, whether let through or refused.
    pub fn attempts(&self) -> u64 {
        self.proceeded.saturating_add(self.rejected)
    }

    /// Ratio of refused attempts (0.0 to 1.0).
    ///
    /// Returns 0.0 if nothing was attempted.
    pub fn rejection_rate(&self) -> f64 {
        let attempts = self.attempts();
        if attempts == 0 {
            0.0
        } else {
            self.rejected as f64 / attempts as f64
        }
    }
}
