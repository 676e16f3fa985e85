//! Time points and spans.
//!
//! Every component in this crate is generic over the notion of "now" it runs
//! on. A wall-clock `Instant`, a monotonic tick counter, or any other totally
//! ordered value works, as long as subtracting two points yields a [`Span`].

use std::fmt::Debug;
use std::time::{Duration, Instant};

/// The difference between two [`TimePoint`]s.
pub trait Span: Copy + Ord + Debug + Send + Sync + 'static {
    /// The empty span.
    const ZERO: Self;

    /// Subtract, clamping at zero.
    fn saturating_sub(self, other: Self) -> Self;

    /// Add, returning `None` on overflow.
    fn checked_add(self, other: Self) -> Option<Self>;

    /// Multiply by a whole factor, returning `None` on overflow.
    fn checked_mul(self, factor: u32) -> Option<Self>;

    /// Remainder of `self` divided by a non-zero `modulus`.
    ///
    /// Returns `self` unchanged when `modulus` is zero.
    fn rem(self, modulus: Self) -> Self;

    /// Check if this span is empty.
    fn is_zero(&self) -> bool {
        *self == Self::ZERO
    }
}

/// An opaque, totally ordered point in time.
pub trait TimePoint: Copy + Ord + Debug + Send + Sync + 'static {
    /// Span type produced by subtracting two points.
    type Span: Span;

    /// Span elapsed since `earlier`, or zero if `earlier` is in the future.
    fn saturating_since(self, earlier: Self) -> Self::Span;

    /// Move forward by `span`.
    fn checked_add(self, span: Self::Span) -> Option<Self>;

    /// Move backward by `span`.
    fn checked_sub(self, span: Self::Span) -> Option<Self>;
}

impl Span for Duration {
    const ZERO: Self = Duration::ZERO;

    fn saturating_sub(self, other: Self) -> Self {
        Duration::saturating_sub(self, other)
    }

    fn checked_add(self, other: Self) -> Option<Self> {
        Duration::checked_add(self, other)
    }

    fn checked_mul(self, factor: u32) -> Option<Self> {
        Duration::checked_mul(self, factor)
    }

    fn rem(self, modulus: Self) -> Self {
        let modulus = modulus.as_nanos();
        if modulus == 0 {
            return self;
        }
        // The remainder is below `modulus`, which itself came from a Duration.
        let nanos = self.as_nanos() % modulus;
        Duration::new(
            (nanos / 1_000_000_000) as u64,
            (nanos % 1_000_000_000) as u32,
        )
    }
}

impl TimePoint for Instant {
    type Span = Duration;

    fn saturating_since(self, earlier: Self) -> Duration {
        self.saturating_duration_since(earlier)
    }

    fn checked_add(self, span: Duration) -> Option<Self> {
        Instant::checked_add(&self, span)
    }

    fn checked_sub(self, span: Duration) -> Option<Self> {
        Instant::checked_sub(&self, span)
    }
}

impl Span for u64 {
    const ZERO: Self = 0;

    fn saturating_sub(self, other: Self) -> Self {
        u64::saturating_sub(self, other)
    }

    fn checked_add(self, other: Self) -> Option<Self> {
        u64::checked_add(self, other)
    }

    fn checked_mul(self, factor: u32) -> Option<Self> {
        u64::checked_mul(self, u64::from(factor))
    }

    fn rem(self, modulus: Self) -> Self {
        if modulus == 0 {
            self
        } else {
            self % modulus
        }
    }
}

/// Integer ticks: a logical clock or any counter-based timeline.
impl TimePoint for u64 {
    type Span = u64;

    fn saturating_since(self, earlier: Self) -> u64 {
        self.saturating_sub(earlier)
    }

    fn checked_add(self, span: u64) -> Option<Self> {
        u64::checked_add(self, span)
    }

    fn checked_sub(self, span: u64) -> Option<Self> {
        u64::checked_sub(self, span)
    }
}
