//! Intervals over ordered time and Allen's interval algebra.
//!
//! Any two intervals stand in exactly one of thirteen relations. Relations
//! are computed with plain comparisons on the endpoints, so the algebra works
//! for any ordered time type: instants, ticks, or counters.
//!
//! # Degenerate intervals
//!
//! A zero-width interval (a point) has no interior, which makes several
//! textbook relations ambiguous for it. The ambiguity is resolved as follows:
//!
//! - a point at another interval's start `meets` it, and a point at its stop
//!   is `met_by` it (never `starts` or `finishes`);
//! - a point strictly inside another interval is `during` it;
//! - two equal points are `equals`.
//!
//! So a point is only `equals`, `meets` or `met_by` another interval when it
//! touches one of its endpoints. A point strictly inside relates as
//! `during` (`contains` from the other side), and a point away from the
//! interval is `before` or `after` it.
//!
//! # Example
//! ```
//! use tempo_governor::{Interval, Relation};
//!
//! let a = Interval::new(0u64, 10);
//! let b = Interval::new(10u64, 20);
//!
//! assert_eq!(a.relate(&b), Relation::Meets);
//! assert_eq!(b.relate(&a), Relation::MetBy);
//!
//! // Half-open membership: 10 belongs to `b`, not to `a`.
//! assert!(!a.contains(10));
//! assert!(b.contains(10));
//! ```

use crate::domain::time::{Span, TimePoint};
use std::fmt;

/// One of Allen's thirteen interval relations, read as "`a` is ... `b`".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Relation {
    /// `a` ends strictly before `b` starts
    Before,
    /// `a` ends exactly where `b` starts
    Meets,
    /// `a` starts first and ends inside `b`
    Overlaps,
    /// `a` shares `b`'s start and ends first
    Starts,
    /// `a` lies strictly inside `b`
    During,
    /// `a` shares `b`'s stop and starts later
    Finishes,
    /// same endpoints
    Equals,
    /// inverse of `Finishes`
    FinishedBy,
    /// inverse of `During`
    Contains,
    /// inverse of `Starts`
    StartedBy,
    /// inverse of `Overlaps`
    OverlappedBy,
    /// inverse of `Meets`
    MetBy,
    /// inverse of `Before`
    After,
}

impl Relation {
    /// All thirteen relations.
    pub const ALL: [Relation; 13] = [
        Relation::Before,
        Relation::Meets,
        Relation::Overlaps,
        Relation::Starts,
        Relation::During,
        Relation::Finishes,
        Relation::Equals,
        Relation::FinishedBy,
        Relation::Contains,
        Relation::StartedBy,
        Relation::OverlappedBy,
        Relation::MetBy,
        Relation::After,
    ];

    /// The relation obtained by swapping the two operands.
    pub fn inverse(self) -> Relation {
        match self {
            Relation::Before => Relation::After,
            Relation::Meets => Relation::MetBy,
            Relation::Overlaps => Relation::OverlappedBy,
            Relation::Starts => Relation::StartedBy,
            Relation::During => Relation::Contains,
            Relation::Finishes => Relation::FinishedBy,
            Relation::Equals => Relation::Equals,
            Relation::FinishedBy => Relation::Finishes,
            Relation::Contains => Relation::During,
            Relation::StartedBy => Relation::Starts,
            Relation::OverlappedBy => Relation::Overlaps,
            Relation::MetBy => Relation::Meets,
            Relation::After => Relation::Before,
        }
    }

    /// Check if `a` lies within `b` (sharing endpoints allowed).
    pub fn is_within(self) -> bool {
        matches!(
            self,
            Relation::Starts | Relation::During | Relation::Finishes | Relation::Equals
        )
    }

    /// Check if the two intervals share no point and do not touch.
    pub fn is_disjoint(self) -> bool {
        matches!(self, Relation::Before | Relation::After)
    }
}

impl fmt::Display for Relation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Relation::Before => "before",
            Relation::Meets => "meets",
            Relation::Overlaps => "overlaps",
            Relation::Starts => "starts",
            Relation::During => "during",
            Relation::Finishes => "finishes",
            Relation::Equals => "equals",
            Relation::FinishedBy => "finished-by",
            Relation::Contains => "contains",
            Relation::StartedBy => "started-by",
            Relation::OverlappedBy => "overlapped-by",
            Relation::MetBy => "met-by",
            Relation::After => "after",
        };
        f.write_str(name)
    }
}

/// An immutable range `[start, stop)` over an ordered time type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct Interval<T> {
    start: T,
    stop: T,
}

impl<T: Ord + Copy> Interval<T> {
    /// Create an interval, swapping the bounds if given in reverse.
    pub fn new(start: T, stop: T) -> Self {
        if start <= stop {
            Self { start, stop }
        } else {
            Self {
                start: stop,
                stop: start,
            }
        }
    }

    /// Create a zero-width interval at `point`.
    pub fn point(point: T) -> Self {
        Self {
            start: point,
            stop: point,
        }
    }

    /// Lower bound (inclusive).
    pub fn start(&self) -> T {
        self.start
    }

    /// Upper bound (exclusive).
    pub fn stop(&self) -> T {
        self.stop
    }

    /// Check if this interval has zero width.
    pub fn is_degenerate(&self) -> bool {
        self.start == self.stop
    }

    /// Half-open membership: `start <= point < stop`.
    ///
    /// A point at `stop` belongs to the next adjacent interval, so adjacent
    /// buckets never both claim the same instant.
    pub fn contains(&self, point: T) -> bool {
        self.start <= point && point < self.stop
    }

    /// Decide the unique relation between `self` and `other`.
    pub fn relate(&self, other: &Interval<T>) -> Relation {
        let (a, b) = (self, other);

        if a.start == b.start && a.stop == b.stop {
            return Relation::Equals;
        }
        if a.stop < b.start {
            return Relation::Before;
        }
        if a.start > b.stop {
            return Relation::After;
        }
        // Touching endpoints are checked before shared starts/stops so that
        // a point at a boundary resolves to meets/met-by.
        if a.stop == b.start {
            return Relation::Meets;
        }
        if a.start == b.stop {
            return Relation::MetBy;
        }
        if a.start == b.start {
            return if a.stop < b.stop {
                Relation::Starts
            } else {
                Relation::StartedBy
            };
        }
        if a.stop == b.stop {
            return if a.start > b.start {
                Relation::Finishes
            } else {
                Relation::FinishedBy
            };
        }
        if a.start > b.start && a.stop < b.stop {
            return Relation::During;
        }
        if a.start < b.start && a.stop > b.stop {
            return Relation::Contains;
        }
        if a.start < b.start {
            Relation::Overlaps
        } else {
            Relation::OverlappedBy
        }
    }

    /// Relation between this interval and a bare point.
    pub fn relate_point(&self, point: T) -> Relation {
        self.relate(&Interval::point(point))
    }

    /// `self` ends strictly before `other` starts.
    pub fn before(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::Before
    }

    /// `self` starts strictly after `other` ends.
    pub fn after(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::After
    }

    /// `self` ends exactly where `other` starts.
    pub fn meets(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::Meets
    }

    /// `other` ends exactly where `self` starts.
    pub fn met_by(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::MetBy
    }

    /// `self` starts first and ends inside `other`.
    pub fn overlaps(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::Overlaps
    }

    /// `other` starts first and ends inside `self`.
    pub fn overlapped_by(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::OverlappedBy
    }

    /// `self` shares `other`'s start and ends first.
    pub fn starts(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::Starts
    }

    /// `other` shares `self`'s start and ends first.
    pub fn started_by(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::StartedBy
    }

    /// `self` lies strictly inside `other`.
    pub fn during(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::During
    }

    /// `other` lies strictly inside `self`.
    pub fn contains_interval(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::Contains
    }

    /// `self` shares `other`'s stop and starts later.
    pub fn finishes(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::Finishes
    }

    /// `other` shares `self`'s stop and starts later.
    pub fn finished_by(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::FinishedBy
    }

    /// Same endpoints.
    pub fn equals(&self, other: &Interval<T>) -> bool {
        self.relate(other) == Relation::Equals
    }
}

impl<T: TimePoint> Interval<T> {
    /// Create `[start, start + width)`, or `None` on overflow.
    pub fn starting_at(start: T, width: T::Span) -> Option<Self> {
        start.checked_add(width).map(|stop| Self { start, stop })
    }

    /// Width of the interval.
    pub fn duration(&self) -> T::Span {
        self.stop.saturating_since(self.start)
    }

    /// The tumbling window of `width` containing `now`, aligned so that
    /// window starts fall on `origin + k * width`.
    ///
    /// Returns `None` if `now` precedes `origin`, if `width` is zero, or on
    /// overflow.
    pub fn aligned(now: T, origin: T, width: T::Span) -> Option<Self> {
        if now < origin || width.is_zero() {
            return None;
        }
        let offset = now.saturating_since(origin).rem(width);
        let start = now.checked_sub(offset)?;
        Self::starting_at(start, width)
    }
}

impl<T: fmt::Debug> fmt::Display for Interval<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}, {:?})", self.start, self.stop)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn iv(start: u64, stop: u64) -> Interval<u64> {
        Interval::new(start, stop)
    }

    #[test]
    fn test_constructor_normalizes() {
        let i = iv(10, 3);
        assert_eq!(i.start(), 3);
        assert_eq!(i.stop(), 10);
    }

    #[test]
    fn test_all_thirteen_relations() {
        let b = iv(10, 20);
        let cases = [
            (iv(0, 5), Relation::Before),
            (iv(0, 10), Relation::Meets),
            (iv(5, 15), Relation::Overlaps),
            (iv(10, 15), Relation::Starts),
            (iv(12, 18), Relation::During),
            (iv(15, 20), Relation::Finishes),
            (iv(10, 20), Relation::Equals),
            (iv(5, 20), Relation::FinishedBy),
            (iv(5, 25), Relation::Contains),
            (iv(10, 25), Relation::StartedBy),
            (iv(15, 25), Relation::OverlappedBy),
            (iv(20, 25), Relation::MetBy),
            (iv(25, 30), Relation::After),
        ];

        for (a, expected) in cases {
            assert_eq!(a.relate(&b), expected, "{} vs {}", a, b);
            assert_eq!(b.relate(&a), expected.inverse(), "{} vs {}", b, a);
        }
    }

    #[test]
    fn test_named_predicates_match_relate() {
        let a = iv(5, 15);
        let b = iv(10, 20);
        assert!(a.overlaps(&b));
        assert!(b.overlapped_by(&a));
        assert!(!a.before(&b));
        assert!(!a.meets(&b));
        assert!(iv(0, 30).contains_interval(&b));
        assert!(b.during(&iv(0, 30)));
    }

    #[test]
    fn test_half_open_contains() {
        let i = iv(0, 10);
        assert!(i.contains(0));
        assert!(i.contains(9));
        assert!(!i.contains(10));

        let next = iv(10, 20);
        assert!(next.contains(10));
    }

    #[test]
    fn test_degenerate_point_relations() {
        let b = iv(10, 20);

        // Points on the boundaries meet, never start or finish.
        assert_eq!(Interval::point(10).relate(&b), Relation::Meets);
        assert_eq!(Interval::point(20).relate(&b), Relation::MetBy);
        assert_eq!(b.relate_point(10), Relation::MetBy);
        assert_eq!(b.relate_point(20), Relation::Meets);

        // Interior and exterior points.
        assert_eq!(Interval::point(15).relate(&b), Relation::During);
        assert_eq!(b.relate_point(15), Relation::Contains);
        assert_eq!(Interval::point(5).relate(&b), Relation::Before);
        assert_eq!(Interval::point(25).relate(&b), Relation::After);
    }

    #[test]
    fn test_degenerate_against_degenerate() {
        let p = Interval::point(7u64);
        assert_eq!(p.relate(&p), Relation::Equals);
        assert_eq!(p.relate(&Interval::point(8)), Relation::Before);
        assert_eq!(p.relate(&Interval::point(6)), Relation::After);
        assert!(!p.contains(7));
    }

    #[test]
    fn test_zero_width_interval_never_contains() {
        let p = Interval::point(3u64);
        assert!(p.is_degenerate());
        assert!(!p.contains(3));
        assert_eq!(p.duration(), 0);
    }

    #[test]
    fn test_aligned_windows() {
        assert_eq!(Interval::aligned(27u64, 0, 10), Some(iv(20, 30)));
        assert_eq!(Interval::aligned(27u64, 5, 10), Some(iv(25, 35)));
        assert_eq!(Interval::aligned(10u64, 0, 10), Some(iv(10, 20)));
        assert_eq!(Interval::aligned(3u64, 5, 10), None);
        assert_eq!(Interval::aligned(3u64, 0, 0), None);
    }

    #[test]
    fn test_relation_helpers() {
        assert!(Relation::Equals.is_within());
        assert!(Relation::During.is_within());
        assert!(!Relation::Overlaps.is_within());
        assert!(Relation::Before.is_disjoint());
        assert!(!Relation::Meets.is_disjoint());
        assert_eq!(Relation::ALL.len(), 13);
        assert_eq!(Relation::MetBy.to_string(), "met-by");
    }
}
