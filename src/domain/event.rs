//! Call and return observations.

/// An observation about a governed call.
///
/// A call produces a `Called` event before the invocable runs and one
/// `Returned` event per produced value afterwards. A failed call still
/// produces a `Returned` event, carrying the error message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallEvent<A, V> {
    /// The invocable was about to run with these arguments
    Called {
        /// Arguments passed to the invocable
        args: A,
    },
    /// The invocable produced a value or failed
    Returned {
        /// Produced value, or the failure message
        result: Result<V, String>,
    },
}

impl<A, V> CallEvent<A, V> {
    /// Create a `Called` event.
    pub fn called(args: A) -> Self {
        CallEvent::Called { args }
    }

    /// Create a successful `Returned` event.
    pub fn returned(value: V) -> Self {
        CallEvent::Returned { result: Ok(value) }
    }

    /// Create a failed `Returned` event.
    pub fn failed(message: impl Into<String>) -> Self {
        CallEvent::Returned {
            result: Err(message.into()),
        }
    }

    /// Check if this is a `Called` event.
    pub fn is_called(&self) -> bool {
        matches!(self, CallEvent::Called { .. })
    }

    /// Check if this is a failed `Returned` event.
    pub fn is_failure(&self) -> bool {
        matches!(self, CallEvent::Returned { result: Err(_) })
    }
}

/// An event attributed to the time point at which it was created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Stamped<T, E> {
    /// When the event was observed
    pub at: T,
    /// The observation itself
    pub event: E,
}

impl<T, E> Stamped<T, E> {
    /// Attach a time point to an event.
    pub fn new(at: T, event: E) -> Self {
        Self { at, event }
    }
}
