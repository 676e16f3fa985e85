//! The explicit invocation contract for governed and scheduled work.
//!
//! The shape of a callable is chosen once, when it is wrapped, and never
//! inferred at call time:
//!
//! - [`Invocable::Immediate`] runs to completion on the calling thread
//! - [`Invocable::Deferred`] returns a future that must be awaited
//! - [`Invocable::Stream`] produces a sequence of values, drained eagerly

use std::error::Error;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Failure raised by user-supplied work.
pub type InvokeError = Box<dyn Error + Send + Sync>;

/// A boxed, sendable future.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A boxed, sendable sequence of fallible values.
pub type ValueStream<V> = Box<dyn Iterator<Item = Result<V, InvokeError>> + Send>;

type ImmediateFn<A, V> = dyn Fn(A) -> Result<V, InvokeError> + Send + Sync;
type DeferredFn<A, V> = dyn Fn(A) -> BoxFuture<'static, Result<V, InvokeError>> + Send + Sync;
type StreamFn<A, V> = dyn Fn(A) -> ValueStream<V> + Send + Sync;

/// A callable in one of three explicit shapes.
///
/// Cloning is cheap: the underlying closure is shared.
pub enum Invocable<A, V> {
    /// Synchronous call returning a single result
    Immediate(Arc<ImmediateFn<A, V>>),
    /// Asynchronous call returning a single result
    Deferred(Arc<DeferredFn<A, V>>),
    /// Synchronous call producing a sequence of results
    Stream(Arc<StreamFn<A, V>>),
}

/// The shape of an [`Invocable`], without the closure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InvocableKind {
    /// See [`Invocable::Immediate`]
    Immediate,
    /// See [`Invocable::Deferred`]
    Deferred,
    /// See [`Invocable::Stream`]
    Stream,
}

impl fmt::Display for InvocableKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InvocableKind::Immediate => write!(f, "immediate"),
            InvocableKind::Deferred => write!(f, "deferred"),
            InvocableKind::Stream => write!(f, "stream"),
        }
    }
}

/// What a successful invocation produced.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum Output<V> {
    /// The single value of an immediate or deferred call
    Value(V),
    /// Every value produced by a stream, in order
    Sequence(Vec<V>),
}

impl<V> Output<V> {
    /// The single value, if this is not a sequence.
    pub fn value(&self) -> Option<&V> {
        match self {
            Output::Value(v) => Some(v),
            Output::Sequence(_) => None,
        }
    }

    /// Flatten into a list of produced values.
    pub fn into_values(self) -> Vec<V> {
        match self {
            Output::Value(v) => vec![v],
            Output::Sequence(values) => values,
        }
    }
}

/// Returned when a deferred invocable is driven from synchronous code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockingDeferredError;

impl fmt::Display for BlockingDeferredError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "deferred invocable cannot run in a blocking context")
    }
}

impl Error for BlockingDeferredError {}

impl<A, V> Invocable<A, V> {
    /// Wrap a synchronous function.
    pub fn immediate<F>(f: F) -> Self
    where
        F: Fn(A) -> Result<V, InvokeError> + Send + Sync + 'static,
    {
        Invocable::Immediate(Arc::new(f))
    }

    /// Wrap an async function.
    pub fn deferred<F, Fut>(f: F) -> Self
    where
        F: Fn(A) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<V, InvokeError>> + Send + 'static,
    {
        Invocable::Deferred(Arc::new(
            move |args: A| -> BoxFuture<'static, Result<V, InvokeError>> { Box::pin(f(args)) },
        ))
    }

    /// Wrap a function producing a sequence of values.
    pub fn stream<F, I>(f: F) -> Self
    where
        F: Fn(A) -> I + Send + Sync + 'static,
        I: IntoIterator<Item = Result<V, InvokeError>>,
        I::IntoIter: Send + 'static,
    {
        Invocable::Stream(Arc::new(move |args: A| -> ValueStream<V> {
            Box::new(f(args).into_iter())
        }))
    }

    /// The shape of this invocable.
    pub fn kind(&self) -> InvocableKind {
        match self {
            Invocable::Immediate(_) => InvocableKind::Immediate,
            Invocable::Deferred(_) => InvocableKind::Deferred,
            Invocable::Stream(_) => InvocableKind::Stream,
        }
    }

    /// Run on the current thread.
    ///
    /// Deferred invocables fail with [`BlockingDeferredError`].
    pub fn call_blocking(&self, args: A) -> Result<Output<V>, InvokeError> {
        self.call_blocking_observed(args, |_| {})
    }

    /// Run on the current thread, reporting every produced result to
    /// `on_item` as it appears.
    ///
    /// A stream stops at its first failure.
    pub fn call_blocking_observed<F>(&self, args: A, mut on_item: F) -> Result<Output<V>, InvokeError>
    where
        F: FnMut(&Result<V, InvokeError>),
    {
        match self {
            Invocable::Immediate(f) => {
                let result = f(args);
                on_item(&result);
                result.map(Output::Value)
            }
            Invocable::Deferred(_) => Err(Box::new(BlockingDeferredError)),
            Invocable::Stream(f) => drain(f(args), on_item),
        }
    }

    /// Run, awaiting deferred invocables.
    pub async fn call(&self, args: A) -> Result<Output<V>, InvokeError> {
        self.call_observed(args, |_| {}).await
    }

    /// Async counterpart of [`Invocable::call_blocking_observed`].
    pub async fn call_observed<F>(&self, args: A, mut on_item: F) -> Result<Output<V>, InvokeError>
    where
        F: FnMut(&Result<V, InvokeError>),
    {
        match self {
            Invocable::Immediate(f) => {
                let result = f(args);
                on_item(&result);
                result.map(Output::Value)
            }
            Invocable::Deferred(f) => {
                let result = f(args).await;
                on_item(&result);
                result.map(Output::Value)
            }
            Invocable::Stream(f) => drain(f(args), on_item),
        }
    }
}

fn drain<V, F>(stream: ValueStream<V>, mut on_item: F) -> Result<Output<V>, InvokeError>
where
    F: FnMut(&Result<V, InvokeError>),
{
    let mut values = Vec::new();
    for item in stream {
        on_item(&item);
        values.push(item?);
    }
    Ok(Output::Sequence(values))
}

impl<A, V> Clone for Invocable<A, V> {
    fn clone(&self) -> Self {
        match self {
            Invocable::Immediate(f) => Invocable::Immediate(Arc::clone(f)),
            Invocable::Deferred(f) => Invocable::Deferred(Arc::clone(f)),
            Invocable::Stream(f) => Invocable::Stream(Arc::clone(f)),
        }
    }
}

impl<A, V> fmt::Debug for Invocable<A, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Invocable").field(&self.kind()).finish()
    }
}
