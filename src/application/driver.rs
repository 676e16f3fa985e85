//! Background driver for a [`Scheduler`].
//!
//! The driver owns a tokio task that repeatedly enters
//! [`Scheduler::run_async`] and, between runs, sleeps until the next action is
//! due or a new action is scheduled. It must be stopped explicitly with
//! [`SchedulerHandle::shutdown`]; dropping the handle leaves the task running.

use crate::application::scheduler::{RunOutcome, Scheduler, SchedulerError};
use crate::domain::time::TimePoint;
use std::fmt;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Error returned when stopping a driver fails.
#[derive(Debug)]
pub enum ShutdownError {
    /// The driver task panicked
    TaskPanicked,
    /// The driver task was aborted by the runtime
    TaskCancelled,
    /// The driver stopped earlier because an action failed in blocking mode
    Scheduler(SchedulerError),
}

impl fmt::Display for ShutdownError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShutdownError::TaskPanicked => write!(f, "scheduler driver panicked"),
            ShutdownError::TaskCancelled => write!(f, "scheduler driver was cancelled"),
            ShutdownError::Scheduler(e) => write!(f, "scheduler driver stopped: {}", e),
        }
    }
}

impl std::error::Error for ShutdownError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ShutdownError::Scheduler(e) => Some(e),
            _ => None,
        }
    }
}

/// Handle to a running scheduler driver.
#[derive(Debug)]
pub struct SchedulerHandle<T: TimePoint, A, V> {
    scheduler: Arc<Scheduler<T, A, V>>,
    cancel: CancellationToken,
    task: JoinHandle<Result<(), SchedulerError>>,
}

impl<T, A, V> SchedulerHandle<T, A, V>
where
    T: TimePoint,
    A: Clone + Send + 'static,
    V: Send + 'static,
{
    /// Spawn a driver task for `scheduler` on the current tokio runtime.
    ///
    /// The driver keeps running while the queue is empty, waiting for new
    /// actions. A [`Scheduler::halt`] stops it just like a shutdown.
    pub fn spawn(scheduler: Arc<Scheduler<T, A, V>>) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(drive(Arc::clone(&scheduler), cancel.clone()));
        Self {
            scheduler,
            cancel,
            task,
        }
    }
}

impl<T: TimePoint, A, V> SchedulerHandle<T, A, V> {
    /// The driven scheduler, for scheduling more actions.
    pub fn scheduler(&self) -> &Arc<Scheduler<T, A, V>> {
        &self.scheduler
    }

    /// Check if the driver task has stopped on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop the driver and wait for it to finish.
    ///
    /// A running action is allowed to complete; pending actions stay queued.
    ///
    /// # Errors
    /// Returns an error if the task panicked, was aborted, or had already
    /// stopped because of a failed action.
    pub async fn shutdown(self) -> Result<(), ShutdownError> {
        self.cancel.cancel();
        match self.task.await {
            Ok(Ok(())) => {
                tracing::info!("scheduler driver shut down");
                Ok(())
            }
            Ok(Err(e)) => Err(ShutdownError::Scheduler(e)),
            Err(e) if e.is_panic() => Err(ShutdownError::TaskPanicked),
            Err(_) => Err(ShutdownError::TaskCancelled),
        }
    }
}

async fn drive<T, A, V>(
    scheduler: Arc<Scheduler<T, A, V>>,
    cancel: CancellationToken,
) -> Result<(), SchedulerError>
where
    T: TimePoint,
    A: Clone + Send + 'static,
    V: Send + 'static,
{
    loop {
        let outcome = match scheduler.run_async(&cancel).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::warn!(error = %e, "scheduler driver stopping after action failure");
                return Err(e);
            }
        };

        match outcome {
            RunOutcome::Drained => {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = scheduler.notified() => {}
                }
            }
            RunOutcome::Pending(delay) => {
                tracing::debug!(?delay, "scheduler driver waiting");
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = scheduler.sleeper().sleep_async(delay) => {}
                    _ = scheduler.notified() => {}
                }
            }
            RunOutcome::Halted | RunOutcome::Cancelled => break,
        }
    }
    Ok(())
}
