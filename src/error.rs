use std::time::Duration;

use thiserror::Error;

/// Errors that can occur while building a queue with `JobQueueBuilder`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
  #[error("Scheduler tick interval must be greater than zero")]
  ZeroTickInterval,
}

/// Configuration errors raised by worker registration.
///
/// These are programmer errors: [`JobQueue::register_worker`](crate::JobQueue::register_worker)
/// panics with them, [`JobQueue::try_register_worker`](crate::JobQueue::try_register_worker)
/// returns them.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RegisterError {
  #[error("Worker '{0}' is already registered.")]
  DuplicateWorker(String),
  #[error("Cannot register worker '{0}': the job queue has already been started.")]
  AlreadyStarted(String),
}

/// Errors related to submitting jobs via `JobQueue::submit`.
///
/// A rejected submission creates no job; the caller must not poll for one.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SubmitError {
  #[error("No worker named '{0}' is registered; submission dropped.")]
  UnknownWorker(String),
}

/// Errors related to the queue shutdown process (`JobQueue::stop`).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ShutdownError {
  #[error("Timed out after {0:?} waiting for dispatchers and running jobs to exit.")]
  Timeout(Duration),
  #[error("A dispatcher or scheduler task panicked during the shutdown process.")]
  TaskPanic,
}
