use tokio_util::sync::{CancellationToken, WaitForCancellationFuture};

use super::JobId;

/// Per-attempt execution context handed to a job handler.
///
/// Wraps the attempt's cancellation token, a child of the queue's root token.
/// It fires when the job is cancelled through
/// [`JobQueue::cancel`](crate::JobQueue::cancel) or when the queue stops.
/// Handlers are expected to observe it and return promptly.
#[derive(Debug, Clone)]
pub struct JobContext {
  job_id: JobId,
  worker: String,
  attempt: u32,
  token: CancellationToken,
}

impl JobContext {
  pub(crate) fn new(job_id: JobId, worker: String, attempt: u32, token: CancellationToken) -> Self {
    Self {
      job_id,
      worker,
      attempt,
      token,
    }
  }

  pub fn job_id(&self) -> &str {
    &self.job_id
  }

  pub fn worker(&self) -> &str {
    &self.worker
  }

  /// 1-based attempt number (1 for the first run, 2 for the first retry, ...).
  pub fn attempt(&self) -> u32 {
    self.attempt
  }

  pub fn is_cancelled(&self) -> bool {
    self.token.is_cancelled()
  }

  /// Completes once the attempt has been cancelled.
  pub fn cancelled(&self) -> WaitForCancellationFuture<'_> {
    self.token.cancelled()
  }

  /// The underlying token, for handing to child operations (e.g. a spawned
  /// ffmpeg supervisor) that accept a `CancellationToken`.
  pub fn token(&self) -> &CancellationToken {
    &self.token
  }
}
