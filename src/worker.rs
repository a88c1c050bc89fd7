use crate::job::context::JobContext;
use crate::job::{BoxedJobFn, Job, MaxRetries};
use crate::metrics::QueueMetrics;

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Notify, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Backoff base used when a worker is configured with a zero retry delay.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(1);

/// Configuration of a named worker type.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use jobq::WorkerConfig;
///
/// let config = WorkerConfig::new("commercial-scan")
///   .with_concurrency(2)
///   .idle_only(true)
///   .with_max_retries(3)
///   .with_retry_delay(Duration::from_secs(30));
/// assert_eq!(config.concurrency, 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkerConfig {
  /// Unique key jobs are submitted under.
  pub name: String,
  /// Maximum number of this worker's jobs running at once. Values below 1 are
  /// raised to 1 at registration.
  pub concurrency: usize,
  /// Only dispatch while the host is marked idle (see `JobQueue::set_idle`).
  pub idle_only: bool,
  /// Retries allowed after the first failed attempt. Copied onto each job at
  /// submission.
  pub max_retries: MaxRetries,
  /// Base backoff unit: retry `n` waits `retry_delay * 2^(n-1)`. A zero value
  /// is replaced by [`DEFAULT_RETRY_DELAY`] at registration.
  pub retry_delay: Duration,
}

impl WorkerConfig {
  /// A single-slot worker with no retries and the default retry delay.
  pub fn new(name: impl Into<String>) -> Self {
    Self {
      name: name.into(),
      concurrency: 1,
      idle_only: false,
      max_retries: 0,
      retry_delay: DEFAULT_RETRY_DELAY,
    }
  }

  pub fn with_concurrency(mut self, concurrency: usize) -> Self {
    self.concurrency = concurrency;
    self
  }

  pub fn idle_only(mut self, idle_only: bool) -> Self {
    self.idle_only = idle_only;
    self
  }

  pub fn with_max_retries(mut self, max_retries: MaxRetries) -> Self {
    self.max_retries = max_retries;
    self
  }

  pub fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
    self.retry_delay = retry_delay;
    self
  }

  pub(crate) fn normalized(mut self) -> Self {
    if self.concurrency < 1 {
      warn!(worker = %self.name, concurrency = self.concurrency, "Concurrency below 1, using 1.");
      self.concurrency = 1;
    }
    if self.retry_delay.is_zero() {
      self.retry_delay = DEFAULT_RETRY_DELAY;
    }
    self
  }

  /// Delay before retry number `retry_count` (1-based):
  /// `retry_delay * 2^(retry_count - 1)`, saturating at `Duration::MAX`.
  pub fn backoff_delay(&self, retry_count: u32) -> Duration {
    let exponent = retry_count.saturating_sub(1);
    2u32
      .checked_pow(exponent)
      .and_then(|factor| self.retry_delay.checked_mul(factor))
      .unwrap_or(Duration::MAX)
  }
}

/// Result of one execution attempt, as seen by the executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum AttemptOutcome {
  Succeeded,
  Failed(String),
  Panicked(String),
}

impl AttemptOutcome {
  pub fn into_result(self) -> Result<(), String> {
    match self {
      AttemptOutcome::Succeeded => Ok(()),
      AttemptOutcome::Failed(msg) | AttemptOutcome::Panicked(msg) => Err(msg),
    }
  }
}

/// A registered worker: its normalized configuration, handler and the
/// per-worker scheduling primitives its dispatcher uses.
pub(crate) struct Worker {
  pub config: WorkerConfig,
  handler: Arc<BoxedJobFn>,
  /// Coalescing wake signal. `Notify` keeps at most one stored permit, so any
  /// number of wakes between two dispatch passes collapse into one.
  pub wake: Notify,
  /// Concurrency slots, sized to `config.concurrency`.
  pub slots: Arc<Semaphore>,
  /// Jobs of this worker currently in `Running`.
  pub running: AtomicUsize,
  /// Set while an idle waiter task is parked for this worker.
  pub idle_waiter_armed: AtomicBool,
  metrics: QueueMetrics,
}

impl fmt::Debug for Worker {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("Worker")
      .field("config", &self.config)
      .field("handler", &format_args!("Arc<BoxedJobFn>"))
      .field("available_slots", &self.slots.available_permits())
      .field("running", &self.running.load(AtomicOrdering::Relaxed))
      .finish()
  }
}

impl Worker {
  pub fn new(config: WorkerConfig, handler: BoxedJobFn, metrics: QueueMetrics) -> Self {
    let config = config.normalized();
    let slots = Arc::new(Semaphore::new(config.concurrency));
    Self {
      config,
      handler: Arc::new(handler),
      wake: Notify::new(),
      slots,
      running: AtomicUsize::new(0),
      idle_waiter_armed: AtomicBool::new(false),
      metrics,
    }
  }

  pub fn name(&self) -> &str {
    &self.config.name
  }

  pub fn running(&self) -> usize {
    self.running.load(AtomicOrdering::SeqCst)
  }

  /// Runs one attempt of `job`, catching panics.
  ///
  /// The handler future is spawned onto its own task so a panic surfaces as a
  /// `JoinError` instead of unwinding through the caller.
  pub async fn execute(&self, job: Job, token: CancellationToken) -> AttemptOutcome {
    let ctx = JobContext::new(job.id.clone(), job.worker.clone(), job.retry_count + 1, token);
    let handler = self.handler.clone();
    let started = Instant::now();

    info!(attempt = ctx.attempt(), "Starting job execution.");
    QueueMetrics::incr(&self.metrics.attempts_started);

    let task = tokio::spawn(async move { (*handler)(ctx, job).await });
    let outcome = match task.await {
      Ok(Ok(())) => AttemptOutcome::Succeeded,
      Ok(Err(e)) => AttemptOutcome::Failed(e.to_string()),
      Err(join_error) if join_error.is_panic() => {
        let message = panic_message(join_error.into_panic());
        error!(panic = %message, "Job handler panicked!");
        AttemptOutcome::Panicked(format!("panic: {message}"))
      }
      Err(join_error) => {
        warn!(error = %join_error, "Job task was cancelled during execution.");
        AttemptOutcome::Failed(join_error.to_string())
      }
    };

    let duration = started.elapsed();
    self.metrics.execution_duration.record(duration);
    match &outcome {
      AttemptOutcome::Succeeded => {
        QueueMetrics::incr(&self.metrics.attempts_succeeded);
        info!(duration_ms = duration.as_millis(), "Job succeeded.");
      }
      AttemptOutcome::Failed(msg) => {
        QueueMetrics::incr(&self.metrics.attempts_failed);
        info!(duration_ms = duration.as_millis(), error = %msg, "Job attempt failed.");
      }
      AttemptOutcome::Panicked(_) => {
        QueueMetrics::incr(&self.metrics.attempts_failed);
        QueueMetrics::incr(&self.metrics.attempts_panicked);
        debug!(duration_ms = duration.as_millis(), "Job attempt ended in panic.");
      }
    }
    outcome
  }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
  if let Some(s) = payload.downcast_ref::<&'static str>() {
    (*s).to_string()
  } else if let Some(s) = payload.downcast_ref::<String>() {
    s.clone()
  } else {
    "<non-string panic payload>".to_string()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn normalization_raises_concurrency_and_defaults_delay() {
    let config = WorkerConfig::new("epg")
      .with_concurrency(0)
      .with_retry_delay(Duration::ZERO)
      .normalized();
    assert_eq!(config.concurrency, 1);
    assert_eq!(config.retry_delay, DEFAULT_RETRY_DELAY);
  }

  #[test]
  fn backoff_doubles_per_retry() {
    let config = WorkerConfig::new("transcode").with_retry_delay(Duration::from_millis(250));
    assert_eq!(config.backoff_delay(1), Duration::from_millis(250));
    assert_eq!(config.backoff_delay(2), Duration::from_millis(500));
    assert_eq!(config.backoff_delay(3), Duration::from_secs(1));
    assert_eq!(config.backoff_delay(64), Duration::MAX);
  }

  #[test]
  fn panic_payloads_are_rendered() {
    assert_eq!(panic_message(Box::new("boom")), "boom");
    assert_eq!(panic_message(Box::new(String::from("owned"))), "owned");
    assert_eq!(panic_message(Box::new(7_u8)), "<non-string panic payload>");
  }
}
