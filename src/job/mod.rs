pub mod context;

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use self::context::JobContext;

// --- Public Type Aliases ---

/// Identifier of a submitted job. Either supplied by the caller through
/// [`JobOptions::with_id`] or generated (UUID v4) at submission time.
pub type JobId = String;

/// Maximum number of retry attempts a worker allows after the first failure.
pub type MaxRetries = u32;

/// Error type returned by job handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The future a handler produces for one execution attempt.
pub type HandlerFuture = Pin<Box<dyn Future<Output = Result<(), HandlerError>> + Send + 'static>>;

/// The function type workers execute.
///
/// Invoked once per attempt with the attempt's [`JobContext`] and a snapshot of
/// the job. The returned error is the sole retry trigger; panics are caught by
/// the executor and treated as failures.
pub type BoxedJobFn = Box<dyn Fn(JobContext, Job) -> HandlerFuture + Send + Sync + 'static>;

// --- Status ---

/// Lifecycle state of a job.
///
/// `Pending -> Running -> {Completed | Failed | Cancelled}`, plus
/// `Running -> Pending` when a failed attempt is scheduled for retry.
/// `Cancelled` is reachable from `Pending` or `Running`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum JobStatus {
  Pending,
  Running,
  Completed,
  Failed,
  Cancelled,
}

impl JobStatus {
  /// True for `Pending` and `Running`.
  pub fn is_in_flight(self) -> bool {
    matches!(self, JobStatus::Pending | JobStatus::Running)
  }

  /// True for `Completed`, `Failed` and `Cancelled`.
  pub fn is_terminal(self) -> bool {
    !self.is_in_flight()
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      JobStatus::Pending => "pending",
      JobStatus::Running => "running",
      JobStatus::Completed => "completed",
      JobStatus::Failed => "failed",
      JobStatus::Cancelled => "cancelled",
    };
    f.write_str(s)
  }
}

// --- Payload ---

/// Opaque value attached to a job at submission and handed unchanged to the
/// handler. Cloning only clones the inner `Arc`.
#[derive(Clone)]
pub struct Payload(Arc<dyn Any + Send + Sync>);

impl Payload {
  pub fn new<T: Any + Send + Sync>(value: T) -> Self {
    Self(Arc::new(value))
  }

  /// Returns the payload as `T` if that is the type it was submitted with.
  pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
    self.0.downcast_ref::<T>()
  }

  pub fn is<T: Any>(&self) -> bool {
    self.0.is::<T>()
  }
}

impl fmt::Debug for Payload {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str("Payload(<opaque>)")
  }
}

// --- Submission Options ---

/// Per-submission overrides applied by [`JobQueue::submit`](crate::JobQueue::submit).
///
/// ```
/// use chrono::{Duration, Utc};
/// use jobq::JobOptions;
///
/// let opts = JobOptions::new()
///   .with_id("recording-42")
///   .with_priority(5)
///   .with_schedule_at(Utc::now() + Duration::seconds(30));
/// # let _ = opts;
/// ```
#[derive(Debug, Clone, Default)]
pub struct JobOptions {
  pub(crate) id: Option<JobId>,
  pub(crate) priority: i64,
  pub(crate) schedule_at: Option<DateTime<Utc>>,
}

impl JobOptions {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets the job priority. Higher values dispatch sooner. Defaults to 0.
  pub fn with_priority(mut self, priority: i64) -> Self {
    self.priority = priority;
    self
  }

  /// Defers the job: it is not dispatched before `at`.
  pub fn with_schedule_at(mut self, at: DateTime<Utc>) -> Self {
    self.schedule_at = Some(at);
    self
  }

  /// Uses an explicit job id instead of a generated one. Submitting an id whose
  /// job is still pending or running returns that id without creating a job.
  pub fn with_id(mut self, id: impl Into<JobId>) -> Self {
    self.id = Some(id.into());
    self
  }
}

// --- Job ---

/// A point-in-time copy of a job's state.
///
/// Returned by [`JobQueue::get_status`](crate::JobQueue::get_status) and
/// [`JobQueue::list_jobs`](crate::JobQueue::list_jobs), and passed to handlers.
/// Mutating a snapshot has no effect on the queue.
#[derive(Debug, Clone)]
pub struct Job {
  pub id: JobId,
  /// Name of the worker this job belongs to.
  pub worker: String,
  pub priority: i64,
  /// Earliest time the job may be dispatched. Set for deferred submissions
  /// and for retries waiting out their backoff.
  pub schedule_at: Option<DateTime<Utc>>,
  pub payload: Payload,
  pub status: JobStatus,
  pub created_at: DateTime<Utc>,
  pub started_at: Option<DateTime<Utc>>,
  pub completed_at: Option<DateTime<Utc>>,
  pub retry_count: u32,
  pub max_retries: MaxRetries,
  /// Message of the most recent failed attempt.
  pub last_error: Option<String>,
}

impl Job {
  pub(crate) fn new(
    worker: &str,
    payload: Payload,
    options: JobOptions,
    max_retries: MaxRetries,
  ) -> Self {
    Self {
      id: options.id.unwrap_or_else(|| Uuid::new_v4().to_string()),
      worker: worker.to_string(),
      priority: options.priority,
      schedule_at: options.schedule_at,
      payload,
      status: JobStatus::Pending,
      created_at: Utc::now(),
      started_at: None,
      completed_at: None,
      retry_count: 0,
      max_retries,
      last_error: None,
    }
  }

  /// True when the job carries a `schedule_at` later than `now`.
  pub fn is_deferred(&self, now: DateTime<Utc>) -> bool {
    self.schedule_at.is_some_and(|at| at > now)
  }
}
