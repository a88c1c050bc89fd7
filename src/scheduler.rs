use crate::coordinator::{run_ticker, Dispatcher, JobRecord, Shared};
use crate::error::{BuildError, RegisterError, ShutdownError, SubmitError};
use crate::heap::{JobHeap, QueuedJob};
use crate::job::context::JobContext;
use crate::job::{HandlerError, HandlerFuture, Job, JobId, JobOptions, JobStatus, Payload};
use crate::metrics::{MetricsSnapshot, QueueMetrics};
use crate::worker::{Worker, WorkerConfig};

use std::any::Any;
use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::try_join_all;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Default period of the scheduler ticker that wakes dispatchers for due
/// deferred jobs and retries.
pub const DEFAULT_TICK_INTERVAL: Duration = Duration::from_secs(1);

/// Builder for configuring and creating a [`JobQueue`].
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use jobq::JobQueue;
///
/// let queue = JobQueue::builder()
///   .tick_interval(Duration::from_millis(250))
///   .build()
///   .expect("valid configuration");
/// # let _ = queue;
/// ```
#[derive(Debug, Clone)]
pub struct JobQueueBuilder {
  tick_interval: Duration,
}

impl Default for JobQueueBuilder {
  fn default() -> Self {
    Self {
      tick_interval: DEFAULT_TICK_INTERVAL,
    }
  }
}

impl JobQueueBuilder {
  pub fn new() -> Self {
    Self::default()
  }

  /// Sets how often the scheduler ticker checks for deferred jobs that have
  /// become due. Retries can start up to one interval after their backoff
  /// expires if nothing else wakes the worker.
  pub fn tick_interval(mut self, interval: Duration) -> Self {
    self.tick_interval = interval;
    self
  }

  /// Builds the queue. No tasks are spawned until [`JobQueue::start`].
  ///
  /// # Errors
  ///
  /// Returns `Err(BuildError::ZeroTickInterval)` if the tick interval is zero.
  pub fn build(self) -> Result<JobQueue, BuildError> {
    if self.tick_interval.is_zero() {
      return Err(BuildError::ZeroTickInterval);
    }

    Ok(JobQueue {
      shared: Arc::new(Shared::new(self.tick_interval)),
      task_handles: Arc::new(Mutex::new(Vec::new())),
    })
  }
}

/// Per-worker figures in [`QueueStats`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct WorkerStats {
  /// Jobs of this worker currently running.
  pub running: usize,
  /// Configured concurrency limit.
  pub concurrency: usize,
  /// Entries currently held in the worker's priority queue, including
  /// deferred jobs and entries of cancelled jobs not yet discarded.
  pub queued: usize,
}

/// Aggregate job counts, computed by scanning the job index.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QueueStats {
  pub total: usize,
  pub pending: usize,
  pub running: usize,
  pub completed: usize,
  pub failed: usize,
  pub cancelled: usize,
  pub workers: BTreeMap<String, WorkerStats>,
}

/// An in-memory background job queue.
///
/// Register every worker type, call [`start`](JobQueue::start), then
/// [`submit`](JobQueue::submit) jobs by worker name. Each worker has its own
/// priority queue, dispatcher task and concurrency limit. Outcomes are
/// discovered by polling [`get_status`](JobQueue::get_status) or
/// [`list_jobs`](JobQueue::list_jobs); nothing is pushed to the submitter.
///
/// Cloning the handle is cheap and every clone drives the same queue.
#[derive(Debug, Clone)]
pub struct JobQueue {
  shared: Arc<Shared>,
  task_handles: Arc<Mutex<Vec<JoinHandle<()>>>>,
}

impl JobQueue {
  /// Returns a builder to configure and create a `JobQueue` instance.
  pub fn builder() -> JobQueueBuilder {
    JobQueueBuilder::new()
  }

  /// A queue with default settings.
  pub fn new() -> Self {
    Self {
      shared: Arc::new(Shared::new(DEFAULT_TICK_INTERVAL)),
      task_handles: Arc::new(Mutex::new(Vec::new())),
    }
  }

  // --- Registration ---

  /// Registers a worker type and its handler.
  ///
  /// `concurrency` below 1 is raised to 1 and a zero `retry_delay` becomes one
  /// second.
  ///
  /// # Panics
  ///
  /// Panics if a worker with the same name exists or the queue has already
  /// been started. Both are configuration mistakes; use
  /// [`try_register_worker`](JobQueue::try_register_worker) to handle them.
  pub fn register_worker<F, Fut>(&self, config: WorkerConfig, handler: F)
  where
    F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
  {
    if let Err(e) = self.try_register_worker(config, handler) {
      panic!("jobq: {e}");
    }
  }

  /// Fallible form of [`register_worker`](JobQueue::register_worker).
  ///
  /// # Errors
  ///
  /// - [`RegisterError::AlreadyStarted`]: `start` has been called.
  /// - [`RegisterError::DuplicateWorker`]: the name is taken.
  pub fn try_register_worker<F, Fut>(
    &self,
    config: WorkerConfig,
    handler: F,
  ) -> Result<(), RegisterError>
  where
    F: Fn(JobContext, Job) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
  {
    let mut state = self.shared.state.lock();
    if state.started {
      error!(worker = %config.name, "Worker registered after start.");
      return Err(RegisterError::AlreadyStarted(config.name));
    }
    if state.workers.contains_key(&config.name) {
      error!(worker = %config.name, "Duplicate worker registration.");
      return Err(RegisterError::DuplicateWorker(config.name));
    }

    let boxed = Box::new(move |ctx: JobContext, job: Job| Box::pin(handler(ctx, job)) as HandlerFuture);
    let worker = Worker::new(config, boxed, self.shared.metrics.clone());
    info!(
      worker = worker.name(),
      concurrency = worker.config.concurrency,
      idle_only = worker.config.idle_only,
      max_retries = worker.config.max_retries,
      retry_delay_ms = worker.config.retry_delay.as_millis(),
      "Registered worker."
    );

    let name = worker.name().to_string();
    state.heaps.insert(name.clone(), JobHeap::new());
    state.workers.insert(name, Arc::new(worker));
    Ok(())
  }

  /// Names of all registered workers, sorted.
  pub fn worker_names(&self) -> Vec<String> {
    let mut names: Vec<String> = self.shared.state.lock().workers.keys().cloned().collect();
    names.sort();
    names
  }

  // --- Submission & Control ---

  /// Submits a job to the named worker and returns its id.
  ///
  /// The job starts `Pending` and is dispatched in priority order once its
  /// `schedule_at` (if any) has passed. If `options` carries an id whose job is
  /// still pending or running, nothing is created and that id is returned.
  ///
  /// # Errors
  ///
  /// - [`SubmitError::UnknownWorker`]: no worker has that name. The submission
  ///   is logged and dropped.
  pub fn submit<P>(&self, worker: &str, payload: P, options: JobOptions) -> Result<JobId, SubmitError>
  where
    P: Any + Send + Sync,
  {
    let mut state = self.shared.state.lock();
    let Some(target) = state.workers.get(worker).cloned() else {
      drop(state);
      QueueMetrics::incr(&self.shared.metrics.submissions_dropped);
      warn!(worker, "Submit to unknown worker; job dropped.");
      return Err(SubmitError::UnknownWorker(worker.to_string()));
    };

    if let Some(existing) = options.id.as_deref().and_then(|id| state.jobs.get(id)) {
      if existing.job.status.is_in_flight() {
        debug!(
          worker,
          job_id = %existing.job.id,
          status = %existing.job.status,
          "Job with this id already in flight; submission ignored."
        );
        return Ok(existing.job.id.clone());
      }
    }

    let job = Job::new(worker, Payload::new(payload), options, target.config.max_retries);
    let id = job.id.clone();
    let seq = state.next_seq();
    state
      .heaps
      .entry(worker.to_string())
      .or_default()
      .push(QueuedJob::for_job(&job, seq));
    info!(
      worker,
      job_id = %id,
      priority = job.priority,
      schedule_at = ?job.schedule_at,
      "Job submitted."
    );
    state.jobs.insert(
      id.clone(),
      JobRecord {
        job,
        seq,
        cancel: None,
      },
    );
    drop(state);

    QueueMetrics::incr(&self.shared.metrics.jobs_submitted);
    target.wake.notify_one();
    Ok(id)
  }

  /// Cancels a pending or running job.
  ///
  /// A pending job is marked `Cancelled` and will never run. A running job has
  /// its [`JobContext`] cancelled and is marked `Cancelled` immediately; the
  /// handler is not waited for. Returns false if the job is unknown or already
  /// terminal.
  pub fn cancel(&self, job_id: &str) -> bool {
    let mut state = self.shared.state.lock();
    let Some(record) = state.jobs.get_mut(job_id) else {
      debug!(job_id, "Cancel requested for unknown job.");
      return false;
    };

    match record.job.status {
      JobStatus::Pending => {
        record.job.status = JobStatus::Cancelled;
        record.job.completed_at = Some(Utc::now());
        info!(job_id, worker = %record.job.worker, "Cancelled pending job.");
      }
      JobStatus::Running => {
        if let Some(token) = record.cancel.take() {
          token.cancel();
        }
        record.job.status = JobStatus::Cancelled;
        record.job.completed_at = Some(Utc::now());
        info!(job_id, worker = %record.job.worker, "Cancelled running job.");
      }
      status => {
        debug!(job_id, %status, "Cancel ignored; job already finished.");
        return false;
      }
    }

    QueueMetrics::incr(&self.shared.metrics.jobs_cancelled);
    true
  }

  // --- Inspection ---

  /// Returns a snapshot of the job, or `None` if the id is unknown.
  pub fn get_status(&self, job_id: &str) -> Option<Job> {
    self
      .shared
      .state
      .lock()
      .jobs
      .get(job_id)
      .map(|record| record.job.clone())
  }

  /// Snapshots of all jobs matching the filters, in submission order.
  /// `None` matches everything.
  pub fn list_jobs(&self, worker: Option<&str>, status: Option<JobStatus>) -> Vec<Job> {
    let state = self.shared.state.lock();
    let mut records: Vec<&JobRecord> = state
      .jobs
      .values()
      .filter(|rec| worker.map_or(true, |w| rec.job.worker == w))
      .filter(|rec| status.map_or(true, |s| rec.job.status == s))
      .collect();
    records.sort_by_key(|rec| rec.seq);
    records.into_iter().map(|rec| rec.job.clone()).collect()
  }

  /// Counts jobs by status and reports each worker's running count.
  pub fn stats(&self) -> QueueStats {
    let state = self.shared.state.lock();
    let mut stats = QueueStats {
      total: state.jobs.len(),
      ..Default::default()
    };

    for record in state.jobs.values() {
      match record.job.status {
        JobStatus::Pending => stats.pending += 1,
        JobStatus::Running => stats.running += 1,
        JobStatus::Completed => stats.completed += 1,
        JobStatus::Failed => stats.failed += 1,
        JobStatus::Cancelled => stats.cancelled += 1,
      }
    }

    for (name, worker) in &state.workers {
      stats.workers.insert(
        name.clone(),
        WorkerStats {
          running: worker.running(),
          concurrency: worker.config.concurrency,
          queued: state.heaps.get(name).map_or(0, JobHeap::len),
        },
      );
    }
    stats
  }

  /// Returns a snapshot of the queue's cumulative counters.
  pub fn metrics_snapshot(&self) -> MetricsSnapshot {
    self.shared.metrics.snapshot()
  }

  // --- Idle State ---

  /// Marks the host idle or busy and wakes every dispatcher. Idle-only workers
  /// dispatch only while idle; jobs already running are not interrupted when
  /// the host becomes busy.
  pub fn set_idle(&self, idle: bool) {
    if self.shared.idle.set(idle) {
      info!(idle, "Idle state changed.");
    }
    self.shared.wake_all();
  }

  pub fn is_idle(&self) -> bool {
    self.shared.idle.is_idle()
  }

  // --- Lifecycle ---

  /// Spawns one dispatcher per registered worker and the scheduler ticker.
  /// Calling it again is a no-op. Must be called within a Tokio runtime.
  pub fn start(&self) {
    let workers: Vec<Arc<Worker>> = {
      let mut state = self.shared.state.lock();
      if state.started {
        debug!("Job queue already started.");
        return;
      }
      state.started = true;
      state.workers.values().cloned().collect()
    };

    if self.shared.shutdown.is_cancelled() {
      warn!("Job queue was stopped before it was started; not spawning tasks.");
      return;
    }

    let mut handles = self.task_handles.lock();
    for worker in &workers {
      let dispatcher = Dispatcher::new(self.shared.clone(), worker.clone());
      handles.push(tokio::spawn(dispatcher.run()));
    }
    handles.push(tokio::spawn(run_ticker(self.shared.clone())));

    info!(workers = workers.len(), "Job queue started.");
  }

  /// Stops the queue.
  ///
  /// Cancels the root token, which cancels every running job's [`JobContext`],
  /// then waits for all dispatchers, the ticker and every execution task to
  /// exit. Handlers that ignore cancellation are waited for, not aborted.
  /// Jobs submitted afterwards are recorded but never dispatched.
  ///
  /// # Errors
  ///
  /// - [`ShutdownError::Timeout`]: tasks were still running when `timeout`
  ///   elapsed. They keep running in the background.
  /// - [`ShutdownError::TaskPanic`]: a dispatcher or the ticker panicked.
  pub async fn stop(&self, timeout: Option<Duration>) -> Result<(), ShutdownError> {
    info!("Stopping job queue...");
    self.shared.shutdown.cancel();
    self.shared.tracker.close();

    let handles = std::mem::take(&mut *self.task_handles.lock());
    let shared = self.shared.clone();
    let wait_all = async move {
      let joined = try_join_all(handles).await;
      shared.tracker.wait().await;
      joined
    };

    let joined = match timeout {
      Some(limit) => match tokio::time::timeout(limit, wait_all).await {
        Ok(joined) => joined,
        Err(_) => {
          error!(timeout = ?limit, "Job queue shutdown timed out.");
          return Err(ShutdownError::Timeout(limit));
        }
      },
      None => wait_all.await,
    };

    match joined {
      Ok(_) => {
        info!("Job queue stopped.");
        Ok(())
      }
      Err(join_err) => {
        error!("A queue task panicked during shutdown: {:?}", join_err);
        Err(ShutdownError::TaskPanic)
      }
    }
  }
}

impl Default for JobQueue {
  fn default() -> Self {
    Self::new()
  }
}
