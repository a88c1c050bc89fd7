use crate::heap::{JobHeap, QueuedJob};
use crate::idle::IdleSignal;
use crate::job::{Job, JobId, JobStatus};
use crate::metrics::QueueMetrics;
use crate::worker::Worker;

use std::collections::HashMap;
use std::sync::atomic::Ordering as AtomicOrdering;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, info, trace, warn, Instrument};

/// A job as stored in the index: the public snapshot plus the bookkeeping
/// that never leaves the queue.
#[derive(Debug)]
pub(crate) struct JobRecord {
  pub job: Job,
  /// Submission sequence number. Matches the `seq` of the job's live heap
  /// entry; anything else in a heap under this id is stale.
  pub seq: u64,
  /// Cancellation handle of the running attempt. `Some` only while `Running`.
  pub cancel: Option<CancellationToken>,
}

/// Everything guarded by the coordinating lock.
#[derive(Debug, Default)]
pub(crate) struct QueueState {
  pub started: bool,
  pub workers: HashMap<String, Arc<Worker>>,
  pub heaps: HashMap<String, JobHeap>,
  pub jobs: HashMap<JobId, JobRecord>,
  next_seq: u64,
}

impl QueueState {
  pub fn next_seq(&mut self) -> u64 {
    let seq = self.next_seq;
    self.next_seq += 1;
    seq
  }
}

/// A job popped for execution, together with what its execution task needs.
#[derive(Debug)]
pub(crate) struct Dispatch {
  pub job: Job,
  pub seq: u64,
  pub token: CancellationToken,
}

/// State shared between the `JobQueue` handle, the dispatchers, the ticker
/// and every execution task.
#[derive(Debug)]
pub(crate) struct Shared {
  pub state: Mutex<QueueState>,
  pub idle: IdleSignal,
  /// Root token. Every running attempt holds a child of it.
  pub shutdown: CancellationToken,
  /// Tracks execution tasks and short-lived waiters so `stop` can wait on them.
  pub tracker: TaskTracker,
  pub metrics: QueueMetrics,
  pub tick_interval: Duration,
}

impl Shared {
  pub fn new(tick_interval: Duration) -> Self {
    Self {
      state: Mutex::new(QueueState::default()),
      idle: IdleSignal::new(),
      shutdown: CancellationToken::new(),
      tracker: TaskTracker::new(),
      metrics: QueueMetrics::new(),
      tick_interval,
    }
  }

  pub fn wake_all(&self) {
    let workers: Vec<Arc<Worker>> = self.state.lock().workers.values().cloned().collect();
    for worker in workers {
      worker.wake.notify_one();
    }
  }

  /// Pops the highest-priority ready job of `worker` and marks it `Running`.
  ///
  /// Cancelled or stale entries at the head are discarded. A head whose
  /// `schedule_at` lies in the future ends the scan even if entries behind it
  /// are ready.
  pub fn pop_ready(&self, worker: &Worker) -> Option<Dispatch> {
    let mut guard = self.state.lock();
    let state = &mut *guard;
    let heap = state.heaps.get_mut(worker.name())?;
    let now = Utc::now();

    loop {
      let (id, seq) = {
        let head = heap.peek()?;
        (head.id.clone(), head.seq)
      };

      let live = state
        .jobs
        .get(&id)
        .filter(|rec| rec.seq == seq && rec.job.status == JobStatus::Pending);
      let Some(record) = live else {
        heap.pop();
        QueueMetrics::incr(&self.metrics.entries_discarded);
        debug!(worker = worker.name(), job_id = %id, "Discarding cancelled or stale queue entry.");
        continue;
      };

      if record.job.is_deferred(now) {
        trace!(worker = worker.name(), job_id = %id, "Queue head not yet due.");
        return None;
      }

      heap.pop();
      let record = state.jobs.get_mut(&id)?;
      let token = self.shutdown.child_token();
      record.job.status = JobStatus::Running;
      record.job.started_at = Some(now);
      record.cancel = Some(token.clone());
      worker.running.fetch_add(1, AtomicOrdering::SeqCst);

      return Some(Dispatch {
        job: record.job.clone(),
        seq,
        token,
      });
    }
  }

  /// Records the outcome of an attempt. Returns the backoff delay when the job
  /// was put back on the heap for a retry.
  pub fn finish_attempt(
    &self,
    worker: &Worker,
    id: &str,
    seq: u64,
    outcome: Result<(), String>,
  ) -> Option<Duration> {
    let mut guard = self.state.lock();
    let state = &mut *guard;
    worker.running.fetch_sub(1, AtomicOrdering::SeqCst);

    let Some(record) = state.jobs.get_mut(id).filter(|rec| rec.seq == seq) else {
      debug!(worker = worker.name(), job_id = %id, "Job was replaced while running; outcome ignored.");
      return None;
    };
    record.cancel = None;

    if record.job.status == JobStatus::Cancelled {
      info!(worker = worker.name(), job_id = %id, "Job was cancelled while running.");
      return None;
    }

    let now = Utc::now();
    match outcome {
      Ok(()) => {
        record.job.status = JobStatus::Completed;
        record.job.completed_at = Some(now);
        None
      }
      Err(message) => {
        record.job.last_error = Some(message);
        if record.job.retry_count < record.job.max_retries {
          record.job.retry_count += 1;
          let delay = worker.config.backoff_delay(record.job.retry_count);
          record.job.schedule_at = Some(add_delay(now, delay));
          record.job.status = JobStatus::Pending;
          record.job.started_at = None;

          let entry = QueuedJob::for_job(&record.job, seq);
          state
            .heaps
            .entry(worker.name().to_string())
            .or_default()
            .push(entry);

          QueueMetrics::incr(&self.metrics.jobs_retried);
          info!(
            worker = worker.name(),
            job_id = %id,
            retry_attempt = record.job.retry_count,
            max_retries = record.job.max_retries,
            delay_ms = delay.as_millis(),
            "Job failed, scheduling retry."
          );
          Some(delay)
        } else {
          record.job.status = JobStatus::Failed;
          record.job.completed_at = Some(now);
          QueueMetrics::incr(&self.metrics.jobs_permanently_failed);
          warn!(
            worker = worker.name(),
            job_id = %id,
            retries = record.job.retry_count,
            error = record.job.last_error.as_deref().unwrap_or_default(),
            "Job failed permanently after exhausting retries."
          );
          None
        }
      }
    }
  }

  /// Signals every worker whose queue head is due (or no longer pending).
  /// Peeks only; popping stays with the dispatchers.
  pub fn wake_due_workers(&self) {
    let now = Utc::now();
    let due: Vec<Arc<Worker>> = {
      let state = self.state.lock();
      state
        .workers
        .values()
        .filter(|worker| {
          let Some(head) = state.heaps.get(worker.name()).and_then(JobHeap::peek) else {
            return false;
          };
          match state.jobs.get(&head.id) {
            Some(rec) if rec.seq == head.seq && rec.job.status == JobStatus::Pending => {
              !rec.job.is_deferred(now)
            }
            _ => true,
          }
        })
        .cloned()
        .collect()
    };

    for worker in due {
      trace!(worker = worker.name(), "Ticker waking dispatcher.");
      worker.wake.notify_one();
    }
  }

  /// Wakes `worker` once `delay` has elapsed, unless the queue stops first.
  pub fn wake_after(&self, worker: Arc<Worker>, delay: Duration) {
    let shutdown = self.shutdown.clone();
    self.tracker.spawn(async move {
      tokio::select! {
        biased;
        _ = shutdown.cancelled() => {}
        _ = tokio::time::sleep(delay) => worker.wake.notify_one(),
      }
    });
  }
}

fn add_delay(now: DateTime<Utc>, delay: Duration) -> DateTime<Utc> {
  ChronoDuration::from_std(delay)
    .ok()
    .and_then(|d| now.checked_add_signed(d))
    .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

/// Per-worker dispatch loop.
///
/// Sleeps on the worker's wake signal; each wake runs one dispatch pass that
/// launches ready jobs until the worker runs out of slots or ready jobs.
pub(crate) struct Dispatcher {
  shared: Arc<Shared>,
  worker: Arc<Worker>,
}

impl Dispatcher {
  pub fn new(shared: Arc<Shared>, worker: Arc<Worker>) -> Self {
    Self { shared, worker }
  }

  pub async fn run(self) {
    info!(worker = self.worker.name(), "Dispatcher started.");

    loop {
      tokio::select! {
        biased;
        _ = self.shared.shutdown.cancelled() => break,
        _ = self.worker.wake.notified() => self.dispatch_ready(),
      }
    }

    info!(worker = self.worker.name(), "Dispatcher shutting down.");
  }

  fn dispatch_ready(&self) {
    loop {
      if self.shared.shutdown.is_cancelled() {
        return;
      }

      if self.worker.config.idle_only && !self.shared.idle.is_idle() {
        self.arm_idle_waiter();
        return;
      }

      let Ok(permit) = self.worker.slots.clone().try_acquire_owned() else {
        trace!(worker = self.worker.name(), "No free slot; waiting for a running job to finish.");
        return;
      };

      let Some(dispatch) = self.shared.pop_ready(&self.worker) else {
        return;
      };

      let shared = self.shared.clone();
      let worker = self.worker.clone();
      let span = tracing::info_span!(
        "job_exec",
        worker = worker.name(),
        job_id = %dispatch.job.id,
        priority = dispatch.job.priority,
      );

      self.shared.tracker.spawn(
        async move {
          let Dispatch { job, seq, token } = dispatch;
          let id = job.id.clone();
          let outcome = worker.execute(job, token).await;
          let retry_delay = shared.finish_attempt(&worker, &id, seq, outcome.into_result());

          drop(permit);
          worker.wake.notify_one();

          if let Some(delay) = retry_delay {
            shared.wake_after(worker, delay);
          }
        }
        .instrument(span),
      );
    }
  }

  /// Parks one waiter for this worker until the host becomes idle, then wakes
  /// the dispatcher. Further calls while a waiter is parked are no-ops.
  fn arm_idle_waiter(&self) {
    if self.worker.idle_waiter_armed.swap(true, AtomicOrdering::SeqCst) {
      return;
    }
    debug!(worker = self.worker.name(), "Idle-only worker waiting for idle.");

    let shared = self.shared.clone();
    let worker = self.worker.clone();
    self.shared.tracker.spawn(async move {
      let became_idle = shared.idle.wait_idle(&shared.shutdown).await;
      worker.idle_waiter_armed.store(false, AtomicOrdering::SeqCst);
      if became_idle {
        worker.wake.notify_one();
      }
    });
  }
}

/// Periodically wakes dispatchers whose deferred queue head has become due.
pub(crate) async fn run_ticker(shared: Arc<Shared>) {
  info!(interval_ms = shared.tick_interval.as_millis(), "Scheduler ticker started.");
  let mut ticker = tokio::time::interval(shared.tick_interval);
  ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

  loop {
    tokio::select! {
      biased;
      _ = shared.shutdown.cancelled() => break,
      _ = ticker.tick() => shared.wake_due_workers(),
    }
  }

  info!("Scheduler ticker shutting down.");
}
