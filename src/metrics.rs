use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

// --- Simple Histogram Implementation ---

/// A basic concurrent histogram storing count and sum.
///
/// Suitable for simple latency tracking without percentile information.
#[derive(Debug, Default)]
pub struct SimpleHistogram {
  count: AtomicUsize,
  sum_micros: AtomicUsize,
}

impl SimpleHistogram {
  /// Records a duration observation in the histogram.
  pub fn record(&self, duration: Duration) {
    self.count.fetch_add(1, Ordering::Relaxed);
    self.sum_micros.fetch_add(
      duration.as_micros().try_into().unwrap_or(usize::MAX),
      Ordering::Relaxed,
    );
  }

  pub fn get_count(&self) -> usize {
    self.count.load(Ordering::Relaxed)
  }

  /// Total of all recorded durations, in microseconds.
  pub fn get_sum_micros(&self) -> usize {
    self.sum_micros.load(Ordering::Relaxed)
  }
}

// --- Main Metrics Struct (Internal State) ---

/// Monotonic counters describing what the queue has done since it was built.
///
/// Cloning only clones the `Arc`s; dispatchers and execution tasks share one
/// set of counters. Current-state figures (how many jobs are pending or
/// running right now) come from [`JobQueue::stats`](crate::JobQueue::stats)
/// instead.
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
  /// Jobs accepted by `submit` (deduplicated resubmissions are not counted).
  pub jobs_submitted: Arc<AtomicUsize>,
  /// Submissions dropped because the worker name was not registered.
  pub submissions_dropped: Arc<AtomicUsize>,
  /// Attempts launched by dispatchers (first runs and retries).
  pub attempts_started: Arc<AtomicUsize>,
  /// Attempts whose handler returned `Ok(())`.
  pub attempts_succeeded: Arc<AtomicUsize>,
  /// Attempts whose handler returned an error or panicked.
  pub attempts_failed: Arc<AtomicUsize>,
  /// Attempts whose handler panicked (also counted in `attempts_failed`).
  pub attempts_panicked: Arc<AtomicUsize>,
  /// Retries scheduled after a failed attempt.
  pub jobs_retried: Arc<AtomicUsize>,
  /// Jobs that exhausted their retries.
  pub jobs_permanently_failed: Arc<AtomicUsize>,
  /// Successful `cancel` calls.
  pub jobs_cancelled: Arc<AtomicUsize>,
  /// Heap entries discarded by a dispatcher because their job was cancelled
  /// or replaced.
  pub entries_discarded: Arc<AtomicUsize>,
  /// Wall-clock duration of each attempt.
  pub execution_duration: Arc<SimpleHistogram>,
}

impl QueueMetrics {
  /// Creates a new `QueueMetrics` instance with all counters initialized to zero.
  pub fn new() -> Self {
    Self::default()
  }

  pub(crate) fn incr(counter: &AtomicUsize) {
    counter.fetch_add(1, Ordering::Relaxed);
  }

  /// Creates a snapshot of the current metric values.
  pub fn snapshot(&self) -> MetricsSnapshot {
    let order = Ordering::Relaxed;

    MetricsSnapshot {
      jobs_submitted: self.jobs_submitted.load(order),
      submissions_dropped: self.submissions_dropped.load(order),
      attempts_started: self.attempts_started.load(order),
      attempts_succeeded: self.attempts_succeeded.load(order),
      attempts_failed: self.attempts_failed.load(order),
      attempts_panicked: self.attempts_panicked.load(order),
      jobs_retried: self.jobs_retried.load(order),
      jobs_permanently_failed: self.jobs_permanently_failed.load(order),
      jobs_cancelled: self.jobs_cancelled.load(order),
      entries_discarded: self.entries_discarded.load(order),
      execution_duration_count: self.execution_duration.get_count(),
      execution_duration_sum_micros: self.execution_duration.get_sum_micros(),
    }
  }
}

// --- Metrics Snapshot Struct (Public Data) ---

/// A snapshot of the queue's metrics at a specific point in time.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MetricsSnapshot {
  pub jobs_submitted: usize,
  pub submissions_dropped: usize,
  pub attempts_started: usize,
  pub attempts_succeeded: usize,
  pub attempts_failed: usize,
  pub attempts_panicked: usize,
  pub jobs_retried: usize,
  pub jobs_permanently_failed: usize,
  pub jobs_cancelled: usize,
  pub entries_discarded: usize,
  pub execution_duration_count: usize,
  pub execution_duration_sum_micros: usize,
}

impl MetricsSnapshot {
  /// Mean attempt duration in microseconds, or `None` if nothing has run.
  pub fn mean_execution_duration_micros(&self) -> Option<f64> {
    if self.execution_duration_count == 0 {
      None
    } else {
      Some(self.execution_duration_sum_micros as f64 / self.execution_duration_count as f64)
    }
  }

  pub fn mean_execution_duration(&self) -> Option<Duration> {
    self
      .mean_execution_duration_micros()
      .map(|micros| Duration::from_micros(micros as u64))
  }
}
