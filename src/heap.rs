use std::cmp::Ordering;
use std::collections::BinaryHeap;

use chrono::{DateTime, Utc};

use crate::job::{Job, JobId};

/// Heap entry for one pending job.
///
/// Only the ordering keys and the id are stored; status and `schedule_at` are
/// read from the job index when the entry reaches the head. `seq` identifies
/// the submission the entry was pushed for, so entries left behind by a
/// cancelled or replaced job can be recognised as stale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct QueuedJob {
  pub id: JobId,
  pub priority: i64,
  pub created_at: DateTime<Utc>,
  pub seq: u64,
}

impl QueuedJob {
  pub fn for_job(job: &Job, seq: u64) -> Self {
    Self {
      id: job.id.clone(),
      priority: job.priority,
      created_at: job.created_at,
      seq,
    }
  }
}

impl Ord for QueuedJob {
  // `BinaryHeap` is a max-heap: the greatest entry dequeues first.
  fn cmp(&self, other: &Self) -> Ordering {
    self
      .priority
      .cmp(&other.priority)
      .then_with(|| other.created_at.cmp(&self.created_at))
      .then_with(|| other.seq.cmp(&self.seq))
  }
}

impl PartialOrd for QueuedJob {
  fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
    Some(self.cmp(other))
  }
}

/// A single worker's pending jobs, ordered by priority (descending) and then
/// submission time (ascending).
#[derive(Debug, Default)]
pub(crate) struct JobHeap {
  heap: BinaryHeap<QueuedJob>,
}

impl JobHeap {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn push(&mut self, entry: QueuedJob) {
    self.heap.push(entry);
  }

  pub fn pop(&mut self) -> Option<QueuedJob> {
    self.heap.pop()
  }

  pub fn peek(&self) -> Option<&QueuedJob> {
    self.heap.peek()
  }

  pub fn len(&self) -> usize {
    self.heap.len()
  }
}
