//! tests/common.rs
//! Shared helper functions for integration tests.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use jobq::{HandlerError, HandlerFuture, Job, JobContext, JobQueue};
use parking_lot::Mutex;
use tracing_subscriber::fmt::TestWriter;

/// Ticker period used by tests so deferred jobs and retries are picked up quickly.
pub const TEST_TICK: Duration = Duration::from_millis(20);

// Initializes tracing subscriber for test output.
pub fn setup_tracing() {
  // Use try_init to avoid panic if called multiple times
  let _ = tracing_subscriber::fmt()
    .with_max_level(tracing::Level::DEBUG)
    .with_writer(TestWriter::new())
    .with_test_writer()
    .try_init();
}

// Builds a queue with the fast test ticker.
pub fn build_queue() -> JobQueue {
  JobQueue::builder()
    .tick_interval(TEST_TICK)
    .build()
    .expect("valid test configuration")
}

// Polls `condition` until it holds or `timeout` elapses. Returns the final result.
pub async fn wait_for<F>(timeout: Duration, mut condition: F) -> bool
where
  F: FnMut() -> bool,
{
  let deadline = tokio::time::Instant::now() + timeout;
  loop {
    if condition() {
      return true;
    }
    if tokio::time::Instant::now() >= deadline {
      return false;
    }
    tokio::time::sleep(Duration::from_millis(5)).await;
  }
}

// Waits until the job reaches a terminal status and returns its final snapshot.
pub async fn wait_terminal(queue: &JobQueue, id: &str, timeout: Duration) -> Job {
  let reached = wait_for(timeout, || {
    queue
      .get_status(id)
      .is_some_and(|job| job.status.is_terminal())
  })
  .await;
  let job = queue.get_status(id).expect("job should exist");
  assert!(reached, "job {id} did not finish in {timeout:?}; last state: {job:?}");
  job
}

// Creates a handler that increments a counter, optionally delays, and then
// succeeds or fails.
pub fn counting_handler(
  counter: Arc<AtomicUsize>,
  delay: Duration,
  succeeds: bool,
) -> impl Fn(JobContext, Job) -> HandlerFuture + Send + Sync + 'static {
  move |_ctx: JobContext, job: Job| {
    let ctr = counter.clone();
    Box::pin(async move {
      let count = ctr.fetch_add(1, Ordering::SeqCst) + 1;
      tracing::debug!(job_id = %job.id, count, succeeds, "Counter job executing");
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      if succeeds {
        Ok(())
      } else {
        Err(HandlerError::from(format!("forced failure #{count}")))
      }
    }) as HandlerFuture
  }
}

// Creates a handler that records each executed job's id in order.
pub fn recording_handler(
  order: Arc<Mutex<Vec<String>>>,
  delay: Duration,
) -> impl Fn(JobContext, Job) -> HandlerFuture + Send + Sync + 'static {
  move |_ctx: JobContext, job: Job| {
    let order = order.clone();
    Box::pin(async move {
      order.lock().push(job.id.clone());
      if !delay.is_zero() {
        tokio::time::sleep(delay).await;
      }
      Ok::<(), HandlerError>(())
    }) as HandlerFuture
  }
}

// Creates a handler for concurrency testing.
// Increments active count on start, decrements on end. Updates max observed.
pub fn concurrency_tracking_handler(
  active: Arc<AtomicUsize>,
  max_observed: Arc<AtomicUsize>,
  delay: Duration,
) -> impl Fn(JobContext, Job) -> HandlerFuture + Send + Sync + 'static {
  move |_ctx: JobContext, _job: Job| {
    let active = active.clone();
    let max_obs = max_observed.clone();
    Box::pin(async move {
      let current = active.fetch_add(1, Ordering::SeqCst) + 1;
      max_obs.fetch_max(current, Ordering::SeqCst);
      tokio::time::sleep(delay).await;
      active.fetch_sub(1, Ordering::SeqCst);
      Ok::<(), HandlerError>(())
    }) as HandlerFuture
  }
}
