//! tests/cancel.rs
//! Cancellation of pending and running jobs.

mod common;

use common::{build_queue, counting_handler, setup_tracing, wait_for, wait_terminal};
use chrono::{Duration as ChronoDuration, Utc};
use jobq::{HandlerError, Job, JobContext, JobOptions, JobStatus, WorkerConfig};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

#[tokio::test]
async fn test_cancel_pending_job_never_runs() {
  setup_tracing();
  let queue = build_queue();
  let counter = Arc::new(AtomicUsize::new(0));
  queue.register_worker(
    WorkerConfig::new("transcode"),
    counting_handler(counter.clone(), StdDuration::ZERO, true),
  );

  let doomed = queue
    .submit("transcode", (), JobOptions::new().with_priority(10))
    .unwrap();
  let survivor = queue.submit("transcode", (), JobOptions::new()).unwrap();

  assert!(queue.cancel(&doomed));
  let cancelled = queue.get_status(&doomed).unwrap();
  assert_eq!(cancelled.status, JobStatus::Cancelled);
  assert!(cancelled.completed_at.is_some());

  queue.start();
  assert_eq!(
    wait_terminal(&queue, &survivor, StdDuration::from_secs(1)).await.status,
    JobStatus::Completed
  );
  assert_eq!(counter.load(Ordering::SeqCst), 1, "cancelled job must not run");
  assert_eq!(queue.get_status(&doomed).unwrap().status, JobStatus::Cancelled);

  let metrics = queue.metrics_snapshot();
  assert_eq!(metrics.jobs_cancelled, 1);
  assert_eq!(metrics.entries_discarded, 1);

  queue.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_cancel_deferred_job() {
  setup_tracing();
  let queue = build_queue();
  let counter = Arc::new(AtomicUsize::new(0));
  queue.register_worker(
    WorkerConfig::new("guide"),
    counting_handler(counter.clone(), StdDuration::ZERO, true),
  );
  queue.start();

  let id = queue
    .submit(
      "guide",
      (),
      JobOptions::new().with_schedule_at(Utc::now() + ChronoDuration::milliseconds(100)),
    )
    .unwrap();
  assert!(queue.cancel(&id));

  // Well past schedule_at; the ticker will have woken the dispatcher.
  assert!(
    wait_for(StdDuration::from_secs(1), || queue.metrics_snapshot().entries_discarded == 1).await
  );
  assert_eq!(counter.load(Ordering::SeqCst), 0);
  assert_eq!(queue.get_status(&id).unwrap().status, JobStatus::Cancelled);

  queue.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_cancel_running_job_signals_handler() {
  setup_tracing();
  let queue = build_queue();
  let started = Arc::new(AtomicBool::new(false));
  let observed_cancel = Arc::new(AtomicBool::new(false));
  let attempts = Arc::new(AtomicUsize::new(0));

  let (started_flag, observed_flag, attempt_count) =
    (started.clone(), observed_cancel.clone(), attempts.clone());
  queue.register_worker(
    WorkerConfig::new("transcode")
      .with_max_retries(3)
      .with_retry_delay(StdDuration::from_millis(10)),
    move |ctx: JobContext, _job: Job| {
      let started = started_flag.clone();
      let observed = observed_flag.clone();
      let attempts = attempt_count.clone();
      async move {
        attempts.fetch_add(1, Ordering::SeqCst);
        started.store(true, Ordering::SeqCst);
        tokio::select! {
          _ = ctx.cancelled() => {
            observed.store(ctx.is_cancelled(), Ordering::SeqCst);
            Err(HandlerError::from("transcode aborted"))
          }
          _ = tokio::time::sleep(StdDuration::from_secs(10)) => Ok(()),
        }
      }
    },
  );
  queue.start();

  let id = queue.submit("transcode", (), JobOptions::new()).unwrap();
  assert!(wait_for(StdDuration::from_secs(1), || started.load(Ordering::SeqCst)).await);
  assert_eq!(queue.get_status(&id).unwrap().status, JobStatus::Running);

  assert!(queue.cancel(&id));
  // Cancelled immediately, without waiting for the handler.
  let job = queue.get_status(&id).unwrap();
  assert_eq!(job.status, JobStatus::Cancelled);
  assert!(job.completed_at.is_some());

  assert!(wait_for(StdDuration::from_secs(1), || observed_cancel.load(Ordering::SeqCst)).await);
  assert!(wait_for(StdDuration::from_secs(1), || queue.stats().workers["transcode"].running == 0).await);

  // The handler's error after cancellation does not trigger a retry.
  tokio::time::sleep(StdDuration::from_millis(100)).await;
  let job = queue.get_status(&id).unwrap();
  assert_eq!(job.status, JobStatus::Cancelled);
  assert_eq!(job.retry_count, 0);
  assert_eq!(attempts.load(Ordering::SeqCst), 1);

  queue.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_cancel_running_job_that_completes_stays_cancelled() {
  setup_tracing();
  let queue = build_queue();
  let started = Arc::new(AtomicBool::new(false));

  let flag = started.clone();
  queue.register_worker(
    WorkerConfig::new("stubborn"),
    move |_ctx: JobContext, _job: Job| {
      let flag = flag.clone();
      async move {
        flag.store(true, Ordering::SeqCst);
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        Ok::<(), HandlerError>(())
      }
    },
  );
  queue.start();

  let id = queue.submit("stubborn", (), JobOptions::new()).unwrap();
  assert!(wait_for(StdDuration::from_secs(1), || started.load(Ordering::SeqCst)).await);
  assert!(queue.cancel(&id));

  assert!(wait_for(StdDuration::from_secs(1), || queue.stats().workers["stubborn"].running == 0).await);
  assert_eq!(queue.get_status(&id).unwrap().status, JobStatus::Cancelled);

  queue.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_cancel_terminal_or_unknown_job_is_noop() {
  setup_tracing();
  let queue = build_queue();
  let counter = Arc::new(AtomicUsize::new(0));
  queue.register_worker(
    WorkerConfig::new("w"),
    counting_handler(counter.clone(), StdDuration::ZERO, true),
  );
  queue.start();

  let id = queue.submit("w", (), JobOptions::new()).unwrap();
  let done = wait_terminal(&queue, &id, StdDuration::from_secs(1)).await;
  assert_eq!(done.status, JobStatus::Completed);

  assert!(!queue.cancel(&id));
  assert_eq!(queue.get_status(&id).unwrap().status, JobStatus::Completed);
  assert!(!queue.cancel("no-such-job"));
  assert_eq!(queue.metrics_snapshot().jobs_cancelled, 0);

  queue.stop(None).await.unwrap();
}

#[tokio::test]
async fn test_cancel_pending_retry() {
  setup_tracing();
  let queue = build_queue();
  let counter = Arc::new(AtomicUsize::new(0));
  queue.register_worker(
    WorkerConfig::new("flaky")
      .with_max_retries(5)
      .with_retry_delay(StdDuration::from_millis(300)),
    counting_handler(counter.clone(), StdDuration::ZERO, false),
  );
  queue.start();

  let id = queue.submit("flaky", (), JobOptions::new()).unwrap();
  assert!(
    wait_for(StdDuration::from_secs(1), || {
      queue
        .get_status(&id)
        .is_some_and(|job| job.retry_count == 1 && job.status == JobStatus::Pending)
    })
    .await
  );

  assert!(queue.cancel(&id));
  tokio::time::sleep(StdDuration::from_millis(500)).await;
  assert_eq!(counter.load(Ordering::SeqCst), 1, "cancelled retry must not run");
  assert_eq!(queue.get_status(&id).unwrap().status, JobStatus::Cancelled);

  queue.stop(None).await.unwrap();
}
