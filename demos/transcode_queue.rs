//! demos/transcode_queue.rs
//!
//! A small media-server queue: a transcode worker that retries a flaky job
//! with exponential backoff, and an idle-only thumbnail worker that waits
//! until the host is marked idle.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration as StdDuration;

use jobq::{HandlerError, Job, JobContext, JobOptions, JobQueue, JobStatus, WorkerConfig};
use tracing::{error, info, warn};

#[derive(Debug)]
struct TranscodeRequest {
  path: String,
  profile: &'static str,
}

async fn transcode(ctx: JobContext, job: Job, failures_left: Arc<AtomicU32>) -> Result<(), HandlerError> {
  let request = job
    .payload
    .downcast_ref::<TranscodeRequest>()
    .ok_or_else(|| HandlerError::from("payload is not a TranscodeRequest"))?;

  info!(
    "*** Transcoding {} to {} (attempt {}) ***",
    request.path,
    request.profile,
    ctx.attempt()
  );

  tokio::select! {
    _ = ctx.cancelled() => {
      warn!("---> Transcode of {} interrupted.", request.path);
      return Err("transcode cancelled".into());
    }
    _ = tokio::time::sleep(StdDuration::from_millis(100)) => {}
  }

  // Simulate an encoder that crashes a couple of times on the first file.
  if request.path.ends_with("broken.ts")
    && failures_left
      .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
      .is_ok()
  {
    info!("---> Encoder crashed (triggering retry).");
    return Err(format!("ffmpeg exited with status 1 on {}", request.path).into());
  }

  info!("---> Transcode of {} finished.", request.path);
  Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  // --- Setup Tracing ---
  let filter = tracing_subscriber::EnvFilter::try_new("warn,jobq=info,transcode_queue=info")
    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
  tracing_subscriber::fmt().with_env_filter(filter).init();

  // --- Build Queue ---
  let queue = JobQueue::builder()
    .tick_interval(StdDuration::from_millis(100))
    .build()?;

  let failures_left = Arc::new(AtomicU32::new(2));
  queue.register_worker(
    WorkerConfig::new("transcode")
      .with_concurrency(1)
      .with_max_retries(2)
      .with_retry_delay(StdDuration::from_millis(250)),
    move |ctx: JobContext, job: Job| transcode(ctx, job, failures_left.clone()),
  );

  queue.register_worker(
    WorkerConfig::new("thumbnails").idle_only(true),
    |ctx: JobContext, job: Job| async move {
      let path = job.payload.downcast_ref::<String>().cloned().unwrap_or_default();
      info!("*** Generating thumbnails for {} (job {}) ***", path, ctx.job_id());
      tokio::time::sleep(StdDuration::from_millis(50)).await;
      Ok::<(), HandlerError>(())
    },
  );

  queue.start();

  // --- Submit Jobs ---
  let mut transcode_ids = Vec::new();
  for (path, priority) in [("/media/a.ts", 1), ("/media/broken.ts", 5), ("/media/c.ts", 3)] {
    let id = queue.submit(
      "transcode",
      TranscodeRequest {
        path: path.to_string(),
        profile: "720p",
      },
      JobOptions::new().with_priority(priority),
    )?;
    info!("Submitted transcode of {} as job {}", path, id);
    transcode_ids.push(id);
  }

  let thumbs_id = queue.submit(
    "thumbnails",
    String::from("/media/a.ts"),
    JobOptions::new().with_id("thumbs:/media/a.ts"),
  )?;

  // A second submission with the same id is ignored while the first is queued.
  let dup = queue.submit("thumbnails", String::from("/media/a.ts"), JobOptions::new().with_id("thumbs:/media/a.ts"))?;
  assert_eq!(dup, thumbs_id);

  if let Err(e) = queue.submit("subtitles", (), JobOptions::new()) {
    warn!("Expected rejection: {}", e);
  }

  // --- Watch Progress ---
  tokio::time::sleep(StdDuration::from_millis(500)).await;
  info!("Stats while busy: {:#?}", queue.stats());
  assert_eq!(
    queue.get_status(&thumbs_id).map(|job| job.status),
    Some(JobStatus::Pending),
    "idle-only work should wait while the host is busy"
  );

  info!("Marking host idle...");
  queue.set_idle(true);

  tokio::time::sleep(StdDuration::from_secs(2)).await;

  for job in queue.list_jobs(None, None) {
    info!(
      "Job {} [{}] priority={} status={} retries={} last_error={:?}",
      job.id, job.worker, job.priority, job.status, job.retry_count, job.last_error
    );
  }
  info!("Metrics: {:#?}", queue.metrics_snapshot());

  // --- Shutdown ---
  info!("Requesting graceful shutdown...");
  match queue.stop(Some(StdDuration::from_secs(5))).await {
    Ok(()) => info!("Queue shut down successfully."),
    Err(e) => error!("Shutdown failed: {}", e),
  }

  Ok(())
}
