//! jobq: An In-Memory Background Job Queue
//!
//! Decouples long-running work (transcodes, guide refreshes, segment and
//! commercial detection) from request handling. Collaborators register named
//! worker types, submit jobs by worker name and poll for outcomes; the queue
//! owns scheduling, concurrency, retries and shutdown but none of the work.
//!
//! # Features
//!
//! - Per-worker priority queues: higher priority first, FIFO within a priority.
//! - Per-worker concurrency limits.
//! - Exponential-backoff retries (`retry_delay * 2^(n-1)`), with panics in
//!   handlers caught and treated as failures.
//! - Deferred jobs (`JobOptions::with_schedule_at`).
//! - Idle-only workers that run only while the host is marked idle.
//! - Cancellation of pending and running jobs through a per-attempt
//!   [`JobContext`].
//! - Idempotent submission by explicit job id.
//! - Graceful shutdown that waits for dispatchers and running jobs.
//! - Status queries ([`Job`] snapshots), aggregate [`QueueStats`] and cumulative
//!   [`MetricsSnapshot`] counters.
//! - Optional Serde support for configuration and stats types (`serde` feature).
//!
//! Jobs live only in memory: nothing survives a restart, and finished jobs are
//! kept for status queries until the process exits.
//!
//! # Usage
//!
//! ```no_run
//! use std::time::Duration;
//! use jobq::{HandlerError, JobOptions, JobQueue, JobStatus, WorkerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let queue = JobQueue::builder().build()?;
//!
//!     queue.register_worker(
//!         WorkerConfig::new("transcode")
//!             .with_concurrency(2)
//!             .with_max_retries(2)
//!             .with_retry_delay(Duration::from_secs(1)),
//!         |ctx, job| async move {
//!             let path = job.payload.downcast_ref::<String>().cloned().unwrap_or_default();
//!             tokio::select! {
//!                 _ = ctx.cancelled() => Err(HandlerError::from("cancelled")),
//!                 _ = tokio::time::sleep(Duration::from_millis(50)) => {
//!                     println!("transcoded {path}");
//!                     Ok(())
//!                 }
//!             }
//!         },
//!     );
//!     queue.start();
//!
//!     let id = queue.submit(
//!         "transcode",
//!         String::from("/media/movie.mkv"),
//!         JobOptions::new().with_priority(5),
//!     )?;
//!
//!     tokio::time::sleep(Duration::from_millis(200)).await;
//!     if let Some(job) = queue.get_status(&id) {
//!         assert_eq!(job.status, JobStatus::Completed);
//!     }
//!
//!     queue.stop(Some(Duration::from_secs(10))).await?;
//!     Ok(())
//! }
//! ```
//!
//! # Observability
//!
//! - Query jobs with [`JobQueue::get_status`] and [`JobQueue::list_jobs`].
//! - Aggregate counts with [`JobQueue::stats`], cumulative counters with
//!   [`JobQueue::metrics_snapshot`].
//! - Integrate with the `tracing` crate for detailed logs; every attempt runs
//!   inside a `job_exec` span carrying the worker name and job id.

mod coordinator;
pub mod error;
mod heap;
mod idle;
pub mod job;
pub mod metrics;
pub mod scheduler;
pub mod worker;

// --- Public Re-exports ---

pub use scheduler::{JobQueue, JobQueueBuilder, QueueStats, WorkerStats, DEFAULT_TICK_INTERVAL};

pub use error::{BuildError, RegisterError, ShutdownError, SubmitError};

pub use job::context::JobContext;
pub use job::{
  BoxedJobFn, HandlerError, HandlerFuture, Job, JobId, JobOptions, JobStatus, MaxRetries, Payload,
};

pub use metrics::{MetricsSnapshot, QueueMetrics};

pub use worker::{WorkerConfig, DEFAULT_RETRY_DELAY};
