//! Deferred work queue.
//!
//! Producers (timers, the DNS listener, WebSocket callbacks) never block:
//! they `try_send` into a bounded channel and a full queue drops the job.
//! A single worker runs each job to completion, then paces itself before
//! taking the next one. Ordering is plain FIFO, so a liveness reply can wait
//! behind queued telemetry work.

use crate::{Job, SessionError};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default queue capacity
pub const WS_QUEUE_SIZE: usize = 10;

/// Default pause between jobs
pub const DEFAULT_PACE: Duration = Duration::from_millis(500);

/// Executes jobs taken from the queue
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// Run one job; the job is dropped when this returns
    async fn handle(&self, job: Job) -> anyhow::Result<()>;
}

/// Producer side of the work queue
#[derive(Clone, Debug)]
pub struct JobQueue {
    tx: mpsc::Sender<Job>,
}

impl JobQueue {
    /// Create a queue and its single worker
    pub fn new(capacity: usize, pace: Duration) -> (Self, JobWorker) {
        let (tx, rx) = mpsc::channel(capacity);
        (Self { tx }, JobWorker { rx, pace })
    }

    /// Enqueue a job without waiting
    pub fn submit(&self, job: Job) -> Result<(), SessionError> {
        let kind = job.kind();
        match self.tx.try_send(job) {
            Ok(()) => {
                debug!("Queued job {} (depth {})", kind, self.len());
                Ok(())
            }
            Err(TrySendError::Full(job)) => {
                warn!("queue full, dropping job {}", kind);
                drop(job);
                Err(SessionError::QueueFull(kind.as_str()))
            }
            Err(TrySendError::Closed(_)) => Err(SessionError::Closed),
        }
    }

    /// Number of queued jobs
    pub fn len(&self) -> usize {
        self.tx.max_capacity() - self.tx.capacity()
    }

    /// Whether no jobs are queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Maximum number of queued jobs
    pub fn capacity(&self) -> usize {
        self.tx.max_capacity()
    }
}

/// Consumer side of the work queue
#[derive(Debug)]
pub struct JobWorker {
    rx: mpsc::Receiver<Job>,
    pace: Duration,
}

impl JobWorker {
    /// Run jobs until every producer is gone
    pub async fn run(mut self, handler: Arc<dyn JobHandler>) {
        info!("Job worker started (pace {:?})", self.pace);

        while let Some(job) = self.rx.recv().await {
            let kind = job.kind();
            debug!("Running job {} (depth before {})", kind, self.rx.len() + 1);

            let start = Instant::now();
            if let Err(e) = handler.handle(job).await {
                warn!("Job {} failed: {:#}", kind, e);
            }
            debug!(
                "Finished job {} in {:?} (depth after {})",
                kind,
                start.elapsed(),
                self.rx.len()
            );

            tokio::time::sleep(self.pace).await;
        }

        info!("Job worker stopped");
    }
}
