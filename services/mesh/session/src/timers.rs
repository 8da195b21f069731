//! Periodic job producers.

use crate::{Job, JobQueue, SessionError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Submit `make_job()` every `period` until the queue closes.
///
/// The first job is submitted after one full period. A full queue drops
/// that tick's job and the timer keeps running.
pub fn spawn_periodic<F>(
    name: &'static str,
    queue: JobQueue,
    period: Duration,
    make_job: F,
) -> JoinHandle<()>
where
    F: Fn() -> Job + Send + 'static,
{
    tokio::spawn(async move {
        info!("Timer {} every {:?}", name, period);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            match queue.submit(make_job()) {
                Ok(()) | Err(SessionError::QueueFull(_)) => {}
                Err(e) => {
                    debug!("Timer {} stopping: {}", name, e);
                    break;
                }
            }
        }
    })
}
