//! Stale-lease watchdog.
//!
//! Workers refresh their lease heartbeat while a job runs. When a worker
//! dies, its lease goes stale; the watchdog cancels the job behind every
//! stale lease, which cascades to the job's dependants and frees the
//! compose to report failure instead of hanging forever.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::kernel::queue::{JobQueue, QueueError};

#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    /// A lease whose heartbeat is older than this is considered dead.
    pub heartbeat_timeout: Duration,
    /// How often to sweep.
    pub interval: Duration,
}

/// Cancel every job whose lease heartbeat is older than `timeout`.
/// Returns the number of jobs reaped.
pub async fn sweep_stale_leases(queue: &Arc<dyn JobQueue>, timeout: Duration) -> usize {
    let mut reaped = 0;
    for token in queue.stale_leases(timeout).await {
        let id = match queue.id_from_token(token).await {
            Ok(id) => id,
            // Finished or canceled between enumeration and resolution.
            Err(_) => continue,
        };
        warn!(job_id = %id, "worker heartbeat expired; canceling job");
        match queue.cancel_job(id).await {
            Ok(()) => reaped += 1,
            Err(QueueError::NotRunning) | Err(QueueError::NotExist) => {}
            Err(e) => error!(job_id = %id, error = %e, "failed to cancel job with dead worker"),
        }
    }
    reaped
}

/// Run the watchdog until `shutdown` is canceled.
pub async fn run_watchdog(
    queue: Arc<dyn JobQueue>,
    config: WatchdogConfig,
    shutdown: CancellationToken,
) {
    info!(
        heartbeat_timeout_secs = config.heartbeat_timeout.as_secs(),
        interval_secs = config.interval.as_secs(),
        "lease watchdog starting"
    );

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = tokio::time::sleep(config.interval) => {}
        }
        sweep_stale_leases(&queue, config.heartbeat_timeout).await;
    }

    info!("lease watchdog stopped");
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tempfile::TempDir;

    use crate::kernel::queue::FsJobQueue;

    use super::*;

    #[tokio::test]
    async fn sweep_cancels_jobs_with_dead_workers() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());

        let a = queue.enqueue("t", json!({}), &[]).await.unwrap();
        let b = queue.enqueue("t", json!({}), &[a]).await.unwrap();

        let ctx = CancellationToken::new();
        queue.dequeue(&ctx, &["t".to_string()]).await.unwrap();

        // Every heartbeat is "stale" against a zero timeout.
        let reaped = sweep_stale_leases(&queue, Duration::ZERO).await;
        assert_eq!(reaped, 1);

        assert!(queue.job_status(a).await.unwrap().canceled);
        assert!(queue.job_status(b).await.unwrap().canceled);
    }

    #[tokio::test]
    async fn sweep_leaves_healthy_leases_alone() {
        let dir = TempDir::new().unwrap();
        let queue: Arc<dyn JobQueue> = Arc::new(FsJobQueue::open(dir.path()).unwrap());

        let a = queue.enqueue("t", json!({}), &[]).await.unwrap();
        let ctx = CancellationToken::new();
        queue.dequeue(&ctx, &["t".to_string()]).await.unwrap();

        let reaped = sweep_stale_leases(&queue, Duration::from_secs(3600)).await;
        assert_eq!(reaped, 0);
        assert!(!queue.job_status(a).await.unwrap().canceled);
    }
}
