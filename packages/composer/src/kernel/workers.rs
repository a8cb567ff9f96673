//! Worker pool for executing queued jobs.
//!
//! A worker is a long-running task that:
//! - blocks on the queue for jobs of the types it declared interest in
//! - refreshes its lease heartbeat while the handler runs
//! - records the handler's result via `finish_job`
//!
//! # Architecture
//!
//! ```text
//! Worker
//!     │
//!     ├─► dequeue(shutdown, job_types)        blocks until work arrives
//!     ├─► spawn heartbeat refresher           keeps the lease alive
//!     ├─► JobHandlerRegistry.execute(job)     runs the registered handler
//!     └─► finish_job(token, result)           NotRunning = canceled mid-run
//! ```
//!
//! Handlers produce the full result blob for their job type; a handler
//! error is recorded as a `{"success": false, "error": ...}` result so the
//! status projector can classify the failure without knowing the type.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::kernel::deps::ComposerDeps;
use crate::kernel::queue::{DequeuedJob, QueueError};

type BoxedHandler = Box<
    dyn Fn(DequeuedJob, Arc<ComposerDeps>) -> Pin<Box<dyn Future<Output = Result<serde_json::Value>> + Send>>
        + Send
        + Sync,
>;

/// Maps job-type strings to the handlers that execute them.
#[derive(Default)]
pub struct JobHandlerRegistry {
    handlers: HashMap<String, BoxedHandler>,
}

impl JobHandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async handler for `job_type`. The handler receives the
    /// dequeued job (args plus positional deps) and returns the result blob
    /// to record.
    pub fn register<F, Fut>(&mut self, job_type: &str, handler: F)
    where
        F: Fn(DequeuedJob, Arc<ComposerDeps>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<serde_json::Value>> + Send + 'static,
    {
        self.handlers.insert(
            job_type.to_string(),
            Box::new(move |job, deps| Box::pin(handler(job, deps))),
        );
    }

    pub fn is_registered(&self, job_type: &str) -> bool {
        self.handlers.contains_key(job_type)
    }

    pub fn job_types(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }

    pub async fn execute(
        &self,
        job: DequeuedJob,
        deps: Arc<ComposerDeps>,
    ) -> Result<serde_json::Value> {
        let handler = self
            .handlers
            .get(&job.job_type)
            .ok_or_else(|| anyhow!("unknown job type: {}", job.job_type))?;
        handler(job, deps).await
    }
}

/// Configuration for one worker task.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub worker_id: String,
    /// Job types this worker dequeues, in preference order.
    pub job_types: Vec<String>,
    /// How often to refresh the lease heartbeat while a job runs.
    pub heartbeat_interval: Duration,
}

impl WorkerConfig {
    pub fn new(job_types: Vec<String>) -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            job_types,
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

/// A single worker task. Spawn several for a pool; the queue hands each job
/// to exactly one of them.
pub struct Worker {
    deps: Arc<ComposerDeps>,
    registry: Arc<JobHandlerRegistry>,
    config: WorkerConfig,
}

impl Worker {
    pub fn new(deps: Arc<ComposerDeps>, registry: Arc<JobHandlerRegistry>, config: WorkerConfig) -> Self {
        Self {
            deps,
            registry,
            config,
        }
    }

    /// Run until `shutdown` is canceled.
    pub async fn run(self, shutdown: CancellationToken) {
        info!(
            worker_id = %self.config.worker_id,
            job_types = ?self.config.job_types,
            "worker starting"
        );

        loop {
            let job = match self
                .deps
                .queue
                .dequeue(&shutdown, &self.config.job_types)
                .await
            {
                Ok(job) => job,
                Err(QueueError::DequeueTimeout) => break,
                Err(e) => {
                    error!(error = %e, "failed to dequeue");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                    continue;
                }
            };
            self.process(job).await;
        }

        info!(worker_id = %self.config.worker_id, "worker stopped");
    }

    async fn process(&self, job: DequeuedJob) {
        let job_id = job.id;
        let job_type = job.job_type.clone();
        let token = job.token;

        debug!(job_id = %job_id, job_type = %job_type, "executing job");

        let heartbeat_stop = CancellationToken::new();
        let heartbeat = {
            let queue = self.deps.queue.clone();
            let stop = heartbeat_stop.clone();
            let interval = self.config.heartbeat_interval;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(interval);
                ticker.tick().await; // immediate first tick
                loop {
                    tokio::select! {
                        _ = stop.cancelled() => break,
                        _ = ticker.tick() => queue.refresh_heartbeat(token).await,
                    }
                }
            })
        };

        let result = self.registry.execute(job, self.deps.clone()).await;

        heartbeat_stop.cancel();
        let _ = heartbeat.await;

        let payload = match result {
            Ok(payload) => {
                info!(job_id = %job_id, job_type = %job_type, "job succeeded");
                payload
            }
            Err(e) => {
                warn!(job_id = %job_id, job_type = %job_type, error = %e, "job failed");
                json!({"success": false, "error": e.to_string()})
            }
        };

        match self.deps.queue.finish_job(token, payload).await {
            Ok(()) => {}
            Err(QueueError::NotRunning) => {
                info!(job_id = %job_id, "job was canceled; result discarded");
            }
            Err(e) => {
                error!(job_id = %job_id, error = %e, "failed to record job result");
            }
        }
    }
}
