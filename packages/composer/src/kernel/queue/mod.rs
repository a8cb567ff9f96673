//! Job queue infrastructure: a DAG of typed jobs dispatched to workers.
//!
//! - [`JobQueue`] - queue operations behind an object-safe trait
//! - [`FsJobQueue`] - durable directory-backed implementation
//! - [`DequeuedJob`] / [`JobInfo`] / [`JobState`] - read-side views
//! - [`QueueError`] - error taxonomy
//!
//! # Architecture
//!
//! ```text
//! enqueue(type, args, deps)
//!     │
//!     ├─► persist job document
//!     ├─► deps unfinished? record waiter entries
//!     └─► deps satisfied? append to the type's ready queue ──┐
//!                                                            │
//! dequeue(ctx, types) ◄──────── blocks on queue change ◄─────┘
//!     │
//!     └─► pop oldest ready entry, stamp started_at, mint lease token
//!
//! finish_job(token, result)
//!     │
//!     ├─► persist result, retire lease
//!     └─► decrement dependants; promote the ones that reach zero
//! ```
//!
//! Cancellation is transitive: canceling a job cancels every transitive
//! dependant. A worker holding a lease on a canceled job learns about it on
//! its next `finish_job`, which fails with [`QueueError::NotRunning`] and
//! discards the result.

mod error;
mod fs;
mod job;

use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub use error::QueueError;
pub use fs::FsJobQueue;
pub use job::{DequeuedJob, JobInfo, JobState};

/// Queue operations used by the compose front-end and by workers.
///
/// Only `dequeue` blocks; every other operation completes in work bounded by
/// the size of the job's dependency lists. Implementations must be safe for
/// arbitrary concurrent callers and must guarantee that a job state written
/// by a successful `enqueue`, `finish_job` or `cancel_job` survives a
/// process restart. Lease state may be volatile.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Add a job of `job_type` to the queue.
    ///
    /// Every id in `deps` must already exist; otherwise the call fails with
    /// [`QueueError::UnknownDep`] and mutates nothing. The job becomes
    /// dequeuable once all deps are finished.
    async fn enqueue(
        &self,
        job_type: &str,
        args: serde_json::Value,
        deps: &[Uuid],
    ) -> Result<Uuid, QueueError>;

    /// Block until a job of one of `job_types` is available, then lease it.
    ///
    /// Ties across ready queues break in the order the caller listed the
    /// types. Returns [`QueueError::DequeueTimeout`] when `ctx` is canceled
    /// before a job arrives.
    async fn dequeue(
        &self,
        ctx: &CancellationToken,
        job_types: &[String],
    ) -> Result<DequeuedJob, QueueError>;

    /// Non-blocking dequeue of one specific job.
    ///
    /// Fails with [`QueueError::NotPending`] when the job is blocked on
    /// deps, already leased, canceled or finished.
    async fn dequeue_by_id(&self, id: Uuid) -> Result<DequeuedJob, QueueError>;

    /// Record the result of a leased job and retire its lease.
    ///
    /// `token` is the lease handle from dequeue. Passing the id of a job
    /// that holds no live lease fails with [`QueueError::NotRunning`]. If
    /// the job was canceled while running, the result is discarded and the
    /// call fails with [`QueueError::NotRunning`]; the token is retired
    /// either way.
    async fn finish_job(&self, token: Uuid, result: serde_json::Value) -> Result<(), QueueError>;

    /// Cancel a non-terminal job and, transitively, all of its dependants.
    async fn cancel_job(&self, id: Uuid) -> Result<(), QueueError>;

    /// Read-only view of a job's type, args and deps.
    async fn job(&self, id: Uuid) -> Result<JobInfo, QueueError>;

    /// Full status view of a job.
    async fn job_status(&self, id: Uuid) -> Result<JobState, QueueError>;

    /// Resolve a live lease token to its job id.
    ///
    /// Fails with [`QueueError::NotExist`] once the job has been finished.
    async fn id_from_token(&self, token: Uuid) -> Result<Uuid, QueueError>;

    /// Record a worker heartbeat for a lease. No-op for unknown tokens.
    async fn refresh_heartbeat(&self, token: Uuid);

    /// Enumerate live lease tokens whose last heartbeat is older than
    /// `older_than`. Tokens of finished or canceled jobs are not returned.
    async fn stale_leases(&self, older_than: Duration) -> Vec<Uuid>;
}
