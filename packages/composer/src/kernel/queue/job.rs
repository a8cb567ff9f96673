//! Read-side views handed out by the queue.
//!
//! The queue never interprets `args` or `result`; both travel as opaque
//! JSON values. Dependency lists keep their enqueue order so dependants can
//! read dep results positionally.

use chrono::{DateTime, Utc};
use uuid::Uuid;

/// A job handed to a worker by a successful dequeue.
///
/// `token` is the lease handle: it is the only way to finish the job, and at
/// most one live token exists per job at any time.
#[derive(Debug, Clone)]
pub struct DequeuedJob {
    pub id: Uuid,
    pub token: Uuid,
    pub job_type: String,
    pub args: serde_json::Value,
    pub deps: Vec<Uuid>,
}

/// Static view of a job, independent of its state.
#[derive(Debug, Clone)]
pub struct JobInfo {
    pub job_type: String,
    pub args: serde_json::Value,
    pub deps: Vec<Uuid>,
}

/// Full status view of a job.
///
/// `None` timestamps mean "not yet": a job with no `started_at` has never
/// been dequeued, a job with no `finished_at` has not completed.
#[derive(Debug, Clone)]
pub struct JobState {
    pub job_type: String,
    pub result: Option<serde_json::Value>,
    pub queued_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub canceled: bool,
    pub deps: Vec<Uuid>,
}

impl JobState {
    /// A job is terminal once finished or canceled.
    pub fn is_terminal(&self) -> bool {
        self.finished_at.is_some() || self.canceled
    }
}
