use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the job queue.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The job or lease token is unknown to the queue.
    #[error("job or token does not exist")]
    NotExist,

    /// Targeted dequeue on a job that is blocked, leased, canceled or
    /// finished.
    #[error("job is not pending")]
    NotPending,

    /// Finish or cancel on a job that holds no live lease, or cancel on a
    /// terminal job.
    #[error("job is not running")]
    NotRunning,

    /// The dequeue context was canceled before a matching job became
    /// available.
    #[error("dequeue interrupted before a job became available")]
    DequeueTimeout,

    /// Job arguments could not be encoded as JSON.
    #[error("job arguments are not encodable")]
    BadArgs,

    /// A dependency referenced at enqueue time does not exist.
    #[error("dependency {0} does not exist")]
    UnknownDep(Uuid),

    #[error("queue state could not be persisted: {0}")]
    Io(#[from] std::io::Error),

    #[error("job record could not be encoded: {0}")]
    Encoding(#[from] serde_json::Error),
}
