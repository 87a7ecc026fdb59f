//! # Queue Error Types
//!
//! Two error families live here. [`QueueError`] covers the service
//! surface: unknown queues, shutdown, bad requeue requests. [`JobError`]
//! is what a handler returns to tell the worker how to proceed —
//! retryable failures back off and retry, fatal failures dead-letter
//! immediately.

use thiserror::Error;

/// Errors from the queue service surface.
#[derive(Error, Debug)]
pub enum QueueError {
    /// The named queue has not been created.
    #[error("unknown queue: \"{0}\"")]
    UnknownQueue(String),

    /// A queue with this name already exists.
    #[error("queue \"{0}\" already exists")]
    QueueExists(String),

    /// The service is draining and not accepting new work.
    #[error("queue service is shutting down")]
    ShuttingDown,

    /// The referenced job does not exist.
    #[error("unknown job: {0}")]
    UnknownJob(String),

    /// The job is not in a state the operation accepts.
    #[error("job {job_id} is {status}, expected {expected}")]
    InvalidJobState {
        /// The job identifier.
        job_id: String,
        /// The job's current status.
        status: String,
        /// The status the operation requires.
        expected: String,
    },
}

/// The outcome a job handler reports for one attempt.
#[derive(Error, Debug)]
pub enum JobError {
    /// Transient failure; the job retries with backoff until its attempt
    /// budget runs out.
    #[error("retryable: {0}")]
    Retryable(String),

    /// Permanent failure; the job dead-letters without further attempts.
    #[error("fatal: {0}")]
    Fatal(String),
}

impl JobError {
    /// Build a retryable failure.
    pub fn retryable(msg: impl Into<String>) -> Self {
        Self::Retryable(msg.into())
    }

    /// Build a fatal failure.
    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    /// Whether another attempt may be made.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}
