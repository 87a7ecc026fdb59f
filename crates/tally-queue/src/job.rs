//! # Job Records
//!
//! The persisted representation of a unit of asynchronous work. A job
//! carries everything an operator needs to inspect it after the fact:
//! queue, type, payload, attempt count, status, and the last error.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backoff::BackoffPolicy;

// ── JobId ──────────────────────────────────────────────────────────────

/// A unique identifier for a queued job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct JobId(Uuid);

impl JobId {
    /// Create a new random job identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Create a job identifier from an existing UUID.
    pub fn from_uuid(id: Uuid) -> Self {
        Self(id)
    }

    /// Access the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for JobId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for JobId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "job:{}", self.0)
    }
}

// ── Status ─────────────────────────────────────────────────────────────

/// The lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum JobStatus {
    /// Waiting for a worker.
    Queued,
    /// Claimed by a worker; an attempt is in flight.
    Running,
    /// Finished successfully. Terminal.
    Succeeded,
    /// An attempt failed; waiting out the backoff before retrying.
    Failed,
    /// Attempt budget exhausted (or fatal error); parked for an
    /// operator. Terminal until requeued.
    DeadLettered,
}

impl JobStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Queued => "QUEUED",
            Self::Running => "RUNNING",
            Self::Succeeded => "SUCCEEDED",
            Self::Failed => "FAILED",
            Self::DeadLettered => "DEAD_LETTERED",
        }
    }

    /// Whether a worker may claim the job (subject to its schedule).
    pub fn is_claimable(&self) -> bool {
        matches!(self, Self::Queued | Self::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Job ────────────────────────────────────────────────────────────────

/// A persisted job record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// The queue this job belongs to.
    pub queue: String,
    /// The job type, dispatched on by handlers.
    pub job_type: String,
    /// Opaque payload; workers validate it into typed structs.
    pub payload: serde_json::Value,
    /// Higher runs first within a queue.
    pub priority: i32,
    /// Attempts started so far.
    pub attempts: u32,
    /// Attempt budget before dead-lettering.
    pub max_attempts: u32,
    /// Retry backoff policy.
    pub backoff: BackoffPolicy,
    /// Per-attempt timeout in milliseconds.
    pub timeout_ms: u64,
    /// Current status.
    pub status: JobStatus,
    /// When the job was enqueued (UTC).
    pub created_at: DateTime<Utc>,
    /// Earliest time the next attempt may start (UTC).
    pub scheduled_at: DateTime<Utc>,
    /// When the current attempt started (UTC).
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal status (UTC).
    pub finished_at: Option<DateTime<Utc>>,
    /// The most recent attempt failure.
    pub last_error: Option<String>,
}

impl Job {
    /// Whether a worker may claim this job at `now`.
    pub fn is_ready(&self, now: DateTime<Utc>) -> bool {
        self.status.is_claimable() && self.scheduled_at <= now
    }

    /// Whether the attempt budget is exhausted.
    pub fn attempts_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}
