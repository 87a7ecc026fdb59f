//! # Job Backing Store
//!
//! The queue service is generic over where jobs live. [`JobStore`] is the
//! contract a backing store must satisfy: a durable broker behind a
//! client, or the in-process [`InMemoryJobStore`] used for development,
//! tests, and single-node deployments.
//!
//! The store owns job state transitions; workers drive them through the
//! service. `pull_ready` is the claim point: it atomically selects the
//! highest-priority ready job and marks it RUNNING so no two workers can
//! claim the same job.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::QueueError;
use crate::job::{Job, JobId, JobStatus};

/// Contract for a job backing store.
pub trait JobStore: Send + Sync {
    /// Persist a new job.
    fn push(&self, job: Job);

    /// Claim the next ready job in a queue, marking it RUNNING and
    /// counting the attempt. Ordering: priority descending, then
    /// schedule time, then creation time.
    fn pull_ready(&self, queue: &str, now: DateTime<Utc>) -> Option<Job>;

    /// Mark a RUNNING job SUCCEEDED.
    fn complete(&self, id: JobId) -> Result<(), QueueError>;

    /// Mark a RUNNING job FAILED and schedule its next attempt.
    fn retry(&self, id: JobId, error: String, retry_at: DateTime<Utc>) -> Result<(), QueueError>;

    /// Park a RUNNING job in the dead-letter state.
    fn dead_letter(&self, id: JobId, error: String) -> Result<(), QueueError>;

    /// Move a DEAD_LETTERED job back to QUEUED with a fresh attempt
    /// budget.
    fn requeue(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, QueueError>;

    /// Fetch a job by id.
    fn get(&self, id: JobId) -> Option<Job>;

    /// All jobs in a queue, newest last.
    fn queue_jobs(&self, queue: &str) -> Vec<Job>;

    /// All dead-lettered jobs across queues.
    fn dead_lettered(&self) -> Vec<Job>;

    /// Jobs in a queue that are not yet terminal (queued, running, or
    /// awaiting retry).
    fn open_count(&self, queue: &str) -> usize;
}

/// In-process job store backed by a mutex-guarded map.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<JobId, Job>>,
}

impl InMemoryJobStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn update(
        &self,
        id: JobId,
        expected: JobStatus,
        f: impl FnOnce(&mut Job),
    ) -> Result<(), QueueError> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| QueueError::UnknownJob(id.to_string()))?;
        if job.status != expected {
            return Err(QueueError::InvalidJobState {
                job_id: id.to_string(),
                status: job.status.as_str().to_string(),
                expected: expected.as_str().to_string(),
            });
        }
        f(job);
        Ok(())
    }
}

impl JobStore for InMemoryJobStore {
    fn push(&self, job: Job) {
        self.jobs.lock().insert(job.id, job);
    }

    fn pull_ready(&self, queue: &str, now: DateTime<Utc>) -> Option<Job> {
        let mut jobs = self.jobs.lock();
        let next = jobs
            .values()
            .filter(|job| job.queue == queue && job.is_ready(now))
            .min_by(|a, b| {
                b.priority
                    .cmp(&a.priority)
                    .then(a.scheduled_at.cmp(&b.scheduled_at))
                    .then(a.created_at.cmp(&b.created_at))
            })
            .map(|job| job.id)?;
        let job = jobs.get_mut(&next)?;
        job.status = JobStatus::Running;
        job.attempts += 1;
        job.started_at = Some(now);
        Some(job.clone())
    }

    fn complete(&self, id: JobId) -> Result<(), QueueError> {
        self.update(id, JobStatus::Running, |job| {
            job.status = JobStatus::Succeeded;
            job.finished_at = Some(Utc::now());
        })
    }

    fn retry(&self, id: JobId, error: String, retry_at: DateTime<Utc>) -> Result<(), QueueError> {
        self.update(id, JobStatus::Running, |job| {
            job.status = JobStatus::Failed;
            job.last_error = Some(error);
            job.scheduled_at = retry_at;
        })
    }

    fn dead_letter(&self, id: JobId, error: String) -> Result<(), QueueError> {
        self.update(id, JobStatus::Running, |job| {
            job.status = JobStatus::DeadLettered;
            job.last_error = Some(error);
            job.finished_at = Some(Utc::now());
        })
    }

    fn requeue(&self, id: JobId, now: DateTime<Utc>) -> Result<Job, QueueError> {
        let mut jobs = self.jobs.lock();
        let job = jobs
            .get_mut(&id)
            .ok_or_else(|| QueueError::UnknownJob(id.to_string()))?;
        if job.status != JobStatus::DeadLettered {
            return Err(QueueError::InvalidJobState {
                job_id: id.to_string(),
                status: job.status.as_str().to_string(),
                expected: JobStatus::DeadLettered.as_str().to_string(),
            });
        }
        job.status = JobStatus::Queued;
        job.attempts = 0;
        job.scheduled_at = now;
        job.started_at = None;
        job.finished_at = None;
        Ok(job.clone())
    }

    fn get(&self, id: JobId) -> Option<Job> {
        self.jobs.lock().get(&id).cloned()
    }

    fn queue_jobs(&self, queue: &str) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .values()
            .filter(|job| job.queue == queue)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    fn dead_lettered(&self) -> Vec<Job> {
        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .values()
            .filter(|job| job.status == JobStatus::DeadLettered)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        jobs
    }

    fn open_count(&self, queue: &str) -> usize {
        self.jobs
            .lock()
            .values()
            .filter(|job| {
                job.queue == queue
                    && matches!(
                        job.status,
                        JobStatus::Queued | JobStatus::Running | JobStatus::Failed
                    )
            })
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backoff::BackoffPolicy;
    use serde_json::json;

    fn job(queue: &str, priority: i32) -> Job {
        let now = Utc::now();
        Job {
            id: JobId::new(),
            queue: queue.to_string(),
            job_type: "test.v1".to_string(),
            payload: json!({}),
            priority,
            attempts: 0,
            max_attempts: 3,
            backoff: BackoffPolicy::default(),
            timeout_ms: 1_000,
            status: JobStatus::Queued,
            created_at: now,
            scheduled_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    #[test]
    fn pull_claims_and_counts_attempt() {
        let store = InMemoryJobStore::new();
        let pushed = job("payments", 0);
        let id = pushed.id;
        store.push(pushed);

        let pulled = store.pull_ready("payments", Utc::now()).unwrap();
        assert_eq!(pulled.id, id);
        assert_eq!(pulled.status, JobStatus::Running);
        assert_eq!(pulled.attempts, 1);

        // Claimed job cannot be pulled again.
        assert!(store.pull_ready("payments", Utc::now()).is_none());
    }

    #[test]
    fn pull_respects_priority() {
        let store = InMemoryJobStore::new();
        let low = job("payments", 0);
        let high = job("payments", 10);
        let high_id = high.id;
        store.push(low);
        store.push(high);

        let pulled = store.pull_ready("payments", Utc::now()).unwrap();
        assert_eq!(pulled.id, high_id);
    }

    #[test]
    fn pull_respects_queue_isolation() {
        let store = InMemoryJobStore::new();
        store.push(job("payments", 0));
        assert!(store.pull_ready("email", Utc::now()).is_none());
    }

    #[test]
    fn pull_skips_scheduled_future() {
        let store = InMemoryJobStore::new();
        let mut delayed = job("payments", 0);
        delayed.scheduled_at = Utc::now() + chrono::Duration::seconds(60);
        store.push(delayed);
        assert!(store.pull_ready("payments", Utc::now()).is_none());
    }

    #[test]
    fn complete_requires_running() {
        let store = InMemoryJobStore::new();
        let pushed = job("payments", 0);
        let id = pushed.id;
        store.push(pushed);
        assert!(store.complete(id).is_err());

        store.pull_ready("payments", Utc::now()).unwrap();
        store.complete(id).unwrap();
        assert_eq!(store.get(id).unwrap().status, JobStatus::Succeeded);
    }

    #[test]
    fn retry_reschedules() {
        let store = InMemoryJobStore::new();
        let pushed = job("payments", 0);
        let id = pushed.id;
        store.push(pushed);
        store.pull_ready("payments", Utc::now()).unwrap();

        let retry_at = Utc::now() + chrono::Duration::seconds(5);
        store
            .retry(id, "rail timeout".to_string(), retry_at)
            .unwrap();
        let stored = store.get(id).unwrap();
        assert_eq!(stored.status, JobStatus::Failed);
        assert_eq!(stored.last_error.as_deref(), Some("rail timeout"));
        assert_eq!(stored.scheduled_at, retry_at);

        // Not ready until the backoff elapses.
        assert!(store.pull_ready("payments", Utc::now()).is_none());
        let pulled = store.pull_ready("payments", retry_at).unwrap();
        assert_eq!(pulled.attempts, 2);
    }

    #[test]
    fn dead_letter_and_requeue() {
        let store = InMemoryJobStore::new();
        let pushed = job("payments", 0);
        let id = pushed.id;
        store.push(pushed);
        store.pull_ready("payments", Utc::now()).unwrap();
        store.dead_letter(id, "exhausted".to_string()).unwrap();

        let dead = store.dead_lettered();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].id, id);

        let requeued = store.requeue(id, Utc::now()).unwrap();
        assert_eq!(requeued.status, JobStatus::Queued);
        assert_eq!(requeued.attempts, 0);
        assert!(store.dead_lettered().is_empty());
    }

    #[test]
    fn requeue_requires_dead_letter() {
        let store = InMemoryJobStore::new();
        let pushed = job("payments", 0);
        let id = pushed.id;
        store.push(pushed);
        assert!(store.requeue(id, Utc::now()).is_err());
    }

    #[test]
    fn open_count_tracks_non_terminal() {
        let store = InMemoryJobStore::new();
        let first = job("payments", 0);
        let first_id = first.id;
        store.push(first);
        store.push(job("payments", 0));
        assert_eq!(store.open_count("payments"), 2);

        store.pull_ready("payments", Utc::now()).unwrap();
        assert_eq!(store.open_count("payments"), 2);

        store.complete(first_id).unwrap();
        assert_eq!(store.open_count("payments"), 1);
    }
}
