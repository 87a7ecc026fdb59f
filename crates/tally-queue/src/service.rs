//! # Queue Service
//!
//! Named queues with independent, concurrency-limited worker pools.
//!
//! The service is an explicitly constructed instance holding its backing
//! store handle; controllers and workers receive it by reference. There
//! is no ambient singleton. Lifecycle: construct at process start,
//! create queues, register processors, and call [`QueueService::shutdown`]
//! to drain in-flight jobs before exit.
//!
//! Each worker is a task in a loop: claim a ready job, run the handler
//! under the job's timeout, then settle the outcome: success completes,
//! a retryable failure backs off and retries, a fatal failure or an
//! exhausted attempt budget dead-letters. Dead-lettered jobs are kept
//! and surfaced for operators; they are never dropped.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::backoff::BackoffPolicy;
use crate::error::{JobError, QueueError};
use crate::job::{Job, JobId, JobStatus};
use crate::store::{InMemoryJobStore, JobStore};

// ── Handler Contract ───────────────────────────────────────────────────

/// The future a handler returns for one attempt.
pub type HandlerFuture<'a> = Pin<Box<dyn Future<Output = Result<(), JobError>> + Send + 'a>>;

/// A job processor registered against a queue.
///
/// Handlers must be **idempotent**: a job may be delivered again after a
/// crash, a timeout, or a retry, and re-running it must produce the same
/// end state as one successful run. Settlement handlers get this from
/// the ledger's idempotency keys; notification handlers get it from
/// at-least-once delivery being acceptable.
pub trait JobHandler: Send + Sync {
    /// Run one attempt of `job`.
    fn handle<'a>(&'a self, job: &'a Job) -> HandlerFuture<'a>;
}

/// Adapter turning an async closure into a [`JobHandler`].
pub struct FnHandler<F>(F);

impl<F, Fut> FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    /// Wrap an async closure.
    pub fn new(f: F) -> Self {
        Self(f)
    }
}

impl<F, Fut> JobHandler for FnHandler<F>
where
    F: Fn(Job) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), JobError>> + Send + 'static,
{
    fn handle<'a>(&'a self, job: &'a Job) -> HandlerFuture<'a> {
        Box::pin((self.0)(job.clone()))
    }
}

// ── Configuration ──────────────────────────────────────────────────────

/// Per-queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Queue name.
    pub name: String,
    /// Worker pool size.
    pub concurrency: usize,
    /// Default attempt budget for jobs enqueued without an override.
    pub default_max_attempts: u32,
    /// Default backoff policy.
    pub default_backoff: BackoffPolicy,
    /// Default per-attempt timeout in milliseconds.
    pub default_timeout_ms: u64,
    /// How long an idle worker sleeps before polling again.
    pub poll_interval: Duration,
}

impl QueueConfig {
    /// A queue with the given name and worker pool size.
    pub fn new(name: impl Into<String>, concurrency: usize) -> Self {
        Self {
            name: name.into(),
            concurrency: concurrency.max(1),
            default_max_attempts: 3,
            default_backoff: BackoffPolicy::default(),
            default_timeout_ms: 30_000,
            poll_interval: Duration::from_millis(50),
        }
    }

    /// Override the default attempt budget.
    pub fn with_max_attempts(mut self, attempts: u32) -> Self {
        self.default_max_attempts = attempts.max(1);
        self
    }

    /// Override the default backoff policy.
    pub fn with_backoff(mut self, backoff: BackoffPolicy) -> Self {
        self.default_backoff = backoff;
        self
    }

    /// Override the default per-attempt timeout.
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.default_timeout_ms = timeout_ms;
        self
    }

    /// Override the idle poll interval.
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }
}

/// Per-job overrides at enqueue time.
#[derive(Debug, Clone, Default)]
pub struct EnqueueOptions {
    /// Higher runs first within the queue.
    pub priority: i32,
    /// Attempt budget override.
    pub max_attempts: Option<u32>,
    /// Backoff override.
    pub backoff: Option<BackoffPolicy>,
    /// Timeout override in milliseconds.
    pub timeout_ms: Option<u64>,
}

// ── Service ────────────────────────────────────────────────────────────

/// The queue service: named queues over one backing store.
pub struct QueueService {
    store: Arc<dyn JobStore>,
    queues: DashMap<String, QueueConfig>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl QueueService {
    /// Create a service over an explicit backing store.
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            store,
            queues: DashMap::new(),
            workers: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    /// Create a service over a fresh in-memory store.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(InMemoryJobStore::new()))
    }

    /// Register a queue.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::QueueExists`] if the name is taken.
    pub fn create_queue(&self, config: QueueConfig) -> Result<(), QueueError> {
        let name = config.name.clone();
        if self.queues.contains_key(&name) {
            return Err(QueueError::QueueExists(name));
        }
        self.queues.insert(name, config);
        Ok(())
    }

    /// Enqueue a job.
    ///
    /// The job is durably recorded in the backing store before this
    /// returns; callers may treat a returned id as an enqueued job.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownQueue`] for an unregistered queue and
    /// [`QueueError::ShuttingDown`] while draining.
    pub fn enqueue(
        &self,
        queue: &str,
        job_type: &str,
        payload: serde_json::Value,
        opts: EnqueueOptions,
    ) -> Result<JobId, QueueError> {
        if *self.shutdown_tx.borrow() {
            return Err(QueueError::ShuttingDown);
        }
        let config = self
            .queues
            .get(queue)
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let now = Utc::now();
        let job = Job {
            id: JobId::new(),
            queue: queue.to_string(),
            job_type: job_type.to_string(),
            payload,
            priority: opts.priority,
            attempts: 0,
            max_attempts: opts.max_attempts.unwrap_or(config.default_max_attempts),
            backoff: opts.backoff.unwrap_or(config.default_backoff),
            timeout_ms: opts.timeout_ms.unwrap_or(config.default_timeout_ms),
            status: JobStatus::Queued,
            created_at: now,
            scheduled_at: now,
            started_at: None,
            finished_at: None,
            last_error: None,
        };
        let id = job.id;
        tracing::debug!(job = %id, queue, job_type, "job enqueued");
        self.store.push(job);
        Ok(id)
    }

    /// Start the worker pool for a queue with the given handler.
    ///
    /// Spawns `config.concurrency` workers. Calling this twice for one
    /// queue doubles the pool; don't.
    ///
    /// # Errors
    ///
    /// Returns [`QueueError::UnknownQueue`] for an unregistered queue.
    pub fn process(&self, queue: &str, handler: Arc<dyn JobHandler>) -> Result<(), QueueError> {
        let config = self
            .queues
            .get(queue)
            .map(|c| c.clone())
            .ok_or_else(|| QueueError::UnknownQueue(queue.to_string()))?;

        let mut workers = self.workers.lock();
        for index in 0..config.concurrency {
            let store = Arc::clone(&self.store);
            let handler = Arc::clone(&handler);
            let config = config.clone();
            let shutdown_rx = self.shutdown_tx.subscribe();
            workers.push(tokio::spawn(worker_loop(
                store, handler, config, index, shutdown_rx,
            )));
        }
        Ok(())
    }

    /// Dead-lettered jobs across all queues, for operator inspection.
    pub fn dead_lettered(&self) -> Vec<Job> {
        self.store.dead_lettered()
    }

    /// Requeue a dead-lettered job with a fresh attempt budget.
    pub fn requeue(&self, id: JobId) -> Result<Job, QueueError> {
        let job = self.store.requeue(id, Utc::now())?;
        tracing::info!(job = %id, queue = %job.queue, "dead-lettered job requeued");
        Ok(job)
    }

    /// Fetch a job record by id.
    pub fn job(&self, id: JobId) -> Option<Job> {
        self.store.get(id)
    }

    /// All jobs in a queue.
    pub fn queue_jobs(&self, queue: &str) -> Vec<Job> {
        self.store.queue_jobs(queue)
    }

    /// Jobs in a queue that have not reached a terminal status.
    pub fn open_count(&self, queue: &str) -> usize {
        self.store.open_count(queue)
    }

    /// Whether the service is draining.
    pub fn is_shutting_down(&self) -> bool {
        *self.shutdown_tx.borrow()
    }

    /// Stop accepting work, let in-flight jobs finish, and join every
    /// worker.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let workers = std::mem::take(&mut *self.workers.lock());
        for worker in workers {
            let _ = worker.await;
        }
        tracing::info!("queue service drained");
    }
}

// ── Worker ─────────────────────────────────────────────────────────────

async fn worker_loop(
    store: Arc<dyn JobStore>,
    handler: Arc<dyn JobHandler>,
    config: QueueConfig,
    index: usize,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!(queue = %config.name, worker = index, "worker started");
    loop {
        if *shutdown_rx.borrow() {
            break;
        }
        match store.pull_ready(&config.name, Utc::now()) {
            Some(job) => run_attempt(store.as_ref(), handler.as_ref(), &job).await,
            None => {
                // Idle: sleep until the poll interval elapses or shutdown
                // is signalled, whichever comes first.
                tokio::select! {
                    _ = tokio::time::sleep(config.poll_interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
        }
    }
    tracing::debug!(queue = %config.name, worker = index, "worker stopped");
}

async fn run_attempt(store: &dyn JobStore, handler: &dyn JobHandler, job: &Job) {
    let timeout = Duration::from_millis(job.timeout_ms);
    let outcome = match tokio::time::timeout(timeout, handler.handle(job)).await {
        Ok(result) => result,
        Err(_) => Err(JobError::retryable(format!(
            "attempt exceeded {}ms timeout",
            job.timeout_ms
        ))),
    };

    match outcome {
        Ok(()) => {
            tracing::debug!(job = %job.id, queue = %job.queue, attempts = job.attempts, "job succeeded");
            if let Err(err) = store.complete(job.id) {
                tracing::warn!(job = %job.id, error = %err, "could not mark job succeeded");
            }
        }
        Err(JobError::Fatal(msg)) => {
            tracing::error!(job = %job.id, queue = %job.queue, error = %msg, "job failed fatally; dead-lettering");
            if let Err(err) = store.dead_letter(job.id, msg) {
                tracing::warn!(job = %job.id, error = %err, "could not dead-letter job");
            }
        }
        Err(JobError::Retryable(msg)) => {
            if job.attempts_exhausted() {
                tracing::error!(
                    job = %job.id,
                    queue = %job.queue,
                    attempts = job.attempts,
                    error = %msg,
                    "attempt budget exhausted; dead-lettering"
                );
                if let Err(err) = store.dead_letter(job.id, msg) {
                    tracing::warn!(job = %job.id, error = %err, "could not dead-letter job");
                }
            } else {
                let delay = job.backoff.delay_for(job.attempts);
                let retry_at = Utc::now()
                    + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                tracing::warn!(
                    job = %job.id,
                    queue = %job.queue,
                    attempts = job.attempts,
                    retry_in_ms = delay.as_millis() as u64,
                    error = %msg,
                    "attempt failed; retrying"
                );
                if let Err(err) = store.retry(job.id, msg, retry_at) {
                    tracing::warn!(job = %job.id, error = %err, "could not schedule retry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use serde_json::json;

    fn fast_queue(name: &str, concurrency: usize) -> QueueConfig {
        QueueConfig::new(name, concurrency)
            .with_backoff(BackoffPolicy::exponential(5, 20))
            .with_poll_interval(Duration::from_millis(5))
            .with_timeout_ms(500)
    }

    async fn wait_idle(service: &QueueService, queue: &str) {
        for _ in 0..400 {
            if service.open_count(queue) == 0 {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue \"{queue}\" did not drain");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn processes_enqueued_jobs() {
        let service = QueueService::in_memory();
        service.create_queue(fast_queue("payments", 2)).unwrap();

        let seen = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&seen);
        service
            .process(
                "payments",
                Arc::new(FnHandler::new(move |_job| {
                    let counter = Arc::clone(&counter);
                    async move {
                        counter.fetch_add(1, Ordering::SeqCst);
                        Ok(())
                    }
                })),
            )
            .unwrap();

        for _ in 0..5 {
            service
                .enqueue("payments", "test.v1", json!({}), EnqueueOptions::default())
                .unwrap();
        }
        wait_idle(&service, "payments").await;
        assert_eq!(seen.load(Ordering::SeqCst), 5);
        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn retries_then_succeeds() {
        let service = QueueService::in_memory();
        service.create_queue(fast_queue("payments", 1)).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        service
            .process(
                "payments",
                Arc::new(FnHandler::new(move |_job| {
                    let counter = Arc::clone(&counter);
                    async move {
                        if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                            Err(JobError::retryable("transient"))
                        } else {
                            Ok(())
                        }
                    }
                })),
            )
            .unwrap();

        let id = service
            .enqueue("payments", "test.v1", json!({}), EnqueueOptions::default())
            .unwrap();
        wait_idle(&service, "payments").await;

        let job = service.job(id).unwrap();
        assert_eq!(job.status, JobStatus::Succeeded);
        assert_eq!(job.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn exhausted_attempts_dead_letter() {
        let service = QueueService::in_memory();
        service.create_queue(fast_queue("payments", 1)).unwrap();
        service
            .process(
                "payments",
                Arc::new(FnHandler::new(|_job| async {
                    Err(JobError::retryable("always failing"))
                })),
            )
            .unwrap();

        let id = service
            .enqueue("payments", "test.v1", json!({}), EnqueueOptions::default())
            .unwrap();
        wait_idle(&service, "payments").await;

        let job = service.job(id).unwrap();
        assert_eq!(job.status, JobStatus::DeadLettered);
        assert_eq!(job.attempts, 3);
        assert_eq!(job.last_error.as_deref(), Some("always failing"));
        assert_eq!(service.dead_lettered().len(), 1);
        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn fatal_failure_dead_letters_immediately() {
        let service = QueueService::in_memory();
        service.create_queue(fast_queue("payments", 1)).unwrap();
        service
            .process(
                "payments",
                Arc::new(FnHandler::new(|_job| async {
                    Err(JobError::fatal("malformed payload"))
                })),
            )
            .unwrap();

        let id = service
            .enqueue("payments", "test.v1", json!({}), EnqueueOptions::default())
            .unwrap();
        wait_idle(&service, "payments").await;

        let job = service.job(id).unwrap();
        assert_eq!(job.status, JobStatus::DeadLettered);
        assert_eq!(job.attempts, 1);
        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn timeout_counts_as_retryable_failure() {
        let service = QueueService::in_memory();
        service
            .create_queue(fast_queue("payments", 1).with_timeout_ms(20))
            .unwrap();
        service
            .process(
                "payments",
                Arc::new(FnHandler::new(|_job| async {
                    tokio::time::sleep(Duration::from_secs(5)).await;
                    Ok(())
                })),
            )
            .unwrap();

        let id = service
            .enqueue(
                "payments",
                "test.v1",
                json!({}),
                EnqueueOptions {
                    max_attempts: Some(1),
                    ..Default::default()
                },
            )
            .unwrap();
        wait_idle(&service, "payments").await;

        let job = service.job(id).unwrap();
        assert_eq!(job.status, JobStatus::DeadLettered);
        assert!(job.last_error.unwrap().contains("timeout"));
        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrency_is_bounded() {
        let service = QueueService::in_memory();
        service.create_queue(fast_queue("payments", 2)).unwrap();

        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let running_ref = Arc::clone(&running);
        let peak_ref = Arc::clone(&peak);
        service
            .process(
                "payments",
                Arc::new(FnHandler::new(move |_job| {
                    let running = Arc::clone(&running_ref);
                    let peak = Arc::clone(&peak_ref);
                    async move {
                        let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                        peak.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(30)).await;
                        running.fetch_sub(1, Ordering::SeqCst);
                        Ok(())
                    }
                })),
            )
            .unwrap();

        for _ in 0..8 {
            service
                .enqueue("payments", "test.v1", json!({}), EnqueueOptions::default())
                .unwrap();
        }
        wait_idle(&service, "payments").await;
        assert!(peak.load(Ordering::SeqCst) <= 2, "pool exceeded its bound");
        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn requeued_dead_letter_runs_again() {
        let service = QueueService::in_memory();
        service.create_queue(fast_queue("payments", 1)).unwrap();

        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        service
            .process(
                "payments",
                Arc::new(FnHandler::new(move |_job| {
                    let counter = Arc::clone(&counter);
                    async move {
                        // Fail the first three attempts (the original
                        // budget), succeed after the requeue.
                        if counter.fetch_add(1, Ordering::SeqCst) < 3 {
                            Err(JobError::retryable("still broken"))
                        } else {
                            Ok(())
                        }
                    }
                })),
            )
            .unwrap();

        let id = service
            .enqueue("payments", "test.v1", json!({}), EnqueueOptions::default())
            .unwrap();
        wait_idle(&service, "payments").await;
        assert_eq!(service.job(id).unwrap().status, JobStatus::DeadLettered);

        service.requeue(id).unwrap();
        wait_idle(&service, "payments").await;
        assert_eq!(service.job(id).unwrap().status, JobStatus::Succeeded);
        service.shutdown().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn enqueue_validates_queue_and_shutdown() {
        let service = QueueService::in_memory();
        assert!(matches!(
            service.enqueue("nope", "t", json!({}), EnqueueOptions::default()),
            Err(QueueError::UnknownQueue(_))
        ));

        service.create_queue(fast_queue("payments", 1)).unwrap();
        service.shutdown().await;
        assert!(matches!(
            service.enqueue("payments", "t", json!({}), EnqueueOptions::default()),
            Err(QueueError::ShuttingDown)
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn duplicate_queue_rejected() {
        let service = QueueService::in_memory();
        service.create_queue(fast_queue("payments", 1)).unwrap();
        assert!(matches!(
            service.create_queue(fast_queue("payments", 1)),
            Err(QueueError::QueueExists(_))
        ));
    }
}
