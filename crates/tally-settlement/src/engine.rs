//! # Engine Assembly
//!
//! Wires the whole settlement core together: ledger, queue service,
//! controllers, workers, outbox dispatcher, and the auto-approve
//! scheduler. One explicitly constructed [`SettlementEngine`] instance
//! owns the lot; there is no global state anywhere in the stack.
//!
//! Queue shape (defaults):
//!
//! | queue      | concurrency | attempts | backoff        |
//! |------------|-------------|----------|----------------|
//! | `payments` | 3           | 3        | fast, capped   |
//! | `disputes` | 2           | 5        | default        |
//! | `email`    | 5           | 8        | slow, patient  |
//!
//! Payment and dispute concurrency is kept low deliberately: fewer
//! interleavings against one project's escrow are easier to reason
//! about, and a ledger bug hurts less at three workers than at fifty.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use tally_ledger::LedgerStore;
use tally_queue::{BackoffPolicy, JobStore, QueueConfig, QueueService};

use crate::dispatch::OutboxDispatcher;
use crate::disputes::DisputeControl;
use crate::error::SettlementError;
use crate::milestones::MilestoneControl;
use crate::notify::NotificationSink;
use crate::payload::{DISPUTE_QUEUE, EMAIL_QUEUE, PAYMENT_QUEUE};
use crate::rail::PaymentRail;
use crate::triage::TriagePolicy;
use crate::workers::{DisputeWorker, NotifyWorker, PaymentWorker};

/// Tunables for the engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Payment queue worker pool size.
    pub payment_concurrency: usize,
    /// Dispute queue worker pool size.
    pub dispute_concurrency: usize,
    /// Email queue worker pool size.
    pub email_concurrency: usize,
    /// How often the auto-approve scan runs.
    pub auto_approve_interval: Duration,
    /// How often the outbox dispatcher ticks.
    pub outbox_interval: Duration,
    /// Dispute triage routing thresholds.
    pub triage_policy: TriagePolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            payment_concurrency: 3,
            dispute_concurrency: 2,
            email_concurrency: 5,
            auto_approve_interval: Duration::from_secs(60),
            outbox_interval: Duration::from_secs(1),
            triage_policy: TriagePolicy::default(),
        }
    }
}

/// The assembled settlement core.
pub struct SettlementEngine {
    ledger: LedgerStore,
    queue: Arc<QueueService>,
    milestones: MilestoneControl,
    disputes: DisputeControl,
    background: Mutex<Vec<JoinHandle<()>>>,
    shutdown_tx: watch::Sender<bool>,
}

impl SettlementEngine {
    /// Build and start the engine over an in-memory job store.
    pub fn start(
        ledger: LedgerStore,
        rail: Arc<dyn PaymentRail>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Result<Arc<Self>, SettlementError> {
        let queue = Arc::new(QueueService::in_memory());
        Self::start_with_queue(ledger, queue, rail, sink, config)
    }

    /// Build and start the engine over an explicit job backing store.
    pub fn start_with_store(
        ledger: LedgerStore,
        store: Arc<dyn JobStore>,
        rail: Arc<dyn PaymentRail>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Result<Arc<Self>, SettlementError> {
        let queue = Arc::new(QueueService::new(store));
        Self::start_with_queue(ledger, queue, rail, sink, config)
    }

    fn start_with_queue(
        ledger: LedgerStore,
        queue: Arc<QueueService>,
        rail: Arc<dyn PaymentRail>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Result<Arc<Self>, SettlementError> {
        queue.create_queue(
            QueueConfig::new(PAYMENT_QUEUE, config.payment_concurrency)
                .with_max_attempts(3)
                .with_backoff(BackoffPolicy::payments()),
        )?;
        queue.create_queue(
            QueueConfig::new(DISPUTE_QUEUE, config.dispute_concurrency).with_max_attempts(5),
        )?;
        queue.create_queue(
            QueueConfig::new(EMAIL_QUEUE, config.email_concurrency)
                .with_max_attempts(8)
                .with_backoff(BackoffPolicy::notifications()),
        )?;

        let milestones = MilestoneControl::new(ledger.clone(), Arc::clone(&queue));
        let disputes = DisputeControl::new(ledger.clone(), Arc::clone(&queue));

        queue.process(
            PAYMENT_QUEUE,
            Arc::new(PaymentWorker::new(ledger.clone(), rail)),
        )?;
        queue.process(
            DISPUTE_QUEUE,
            Arc::new(DisputeWorker::new(
                ledger.clone(),
                disputes.clone(),
                config.triage_policy,
            )),
        )?;
        queue.process(
            EMAIL_QUEUE,
            Arc::new(NotifyWorker::new(ledger.clone(), Arc::clone(&sink))),
        )?;

        let (shutdown_tx, _) = watch::channel(false);
        let mut background = Vec::new();

        let dispatcher = OutboxDispatcher::new(ledger.clone(), sink);
        background.push(dispatcher.spawn(config.outbox_interval, shutdown_tx.subscribe()));
        background.push(spawn_auto_approver(
            milestones.clone(),
            config.auto_approve_interval,
            shutdown_tx.subscribe(),
        ));

        tracing::info!("settlement engine started");
        Ok(Arc::new(Self {
            ledger,
            queue,
            milestones,
            disputes,
            background: Mutex::new(background),
            shutdown_tx,
        }))
    }

    /// The milestone lifecycle controller.
    pub fn milestones(&self) -> &MilestoneControl {
        &self.milestones
    }

    /// The dispute resolution controller.
    pub fn disputes(&self) -> &DisputeControl {
        &self.disputes
    }

    /// The ledger store.
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }

    /// The queue service, for dead-letter inspection and requeueing.
    pub fn queue(&self) -> &Arc<QueueService> {
        &self.queue
    }

    /// Jobs not yet terminal across all engine queues.
    pub fn open_jobs(&self) -> usize {
        [PAYMENT_QUEUE, DISPUTE_QUEUE, EMAIL_QUEUE]
            .iter()
            .map(|queue| self.queue.open_count(queue))
            .sum()
    }

    /// Stop schedulers, drain in-flight jobs, and shut the queue down.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let background = std::mem::take(&mut *self.background.lock());
        for task in background {
            let _ = task.await;
        }
        self.queue.shutdown().await;
        tracing::info!("settlement engine stopped");
    }
}

/// Periodically promote submitted milestones past their auto-approve
/// window, attributed to the system actor.
fn spawn_auto_approver(
    milestones: MilestoneControl,
    interval: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            if *shutdown_rx.borrow() {
                break;
            }
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    let approved = milestones.auto_approve_due(chrono::Utc::now());
                    if !approved.is_empty() {
                        tracing::info!(count = approved.len(), "auto-approve scan promoted milestones");
                    }
                }
                _ = shutdown_rx.changed() => {}
            }
        }
        tracing::debug!("auto-approve scheduler stopped");
    })
}
