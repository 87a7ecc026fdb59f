//! # Settlement Workers
//!
//! Domain processors registered against the job queue service. Each
//! handler is idempotent by construction: before any write it asks the
//! ledger to begin a settlement under the job's natural idempotency key,
//! and a `DuplicateSettlement` answer means the money already moved —
//! the job reports success without touching anything.
//!
//! Error mapping at this boundary:
//!
//! - `DuplicateSettlement` → success (no-op).
//! - Rail transient failure / booking contention → retryable; the queue
//!   backs off and retries under the same key.
//! - Rail decline, malformed payload, unknown entities, escrow
//!   violations → fatal; the job dead-letters for an operator and the
//!   transaction stays PENDING/FAILED pending manual adjustment.

use std::sync::Arc;

use serde::de::DeserializeOwned;

use tally_core::DomainEvent;
use tally_ledger::{
    DisputeStatus, LedgerError, LedgerStore, SettlementKey, TransactionType,
};
use tally_queue::{Job, JobError, JobHandler, HandlerFuture};

use crate::disputes::DisputeControl;
use crate::notify::NotificationSink;
use crate::payload::{
    DisputeLeg, DisputeLegPayload, NotifyPayload, ReleasePayload, TriagePayload,
    JOB_DISPUTE_PAYMENT, JOB_DISPUTE_REFUND, JOB_DISPUTE_TRIAGE, JOB_MILESTONE_RELEASE,
    JOB_NOTIFY_PARTIES,
};
use crate::rail::{PaymentRail, RailError};
use crate::triage::{TriageEngine, TriagePolicy};

fn parse_payload<T: DeserializeOwned>(job: &Job) -> Result<T, JobError> {
    serde_json::from_value(job.payload.clone())
        .map_err(|err| JobError::fatal(format!("malformed {} payload: {err}", job.job_type)))
}

// ── Payment Worker ─────────────────────────────────────────────────────

/// Processes money-moving jobs on the payment queue.
pub struct PaymentWorker {
    ledger: LedgerStore,
    rail: Arc<dyn PaymentRail>,
}

impl PaymentWorker {
    /// Create a payment worker over the ledger and a payment rail.
    pub fn new(ledger: LedgerStore, rail: Arc<dyn PaymentRail>) -> Self {
        Self { ledger, rail }
    }

    /// Run one settlement: begin under the idempotency key, capture on
    /// the rail, then book or record the failure.
    async fn settle(
        &self,
        key: SettlementKey,
        project_id: tally_core::ProjectId,
        milestone_id: tally_core::MilestoneId,
        recipient: tally_core::UserId,
        amount: tally_core::Amount,
    ) -> Result<(), JobError> {
        let provider = self.rail.name().to_string();
        let txn = match self.ledger.transact(|unit| {
            unit.begin_settlement(
                key,
                project_id,
                milestone_id,
                recipient,
                amount,
                Some(provider.clone()),
            )
        }) {
            Ok(txn) => txn,
            Err(err) if err.is_duplicate_settlement() => {
                tracing::info!(key = %key, "settlement already completed; no-op");
                return Ok(());
            }
            Err(err) => return Err(JobError::fatal(err.to_string())),
        };

        let currency = self
            .ledger
            .read(|view| view.project(project_id).map(|p| p.currency))
            .map_err(|err| JobError::fatal(err.to_string()))?;

        // External call, outside any ledger unit. A crash after a
        // successful capture re-runs this job; the idempotency key keeps
        // the ledger end-state single-shot, and the provider reference
        // keeps the rail side reconcilable.
        match self.rail.capture(amount, currency, "default").await {
            Ok(reference) => self.book(txn, reference),
            Err(RailError::Transient(msg)) => {
                self.record_failure(txn, &msg);
                Err(JobError::retryable(msg))
            }
            Err(RailError::Declined(msg)) => {
                self.record_failure(txn, &msg);
                Err(JobError::fatal(msg))
            }
        }
    }

    fn book(
        &self,
        txn: tally_core::TransactionId,
        reference: String,
    ) -> Result<(), JobError> {
        match self
            .ledger
            .transact(|unit| unit.complete_settlement(txn, Some(reference)))
        {
            Ok(()) => Ok(()),
            Err(err) if err.is_duplicate_settlement() => Ok(()),
            Err(err @ LedgerError::WalletUnavailable { .. }) => {
                // A frozen wallet may thaw; keep the attempt budget on it.
                self.record_failure(txn, &err.to_string());
                Err(JobError::retryable(err.to_string()))
            }
            Err(err) => {
                self.record_failure(txn, &err.to_string());
                Err(JobError::fatal(err.to_string()))
            }
        }
    }

    fn record_failure(&self, txn: tally_core::TransactionId, msg: &str) {
        if let Err(err) = self
            .ledger
            .transact(|unit| unit.fail_settlement(txn, msg))
        {
            // Failing an already-failed row is harmless on retry paths.
            tracing::debug!(txn = %txn, error = %err, "could not record settlement failure");
        }
    }
}

impl JobHandler for PaymentWorker {
    fn handle<'a>(&'a self, job: &'a Job) -> HandlerFuture<'a> {
        Box::pin(async move {
            match job.job_type.as_str() {
                JOB_MILESTONE_RELEASE => {
                    let payload: ReleasePayload = parse_payload(job)?;
                    let key = SettlementKey::Milestone {
                        milestone_id: payload.milestone_id,
                        tx_type: TransactionType::MilestoneRelease,
                    };
                    self.settle(
                        key,
                        payload.project_id,
                        payload.milestone_id,
                        payload.to_user,
                        payload.amount,
                    )
                    .await
                }
                JOB_DISPUTE_PAYMENT | JOB_DISPUTE_REFUND => {
                    let payload: DisputeLegPayload = parse_payload(job)?;
                    let tx_type = match payload.leg {
                        DisputeLeg::Payment => TransactionType::DisputePayment,
                        DisputeLeg::Refund => TransactionType::DisputeRefund,
                    };
                    let key = SettlementKey::Dispute {
                        dispute_id: payload.dispute_id,
                        recipient: payload.recipient,
                        tx_type,
                    };
                    self.settle(
                        key,
                        payload.project_id,
                        payload.milestone_id,
                        payload.recipient,
                        payload.amount,
                    )
                    .await
                }
                other => Err(JobError::fatal(format!(
                    "payment worker cannot handle job type \"{other}\""
                ))),
            }
        })
    }
}

// ── Dispute Worker ─────────────────────────────────────────────────────

/// Processes triage jobs on the dispute queue.
pub struct DisputeWorker {
    ledger: LedgerStore,
    control: DisputeControl,
    engine: TriageEngine,
    policy: TriagePolicy,
}

impl DisputeWorker {
    /// Create a dispute worker.
    pub fn new(ledger: LedgerStore, control: DisputeControl, policy: TriagePolicy) -> Self {
        Self {
            ledger,
            control,
            engine: TriageEngine::new(),
            policy,
        }
    }

    fn triage(&self, dispute_id: tally_core::DisputeId) -> Result<(), JobError> {
        let (dispute, milestone, project) = self
            .ledger
            .read(|view| {
                let dispute = view.dispute(dispute_id)?;
                let milestone = view.milestone(dispute.milestone_id)?;
                let project = view.project(dispute.project_id)?;
                Ok::<_, LedgerError>((dispute, milestone, project))
            })
            .map_err(|err| JobError::fatal(err.to_string()))?;

        // Re-delivered triage for an already-routed dispute is a no-op.
        if dispute.status != DisputeStatus::PendingReview {
            tracing::debug!(dispute = %dispute_id, status = %dispute.status, "triage re-delivery; no-op");
            return Ok(());
        }

        let report = self.engine.analyze(&dispute, &milestone, &project);
        let routed_to = self.policy.route(&report, milestone.amount);
        tracing::info!(
            dispute = %dispute_id,
            confidence = report.confidence,
            routed_to = %routed_to,
            "triage complete"
        );

        match self
            .ledger
            .transact(|unit| unit.apply_triage(dispute_id, report, routed_to))
        {
            Ok(()) => {}
            // A concurrent delivery routed it first; same end state.
            Err(LedgerError::InvalidTransition { .. }) => return Ok(()),
            Err(err) => return Err(JobError::fatal(err.to_string())),
        }

        self.control
            .notify_parties(dispute_id)
            .map_err(|err| JobError::retryable(err.to_string()))?;
        Ok(())
    }
}

impl JobHandler for DisputeWorker {
    fn handle<'a>(&'a self, job: &'a Job) -> HandlerFuture<'a> {
        Box::pin(async move {
            match job.job_type.as_str() {
                JOB_DISPUTE_TRIAGE => {
                    let payload: TriagePayload = parse_payload(job)?;
                    self.triage(payload.dispute_id)
                }
                other => Err(JobError::fatal(format!(
                    "dispute worker cannot handle job type \"{other}\""
                ))),
            }
        })
    }
}

// ── Notify Worker ──────────────────────────────────────────────────────

/// Processes notification fan-out jobs on the email queue. Never mutates
/// ledger state.
pub struct NotifyWorker {
    ledger: LedgerStore,
    sink: Arc<dyn NotificationSink>,
}

impl NotifyWorker {
    /// Create a notify worker over the ledger and a sink.
    pub fn new(ledger: LedgerStore, sink: Arc<dyn NotificationSink>) -> Self {
        Self { ledger, sink }
    }
}

impl JobHandler for NotifyWorker {
    fn handle<'a>(&'a self, job: &'a Job) -> HandlerFuture<'a> {
        Box::pin(async move {
            match job.job_type.as_str() {
                JOB_NOTIFY_PARTIES => {
                    let payload: NotifyPayload = parse_payload(job)?;
                    let dispute = self
                        .ledger
                        .read(|view| view.dispute(payload.dispute_id))
                        .map_err(|err| JobError::fatal(err.to_string()))?;
                    let event = DomainEvent::DisputePhaseChanged {
                        dispute_id: dispute.id,
                        phase: dispute.status.as_str().to_string(),
                    };
                    self.sink
                        .notify(&event)
                        .map_err(|err| JobError::retryable(err.to_string()))
                }
                other => Err(JobError::fatal(format!(
                    "notify worker cannot handle job type \"{other}\""
                ))),
            }
        })
    }
}
