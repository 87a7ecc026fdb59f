//! # Dispute Resolution Controller
//!
//! Enforces the dispute state machine: opening (with triage hand-off),
//! escalation to humans, and resolution with split settlement.
//!
//! Ordering on resolution: the split is validated against the milestone
//! amount **before** anything is enqueued; then the settlement legs are
//! durably enqueued; then the RESOLVED transition commits. A concurrent
//! duplicate resolve can at worst enqueue legs under the same idempotency
//! keys (the workers collapse those into no-ops) while its RESOLVED
//! transition is rejected by the state machine.

use std::sync::Arc;

use chrono::Utc;

use tally_core::{Actor, Amount, DisputeId, MilestoneId, UserId};
use tally_ledger::{
    DisputeRole, DisputeStatus, EvidenceRef, LedgerStore, Resolution, ResolutionDecision,
    RESOLUTION_SCHEMA_VERSION,
};
use tally_queue::{BackoffPolicy, EnqueueOptions, QueueService};

use crate::error::SettlementError;
use crate::payload::{
    DisputeLeg, DisputeLegPayload, NotifyPayload, TriagePayload, DISPUTE_QUEUE, EMAIL_QUEUE,
    JOB_DISPUTE_PAYMENT, JOB_DISPUTE_REFUND, JOB_DISPUTE_TRIAGE, JOB_NOTIFY_PARTIES,
    PAYMENT_QUEUE,
};

/// The dispute resolution controller.
#[derive(Clone)]
pub struct DisputeControl {
    ledger: LedgerStore,
    queue: Arc<QueueService>,
}

impl DisputeControl {
    /// Create a controller over the given ledger and queue service.
    pub fn new(ledger: LedgerStore, queue: Arc<QueueService>) -> Self {
        Self { ledger, queue }
    }

    /// Open a dispute against a submitted or approved milestone and hand
    /// it to automated triage.
    pub fn open(
        &self,
        milestone_id: MilestoneId,
        raised_by: UserId,
        reason: String,
        evidence: Vec<EvidenceRef>,
        actor: Actor,
    ) -> Result<DisputeId, SettlementError> {
        if reason.trim().is_empty() {
            return Err(SettlementError::validation("a dispute needs a reason"));
        }
        let dispute_id = self.ledger.transact(|unit| {
            unit.open_dispute(milestone_id, raised_by, reason, evidence, actor)
        })?;

        self.queue.enqueue(
            DISPUTE_QUEUE,
            JOB_DISPUTE_TRIAGE,
            serde_json::to_value(TriagePayload { dispute_id })?,
            EnqueueOptions::default(),
        )?;
        tracing::info!(dispute = %dispute_id, milestone = %milestone_id, "dispute opened; triage enqueued");
        Ok(dispute_id)
    }

    /// Resolve a dispute with a split, enqueueing one independent
    /// settlement job per non-zero side.
    pub fn resolve(
        &self,
        dispute_id: DisputeId,
        amount_to_freelancer: Amount,
        amount_to_client: Amount,
        decided_by: Actor,
    ) -> Result<(), SettlementError> {
        if amount_to_freelancer.is_negative() || amount_to_client.is_negative() {
            return Err(SettlementError::validation(
                "resolution amounts must be non-negative",
            ));
        }

        // Validate everything before any job exists: dispute state,
        // assignment requirement, and split conservation.
        let (project_id, milestone_id, client, freelancer) = self.ledger.read(|view| {
            let dispute = view.dispute(dispute_id)?;
            let milestone = view.milestone(dispute.milestone_id)?;
            let project = view.project(dispute.project_id)?;

            match dispute.status {
                DisputeStatus::InMediation | DisputeStatus::InArbitration => {}
                DisputeStatus::Escalated => {
                    if dispute.mediator.is_none() && dispute.arbitrator.is_none() {
                        return Err(SettlementError::validation(
                            "an escalated dispute needs an assigned mediator or arbitrator",
                        ));
                    }
                }
                other => {
                    return Err(SettlementError::validation(format!(
                        "dispute cannot be resolved from {other}"
                    )));
                }
            }

            let split_total = amount_to_freelancer
                .checked_add(amount_to_client)
                .map_err(tally_ledger::LedgerError::from)?;
            if split_total != milestone.amount {
                return Err(SettlementError::validation(format!(
                    "split {split_total} does not equal the milestone amount {}",
                    milestone.amount
                )));
            }
            Ok((project.id, milestone.id, project.client, project.freelancer))
        })?;

        // Durably enqueue both legs before the RESOLVED transition.
        let payment_opts = || EnqueueOptions {
            priority: 10,
            backoff: Some(BackoffPolicy::payments()),
            ..Default::default()
        };
        if amount_to_freelancer.is_positive() {
            self.queue.enqueue(
                PAYMENT_QUEUE,
                JOB_DISPUTE_PAYMENT,
                serde_json::to_value(DisputeLegPayload {
                    dispute_id,
                    project_id,
                    milestone_id,
                    recipient: freelancer,
                    amount: amount_to_freelancer,
                    leg: DisputeLeg::Payment,
                })?,
                payment_opts(),
            )?;
        }
        if amount_to_client.is_positive() {
            self.queue.enqueue(
                PAYMENT_QUEUE,
                JOB_DISPUTE_REFUND,
                serde_json::to_value(DisputeLegPayload {
                    dispute_id,
                    project_id,
                    milestone_id,
                    recipient: client,
                    amount: amount_to_client,
                    leg: DisputeLeg::Refund,
                })?,
                payment_opts(),
            )?;
        }

        let resolution = Resolution {
            schema_version: RESOLUTION_SCHEMA_VERSION,
            decision: ResolutionDecision::from_split(amount_to_freelancer, amount_to_client),
            amount_to_freelancer,
            amount_to_client,
            decided_by,
            decided_at: Utc::now(),
        };
        self.ledger
            .transact(|unit| unit.resolve_dispute(dispute_id, resolution))?;

        self.notify_parties(dispute_id)?;
        tracing::info!(
            dispute = %dispute_id,
            to_freelancer = amount_to_freelancer.minor(),
            to_client = amount_to_client.minor(),
            decided_by = %decided_by,
            "dispute resolved; settlement legs enqueued"
        );
        Ok(())
    }

    /// Escalate a dispute past automated handling.
    pub fn escalate(
        &self,
        dispute_id: DisputeId,
        reason: String,
        actor: Actor,
    ) -> Result<(), SettlementError> {
        self.ledger
            .transact(|unit| unit.escalate_dispute(dispute_id, reason, actor))?;
        self.notify_parties(dispute_id)?;
        Ok(())
    }

    /// Assign a human mediator or arbitrator.
    pub fn assign(
        &self,
        dispute_id: DisputeId,
        user: UserId,
        role: DisputeRole,
        actor: Actor,
    ) -> Result<(), SettlementError> {
        self.ledger
            .transact(|unit| unit.assign_dispute(dispute_id, user, role, actor))?;
        Ok(())
    }

    /// Append a message to a dispute's discussion log.
    pub fn post_message(
        &self,
        dispute_id: DisputeId,
        author: Actor,
        body: String,
    ) -> Result<(), SettlementError> {
        if body.trim().is_empty() {
            return Err(SettlementError::validation("a message needs a body"));
        }
        self.ledger
            .transact(|unit| unit.post_dispute_message(dispute_id, author, body))?;
        Ok(())
    }

    /// Attach evidence to an open dispute.
    pub fn add_evidence(
        &self,
        dispute_id: DisputeId,
        evidence: EvidenceRef,
        actor: Actor,
    ) -> Result<(), SettlementError> {
        if evidence.description.trim().is_empty() {
            return Err(SettlementError::validation(
                "evidence needs a description",
            ));
        }
        self.ledger
            .transact(|unit| unit.add_dispute_evidence(dispute_id, evidence, actor))?;
        Ok(())
    }

    /// Enqueue a notification fan-out for the dispute's current phase.
    ///
    /// Never mutates ledger state; retried independently of settlement.
    pub fn notify_parties(&self, dispute_id: DisputeId) -> Result<(), SettlementError> {
        self.queue.enqueue(
            EMAIL_QUEUE,
            JOB_NOTIFY_PARTIES,
            serde_json::to_value(NotifyPayload { dispute_id })?,
            EnqueueOptions {
                backoff: Some(BackoffPolicy::notifications()),
                max_attempts: Some(8),
                ..Default::default()
            },
        )?;
        Ok(())
    }

    /// Convenience read used by surfaces above the controller.
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }
}
