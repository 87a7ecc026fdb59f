//! # Milestone Lifecycle Controller
//!
//! Enforces the milestone state machine and triggers settlement on
//! approval. Every transition runs as one ledger atomic unit; `approve`
//! additionally enqueues the `MILESTONE_RELEASE` settlement job.
//!
//! Ordering on approval: the APPROVED transition (with its outbox event)
//! commits first, then the job is enqueued. The inverse order would let
//! a settlement job run for a milestone whose approval was rejected by a
//! concurrent caller: a release without an APPROVED state. With this
//! order, an enqueue failure after the commit leaves an APPROVED
//! milestone whose outbox event and missing settlement are visible to
//! operators, matching the failure semantics for a failed settlement
//! job: the milestone stays APPROVED until retry or manual adjustment.

use std::sync::Arc;

use chrono::{DateTime, Utc};

use tally_core::{Actor, MilestoneId};
use tally_ledger::{Deliverable, LedgerStore};
use tally_queue::{BackoffPolicy, EnqueueOptions, JobId, QueueService};

use crate::error::SettlementError;
use crate::payload::{ReleasePayload, JOB_MILESTONE_RELEASE, PAYMENT_QUEUE};

/// The milestone lifecycle controller.
#[derive(Clone)]
pub struct MilestoneControl {
    ledger: LedgerStore,
    queue: Arc<QueueService>,
}

impl MilestoneControl {
    /// Create a controller over the given ledger and queue service.
    pub fn new(ledger: LedgerStore, queue: Arc<QueueService>) -> Self {
        Self { ledger, queue }
    }

    /// The freelancer starts work on a pending milestone.
    pub fn start(&self, milestone_id: MilestoneId, actor: Actor) -> Result<(), SettlementError> {
        self.ledger
            .transact(|unit| unit.start_milestone(milestone_id, actor))?;
        Ok(())
    }

    /// Submit a milestone for client review. Moves no money.
    pub fn submit(
        &self,
        milestone_id: MilestoneId,
        deliverables: Vec<Deliverable>,
        notes: Option<String>,
        actor: Actor,
    ) -> Result<(), SettlementError> {
        self.ledger
            .transact(|unit| unit.submit_milestone(milestone_id, deliverables, notes, actor))?;
        tracing::info!(milestone = %milestone_id, "milestone submitted");
        Ok(())
    }

    /// Approve a submitted milestone and enqueue its settlement.
    ///
    /// The approval transition and the duplicate-settlement guard run in
    /// one atomic unit; a second approve of the same milestone is
    /// rejected there, before any duplicate job could be enqueued.
    pub fn approve(
        &self,
        milestone_id: MilestoneId,
        actor: Actor,
    ) -> Result<JobId, SettlementError> {
        self.ledger
            .transact(|unit| unit.approve_milestone(milestone_id, actor))?;

        let (project_id, from_user, to_user, amount) = self.ledger.read(|view| {
            let milestone = view.milestone(milestone_id)?;
            let project = view.project(milestone.project_id)?;
            Ok::<_, tally_ledger::LedgerError>((
                project.id,
                project.client,
                project.freelancer,
                milestone.amount,
            ))
        })?;

        let payload = ReleasePayload {
            project_id,
            milestone_id,
            from_user,
            to_user,
            amount,
        };
        let job = self.queue.enqueue(
            PAYMENT_QUEUE,
            JOB_MILESTONE_RELEASE,
            serde_json::to_value(&payload)?,
            EnqueueOptions {
                priority: 10,
                backoff: Some(BackoffPolicy::payments()),
                ..Default::default()
            },
        )?;
        tracing::info!(
            milestone = %milestone_id,
            job = %job,
            amount = amount.minor(),
            actor = %actor,
            "milestone approved; settlement enqueued"
        );
        Ok(job)
    }

    /// Request another revision round on a submitted milestone.
    pub fn request_revision(
        &self,
        milestone_id: MilestoneId,
        notes: String,
        actor: Actor,
    ) -> Result<(), SettlementError> {
        self.ledger
            .transact(|unit| unit.request_revision(milestone_id, notes, actor))?;
        Ok(())
    }

    /// Resume work after a revision request.
    pub fn resume(&self, milestone_id: MilestoneId, actor: Actor) -> Result<(), SettlementError> {
        self.ledger
            .transact(|unit| unit.resume_milestone(milestone_id, actor))?;
        Ok(())
    }

    /// Approve every submitted milestone past its project's auto-approve
    /// window, attributing the approval to the system.
    ///
    /// Failures on individual milestones are logged and skipped; one
    /// stuck milestone must not starve the rest of the scan.
    pub fn auto_approve_due(&self, now: DateTime<Utc>) -> Vec<MilestoneId> {
        let due = self
            .ledger
            .read(|view| view.milestones_due_for_auto_approval(now));
        let mut approved = Vec::new();
        for milestone_id in due {
            match self.approve(milestone_id, Actor::System) {
                Ok(_) => {
                    tracing::info!(milestone = %milestone_id, "auto-approved past client window");
                    approved.push(milestone_id);
                }
                Err(err) => {
                    tracing::warn!(milestone = %milestone_id, error = %err, "auto-approval skipped");
                }
            }
        }
        approved
    }

    /// Convenience read used by surfaces above the controller.
    pub fn ledger(&self) -> &LedgerStore {
        &self.ledger
    }
}
