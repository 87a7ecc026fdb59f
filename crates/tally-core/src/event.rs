//! # Domain Events
//!
//! Events appended to the ledger outbox in the same atomic unit as the
//! state change that produced them, then delivered to the notification
//! fan-out by a separate dispatcher. Delivery reliability is therefore
//! decoupled from ledger correctness: a notification failure can never
//! roll back a settlement.

use serde::{Deserialize, Serialize};

use crate::actor::Actor;
use crate::id::{DisputeId, MilestoneId, ProjectId, TransactionId, UserId};
use crate::money::Amount;

/// A domain event produced by a state-changing ledger operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum DomainEvent {
    /// A project was created with its milestone plan.
    ProjectCreated {
        project_id: ProjectId,
        budget: Amount,
    },
    /// The client funded the project budget into escrow.
    ProjectFunded {
        project_id: ProjectId,
        amount: Amount,
    },
    /// A freelancer submitted a milestone for review.
    MilestoneSubmitted {
        project_id: ProjectId,
        milestone_id: MilestoneId,
    },
    /// The client (or the system, past the auto-approve window) approved
    /// a submitted milestone.
    MilestoneApproved {
        project_id: ProjectId,
        milestone_id: MilestoneId,
        actor: Actor,
    },
    /// The client requested another revision round.
    RevisionRequested {
        project_id: ProjectId,
        milestone_id: MilestoneId,
    },
    /// A dispute was opened against a milestone.
    DisputeOpened {
        project_id: ProjectId,
        milestone_id: MilestoneId,
        dispute_id: DisputeId,
        raised_by: UserId,
    },
    /// A dispute moved to a new resolution phase.
    DisputePhaseChanged {
        dispute_id: DisputeId,
        phase: String,
    },
    /// A dispute was escalated past automated handling.
    DisputeEscalated {
        dispute_id: DisputeId,
        reason: String,
    },
    /// A dispute was resolved with a final split.
    DisputeResolved {
        dispute_id: DisputeId,
        amount_to_freelancer: Amount,
        amount_to_client: Amount,
        decided_by: Actor,
    },
    /// An escrow settlement completed and funds moved.
    SettlementCompleted {
        project_id: ProjectId,
        transaction_id: TransactionId,
        amount: Amount,
    },
    /// An escrow settlement attempt failed; the transaction stays open
    /// for retry or manual adjustment.
    SettlementFailed {
        project_id: ProjectId,
        transaction_id: TransactionId,
        error: String,
    },
}

impl DomainEvent {
    /// The canonical string name of the event type.
    pub fn event_type(&self) -> &'static str {
        match self {
            Self::ProjectCreated { .. } => "project.created",
            Self::ProjectFunded { .. } => "project.funded",
            Self::MilestoneSubmitted { .. } => "milestone.submitted",
            Self::MilestoneApproved { .. } => "milestone.approved",
            Self::RevisionRequested { .. } => "milestone.revision_requested",
            Self::DisputeOpened { .. } => "dispute.opened",
            Self::DisputePhaseChanged { .. } => "dispute.phase_changed",
            Self::DisputeEscalated { .. } => "dispute.escalated",
            Self::DisputeResolved { .. } => "dispute.resolved",
            Self::SettlementCompleted { .. } => "settlement.completed",
            Self::SettlementFailed { .. } => "settlement.failed",
        }
    }
}

impl std::fmt::Display for DomainEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.event_type())
    }
}
