//! # Queues, Job Types, and Payloads
//!
//! The wire contract between controllers (producers) and workers
//! (consumers). Payloads travel as JSON through the queue and are
//! validated back into these structs at the worker boundary; a payload
//! that fails validation is a fatal job error, not a retry.

use serde::{Deserialize, Serialize};

use tally_core::{Amount, DisputeId, MilestoneId, ProjectId, UserId};

// ── Queue Names ────────────────────────────────────────────────────────

/// Money-moving settlement jobs. Concurrency kept low to bound the blast
/// radius of a ledger bug.
pub const PAYMENT_QUEUE: &str = "payments";
/// Dispute triage. Lowest concurrency of all.
pub const DISPUTE_QUEUE: &str = "disputes";
/// Notification fan-out.
pub const EMAIL_QUEUE: &str = "email";

// ── Job Types ──────────────────────────────────────────────────────────

/// Release an approved milestone's escrow to the freelancer.
pub const JOB_MILESTONE_RELEASE: &str = "settlement.release.v1";
/// Pay the freelancer's share of a dispute resolution.
pub const JOB_DISPUTE_PAYMENT: &str = "settlement.dispute_payment.v1";
/// Refund the client's share of a dispute resolution.
pub const JOB_DISPUTE_REFUND: &str = "settlement.dispute_refund.v1";
/// Run automated triage over a newly opened dispute.
pub const JOB_DISPUTE_TRIAGE: &str = "dispute.triage.v1";
/// Fan a dispute's current phase out to the parties.
pub const JOB_NOTIFY_PARTIES: &str = "dispute.notify.v1";

// ── Payloads ───────────────────────────────────────────────────────────

/// Payload of a [`JOB_MILESTONE_RELEASE`] job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleasePayload {
    /// The project whose escrow releases.
    pub project_id: ProjectId,
    /// The approved milestone.
    pub milestone_id: MilestoneId,
    /// The client whose escrow commitment pays.
    pub from_user: UserId,
    /// The freelancer receiving the release.
    pub to_user: UserId,
    /// Amount in minor units.
    pub amount: Amount,
}

/// Which side of a dispute resolution a settlement job pays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeLeg {
    /// Escrow to the freelancer.
    Payment,
    /// Escrow back to the client.
    Refund,
}

/// Payload of a [`JOB_DISPUTE_PAYMENT`] or [`JOB_DISPUTE_REFUND`] job.
///
/// The two legs of one resolution are independent jobs, each keyed by
/// `(dispute, recipient, type)`, so they may complete in either order or
/// retry independently.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeLegPayload {
    /// The resolved dispute.
    pub dispute_id: DisputeId,
    /// The project whose escrow settles.
    pub project_id: ProjectId,
    /// The disputed milestone.
    pub milestone_id: MilestoneId,
    /// Who this leg pays.
    pub recipient: UserId,
    /// Amount in minor units.
    pub amount: Amount,
    /// Which side of the split this leg is.
    pub leg: DisputeLeg,
}

/// Payload of a [`JOB_DISPUTE_TRIAGE`] job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriagePayload {
    /// The dispute awaiting triage.
    pub dispute_id: DisputeId,
}

/// Payload of a [`JOB_NOTIFY_PARTIES`] job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotifyPayload {
    /// The dispute whose phase is being announced.
    pub dispute_id: DisputeId,
}
