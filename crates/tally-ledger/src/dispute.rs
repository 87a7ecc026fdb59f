//! # Dispute Lifecycle
//!
//! Disputes move through the state machine:
//!
//! ```text
//! PENDING_REVIEW ──apply_triage()──▶ IN_MEDIATION ──────resolve()──▶ RESOLVED
//!                        │                │                              ▲
//!                        │            escalate()                        │
//!                        │                │                             │
//!                        ▼                ▼                             │
//!                  IN_ARBITRATION ──▶ ESCALATED ──assign()──resolve()───┘
//!                        │
//!                        └──resolve()──▶ RESOLVED
//! ```
//!
//! A dispute is created against a SUBMITTED or APPROVED milestone and
//! starts in PENDING_REVIEW under automated triage. Triage routes it to
//! mediation, or to arbitration when confidence is low or the amount is
//! high. ESCALATED disputes need a human mediator or arbitrator assigned
//! before they can be resolved.
//!
//! The resolution split must sum to the disputed milestone's amount; the
//! store validates that before the entity transition, inside the same
//! atomic unit.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{Actor, Amount, DisputeId, MilestoneId, ProjectId, UserId};

use crate::error::LedgerError;

// ── Status ─────────────────────────────────────────────────────────────

/// The lifecycle state of a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DisputeStatus {
    /// Awaiting automated triage.
    PendingReview,
    /// In mediation.
    InMediation,
    /// In arbitration (low triage confidence or high value).
    InArbitration,
    /// Resolved with a final split. Terminal.
    Resolved,
    /// Escalated past automated handling; needs a human assignment.
    Escalated,
}

impl DisputeStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingReview => "PENDING_REVIEW",
            Self::InMediation => "IN_MEDIATION",
            Self::InArbitration => "IN_ARBITRATION",
            Self::Resolved => "RESOLVED",
            Self::Escalated => "ESCALATED",
        }
    }

    /// Whether no further transitions are allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved)
    }

    /// Valid target states from this state.
    pub fn valid_transitions(&self) -> &'static [DisputeStatus] {
        match self {
            Self::PendingReview => &[Self::InMediation, Self::InArbitration],
            Self::InMediation => &[Self::Resolved, Self::Escalated],
            Self::InArbitration => &[Self::Resolved, Self::Escalated],
            Self::Escalated => &[Self::Resolved],
            Self::Resolved => &[],
        }
    }
}

impl std::fmt::Display for DisputeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Resolution Phase ───────────────────────────────────────────────────

/// The resolution machinery currently handling the dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResolutionPhase {
    /// Automated triage of the filing.
    AutoReview,
    /// Mediated negotiation.
    Mediation,
    /// Binding arbitration.
    Arbitration,
    /// Escalated to a human decision-maker.
    Escalation,
}

impl ResolutionPhase {
    /// The canonical string name of this phase.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AutoReview => "AUTO_REVIEW",
            Self::Mediation => "MEDIATION",
            Self::Arbitration => "ARBITRATION",
            Self::Escalation => "ESCALATION",
        }
    }
}

impl std::fmt::Display for ResolutionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Triage ─────────────────────────────────────────────────────────────

/// Structured result of automated dispute triage.
///
/// Stored as a typed, versioned struct so downstream consumers can evolve
/// the shape without re-parsing loose JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriageReport {
    /// Schema version for forward compatibility.
    pub schema_version: u8,
    /// Confidence in the recommendation, in `[0.0, 1.0]`.
    pub confidence: f64,
    /// Key issues identified in the filing.
    pub key_issues: Vec<String>,
    /// Recommended amount to the freelancer (minor units).
    pub recommended_to_freelancer: Amount,
    /// Recommended amount to the client (minor units).
    pub recommended_to_client: Amount,
    /// Why the recommendation was made.
    pub reasoning: String,
    /// When the triage ran (UTC).
    pub generated_at: DateTime<Utc>,
}

/// Current triage schema version.
pub const TRIAGE_SCHEMA_VERSION: u8 = 1;

// ── Resolution ─────────────────────────────────────────────────────────

/// The direction of a dispute decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResolutionDecision {
    /// Full amount to the freelancer.
    InFavorOfFreelancer,
    /// Full amount back to the client.
    InFavorOfClient,
    /// Amount split between the parties.
    Split,
}

impl ResolutionDecision {
    /// Classify a split into a decision direction.
    pub fn from_split(to_freelancer: Amount, to_client: Amount) -> Self {
        if to_client.is_zero() {
            Self::InFavorOfFreelancer
        } else if to_freelancer.is_zero() {
            Self::InFavorOfClient
        } else {
            Self::Split
        }
    }
}

/// A final dispute resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    /// Schema version for forward compatibility.
    pub schema_version: u8,
    /// Direction of the decision.
    pub decision: ResolutionDecision,
    /// Amount to the freelancer (minor units).
    pub amount_to_freelancer: Amount,
    /// Amount back to the client (minor units).
    pub amount_to_client: Amount,
    /// Who decided.
    pub decided_by: Actor,
    /// When (UTC).
    pub decided_at: DateTime<Utc>,
}

/// Current resolution schema version.
pub const RESOLUTION_SCHEMA_VERSION: u8 = 1;

// ── Supporting Records ─────────────────────────────────────────────────

/// A piece of evidence referenced by a dispute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceRef {
    /// What the evidence shows.
    pub description: String,
    /// Where it is stored, if externally.
    pub url: Option<String>,
    /// Who submitted it.
    pub submitted_by: UserId,
    /// When (UTC).
    pub submitted_at: DateTime<Utc>,
}

/// One message in the dispute's append-only discussion log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeMessage {
    /// Who wrote it.
    pub author: Actor,
    /// The message body.
    pub body: String,
    /// When (UTC).
    pub posted_at: DateTime<Utc>,
}

/// The role a human assignee plays in a dispute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DisputeRole {
    /// Facilitates a negotiated outcome.
    Mediator,
    /// Renders a binding decision.
    Arbitrator,
}

/// A record of a single dispute state transition, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisputeTransition {
    /// State before the transition.
    pub from_status: DisputeStatus,
    /// State after the transition.
    pub to_status: DisputeStatus,
    /// Who performed it.
    pub actor: Actor,
    /// When (UTC).
    pub at: DateTime<Utc>,
}

// ── Dispute ────────────────────────────────────────────────────────────

/// A dispute raised against a milestone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dispute {
    /// Unique dispute identifier.
    pub id: DisputeId,
    /// The project the milestone belongs to.
    pub project_id: ProjectId,
    /// The disputed milestone.
    pub milestone_id: MilestoneId,
    /// The party that raised the dispute.
    pub raised_by: UserId,
    /// Why it was raised.
    pub reason: String,
    /// Evidence submitted by either party.
    pub evidence: Vec<EvidenceRef>,
    /// Current lifecycle state.
    pub status: DisputeStatus,
    /// Current resolution machinery.
    pub phase: ResolutionPhase,
    /// Automated triage result, once produced.
    pub triage: Option<TriageReport>,
    /// Assigned human mediator, if any.
    pub mediator: Option<UserId>,
    /// Assigned human arbitrator, if any.
    pub arbitrator: Option<UserId>,
    /// Final resolution, once decided.
    pub resolution: Option<Resolution>,
    /// Append-only discussion log.
    pub messages: Vec<DisputeMessage>,
    /// Whether the filing fee has been collected.
    pub dispute_fee_paid: bool,
    /// When the dispute was opened (UTC).
    pub opened_at: DateTime<Utc>,
    /// When it last changed (UTC).
    pub updated_at: DateTime<Utc>,
    /// Complete transition history.
    pub transitions: Vec<DisputeTransition>,
}

impl Dispute {
    /// Open a new dispute in PENDING_REVIEW under automated triage.
    pub fn open(
        project_id: ProjectId,
        milestone_id: MilestoneId,
        raised_by: UserId,
        reason: String,
        evidence: Vec<EvidenceRef>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: DisputeId::new(),
            project_id,
            milestone_id,
            raised_by,
            reason,
            evidence,
            status: DisputeStatus::PendingReview,
            phase: ResolutionPhase::AutoReview,
            triage: None,
            mediator: None,
            arbitrator: None,
            resolution: None,
            messages: Vec::new(),
            dispute_fee_paid: false,
            opened_at: now,
            updated_at: now,
            transitions: Vec::new(),
        }
    }

    /// Record the triage result and route to mediation or arbitration.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless the dispute is
    /// PENDING_REVIEW and `routed_to` is IN_MEDIATION or IN_ARBITRATION.
    pub fn apply_triage(
        &mut self,
        report: TriageReport,
        routed_to: DisputeStatus,
    ) -> Result<(), LedgerError> {
        self.require_status(&[DisputeStatus::PendingReview], routed_to)?;
        let phase = match routed_to {
            DisputeStatus::InMediation => ResolutionPhase::Mediation,
            DisputeStatus::InArbitration => ResolutionPhase::Arbitration,
            other => {
                return Err(LedgerError::InvalidTransition {
                    entity: "dispute",
                    from: self.status.as_str().to_string(),
                    to: other.as_str().to_string(),
                    reason: "triage may only route to mediation or arbitration".to_string(),
                });
            }
        };
        self.triage = Some(report);
        self.phase = phase;
        self.transition_to(routed_to, Actor::System);
        Ok(())
    }

    /// Attach the final resolution. The store has already validated the
    /// split against the milestone amount.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless the dispute is
    /// IN_MEDIATION, IN_ARBITRATION, or ESCALATED, and, when ESCALATED,
    /// a human mediator or arbitrator has been assigned.
    pub fn resolve(&mut self, resolution: Resolution) -> Result<(), LedgerError> {
        self.require_status(
            &[
                DisputeStatus::InMediation,
                DisputeStatus::InArbitration,
                DisputeStatus::Escalated,
            ],
            DisputeStatus::Resolved,
        )?;
        if self.status == DisputeStatus::Escalated
            && self.mediator.is_none()
            && self.arbitrator.is_none()
        {
            return Err(LedgerError::InvalidTransition {
                entity: "dispute",
                from: self.status.as_str().to_string(),
                to: DisputeStatus::Resolved.as_str().to_string(),
                reason: "an escalated dispute needs an assigned mediator or arbitrator"
                    .to_string(),
            });
        }
        let actor = resolution.decided_by;
        self.resolution = Some(resolution);
        self.transition_to(DisputeStatus::Resolved, actor);
        Ok(())
    }

    /// Escalate the dispute past automated handling.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless IN_MEDIATION or
    /// IN_ARBITRATION.
    pub fn escalate(&mut self, actor: Actor) -> Result<(), LedgerError> {
        self.require_status(
            &[DisputeStatus::InMediation, DisputeStatus::InArbitration],
            DisputeStatus::Escalated,
        )?;
        self.phase = ResolutionPhase::Escalation;
        self.transition_to(DisputeStatus::Escalated, actor);
        Ok(())
    }

    /// Assign a human mediator or arbitrator.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TerminalState`] if the dispute is resolved.
    pub fn assign(&mut self, user: UserId, role: DisputeRole) -> Result<(), LedgerError> {
        if self.status.is_terminal() {
            return Err(LedgerError::TerminalState {
                entity: "dispute",
                id: self.id.to_string(),
                state: self.status.as_str().to_string(),
            });
        }
        match role {
            DisputeRole::Mediator => self.mediator = Some(user),
            DisputeRole::Arbitrator => self.arbitrator = Some(user),
        }
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append a message to the discussion log.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TerminalState`] if the dispute is resolved.
    pub fn post_message(&mut self, author: Actor, body: String) -> Result<(), LedgerError> {
        if self.status.is_terminal() {
            return Err(LedgerError::TerminalState {
                entity: "dispute",
                id: self.id.to_string(),
                state: self.status.as_str().to_string(),
            });
        }
        self.messages.push(DisputeMessage {
            author,
            body,
            posted_at: Utc::now(),
        });
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append evidence to the dispute.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::TerminalState`] if the dispute is resolved.
    pub fn add_evidence(&mut self, evidence: EvidenceRef) -> Result<(), LedgerError> {
        if self.status.is_terminal() {
            return Err(LedgerError::TerminalState {
                entity: "dispute",
                id: self.id.to_string(),
                state: self.status.as_str().to_string(),
            });
        }
        self.evidence.push(evidence);
        self.updated_at = Utc::now();
        Ok(())
    }

    fn require_status(
        &self,
        allowed: &[DisputeStatus],
        target: DisputeStatus,
    ) -> Result<(), LedgerError> {
        if self.status.is_terminal() {
            return Err(LedgerError::TerminalState {
                entity: "dispute",
                id: self.id.to_string(),
                state: self.status.as_str().to_string(),
            });
        }
        if !allowed.contains(&self.status) {
            return Err(LedgerError::InvalidTransition {
                entity: "dispute",
                from: self.status.as_str().to_string(),
                to: target.as_str().to_string(),
                reason: format!(
                    "expected one of {:?}, got {}",
                    allowed.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
                    self.status
                ),
            });
        }
        Ok(())
    }

    fn transition_to(&mut self, to: DisputeStatus, actor: Actor) {
        self.transitions.push(DisputeTransition {
            from_status: self.status,
            to_status: to,
            actor,
            at: Utc::now(),
        });
        self.status = to;
        self.updated_at = Utc::now();
    }
}
