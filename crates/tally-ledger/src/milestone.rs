//! # Milestone Lifecycle
//!
//! Milestones move through the state machine:
//!
//! ```text
//! PENDING ──start()──▶ IN_PROGRESS ──submit()──▶ SUBMITTED
//!    │                      ▲                        │
//!    └──────submit()────────┼────────────────────────┤
//!                           │                        ├─approve()──▶ APPROVED ─┐
//!            request_revision()                      │                        │
//!                           │                        │                 mark_disputed()
//!                           └── REVISION_REQUESTED ◀─┤                        │
//!                                                    └─mark_disputed()──▶ DISPUTED
//! ```
//!
//! APPROVED is terminal except for a dispute raised within the dispute
//! window; DISPUTED is terminal at the milestone level, and what happens to
//! the money afterwards belongs to the dispute, not the milestone.
//!
//! This module is a validated enum rather than typestate for the same
//! reasons the dispute lifecycle is: milestones are stored and served
//! over APIs where the state is only known at runtime, and every
//! transition is recorded in an append-only log.
//!
//! Approving a milestone is the one transition that moves money, and the
//! money movement does not happen here: the entity transition runs inside
//! a store atomic unit, and the lifecycle controller enqueues the
//! settlement job. See `tally-settlement`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{Actor, Amount, MilestoneId, ProjectId};

use crate::error::LedgerError;

/// Minimum milestone amount in minor units.
///
/// Rejecting dust-sized milestones keeps fee arithmetic meaningful and
/// blocks budget plans made of thousands of near-zero rows.
pub const MIN_MILESTONE_AMOUNT: Amount = Amount::from_minor(100);

// ── Status ─────────────────────────────────────────────────────────────

/// The lifecycle state of a milestone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MilestoneStatus {
    /// Created with the project; work has not started.
    Pending,
    /// The freelancer is working on it.
    InProgress,
    /// Submitted for client review.
    Submitted,
    /// Approved; settlement released (or in flight). Terminal except for
    /// disputes.
    Approved,
    /// The client asked for another revision round.
    RevisionRequested,
    /// Under dispute. Terminal at the milestone level.
    Disputed,
}

impl MilestoneStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::InProgress => "IN_PROGRESS",
            Self::Submitted => "SUBMITTED",
            Self::Approved => "APPROVED",
            Self::RevisionRequested => "REVISION_REQUESTED",
            Self::Disputed => "DISPUTED",
        }
    }

    /// Whether no further transitions are allowed from this state.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Disputed)
    }

    /// Valid target states from this state.
    pub fn valid_transitions(&self) -> &'static [MilestoneStatus] {
        match self {
            Self::Pending => &[Self::InProgress, Self::Submitted],
            Self::InProgress => &[Self::Submitted],
            Self::Submitted => &[Self::Approved, Self::RevisionRequested, Self::Disputed],
            Self::RevisionRequested => &[Self::InProgress],
            // A dispute may still be raised against an approved milestone.
            Self::Approved => &[Self::Disputed],
            Self::Disputed => &[],
        }
    }
}

impl std::fmt::Display for MilestoneStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Supporting Records ─────────────────────────────────────────────────

/// A deliverable attached to a submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deliverable {
    /// What was delivered.
    pub description: String,
    /// Where it lives (repository, document, archive), if anywhere.
    pub url: Option<String>,
    /// When it was submitted (UTC).
    pub submitted_at: DateTime<Utc>,
}

impl Deliverable {
    /// Create a deliverable stamped with the current time.
    pub fn new(description: impl Into<String>, url: Option<String>) -> Self {
        Self {
            description: description.into(),
            url,
            submitted_at: Utc::now(),
        }
    }
}

/// One entry in a milestone's revision history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevisionRequest {
    /// What the client asked to change.
    pub notes: String,
    /// Who asked.
    pub requested_by: Actor,
    /// When (UTC).
    pub requested_at: DateTime<Utc>,
}

/// A record of a single state transition, kept for audit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneTransition {
    /// State before the transition.
    pub from_status: MilestoneStatus,
    /// State after the transition.
    pub to_status: MilestoneStatus,
    /// Who performed it.
    pub actor: Actor,
    /// When (UTC).
    pub at: DateTime<Utc>,
}

/// Milestone fields supplied at project creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MilestoneDraft {
    /// Short title.
    pub title: String,
    /// Amount in minor units.
    pub amount: Amount,
    /// Work deadline, if agreed.
    pub deadline: Option<DateTime<Utc>>,
    /// What the client will accept as done.
    pub acceptance_criteria: String,
}

// ── Milestone ──────────────────────────────────────────────────────────

/// A priced, deadline-bound unit of deliverable work within a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Milestone {
    /// Unique milestone identifier.
    pub id: MilestoneId,
    /// The owning project. Exactly one.
    pub project_id: ProjectId,
    /// Short title.
    pub title: String,
    /// Amount in minor units.
    pub amount: Amount,
    /// Work deadline, if agreed.
    pub deadline: Option<DateTime<Utc>>,
    /// What the client will accept as done.
    pub acceptance_criteria: String,
    /// Current lifecycle state.
    pub status: MilestoneStatus,
    /// When last submitted for review (UTC).
    pub submitted_at: Option<DateTime<Utc>>,
    /// When approved (UTC).
    pub approved_at: Option<DateTime<Utc>>,
    /// Ordered log of revision rounds.
    pub revision_history: Vec<RevisionRequest>,
    /// Ordered list of everything delivered so far.
    pub deliverables: Vec<Deliverable>,
    /// Complete transition history.
    pub transitions: Vec<MilestoneTransition>,
    /// When the milestone was created (UTC).
    pub created_at: DateTime<Utc>,
    /// When the milestone last changed (UTC).
    pub updated_at: DateTime<Utc>,
}

impl Milestone {
    /// Create a milestone from a draft, in PENDING state.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] if the amount is below
    /// [`MIN_MILESTONE_AMOUNT`].
    pub fn from_draft(project_id: ProjectId, draft: MilestoneDraft) -> Result<Self, LedgerError> {
        if draft.amount < MIN_MILESTONE_AMOUNT {
            return Err(LedgerError::InvalidAmount(format!(
                "milestone amount {} is below the minimum {}",
                draft.amount, MIN_MILESTONE_AMOUNT
            )));
        }
        let now = Utc::now();
        Ok(Self {
            id: MilestoneId::new(),
            project_id,
            title: draft.title,
            amount: draft.amount,
            deadline: draft.deadline,
            acceptance_criteria: draft.acceptance_criteria,
            status: MilestoneStatus::Pending,
            submitted_at: None,
            approved_at: None,
            revision_history: Vec::new(),
            deliverables: Vec::new(),
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
        })
    }

    /// Transition PENDING → IN_PROGRESS: the freelancer starts work.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless PENDING.
    pub fn start(&mut self, actor: Actor) -> Result<(), LedgerError> {
        self.require_status(&[MilestoneStatus::Pending], MilestoneStatus::InProgress)?;
        self.transition_to(MilestoneStatus::InProgress, actor);
        Ok(())
    }

    /// Submit the milestone for client review.
    ///
    /// Valid from IN_PROGRESS, PENDING (a freelancer may deliver without
    /// an explicit start), or REVISION_REQUESTED via `start`. Requires at
    /// least one deliverable or non-empty notes; an empty submission has
    /// nothing for the client to review.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] from any other state or
    /// when both deliverables and notes are empty.
    pub fn submit(
        &mut self,
        deliverables: Vec<Deliverable>,
        notes: Option<String>,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        self.require_status(
            &[MilestoneStatus::Pending, MilestoneStatus::InProgress],
            MilestoneStatus::Submitted,
        )?;
        let has_notes = notes.as_deref().is_some_and(|n| !n.trim().is_empty());
        if deliverables.is_empty() && !has_notes {
            return Err(LedgerError::InvalidTransition {
                entity: "milestone",
                from: self.status.as_str().to_string(),
                to: MilestoneStatus::Submitted.as_str().to_string(),
                reason: "a submission requires deliverables or notes".to_string(),
            });
        }
        self.deliverables.extend(deliverables);
        if let Some(notes) = notes {
            if !notes.trim().is_empty() {
                self.deliverables.push(Deliverable {
                    description: notes,
                    url: None,
                    submitted_at: Utc::now(),
                });
            }
        }
        self.submitted_at = Some(Utc::now());
        self.transition_to(MilestoneStatus::Submitted, actor);
        Ok(())
    }

    /// Approve a SUBMITTED milestone.
    ///
    /// Moves no money itself; the controller enqueues the settlement job
    /// around this transition.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless SUBMITTED.
    pub fn approve(&mut self, actor: Actor) -> Result<(), LedgerError> {
        self.require_status(&[MilestoneStatus::Submitted], MilestoneStatus::Approved)?;
        self.approved_at = Some(Utc::now());
        self.transition_to(MilestoneStatus::Approved, actor);
        Ok(())
    }

    /// Request another revision round on a SUBMITTED milestone.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless SUBMITTED.
    pub fn request_revision(&mut self, notes: String, actor: Actor) -> Result<(), LedgerError> {
        self.require_status(
            &[MilestoneStatus::Submitted],
            MilestoneStatus::RevisionRequested,
        )?;
        self.revision_history.push(RevisionRequest {
            notes,
            requested_by: actor,
            requested_at: Utc::now(),
        });
        self.transition_to(MilestoneStatus::RevisionRequested, actor);
        Ok(())
    }

    /// Resume work after a revision request.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless REVISION_REQUESTED.
    pub fn resume(&mut self, actor: Actor) -> Result<(), LedgerError> {
        self.require_status(
            &[MilestoneStatus::RevisionRequested],
            MilestoneStatus::InProgress,
        )?;
        self.transition_to(MilestoneStatus::InProgress, actor);
        Ok(())
    }

    /// Mark the milestone DISPUTED.
    ///
    /// Valid from SUBMITTED or APPROVED. The dispute row itself is
    /// created by the store in the same atomic unit.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] from any other state.
    pub fn mark_disputed(&mut self, actor: Actor) -> Result<(), LedgerError> {
        self.require_status(
            &[MilestoneStatus::Submitted, MilestoneStatus::Approved],
            MilestoneStatus::Disputed,
        )?;
        self.transition_to(MilestoneStatus::Disputed, actor);
        Ok(())
    }

    /// Whether a SUBMITTED milestone has passed its auto-approve deadline.
    pub fn auto_approve_due(&self, deadline_days: u32, now: DateTime<Utc>) -> bool {
        if self.status != MilestoneStatus::Submitted {
            return false;
        }
        match self.submitted_at {
            Some(submitted) => now >= submitted + chrono::Duration::days(i64::from(deadline_days)),
            None => false,
        }
    }

    fn require_status(
        &self,
        allowed: &[MilestoneStatus],
        target: MilestoneStatus,
    ) -> Result<(), LedgerError> {
        if self.status.is_terminal() {
            return Err(LedgerError::TerminalState {
                entity: "milestone",
                id: self.id.to_string(),
                state: self.status.as_str().to_string(),
            });
        }
        if !allowed.contains(&self.status) {
            return Err(LedgerError::InvalidTransition {
                entity: "milestone",
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

    fn transition_to(&mut self, to: MilestoneStatus, actor: Actor) {
        self.transitions.push(MilestoneTransition {
            from_status: self.status,
            to_status: to,
            actor,
            at: Utc::now(),
        });
        self.status = to;
        self.updated_at = Utc::now();
    }
}
