//! # Projects
//!
//! A project binds a client, a freelancer, a budget, and a milestone
//! plan. The budget is fixed at creation and must equal the sum of the
//! milestone amounts; the store enforces this before any row is written.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{Amount, CurrencyCode, MilestoneId, ProjectId, UserId};

/// Default number of days after submission before a milestone
/// auto-approves absent client action.
pub const DEFAULT_AUTO_APPROVE_DAYS: u32 = 14;

/// A contracting project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Project {
    /// Unique project identifier.
    pub id: ProjectId,
    /// The client who funds the budget.
    pub client: UserId,
    /// The freelancer delivering the milestones.
    pub freelancer: UserId,
    /// Project currency; all milestones settle in it.
    pub currency: CurrencyCode,
    /// Total budget in minor units. Equals the milestone sum at creation.
    pub budget: Amount,
    /// Days after submission before a milestone auto-approves.
    pub auto_approve_days: u32,
    /// Whether the client has funded the budget into escrow.
    pub funded: bool,
    /// The project's milestones, in plan order.
    pub milestones: Vec<MilestoneId>,
    /// When the project was created (UTC).
    pub created_at: DateTime<Utc>,
}

impl Project {
    /// Create a new, unfunded project.
    pub fn new(
        client: UserId,
        freelancer: UserId,
        currency: CurrencyCode,
        budget: Amount,
        auto_approve_days: u32,
    ) -> Self {
        Self {
            id: ProjectId::new(),
            client,
            freelancer,
            currency,
            budget,
            auto_approve_days,
            funded: false,
            milestones: Vec::new(),
            created_at: Utc::now(),
        }
    }

    /// The auto-approve deadline for a milestone submitted at `submitted_at`.
    pub fn auto_approve_deadline(&self, submitted_at: DateTime<Utc>) -> DateTime<Utc> {
        submitted_at + chrono::Duration::days(i64::from(self.auto_approve_days))
    }
}
