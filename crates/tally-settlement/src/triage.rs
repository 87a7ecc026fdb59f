//! # Dispute Triage
//!
//! Automated first pass over a newly opened dispute: a deterministic
//! scoring of the filing context (deliverables, revision rounds,
//! evidence, who raised it) into a [`TriageReport`] with a recommended
//! split and a confidence score.
//!
//! Routing policy: low-confidence or high-value disputes go to
//! arbitration rather than mediation. Both thresholds live in
//! [`TriagePolicy`] so operators can tune them without code changes.

use chrono::Utc;

use tally_core::Amount;
use tally_ledger::{
    Dispute, Milestone, MilestoneStatus, Project, TriageReport, TRIAGE_SCHEMA_VERSION,
};

use tally_ledger::DisputeStatus;

// ── Policy ─────────────────────────────────────────────────────────────

/// Thresholds deciding where triage routes a dispute.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TriagePolicy {
    /// Below this confidence the dispute goes to arbitration.
    pub arbitration_confidence_floor: f64,
    /// At or above this disputed amount (minor units) the dispute goes
    /// to arbitration regardless of confidence.
    pub arbitration_amount_threshold: Amount,
}

impl Default for TriagePolicy {
    fn default() -> Self {
        Self {
            arbitration_confidence_floor: 0.65,
            arbitration_amount_threshold: Amount::from_minor(500_000),
        }
    }
}

impl TriagePolicy {
    /// Route a triaged dispute to mediation or arbitration.
    pub fn route(&self, report: &TriageReport, disputed_amount: Amount) -> DisputeStatus {
        if report.confidence < self.arbitration_confidence_floor
            || disputed_amount >= self.arbitration_amount_threshold
        {
            DisputeStatus::InArbitration
        } else {
            DisputeStatus::InMediation
        }
    }
}

// ── Engine ─────────────────────────────────────────────────────────────

/// Deterministic triage scoring.
#[derive(Debug, Clone, Copy, Default)]
pub struct TriageEngine;

impl TriageEngine {
    /// Create a triage engine.
    pub fn new() -> Self {
        Self
    }

    /// Analyze a dispute in its milestone and project context.
    ///
    /// The recommended split always sums exactly to the milestone
    /// amount: the freelancer share is computed in basis points and the
    /// client receives the remainder.
    pub fn analyze(
        &self,
        dispute: &Dispute,
        milestone: &Milestone,
        project: &Project,
    ) -> TriageReport {
        let mut key_issues = Vec::new();

        // Freelancer share in basis points, adjusted by filing signals.
        let mut share_bps: i64 = 5_000;
        let mut confidence: f64 = 0.35;

        if !milestone.deliverables.is_empty() {
            share_bps += 2_000;
            confidence += 0.15;
            key_issues.push(format!(
                "{} deliverable(s) on record",
                milestone.deliverables.len()
            ));
        } else {
            key_issues.push("no deliverables on record".to_string());
        }

        let revisions = milestone.revision_history.len() as i64;
        if revisions > 0 {
            share_bps -= (revisions * 750).min(2_250);
            confidence += 0.10;
            key_issues.push(format!("{revisions} revision round(s) requested"));
        }

        if dispute.raised_by == project.freelancer {
            // A freelancer raising the dispute is typically claiming
            // non-payment for submitted work.
            share_bps += 1_000;
            key_issues.push("raised by the freelancer".to_string());
        } else {
            key_issues.push("raised by the client".to_string());
        }

        if milestone
            .transitions
            .iter()
            .any(|t| t.to_status == MilestoneStatus::Approved)
        {
            share_bps += 1_000;
            key_issues.push("milestone was approved before the dispute".to_string());
        }

        confidence += 0.10 * (dispute.evidence.len().min(3) as f64);
        if dispute.evidence.is_empty() {
            key_issues.push("no evidence submitted".to_string());
        }

        let share_bps = share_bps.clamp(0, 10_000) as u32;
        let confidence = confidence.clamp(0.0, 0.95);

        let recommended_to_freelancer = milestone
            .amount
            .bps(share_bps)
            .unwrap_or(Amount::ZERO);
        let recommended_to_client = milestone
            .amount
            .checked_sub(recommended_to_freelancer)
            .unwrap_or(Amount::ZERO);

        TriageReport {
            schema_version: TRIAGE_SCHEMA_VERSION,
            confidence,
            key_issues,
            recommended_to_freelancer,
            recommended_to_client,
            reasoning: format!(
                "freelancer share {share_bps}bps from filing signals; \
                 confidence {confidence:.2} from evidence and history"
            ),
            generated_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tally_core::{Actor, CurrencyCode, UserId};
    use tally_ledger::{Deliverable, EvidenceRef, MilestoneDraft};

    fn fixture(
        deliver: bool,
        revisions: usize,
        evidence: usize,
        raised_by_freelancer: bool,
    ) -> (Dispute, Milestone, Project) {
        let client = UserId::new();
        let freelancer = UserId::new();
        let project = Project::new(
            client,
            freelancer,
            CurrencyCode::new("USD").unwrap(),
            Amount::from_minor(10_000),
            14,
        );
        let mut milestone = Milestone::from_draft(
            project.id,
            MilestoneDraft {
                title: "Build".to_string(),
                amount: Amount::from_minor(10_000),
                deadline: None,
                acceptance_criteria: "Works".to_string(),
            },
        )
        .unwrap();

        let deliverables = if deliver {
            vec![Deliverable::new("The work", None)]
        } else {
            vec![Deliverable::new("placeholder", None)]
        };
        milestone
            .submit(deliverables, None, Actor::Freelancer(freelancer))
            .unwrap();
        if !deliver {
            milestone.deliverables.clear();
        }
        for i in 0..revisions {
            milestone.revision_history.push(tally_ledger::RevisionRequest {
                notes: format!("round {i}"),
                requested_by: Actor::Client(client),
                requested_at: Utc::now(),
            });
        }

        let raiser = if raised_by_freelancer { freelancer } else { client };
        let evidence_refs = (0..evidence)
            .map(|i| EvidenceRef {
                description: format!("exhibit {i}"),
                url: None,
                submitted_by: raiser,
                submitted_at: Utc::now(),
            })
            .collect();
        let dispute = Dispute::open(
            project.id,
            milestone.id,
            raiser,
            "disagreement".to_string(),
            evidence_refs,
        );
        (dispute, milestone, project)
    }

    #[test]
    fn split_always_sums_to_milestone_amount() {
        for (deliver, revisions, evidence, by_freelancer) in [
            (true, 0, 0, false),
            (false, 3, 2, true),
            (true, 1, 3, true),
            (false, 0, 0, false),
        ] {
            let (dispute, milestone, project) =
                fixture(deliver, revisions, evidence, by_freelancer);
            let report = TriageEngine::new().analyze(&dispute, &milestone, &project);
            let total = report
                .recommended_to_freelancer
                .checked_add(report.recommended_to_client)
                .unwrap();
            assert_eq!(total, milestone.amount);
        }
    }

    #[test]
    fn deliverables_tilt_toward_freelancer() {
        let (dispute, milestone, project) = fixture(true, 0, 2, false);
        let with = TriageEngine::new().analyze(&dispute, &milestone, &project);
        let (dispute, milestone, project) = fixture(false, 0, 2, false);
        let without = TriageEngine::new().analyze(&dispute, &milestone, &project);
        assert!(with.recommended_to_freelancer > without.recommended_to_freelancer);
    }

    #[test]
    fn thin_filings_route_to_arbitration() {
        let (dispute, milestone, project) = fixture(false, 0, 0, false);
        let report = TriageEngine::new().analyze(&dispute, &milestone, &project);
        let policy = TriagePolicy::default();
        assert!(report.confidence < policy.arbitration_confidence_floor);
        assert_eq!(
            policy.route(&report, milestone.amount),
            DisputeStatus::InArbitration
        );
    }

    #[test]
    fn strong_filings_route_to_mediation() {
        let (dispute, milestone, project) = fixture(true, 1, 3, false);
        let report = TriageEngine::new().analyze(&dispute, &milestone, &project);
        let policy = TriagePolicy::default();
        assert!(report.confidence >= policy.arbitration_confidence_floor);
        assert_eq!(
            policy.route(&report, milestone.amount),
            DisputeStatus::InMediation
        );
    }

    #[test]
    fn high_value_disputes_route_to_arbitration_regardless() {
        let (dispute, milestone, project) = fixture(true, 1, 3, false);
        let report = TriageEngine::new().analyze(&dispute, &milestone, &project);
        let policy = TriagePolicy::default();
        assert_eq!(
            policy.route(&report, Amount::from_minor(500_000)),
            DisputeStatus::InArbitration
        );
    }

    #[test]
    fn confidence_is_bounded() {
        let (dispute, milestone, project) = fixture(true, 5, 10, true);
        let report = TriageEngine::new().analyze(&dispute, &milestone, &project);
        assert!(report.confidence <= 0.95);
        assert!(report.confidence >= 0.0);
    }
}
