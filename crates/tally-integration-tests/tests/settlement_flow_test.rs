//! End-to-end settlement scenarios: fund → submit → approve → settle,
//! concurrent approval races, dispute splits, and dead-letter handling
//! with the full engine running.

use std::sync::Arc;
use std::time::Duration;

use tally_core::{Actor, Amount, CurrencyCode, MilestoneId, ProjectId, UserId};
use tally_ledger::{
    Deliverable, DisputeStatus, LedgerStore, MilestoneDraft, MilestoneStatus, SettlementKey,
    TransactionType, TxStatus,
};
use tally_queue::JobStatus;
use tally_settlement::{
    EngineConfig, InstantRail, NotificationSink, PaymentRail, RecordingSink, ScriptedRail,
    SettlementEngine, JOB_MILESTONE_RELEASE, PAYMENT_QUEUE,
};

fn usd() -> CurrencyCode {
    CurrencyCode::new("USD").unwrap()
}

struct Platform {
    ledger: LedgerStore,
    engine: Arc<SettlementEngine>,
    sink: Arc<RecordingSink>,
    client: UserId,
    freelancer: UserId,
    project: ProjectId,
    milestones: Vec<MilestoneId>,
}

/// A running engine with one funded project.
fn platform(rail: Arc<dyn PaymentRail>, amounts: &[i64]) -> Platform {
    let ledger = LedgerStore::new();
    let sink = Arc::new(RecordingSink::new());
    let engine = SettlementEngine::start(
        ledger.clone(),
        rail,
        Arc::clone(&sink) as Arc<dyn NotificationSink>,
        EngineConfig {
            outbox_interval: Duration::from_millis(10),
            ..Default::default()
        },
    )
    .unwrap();

    let client = UserId::new();
    let freelancer = UserId::new();
    let budget: i64 = amounts.iter().sum();
    let project = ledger
        .transact(|unit| {
            unit.open_wallet(client, usd())?;
            unit.open_wallet(freelancer, usd())?;
            unit.deposit(client, Amount::from_minor(budget), None)?;
            let project = unit.create_project(
                client,
                freelancer,
                usd(),
                Amount::from_minor(budget),
                14,
                amounts
                    .iter()
                    .enumerate()
                    .map(|(i, amount)| MilestoneDraft {
                        title: format!("Milestone {}", i + 1),
                        amount: Amount::from_minor(*amount),
                        deadline: None,
                        acceptance_criteria: "Reviewed and accepted".to_string(),
                    })
                    .collect(),
                Actor::Client(client),
            )?;
            unit.fund_project(project)?;
            Ok(project)
        })
        .unwrap();
    let milestones = ledger.read(|view| view.project(project).unwrap().milestones);

    Platform {
        ledger,
        engine,
        sink,
        client,
        freelancer,
        project,
        milestones,
    }
}

fn submit(p: &Platform, milestone: MilestoneId) {
    p.engine
        .milestones()
        .submit(
            milestone,
            vec![Deliverable::new("Delivered work", None)],
            None,
            Actor::Freelancer(p.freelancer),
        )
        .unwrap();
}

async fn drain(p: &Platform) {
    for _ in 0..600 {
        if p.engine.open_jobs() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("engine queues did not drain");
}

/// Scenario: a 10000-unit milestone approved by the client produces
/// exactly one eventually-COMPLETED MILESTONE_RELEASE of 10000 and an
/// APPROVED milestone.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn approved_milestone_settles_exactly_once() {
    let p = platform(Arc::new(InstantRail::new()), &[10_000]);
    let milestone = p.milestones[0];

    submit(&p, milestone);
    p.engine
        .milestones()
        .approve(milestone, Actor::Client(p.client))
        .unwrap();
    drain(&p).await;

    p.ledger.read(|view| {
        assert_eq!(
            view.milestone(milestone).unwrap().status,
            MilestoneStatus::Approved
        );
        let releases: Vec<_> = view
            .project_transactions(p.project)
            .into_iter()
            .filter(|t| t.tx_type == TransactionType::MilestoneRelease)
            .collect();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].amount, Amount::from_minor(10_000));
        assert_eq!(releases[0].status, TxStatus::Completed);

        // 10% platform fee on the freelancer side.
        assert_eq!(
            view.wallet(p.freelancer).unwrap().balance,
            Amount::from_minor(9_000)
        );
        assert_eq!(view.available_escrow(p.project).unwrap(), Amount::ZERO);
    });
    p.engine.shutdown().await;
}

/// Scenario: two concurrent approve calls on one SUBMITTED milestone —
/// exactly one succeeds, the other is rejected, and only one settlement
/// job ever exists.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_approves_settle_once() {
    let p = platform(Arc::new(InstantRail::new()), &[10_000]);
    let milestone = p.milestones[0];
    submit(&p, milestone);

    let first = {
        let engine = Arc::clone(&p.engine);
        let client = p.client;
        tokio::spawn(async move { engine.milestones().approve(milestone, Actor::Client(client)) })
    };
    let second = {
        let engine = Arc::clone(&p.engine);
        let client = p.client;
        tokio::spawn(async move { engine.milestones().approve(milestone, Actor::Client(client)) })
    };
    let outcomes = [first.await.unwrap(), second.await.unwrap()];
    let succeeded = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(succeeded, 1, "exactly one approve must win");

    drain(&p).await;

    let release_jobs = p
        .engine
        .queue()
        .queue_jobs(PAYMENT_QUEUE)
        .into_iter()
        .filter(|j| j.job_type == JOB_MILESTONE_RELEASE)
        .count();
    assert_eq!(release_jobs, 1, "the loser must not enqueue a duplicate");

    p.ledger.read(|view| {
        assert_eq!(
            view.wallet(p.freelancer).unwrap().balance,
            Amount::from_minor(9_000)
        );
    });
    p.engine.shutdown().await;
}

/// Scenario: a dispute over a 10000-unit milestone resolved 6000/4000
/// produces two transactions totaling 10000 and a RESOLVED dispute.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn dispute_split_settles_both_legs() {
    let p = platform(Arc::new(InstantRail::new()), &[10_000]);
    let milestone = p.milestones[0];
    submit(&p, milestone);

    let dispute = p
        .engine
        .disputes()
        .open(
            milestone,
            p.client,
            "Deliverable does not meet the acceptance criteria".to_string(),
            vec![],
            Actor::Client(p.client),
        )
        .unwrap();
    // Let triage route the dispute.
    drain(&p).await;

    let status = p.ledger.read(|view| view.dispute(dispute).unwrap().status);
    assert!(matches!(
        status,
        DisputeStatus::InMediation | DisputeStatus::InArbitration
    ));

    p.engine
        .disputes()
        .resolve(
            dispute,
            Amount::from_minor(6_000),
            Amount::from_minor(4_000),
            Actor::System,
        )
        .unwrap();
    drain(&p).await;

    p.ledger.read(|view| {
        assert_eq!(
            view.dispute(dispute).unwrap().status,
            DisputeStatus::Resolved
        );
        let settled: Vec<_> = view
            .project_transactions(p.project)
            .into_iter()
            .filter(|t| {
                matches!(
                    t.tx_type,
                    TransactionType::DisputePayment | TransactionType::DisputeRefund
                )
            })
            .collect();
        assert_eq!(settled.len(), 2);
        assert!(settled.iter().all(|t| t.status == TxStatus::Completed));
        let total: i64 = settled.iter().map(|t| t.amount.minor()).sum();
        assert_eq!(total, 10_000);

        // Client got 4000 back; freelancer got 6000 minus the 10% fee.
        let client = view.wallet(p.client).unwrap();
        assert_eq!(client.balance, Amount::from_minor(4_000));
        assert_eq!(client.locked_balance, Amount::ZERO);
        assert_eq!(
            view.wallet(p.freelancer).unwrap().balance,
            Amount::from_minor(5_400)
        );
        assert_eq!(view.available_escrow(p.project).unwrap(), Amount::ZERO);
    });
    p.engine.shutdown().await;
}

/// Scenario: the payment rail fails every attempt. The job exhausts its
/// budget and dead-letters, the milestone stays APPROVED, the
/// transaction stays FAILED, and no wallet moved. An operator then
/// remediates with a manual adjustment.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn exhausted_settlement_dead_letters_without_wallet_mutation() {
    let p = platform(Arc::new(ScriptedRail::fail_times(100)), &[10_000]);
    let milestone = p.milestones[0];
    submit(&p, milestone);
    p.engine
        .milestones()
        .approve(milestone, Actor::Client(p.client))
        .unwrap();

    // Wait for the three attempts to exhaust.
    let mut dead = Vec::new();
    for _ in 0..600 {
        dead = p.engine.queue().dead_lettered();
        if !dead.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(dead.len(), 1, "settlement job must dead-letter");
    assert_eq!(dead[0].status, JobStatus::DeadLettered);
    assert_eq!(dead[0].attempts, 3);

    p.ledger.read(|view| {
        assert_eq!(
            view.milestone(milestone).unwrap().status,
            MilestoneStatus::Approved,
            "a failed settlement must not silently revert the approval"
        );
        let key = SettlementKey::Milestone {
            milestone_id: milestone,
            tx_type: TransactionType::MilestoneRelease,
        };
        assert_eq!(view.settlement(key).unwrap().status, TxStatus::Failed);
        assert_eq!(view.wallet(p.freelancer).unwrap().balance, Amount::ZERO);
        assert_eq!(
            view.wallet(p.client).unwrap().locked_balance,
            Amount::from_minor(10_000)
        );
    });

    // Operator remediation: pay the freelancer manually.
    p.ledger
        .transact(|unit| {
            unit.admin_adjust(
                p.project,
                Some(milestone),
                p.freelancer,
                Amount::from_minor(10_000),
                "manual payout after rail outage".to_string(),
                Actor::Admin(UserId::new()),
            )
        })
        .unwrap();
    p.ledger.read(|view| {
        assert_eq!(
            view.wallet(p.freelancer).unwrap().balance,
            Amount::from_minor(10_000)
        );
        assert_eq!(view.available_escrow(p.project).unwrap(), Amount::ZERO);
    });
    p.engine.shutdown().await;
}

/// The revision loop moves no money, and the outbox fan-out reports the
/// whole journey once the milestone finally settles.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn revision_loop_then_settlement_notifies() {
    let p = platform(Arc::new(InstantRail::new()), &[10_000, 5_000]);
    let milestone = p.milestones[0];

    p.engine
        .milestones()
        .start(milestone, Actor::Freelancer(p.freelancer))
        .unwrap();
    submit(&p, milestone);
    p.engine
        .milestones()
        .request_revision(
            milestone,
            "Edge cases missing".to_string(),
            Actor::Client(p.client),
        )
        .unwrap();
    p.engine
        .milestones()
        .resume(milestone, Actor::Freelancer(p.freelancer))
        .unwrap();
    p.ledger.read(|view| {
        assert_eq!(view.wallet(p.freelancer).unwrap().balance, Amount::ZERO);
        assert_eq!(
            view.available_escrow(p.project).unwrap(),
            Amount::from_minor(15_000)
        );
    });

    submit(&p, milestone);
    p.engine
        .milestones()
        .approve(milestone, Actor::Client(p.client))
        .unwrap();
    drain(&p).await;

    // Give the outbox dispatcher a few ticks to flush.
    for _ in 0..100 {
        if !p.sink.events_of("settlement.completed").is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert!(!p.sink.events_of("milestone.submitted").is_empty());
    assert!(!p.sink.events_of("milestone.revision_requested").is_empty());
    assert!(!p.sink.events_of("milestone.approved").is_empty());
    assert!(!p.sink.events_of("settlement.completed").is_empty());

    // Only the approved milestone settled.
    p.ledger.read(|view| {
        assert_eq!(
            view.available_escrow(p.project).unwrap(),
            Amount::from_minor(5_000)
        );
    });
    p.engine.shutdown().await;
}
