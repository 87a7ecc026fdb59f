//! Ledger invariants under adversarial operation sequences: escrow
//! non-negativity, milestone-sum validation, and settlement idempotency
//! exercised directly against the store.

use proptest::prelude::*;

use tally_core::{Actor, Amount, CurrencyCode, DisputeId, UserId};
use tally_ledger::{
    LedgerStore, MilestoneDraft, SettlementKey, TransactionType,
};

fn usd() -> CurrencyCode {
    CurrencyCode::new("USD").unwrap()
}

fn drafts(amounts: &[i64]) -> Vec<MilestoneDraft> {
    amounts
        .iter()
        .enumerate()
        .map(|(i, amount)| MilestoneDraft {
            title: format!("Milestone {}", i + 1),
            amount: Amount::from_minor(*amount),
            deadline: None,
            acceptance_criteria: "Accepted".to_string(),
        })
        .collect()
}

/// One attempted settlement in a generated sequence.
#[derive(Debug, Clone)]
struct SettleAttempt {
    milestone_index: usize,
    amount: i64,
    to_freelancer: bool,
}

fn attempt_strategy() -> impl Strategy<Value = SettleAttempt> {
    (0usize..8, 1i64..15_000, any::<bool>()).prop_map(|(milestone_index, amount, to_freelancer)| {
        SettleAttempt {
            milestone_index,
            amount,
            to_freelancer,
        }
    })
}

proptest! {
    /// Whatever sequence of settlement attempts runs (over-sized,
    /// duplicated, interleaved between recipients), project escrow never
    /// goes negative and no wallet balance ever does.
    #[test]
    fn escrow_never_over_released(
        amounts in prop::collection::vec(100i64..10_000, 1..5),
        attempts in prop::collection::vec(attempt_strategy(), 0..25),
    ) {
        let store = LedgerStore::new();
        let client = UserId::new();
        let freelancer = UserId::new();
        let budget: i64 = amounts.iter().sum();

        let project = store
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
                    drafts(&amounts),
                    Actor::Client(client),
                )?;
                unit.fund_project(project)?;
                Ok(project)
            })
            .unwrap();
        let milestones = store.read(|view| view.project(project).unwrap().milestones);

        for attempt in attempts {
            let milestone = milestones[attempt.milestone_index % milestones.len()];
            // Each attempt is a fresh dispute leg so the idempotency key
            // never blocks it; only the escrow invariant may.
            let (recipient, tx_type) = if attempt.to_freelancer {
                (freelancer, TransactionType::DisputePayment)
            } else {
                (client, TransactionType::DisputeRefund)
            };
            let key = SettlementKey::Dispute {
                dispute_id: DisputeId::new(),
                recipient,
                tx_type,
            };
            // Errors are expected for over-sized attempts; the property
            // is that accepted settlements keep the invariants.
            let _ = store.transact(|unit| {
                let txn = unit.begin_settlement(
                    key,
                    project,
                    milestone,
                    recipient,
                    Amount::from_minor(attempt.amount),
                    None,
                )?;
                unit.complete_settlement(txn, None)
            });

            store.read(|view| {
                let available = view.available_escrow(project).unwrap();
                prop_assert!(
                    !available.is_negative(),
                    "escrow went negative: {available}"
                );
                for owner in [client, freelancer] {
                    let wallet = view.wallet(owner).unwrap();
                    prop_assert!(!wallet.balance.is_negative());
                    prop_assert!(!wallet.locked_balance.is_negative());
                }
                Ok(())
            })?;
        }
    }

    /// A milestone plan that does not sum to the budget is rejected at
    /// creation, whatever the shape of the mismatch.
    #[test]
    fn mismatched_plans_rejected(
        amounts in prop::collection::vec(100i64..10_000, 1..5),
        offset in 1i64..1_000,
    ) {
        let store = LedgerStore::new();
        let client = UserId::new();
        let freelancer = UserId::new();
        let budget: i64 = amounts.iter().sum::<i64>() + offset;

        let result = store.transact(|unit| {
            unit.open_wallet(client, usd())?;
            unit.open_wallet(freelancer, usd())?;
            unit.create_project(
                client,
                freelancer,
                usd(),
                Amount::from_minor(budget),
                14,
                drafts(&amounts),
                Actor::Client(client),
            )
        });
        prop_assert!(result.is_err());
    }
}

/// Delivering the same settlement twice produces one completed
/// transaction and one wallet credit.
#[test]
fn settlement_is_idempotent_under_redelivery() {
    let store = LedgerStore::new();
    let client = UserId::new();
    let freelancer = UserId::new();
    let project = store
        .transact(|unit| {
            unit.open_wallet(client, usd())?;
            unit.open_wallet(freelancer, usd())?;
            unit.deposit(client, Amount::from_minor(10_000), None)?;
            let project = unit.create_project(
                client,
                freelancer,
                usd(),
                Amount::from_minor(10_000),
                14,
                drafts(&[10_000]),
                Actor::Client(client),
            )?;
            unit.fund_project(project)?;
            Ok(project)
        })
        .unwrap();
    let milestone = store.read(|view| view.project(project).unwrap().milestones[0]);
    let key = SettlementKey::Milestone {
        milestone_id: milestone,
        tx_type: TransactionType::MilestoneRelease,
    };

    // First delivery settles.
    store
        .transact(|unit| {
            let txn = unit.begin_settlement(
                key,
                project,
                milestone,
                freelancer,
                Amount::from_minor(10_000),
                None,
            )?;
            unit.complete_settlement(txn, Some("cap_1".to_string()))
        })
        .unwrap();

    // Second delivery finds the completed settlement and must no-op.
    let second = store.transact(|unit| {
        unit.begin_settlement(
            key,
            project,
            milestone,
            freelancer,
            Amount::from_minor(10_000),
            None,
        )
    });
    assert!(second.unwrap_err().is_duplicate_settlement());

    store.read(|view| {
        let releases: Vec<_> = view
            .project_transactions(project)
            .into_iter()
            .filter(|t| t.tx_type == TransactionType::MilestoneRelease)
            .collect();
        assert_eq!(releases.len(), 1);
        assert_eq!(
            view.wallet(freelancer).unwrap().balance,
            Amount::from_minor(9_000)
        );
    });
}
