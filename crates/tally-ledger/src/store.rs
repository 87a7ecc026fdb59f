//! # Ledger Store
//!
//! The single durable-state seam of the platform. Every money-moving
//! operation runs as one **atomic unit**: [`LedgerStore::transact`] stages
//! mutations against a copy of the state and commits only when the
//! closure returns `Ok`. An `Err` discards every staged write, so a
//! partial write (a milestone marked APPROVED with no transaction row)
//! cannot exist, even across concurrent callers.
//!
//! Invariant-check reads (has this milestone already been paid? does the
//! escrow cover this release?) happen inside the same unit as the write
//! that depends on them. Every state-changing helper appends an
//! [`AuditRecord`], and domain-significant changes append an
//! [`OutboxEvent`] in the same unit.
//!
//! The store is in-process state behind this contract. Nothing outside
//! this module mutates ledger rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use tally_core::{
    Actor, Amount, CurrencyCode, DisputeId, DomainEvent, FeeBreakdown, MilestoneId, ProjectId,
    TransactionId, UserId, WalletTransactionId,
};

use crate::audit::AuditRecord;
use crate::dispute::{
    Dispute, DisputeRole, DisputeStatus, EvidenceRef, Resolution, TriageReport,
};
use crate::error::LedgerError;
use crate::milestone::{Deliverable, Milestone, MilestoneDraft};
use crate::outbox::{DeliveryStatus, OutboxEvent};
use crate::project::Project;
use crate::transaction::{SettlementKey, Transaction, TransactionType, TxStatus};
use crate::wallet::{Wallet, WalletTransaction, WalletTxType};

// ── Fee Schedule ───────────────────────────────────────────────────────

/// Platform fee configuration applied at settlement time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FeeSchedule {
    /// Platform commission in basis points, deducted from freelancer
    /// income.
    pub platform_bps: u32,
    /// Flat processor cost per settlement, in minor units.
    pub processor_flat: Amount,
    /// Flat filing fee charged to the party raising a dispute, in minor
    /// units. Zero disables collection.
    pub dispute_filing_fee: Amount,
}

impl Default for FeeSchedule {
    fn default() -> Self {
        Self {
            platform_bps: 1_000,
            processor_flat: Amount::ZERO,
            dispute_filing_fee: Amount::ZERO,
        }
    }
}

impl FeeSchedule {
    /// The fee breakdown for a settlement of `amount`.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Core`] on arithmetic overflow.
    pub fn fees_for(&self, amount: Amount) -> Result<FeeBreakdown, LedgerError> {
        Ok(FeeBreakdown {
            platform: amount.bps(self.platform_bps)?,
            processor: self.processor_flat,
        })
    }
}

// ── State ──────────────────────────────────────────────────────────────

/// The complete relational state held by the store.
#[derive(Debug, Clone, Default)]
pub struct LedgerState {
    wallets: BTreeMap<tally_core::WalletId, Wallet>,
    wallet_by_owner: BTreeMap<UserId, tally_core::WalletId>,
    wallet_txs: BTreeMap<WalletTransactionId, WalletTransaction>,
    projects: BTreeMap<ProjectId, Project>,
    milestones: BTreeMap<MilestoneId, Milestone>,
    disputes: BTreeMap<DisputeId, Dispute>,
    transactions: BTreeMap<TransactionId, Transaction>,
    audit: Vec<AuditRecord>,
    outbox: Vec<OutboxEvent>,
    outbox_seq: u64,
}

impl LedgerState {
    fn wallet_of(&self, owner: UserId) -> Result<&Wallet, LedgerError> {
        let id = self
            .wallet_by_owner
            .get(&owner)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "wallet",
                id: owner.to_string(),
            })?;
        self.wallets.get(id).ok_or_else(|| LedgerError::UnknownEntity {
            kind: "wallet",
            id: owner.to_string(),
        })
    }

    fn wallet_of_mut(&mut self, owner: UserId) -> Result<&mut Wallet, LedgerError> {
        let id = *self
            .wallet_by_owner
            .get(&owner)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "wallet",
                id: owner.to_string(),
            })?;
        self.wallets
            .get_mut(&id)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "wallet",
                id: owner.to_string(),
            })
    }

    /// Completed escrow inflow minus completed **and pending** outflow for
    /// a project. Pending outflow counts so that two in-flight settlements
    /// cannot jointly overcommit the escrow.
    fn available_escrow(&self, project_id: ProjectId) -> Result<Amount, LedgerError> {
        let mut available = Amount::ZERO;
        for txn in self.transactions.values() {
            if txn.project_id != project_id {
                continue;
            }
            match (txn.tx_type.is_escrow_outflow(), txn.status) {
                (false, TxStatus::Completed) => {
                    available = available.checked_add(txn.amount)?;
                }
                (true, TxStatus::Completed | TxStatus::Pending) => {
                    available = available.checked_sub(txn.amount)?;
                }
                _ => {}
            }
        }
        Ok(available)
    }

    fn find_settlement(&self, key: SettlementKey) -> Option<&Transaction> {
        self.transactions
            .values()
            .find(|txn| txn.settlement_key() == Some(key))
    }
}

// ── Store ──────────────────────────────────────────────────────────────

/// Handle to the ledger. Cheap to clone; all clones share state.
#[derive(Debug, Clone, Default)]
pub struct LedgerStore {
    inner: Arc<RwLock<LedgerState>>,
    fees: FeeSchedule,
}

impl LedgerStore {
    /// Create an empty store with the default fee schedule.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty store with an explicit fee schedule.
    pub fn with_fees(fees: FeeSchedule) -> Self {
        Self {
            inner: Arc::new(RwLock::new(LedgerState::default())),
            fees,
        }
    }

    /// Run `f` as one atomic unit.
    ///
    /// Mutations are staged against a copy of the state; the copy
    /// replaces the live state only when `f` returns `Ok`. Units are
    /// serialized by the store's write lock, so invariant checks inside
    /// the unit observe a consistent snapshot.
    pub fn transact<T>(
        &self,
        f: impl FnOnce(&mut LedgerUnit<'_>) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let mut guard = self.inner.write();
        let mut staged = guard.clone();
        let mut unit = LedgerUnit {
            state: &mut staged,
            fees: self.fees,
            trace_id: Uuid::new_v4(),
        };
        let out = f(&mut unit)?;
        *guard = staged;
        Ok(out)
    }

    /// Run a read-only closure against the current state.
    pub fn read<T>(&self, f: impl FnOnce(&LedgerView<'_>) -> T) -> T {
        let guard = self.inner.read();
        f(&LedgerView { state: &*guard })
    }

    /// The fee schedule the store settles with.
    pub fn fees(&self) -> FeeSchedule {
        self.fees
    }

    /// Mark an outbox event delivered. Called by the dispatcher after a
    /// successful hand-off; not an audited ledger operation.
    pub fn mark_event_delivered(&self, event_id: Uuid) {
        let mut guard = self.inner.write();
        if let Some(ev) = guard.outbox.iter_mut().find(|ev| ev.id == event_id) {
            ev.mark_delivered();
        }
    }
}

// ── Read View ──────────────────────────────────────────────────────────

/// Read-only view of the ledger state.
pub struct LedgerView<'a> {
    state: &'a LedgerState,
}

impl LedgerView<'_> {
    /// The wallet owned by a user.
    pub fn wallet(&self, owner: UserId) -> Result<Wallet, LedgerError> {
        self.state.wallet_of(owner).cloned()
    }

    /// A project by id.
    pub fn project(&self, id: ProjectId) -> Result<Project, LedgerError> {
        self.state
            .projects
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "project",
                id: id.to_string(),
            })
    }

    /// A milestone by id.
    pub fn milestone(&self, id: MilestoneId) -> Result<Milestone, LedgerError> {
        self.state
            .milestones
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "milestone",
                id: id.to_string(),
            })
    }

    /// A dispute by id.
    pub fn dispute(&self, id: DisputeId) -> Result<Dispute, LedgerError> {
        self.state
            .disputes
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "dispute",
                id: id.to_string(),
            })
    }

    /// A project-facing transaction by id.
    pub fn transaction(&self, id: TransactionId) -> Result<Transaction, LedgerError> {
        self.state
            .transactions
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "transaction",
                id: id.to_string(),
            })
    }

    /// All transactions touching a project, in creation order.
    pub fn project_transactions(&self, project_id: ProjectId) -> Vec<Transaction> {
        let mut txns: Vec<Transaction> = self
            .state
            .transactions
            .values()
            .filter(|t| t.project_id == project_id)
            .cloned()
            .collect();
        txns.sort_by_key(|t| t.created_at);
        txns
    }

    /// The settlement transaction answering to an idempotency key.
    pub fn settlement(&self, key: SettlementKey) -> Option<Transaction> {
        self.state.find_settlement(key).cloned()
    }

    /// Completed escrow inflow minus completed and pending outflow.
    pub fn available_escrow(&self, project_id: ProjectId) -> Result<Amount, LedgerError> {
        self.state.available_escrow(project_id)
    }

    /// Submitted milestones past their project's auto-approve window.
    pub fn milestones_due_for_auto_approval(&self, now: DateTime<Utc>) -> Vec<MilestoneId> {
        self.state
            .milestones
            .values()
            .filter(|m| {
                self.state
                    .projects
                    .get(&m.project_id)
                    .is_some_and(|p| m.auto_approve_due(p.auto_approve_days, now))
            })
            .map(|m| m.id)
            .collect()
    }

    /// Undelivered outbox events in sequence order, up to `limit`.
    pub fn undelivered_events(&self, limit: usize) -> Vec<OutboxEvent> {
        let mut pending: Vec<OutboxEvent> = self
            .state
            .outbox
            .iter()
            .filter(|ev| ev.status == DeliveryStatus::Pending)
            .cloned()
            .collect();
        pending.sort_by_key(|ev| ev.seq);
        pending.truncate(limit);
        pending
    }

    /// The complete audit trail, in write order.
    pub fn audit_trail(&self) -> Vec<AuditRecord> {
        self.state.audit.clone()
    }

    /// All wallet transactions, in creation order.
    pub fn wallet_transactions(&self) -> Vec<WalletTransaction> {
        let mut txs: Vec<WalletTransaction> = self.state.wallet_txs.values().cloned().collect();
        txs.sort_by_key(|t| t.created_at);
        txs
    }
}

// ── Atomic Unit ────────────────────────────────────────────────────────

/// A single atomic unit of ledger work.
///
/// Obtained from [`LedgerStore::transact`]. Every method either fully
/// applies (entity change + audit record + outbox event) or returns an
/// error that discards the whole unit.
pub struct LedgerUnit<'a> {
    state: &'a mut LedgerState,
    fees: FeeSchedule,
    trace_id: Uuid,
}

impl LedgerUnit<'_> {
    /// The trace id correlating all records written by this unit.
    pub fn trace_id(&self) -> Uuid {
        self.trace_id
    }

    // ── Wallet operations ──────────────────────────────────────────

    /// Open a wallet for a user. The mapping is 1:1.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::WalletExists`] if the user already has one.
    pub fn open_wallet(
        &mut self,
        owner: UserId,
        currency: CurrencyCode,
    ) -> Result<tally_core::WalletId, LedgerError> {
        if self.state.wallet_by_owner.contains_key(&owner) {
            return Err(LedgerError::WalletExists {
                user_id: owner.to_string(),
            });
        }
        let wallet = Wallet::open(owner, currency);
        let id = wallet.id;
        self.audit(
            "wallet.open",
            Actor::System,
            "wallet",
            id.to_string(),
            None,
            serde_json::to_value(&wallet).ok(),
        );
        self.state.wallet_by_owner.insert(owner, id);
        self.state.wallets.insert(id, wallet);
        Ok(id)
    }

    /// Deposit external funds into a user's wallet.
    pub fn deposit(
        &mut self,
        owner: UserId,
        amount: Amount,
        reference: Option<String>,
    ) -> Result<WalletTransactionId, LedgerError> {
        let wallet = self.state.wallet_of(owner)?;
        self.require_usable(wallet)?;
        let (wallet_id, currency) = (wallet.id, wallet.currency);

        let mut tx = WalletTransaction::new(
            WalletTxType::Deposit,
            amount,
            currency,
            None,
            Some(wallet_id),
            FeeBreakdown::NONE,
        )?;
        tx.reference = reference;
        tx.complete()?;
        self.apply_wallet_tx(tx)
    }

    /// Withdraw funds from a user's wallet to an external destination.
    pub fn withdraw(
        &mut self,
        owner: UserId,
        amount: Amount,
    ) -> Result<WalletTransactionId, LedgerError> {
        let wallet = self.state.wallet_of(owner)?;
        self.require_usable(wallet)?;
        let (wallet_id, currency) = (wallet.id, wallet.currency);

        let mut tx = WalletTransaction::new(
            WalletTxType::Withdrawal,
            amount,
            currency,
            Some(wallet_id),
            None,
            FeeBreakdown::NONE,
        )?;
        tx.complete()?;
        self.apply_wallet_tx(tx)
    }

    /// Freeze a user's wallet.
    pub fn freeze_wallet(&mut self, owner: UserId, actor: Actor) -> Result<(), LedgerError> {
        let wallet = self.state.wallet_of_mut(owner)?;
        let before = serde_json::to_value(&*wallet).ok();
        wallet.freeze()?;
        let after = serde_json::to_value(&*wallet).ok();
        let id = wallet.id.to_string();
        self.audit("wallet.freeze", actor, "wallet", id, before, after);
        Ok(())
    }

    /// Reactivate a frozen wallet.
    pub fn unfreeze_wallet(&mut self, owner: UserId, actor: Actor) -> Result<(), LedgerError> {
        let wallet = self.state.wallet_of_mut(owner)?;
        let before = serde_json::to_value(&*wallet).ok();
        wallet.unfreeze()?;
        let after = serde_json::to_value(&*wallet).ok();
        let id = wallet.id.to_string();
        self.audit("wallet.unfreeze", actor, "wallet", id, before, after);
        Ok(())
    }

    /// Close a wallet with zero balances.
    pub fn close_wallet(&mut self, owner: UserId, actor: Actor) -> Result<(), LedgerError> {
        let wallet = self.state.wallet_of_mut(owner)?;
        let before = serde_json::to_value(&*wallet).ok();
        wallet.close()?;
        let after = serde_json::to_value(&*wallet).ok();
        let id = wallet.id.to_string();
        self.audit("wallet.close", actor, "wallet", id, before, after);
        Ok(())
    }

    // ── Project operations ─────────────────────────────────────────

    /// Create a project with its milestone plan.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::BudgetMismatch`] unless the milestone
    /// amounts sum to the budget, and [`LedgerError::InvalidAmount`] for
    /// an empty plan or a milestone below the minimum floor.
    pub fn create_project(
        &mut self,
        client: UserId,
        freelancer: UserId,
        currency: CurrencyCode,
        budget: Amount,
        auto_approve_days: u32,
        drafts: Vec<MilestoneDraft>,
        actor: Actor,
    ) -> Result<ProjectId, LedgerError> {
        if drafts.is_empty() {
            return Err(LedgerError::InvalidAmount(
                "a project needs at least one milestone".to_string(),
            ));
        }
        // Both parties must have wallets in the project currency before
        // any escrow can settle to them.
        for party in [client, freelancer] {
            let wallet = self.state.wallet_of(party)?;
            if wallet.currency != currency {
                return Err(LedgerError::CurrencyMismatch {
                    expected: currency.to_string(),
                    got: wallet.currency.to_string(),
                });
            }
        }

        let mut total = Amount::ZERO;
        for draft in &drafts {
            total = total.checked_add(draft.amount)?;
        }
        if total != budget {
            return Err(LedgerError::BudgetMismatch {
                budget: budget.minor(),
                milestone_total: total.minor(),
            });
        }

        let mut project = Project::new(client, freelancer, currency, budget, auto_approve_days);
        let project_id = project.id;
        for draft in drafts {
            let milestone = Milestone::from_draft(project_id, draft)?;
            project.milestones.push(milestone.id);
            self.audit(
                "milestone.create",
                actor,
                "milestone",
                milestone.id.to_string(),
                None,
                serde_json::to_value(&milestone).ok(),
            );
            self.state.milestones.insert(milestone.id, milestone);
        }
        self.audit(
            "project.create",
            actor,
            "project",
            project_id.to_string(),
            None,
            serde_json::to_value(&project).ok(),
        );
        self.emit(DomainEvent::ProjectCreated {
            project_id,
            budget,
        });
        self.state.projects.insert(project_id, project);
        Ok(project_id)
    }

    /// Add a milestone to an unfunded project, growing the budget by the
    /// milestone amount so the plan keeps summing to the budget.
    pub fn add_milestone(
        &mut self,
        project_id: ProjectId,
        draft: MilestoneDraft,
        actor: Actor,
    ) -> Result<MilestoneId, LedgerError> {
        let project = self.project_mut(project_id)?;
        if project.funded {
            return Err(LedgerError::InvalidTransition {
                entity: "project",
                from: "FUNDED".to_string(),
                to: "AMENDED".to_string(),
                reason: "milestones cannot be added after funding".to_string(),
            });
        }
        let new_budget = project.budget.checked_add(draft.amount)?;
        let milestone = Milestone::from_draft(project_id, draft)?;
        let milestone_id = milestone.id;

        let project = self.project_mut(project_id)?;
        project.budget = new_budget;
        project.milestones.push(milestone_id);
        self.audit(
            "milestone.create",
            actor,
            "milestone",
            milestone_id.to_string(),
            None,
            serde_json::to_value(&milestone).ok(),
        );
        self.state.milestones.insert(milestone_id, milestone);
        Ok(milestone_id)
    }

    /// Fund the project budget from the client's wallet into escrow.
    pub fn fund_project(&mut self, project_id: ProjectId) -> Result<TransactionId, LedgerError> {
        let project = self.project_ref(project_id)?;
        if project.funded {
            return Err(LedgerError::InvalidTransition {
                entity: "project",
                from: "FUNDED".to_string(),
                to: "FUNDED".to_string(),
                reason: "project escrow is already funded".to_string(),
            });
        }
        let (client, budget, currency) = (project.client, project.budget, project.currency);

        let wallet = self.state.wallet_of(client)?;
        self.require_usable(wallet)?;
        let wallet_id = wallet.id;

        // Wallet leg: spendable balance moves into the locked escrow
        // commitment.
        let mut wallet_tx = WalletTransaction::new(
            WalletTxType::ProjectFunds,
            budget,
            currency,
            Some(wallet_id),
            None,
            FeeBreakdown::NONE,
        )?;
        wallet_tx.reference = Some(project_id.to_string());
        wallet_tx.complete()?;
        self.apply_wallet_tx(wallet_tx)?;

        // Escrow leg: the project-facing deposit row.
        let mut txn = Transaction::new(
            project_id,
            None,
            None,
            TransactionType::Deposit,
            budget,
            currency,
            None,
            Some("wallet".to_string()),
        )?;
        txn.complete(None)?;
        let txn_id = txn.id;
        self.audit(
            "project.fund",
            Actor::Client(client),
            "transaction",
            txn_id.to_string(),
            None,
            serde_json::to_value(&txn).ok(),
        );
        self.state.transactions.insert(txn_id, txn);

        self.project_mut(project_id)?.funded = true;
        self.emit(DomainEvent::ProjectFunded {
            project_id,
            amount: budget,
        });
        Ok(txn_id)
    }

    // ── Milestone operations ───────────────────────────────────────

    /// The freelancer starts work on a pending milestone.
    pub fn start_milestone(
        &mut self,
        milestone_id: MilestoneId,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        self.with_milestone(milestone_id, "milestone.start", actor, |m| m.start(actor))
    }

    /// Submit a milestone for review.
    pub fn submit_milestone(
        &mut self,
        milestone_id: MilestoneId,
        deliverables: Vec<Deliverable>,
        notes: Option<String>,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        self.with_milestone(milestone_id, "milestone.submit", actor, |m| {
            m.submit(deliverables, notes, actor)
        })?;
        let milestone = self.milestone_ref(milestone_id)?;
        let project_id = milestone.project_id;
        self.emit(DomainEvent::MilestoneSubmitted {
            project_id,
            milestone_id,
        });
        Ok(())
    }

    /// Approve a submitted milestone.
    ///
    /// Guarded by the duplicate-settlement check: if any settlement
    /// already answers to this milestone's release key, the approval is
    /// rejected before a duplicate job could ever be enqueued.
    pub fn approve_milestone(
        &mut self,
        milestone_id: MilestoneId,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        let key = SettlementKey::Milestone {
            milestone_id,
            tx_type: TransactionType::MilestoneRelease,
        };
        if self.state.find_settlement(key).is_some() {
            return Err(LedgerError::DuplicateSettlement {
                key: key.to_string(),
            });
        }
        self.with_milestone(milestone_id, "milestone.approve", actor, |m| m.approve(actor))?;
        let milestone = self.milestone_ref(milestone_id)?;
        let project_id = milestone.project_id;
        self.emit(DomainEvent::MilestoneApproved {
            project_id,
            milestone_id,
            actor,
        });
        Ok(())
    }

    /// Request another revision round on a submitted milestone.
    pub fn request_revision(
        &mut self,
        milestone_id: MilestoneId,
        notes: String,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        self.with_milestone(milestone_id, "milestone.request_revision", actor, |m| {
            m.request_revision(notes, actor)
        })?;
        let milestone = self.milestone_ref(milestone_id)?;
        let project_id = milestone.project_id;
        self.emit(DomainEvent::RevisionRequested {
            project_id,
            milestone_id,
        });
        Ok(())
    }

    /// Resume work after a revision request.
    pub fn resume_milestone(
        &mut self,
        milestone_id: MilestoneId,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        self.with_milestone(milestone_id, "milestone.resume", actor, |m| m.resume(actor))
    }

    // ── Dispute operations ─────────────────────────────────────────

    /// Open a dispute against a submitted or approved milestone.
    ///
    /// Marks the milestone DISPUTED and creates the dispute row in the
    /// same unit. Collects the filing fee from the raiser's wallet when
    /// the schedule configures one and the balance covers it.
    pub fn open_dispute(
        &mut self,
        milestone_id: MilestoneId,
        raised_by: UserId,
        reason: String,
        evidence: Vec<EvidenceRef>,
        actor: Actor,
    ) -> Result<DisputeId, LedgerError> {
        let milestone = self.milestone_ref(milestone_id)?;
        let project_id = milestone.project_id;

        if self.state.disputes.values().any(|d| {
            d.milestone_id == milestone_id && d.raised_by == raised_by && !d.status.is_terminal()
        }) {
            return Err(LedgerError::DisputeAlreadyOpen {
                milestone_id: milestone_id.to_string(),
                raised_by: raised_by.to_string(),
            });
        }

        self.with_milestone(milestone_id, "milestone.dispute", actor, |m| {
            m.mark_disputed(actor)
        })?;

        let mut dispute = Dispute::open(project_id, milestone_id, raised_by, reason, evidence);

        // Filing fee: best-effort collection. An unpaid fee never blocks
        // a dispute; it is surfaced through `dispute_fee_paid`.
        let fee = self.fees.dispute_filing_fee;
        if fee.is_positive() {
            if let Ok(wallet) = self.state.wallet_of(raised_by) {
                if wallet.status.is_usable() && wallet.balance >= fee {
                    let (wallet_id, currency) = (wallet.id, wallet.currency);
                    let mut fee_tx = WalletTransaction::new(
                        WalletTxType::Fee,
                        fee,
                        currency,
                        Some(wallet_id),
                        None,
                        FeeBreakdown::NONE,
                    )?;
                    fee_tx.reference = Some(dispute.id.to_string());
                    fee_tx.complete()?;
                    self.apply_wallet_tx(fee_tx)?;
                    dispute.dispute_fee_paid = true;
                }
            }
        }

        let dispute_id = dispute.id;
        self.audit(
            "dispute.open",
            actor,
            "dispute",
            dispute_id.to_string(),
            None,
            serde_json::to_value(&dispute).ok(),
        );
        self.emit(DomainEvent::DisputeOpened {
            project_id,
            milestone_id,
            dispute_id,
            raised_by,
        });
        self.state.disputes.insert(dispute_id, dispute);
        Ok(dispute_id)
    }

    /// Record a triage report and route the dispute accordingly.
    pub fn apply_triage(
        &mut self,
        dispute_id: DisputeId,
        report: TriageReport,
        routed_to: DisputeStatus,
    ) -> Result<(), LedgerError> {
        self.with_dispute(dispute_id, "dispute.triage", Actor::System, |d| {
            d.apply_triage(report, routed_to)
        })?;
        self.emit(DomainEvent::DisputePhaseChanged {
            dispute_id,
            phase: routed_to.as_str().to_string(),
        });
        Ok(())
    }

    /// Attach a resolution to a dispute, validating the split against the
    /// milestone amount inside this unit.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidResolution`] unless the split sums
    /// exactly to the disputed milestone's amount.
    pub fn resolve_dispute(
        &mut self,
        dispute_id: DisputeId,
        resolution: Resolution,
    ) -> Result<(), LedgerError> {
        let dispute = self.dispute_ref(dispute_id)?;
        let milestone = self.milestone_ref(dispute.milestone_id)?;

        if resolution.amount_to_freelancer.is_negative()
            || resolution.amount_to_client.is_negative()
        {
            return Err(LedgerError::InvalidAmount(
                "resolution amounts must be non-negative".to_string(),
            ));
        }
        let split_total = resolution
            .amount_to_freelancer
            .checked_add(resolution.amount_to_client)?;
        if split_total != milestone.amount {
            return Err(LedgerError::InvalidResolution {
                milestone_amount: milestone.amount.minor(),
                split_total: split_total.minor(),
            });
        }

        let actor = resolution.decided_by;
        let amount_to_freelancer = resolution.amount_to_freelancer;
        let amount_to_client = resolution.amount_to_client;
        self.with_dispute(dispute_id, "dispute.resolve", actor, |d| {
            d.resolve(resolution)
        })?;
        self.emit(DomainEvent::DisputeResolved {
            dispute_id,
            amount_to_freelancer,
            amount_to_client,
            decided_by: actor,
        });
        Ok(())
    }

    /// Escalate a dispute past automated handling.
    pub fn escalate_dispute(
        &mut self,
        dispute_id: DisputeId,
        reason: String,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        self.with_dispute(dispute_id, "dispute.escalate", actor, |d| d.escalate(actor))?;
        self.emit(DomainEvent::DisputeEscalated {
            dispute_id,
            reason,
        });
        Ok(())
    }

    /// Assign a human mediator or arbitrator to a dispute.
    pub fn assign_dispute(
        &mut self,
        dispute_id: DisputeId,
        user: UserId,
        role: DisputeRole,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        self.with_dispute(dispute_id, "dispute.assign", actor, |d| d.assign(user, role))
    }

    /// Append a message to a dispute's discussion log.
    pub fn post_dispute_message(
        &mut self,
        dispute_id: DisputeId,
        author: Actor,
        body: String,
    ) -> Result<(), LedgerError> {
        self.with_dispute(dispute_id, "dispute.message", author, |d| {
            d.post_message(author, body)
        })
    }

    /// Attach evidence to an open dispute.
    pub fn add_dispute_evidence(
        &mut self,
        dispute_id: DisputeId,
        evidence: EvidenceRef,
        actor: Actor,
    ) -> Result<(), LedgerError> {
        self.with_dispute(dispute_id, "dispute.evidence", actor, |d| {
            d.add_evidence(evidence)
        })
    }

    // ── Settlement primitives ──────────────────────────────────────

    /// Begin (or resume) a settlement for an idempotency key.
    ///
    /// - A COMPLETED settlement under the key returns
    ///   [`LedgerError::DuplicateSettlement`]; the caller no-ops.
    /// - A PENDING settlement is returned as-is (another attempt is in
    ///   flight or crashed mid-way; the key makes re-running safe).
    /// - A FAILED settlement is reopened for this attempt.
    /// - Otherwise a new PENDING transaction is created after the escrow
    ///   check.
    ///
    /// The transaction type, dispute linkage, and dispute recipient all
    /// derive from the key, so a row always answers to the key that
    /// created it.
    pub fn begin_settlement(
        &mut self,
        key: SettlementKey,
        project_id: ProjectId,
        milestone_id: MilestoneId,
        recipient: UserId,
        amount: Amount,
        provider: Option<String>,
    ) -> Result<TransactionId, LedgerError> {
        let (tx_type, dispute_id, recipient) = match key {
            SettlementKey::Milestone { tx_type, .. } => (tx_type, None, recipient),
            SettlementKey::Dispute {
                dispute_id,
                recipient,
                tx_type,
            } => (tx_type, Some(dispute_id), recipient),
        };

        if let Some(existing) = self.state.find_settlement(key) {
            let (status, id) = (existing.status, existing.id);
            return match status {
                TxStatus::Completed | TxStatus::Refunded => Err(LedgerError::DuplicateSettlement {
                    key: key.to_string(),
                }),
                TxStatus::Pending => Ok(id),
                TxStatus::Failed => {
                    let txn = self.transaction_mut(id)?;
                    let before = serde_json::to_value(&*txn).ok();
                    txn.reopen()?;
                    let after = serde_json::to_value(&*txn).ok();
                    self.audit(
                        "settlement.reopen",
                        Actor::System,
                        "transaction",
                        id.to_string(),
                        before,
                        after,
                    );
                    Ok(id)
                }
            };
        }

        let available = self.state.available_escrow(project_id)?;
        if amount > available {
            return Err(LedgerError::InsufficientEscrow {
                project_id: project_id.to_string(),
                requested: amount.minor(),
                available: available.minor(),
            });
        }

        let currency = self.project_ref(project_id)?.currency;
        let txn = Transaction::new(
            project_id,
            Some(milestone_id),
            dispute_id,
            tx_type,
            amount,
            currency,
            Some(recipient),
            provider,
        )?;
        let txn_id = txn.id;
        self.audit(
            "settlement.begin",
            Actor::System,
            "transaction",
            txn_id.to_string(),
            None,
            serde_json::to_value(&txn).ok(),
        );
        self.state.transactions.insert(txn_id, txn);
        Ok(txn_id)
    }

    /// Complete a pending settlement: move the wallet legs and mark the
    /// transaction COMPLETED, all in this unit.
    pub fn complete_settlement(
        &mut self,
        txn_id: TransactionId,
        provider_ref: Option<String>,
    ) -> Result<(), LedgerError> {
        let txn = self.transaction_ref(txn_id)?.clone();
        let project = self.project_ref(txn.project_id)?;
        let (client, freelancer, currency) = (project.client, project.freelancer, project.currency);

        // Re-check escrow coverage with this settlement counted as the
        // pending outflow it already is.
        let available = self.state.available_escrow(txn.project_id)?;
        if available.is_negative() {
            return Err(LedgerError::InsufficientEscrow {
                project_id: txn.project_id.to_string(),
                requested: txn.amount.minor(),
                available: available.checked_add(txn.amount)?.minor(),
            });
        }

        match txn.tx_type {
            TransactionType::MilestoneRelease | TransactionType::DisputePayment => {
                // Client leg: escrow commitment leaves the locked balance.
                let client_wallet = self.state.wallet_of(client)?;
                let client_wallet_id = client_wallet.id;
                let mut payment = WalletTransaction::new(
                    WalletTxType::MilestonePayment,
                    txn.amount,
                    currency,
                    Some(client_wallet_id),
                    None,
                    FeeBreakdown::NONE,
                )?;
                payment.reference = Some(txn_id.to_string());
                payment.complete()?;
                self.apply_wallet_tx(payment)?;

                // Freelancer leg: income net of fees.
                let fees = self.fees.fees_for(txn.amount)?;
                let freelancer_wallet = self.state.wallet_of(freelancer)?;
                let freelancer_wallet_id = freelancer_wallet.id;
                let mut income = WalletTransaction::new(
                    WalletTxType::MilestoneIncome,
                    txn.amount,
                    currency,
                    None,
                    Some(freelancer_wallet_id),
                    fees,
                )?;
                income.reference = Some(txn_id.to_string());
                income.complete()?;
                self.apply_wallet_tx(income)?;
            }
            TransactionType::DisputeRefund => {
                // Single leg: the client's escrow commitment returns to
                // the spendable balance.
                let client_wallet = self.state.wallet_of(client)?;
                let client_wallet_id = client_wallet.id;
                let mut refund = WalletTransaction::new(
                    WalletTxType::ProjectRefund,
                    txn.amount,
                    currency,
                    None,
                    Some(client_wallet_id),
                    FeeBreakdown::NONE,
                )?;
                refund.reference = Some(txn_id.to_string());
                refund.complete()?;
                self.apply_wallet_tx(refund)?;
            }
            other => {
                return Err(LedgerError::InvalidTransition {
                    entity: "transaction",
                    from: other.as_str().to_string(),
                    to: "SETTLED".to_string(),
                    reason: "not a settlement transaction type".to_string(),
                });
            }
        }

        let project_id = txn.project_id;
        let amount = txn.amount;
        let stored = self.transaction_mut(txn_id)?;
        let before = serde_json::to_value(&*stored).ok();
        stored.complete(provider_ref)?;
        let after = serde_json::to_value(&*stored).ok();
        self.audit(
            "settlement.complete",
            Actor::System,
            "transaction",
            txn_id.to_string(),
            before,
            after,
        );
        self.emit(DomainEvent::SettlementCompleted {
            project_id,
            transaction_id: txn_id,
            amount,
        });
        Ok(())
    }

    /// Record a settlement attempt failure. The transaction stays FAILED
    /// until a retry reopens it or an operator adjusts manually.
    pub fn fail_settlement(
        &mut self,
        txn_id: TransactionId,
        error: impl Into<String>,
    ) -> Result<(), LedgerError> {
        let error = error.into();
        let txn = self.transaction_mut(txn_id)?;
        let project_id = txn.project_id;
        let before = serde_json::to_value(&*txn).ok();
        txn.fail(error.clone())?;
        let after = serde_json::to_value(&*txn).ok();
        tracing::warn!(txn = %txn_id, error = %error, "settlement attempt failed");
        self.audit(
            "settlement.fail",
            Actor::System,
            "transaction",
            txn_id.to_string(),
            before,
            after,
        );
        self.emit(DomainEvent::SettlementFailed {
            project_id,
            transaction_id: txn_id,
            error,
        });
        Ok(())
    }

    /// Manual escrow correction by an operator: pays `amount` from a
    /// project's escrow to a user, bypassing the settlement workers.
    ///
    /// The remediation path for dead-lettered settlement jobs.
    pub fn admin_adjust(
        &mut self,
        project_id: ProjectId,
        milestone_id: Option<MilestoneId>,
        user: UserId,
        amount: Amount,
        note: String,
        actor: Actor,
    ) -> Result<TransactionId, LedgerError> {
        let available = self.state.available_escrow(project_id)?;
        if amount > available {
            return Err(LedgerError::InsufficientEscrow {
                project_id: project_id.to_string(),
                requested: amount.minor(),
                available: available.minor(),
            });
        }
        let project = self.project_ref(project_id)?;
        let (client, currency) = (project.client, project.currency);

        // Escrow leaves the client's locked commitment either way; the
        // recipient decides which side gets the funds.
        let client_wallet_id = self.state.wallet_of(client)?.id;
        let mut out_leg = WalletTransaction::new(
            WalletTxType::MilestonePayment,
            amount,
            currency,
            Some(client_wallet_id),
            None,
            FeeBreakdown::NONE,
        )?;
        out_leg.complete()?;
        self.apply_wallet_tx(out_leg)?;

        if user == client {
            let mut back = WalletTransaction::new(
                WalletTxType::Refund,
                amount,
                currency,
                None,
                Some(client_wallet_id),
                FeeBreakdown::NONE,
            )?;
            back.complete()?;
            self.apply_wallet_tx(back)?;
        } else {
            let wallet_id = self.state.wallet_of(user)?.id;
            let mut credit = WalletTransaction::new(
                WalletTxType::AdminAdjustment,
                amount,
                currency,
                None,
                Some(wallet_id),
                FeeBreakdown::NONE,
            )?;
            credit.complete()?;
            self.apply_wallet_tx(credit)?;
        }

        let mut txn = Transaction::new(
            project_id,
            milestone_id,
            None,
            TransactionType::AdminAdjustment,
            amount,
            currency,
            Some(user),
            Some("manual".to_string()),
        )?;
        txn.last_error = Some(note);
        txn.complete(None)?;
        let txn_id = txn.id;
        tracing::info!(project = %project_id, user = %user, amount = %amount, "manual escrow adjustment");
        self.audit(
            "settlement.admin_adjust",
            actor,
            "transaction",
            txn_id.to_string(),
            None,
            serde_json::to_value(&txn).ok(),
        );
        self.state.transactions.insert(txn_id, txn);
        Ok(txn_id)
    }

    // ── Internals ──────────────────────────────────────────────────

    fn require_usable(&self, wallet: &Wallet) -> Result<(), LedgerError> {
        if !wallet.status.is_usable() {
            return Err(LedgerError::WalletUnavailable {
                wallet_id: wallet.id.to_string(),
                status: wallet.status.as_str().to_string(),
            });
        }
        Ok(())
    }

    /// Store a completed wallet transaction and apply it to both sides.
    fn apply_wallet_tx(
        &mut self,
        tx: WalletTransaction,
    ) -> Result<WalletTransactionId, LedgerError> {
        for side in [tx.from_wallet, tx.to_wallet].into_iter().flatten() {
            let wallet = self
                .state
                .wallets
                .get_mut(&side)
                .ok_or_else(|| LedgerError::UnknownEntity {
                    kind: "wallet",
                    id: side.to_string(),
                })?;
            let before = serde_json::to_value(&*wallet).ok();
            wallet.apply_completed(&tx)?;
            let after = serde_json::to_value(&*wallet).ok();
            let wallet_id = wallet.id.to_string();
            self.audit(
                format!("wallet.apply.{}", tx.tx_type),
                Actor::System,
                "wallet",
                wallet_id,
                before,
                after,
            );
        }
        let id = tx.id;
        self.state.wallet_txs.insert(id, tx);
        Ok(id)
    }

    fn with_milestone(
        &mut self,
        milestone_id: MilestoneId,
        action: &str,
        actor: Actor,
        f: impl FnOnce(&mut Milestone) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError> {
        let milestone = self
            .state
            .milestones
            .get_mut(&milestone_id)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "milestone",
                id: milestone_id.to_string(),
            })?;
        let before = serde_json::to_value(&*milestone).ok();
        f(milestone)?;
        let after = serde_json::to_value(&*milestone).ok();
        self.audit(
            action.to_string(),
            actor,
            "milestone",
            milestone_id.to_string(),
            before,
            after,
        );
        Ok(())
    }

    fn with_dispute(
        &mut self,
        dispute_id: DisputeId,
        action: &str,
        actor: Actor,
        f: impl FnOnce(&mut Dispute) -> Result<(), LedgerError>,
    ) -> Result<(), LedgerError> {
        let dispute = self
            .state
            .disputes
            .get_mut(&dispute_id)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "dispute",
                id: dispute_id.to_string(),
            })?;
        let before = serde_json::to_value(&*dispute).ok();
        f(dispute)?;
        let after = serde_json::to_value(&*dispute).ok();
        self.audit(
            action.to_string(),
            actor,
            "dispute",
            dispute_id.to_string(),
            before,
            after,
        );
        Ok(())
    }

    fn project_ref(&self, id: ProjectId) -> Result<&Project, LedgerError> {
        self.state
            .projects
            .get(&id)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "project",
                id: id.to_string(),
            })
    }

    fn project_mut(&mut self, id: ProjectId) -> Result<&mut Project, LedgerError> {
        self.state
            .projects
            .get_mut(&id)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "project",
                id: id.to_string(),
            })
    }

    fn milestone_ref(&self, id: MilestoneId) -> Result<&Milestone, LedgerError> {
        self.state
            .milestones
            .get(&id)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "milestone",
                id: id.to_string(),
            })
    }

    fn dispute_ref(&self, id: DisputeId) -> Result<&Dispute, LedgerError> {
        self.state
            .disputes
            .get(&id)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "dispute",
                id: id.to_string(),
            })
    }

    fn transaction_ref(&self, id: TransactionId) -> Result<&Transaction, LedgerError> {
        self.state
            .transactions
            .get(&id)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "transaction",
                id: id.to_string(),
            })
    }

    fn transaction_mut(&mut self, id: TransactionId) -> Result<&mut Transaction, LedgerError> {
        self.state
            .transactions
            .get_mut(&id)
            .ok_or_else(|| LedgerError::UnknownEntity {
                kind: "transaction",
                id: id.to_string(),
            })
    }

    fn audit(
        &mut self,
        action: impl Into<String>,
        actor: Actor,
        entity_kind: &'static str,
        entity_id: String,
        before: Option<serde_json::Value>,
        after: Option<serde_json::Value>,
    ) {
        self.state.audit.push(AuditRecord::new(
            action,
            actor,
            entity_kind,
            entity_id,
            before,
            after,
            self.trace_id,
        ));
    }

    fn emit(&mut self, event: DomainEvent) {
        self.state.outbox_seq += 1;
        self.state
            .outbox
            .push(OutboxEvent::new(self.state.outbox_seq, event, self.trace_id));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispute::{ResolutionDecision, RESOLUTION_SCHEMA_VERSION};

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
                acceptance_criteria: "Delivered and reviewed".to_string(),
            })
            .collect()
    }

    struct Fixture {
        store: LedgerStore,
        client: UserId,
        freelancer: UserId,
        project: ProjectId,
        milestones: Vec<MilestoneId>,
    }

    /// A funded project with milestones of the given amounts and a
    /// client wallet that covered the budget exactly.
    fn funded_project(amounts: &[i64]) -> Fixture {
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
                    drafts(amounts),
                    Actor::Client(client),
                )?;
                unit.fund_project(project)?;
                Ok(project)
            })
            .unwrap();

        let milestones = store.read(|view| view.project(project).unwrap().milestones);
        Fixture {
            store,
            client,
            freelancer,
            project,
            milestones,
        }
    }

    fn submit(fx: &Fixture, milestone: MilestoneId) {
        fx.store
            .transact(|unit| {
                unit.submit_milestone(
                    milestone,
                    vec![Deliverable::new("Delivered work", None)],
                    None,
                    Actor::Freelancer(fx.freelancer),
                )
            })
            .unwrap();
    }

    /// Run the full settlement for a milestone release key.
    fn settle_release(fx: &Fixture, milestone: MilestoneId, amount: i64) -> TransactionId {
        let key = SettlementKey::Milestone {
            milestone_id: milestone,
            tx_type: TransactionType::MilestoneRelease,
        };
        fx.store
            .transact(|unit| {
                let txn = unit.begin_settlement(
                    key,
                    fx.project,
                    milestone,
                    fx.freelancer,
                    Amount::from_minor(amount),
                    Some("test-rail".to_string()),
                )?;
                unit.complete_settlement(txn, Some("cap_1".to_string()))?;
                Ok(txn)
            })
            .unwrap()
    }

    #[test]
    fn create_project_validates_budget_sum() {
        let store = LedgerStore::new();
        let client = UserId::new();
        let freelancer = UserId::new();
        let result = store.transact(|unit| {
            unit.open_wallet(client, usd())?;
            unit.open_wallet(freelancer, usd())?;
            unit.create_project(
                client,
                freelancer,
                usd(),
                Amount::from_minor(30_000),
                14,
                drafts(&[10_000, 10_000]),
                Actor::Client(client),
            )
        });
        assert!(matches!(
            result.unwrap_err(),
            LedgerError::BudgetMismatch { .. }
        ));
        // The whole unit rolled back: no wallets were committed either.
        store.read(|view| {
            assert!(view.wallet(client).is_err());
        });
    }

    #[test]
    fn failed_unit_discards_all_writes() {
        let store = LedgerStore::new();
        let user = UserId::new();
        store
            .transact(|unit| {
                unit.open_wallet(user, usd())?;
                Ok(())
            })
            .unwrap();

        // Deposit then force a failure in the same unit.
        let result: Result<(), LedgerError> = store.transact(|unit| {
            unit.deposit(user, Amount::from_minor(5_000), None)?;
            Err(LedgerError::InvalidAmount("forced".to_string()))
        });
        assert!(result.is_err());
        store.read(|view| {
            assert_eq!(view.wallet(user).unwrap().balance, Amount::ZERO);
            assert!(view.wallet_transactions().is_empty());
        });
    }

    #[test]
    fn funding_moves_balance_to_locked_and_records_deposit() {
        let fx = funded_project(&[10_000, 20_000]);
        fx.store.read(|view| {
            let wallet = view.wallet(fx.client).unwrap();
            assert_eq!(wallet.balance, Amount::ZERO);
            assert_eq!(wallet.locked_balance, Amount::from_minor(30_000));
            assert_eq!(
                view.available_escrow(fx.project).unwrap(),
                Amount::from_minor(30_000)
            );
            let txns = view.project_transactions(fx.project);
            assert_eq!(txns.len(), 1);
            assert_eq!(txns[0].tx_type, TransactionType::Deposit);
            assert_eq!(txns[0].status, TxStatus::Completed);
        });
    }

    #[test]
    fn double_funding_rejected() {
        let fx = funded_project(&[10_000]);
        let result = fx.store.transact(|unit| unit.fund_project(fx.project));
        assert!(result.is_err());
    }

    #[test]
    fn funding_requires_balance() {
        let store = LedgerStore::new();
        let client = UserId::new();
        let freelancer = UserId::new();
        let result = store.transact(|unit| {
            unit.open_wallet(client, usd())?;
            unit.open_wallet(freelancer, usd())?;
            let project = unit.create_project(
                client,
                freelancer,
                usd(),
                Amount::from_minor(10_000),
                14,
                drafts(&[10_000]),
                Actor::Client(client),
            )?;
            unit.fund_project(project)
        });
        assert!(matches!(
            result.unwrap_err(),
            LedgerError::InsufficientFunds { .. }
        ));
    }

    #[test]
    fn settlement_moves_funds_and_fees() {
        let fx = funded_project(&[10_000]);
        let milestone = fx.milestones[0];
        submit(&fx, milestone);
        fx.store
            .transact(|unit| unit.approve_milestone(milestone, Actor::Client(fx.client)))
            .unwrap();

        settle_release(&fx, milestone, 10_000);

        fx.store.read(|view| {
            let client = view.wallet(fx.client).unwrap();
            assert_eq!(client.locked_balance, Amount::ZERO);
            let freelancer = view.wallet(fx.freelancer).unwrap();
            // Default schedule: 10% platform fee.
            assert_eq!(freelancer.balance, Amount::from_minor(9_000));
            assert_eq!(view.available_escrow(fx.project).unwrap(), Amount::ZERO);
        });
    }

    #[test]
    fn duplicate_settlement_is_detected() {
        let fx = funded_project(&[10_000]);
        let milestone = fx.milestones[0];
        submit(&fx, milestone);
        fx.store
            .transact(|unit| unit.approve_milestone(milestone, Actor::Client(fx.client)))
            .unwrap();
        settle_release(&fx, milestone, 10_000);

        let key = SettlementKey::Milestone {
            milestone_id: milestone,
            tx_type: TransactionType::MilestoneRelease,
        };
        let result = fx.store.transact(|unit| {
            unit.begin_settlement(
                key,
                fx.project,
                milestone,
                fx.freelancer,
                Amount::from_minor(10_000),
                None,
            )
        });
        assert!(result.unwrap_err().is_duplicate_settlement());

        // Exactly one completed release and one wallet credit.
        fx.store.read(|view| {
            let releases: Vec<_> = view
                .project_transactions(fx.project)
                .into_iter()
                .filter(|t| t.tx_type == TransactionType::MilestoneRelease)
                .collect();
            assert_eq!(releases.len(), 1);
            assert_eq!(
                view.wallet(fx.freelancer).unwrap().balance,
                Amount::from_minor(9_000)
            );
        });
    }

    #[test]
    fn escrow_cannot_be_over_released() {
        let fx = funded_project(&[10_000, 20_000]);
        let first = fx.milestones[0];
        submit(&fx, first);
        settle_release(&fx, first, 10_000);

        // A settlement larger than the remaining escrow is rejected.
        let key = SettlementKey::Milestone {
            milestone_id: fx.milestones[1],
            tx_type: TransactionType::MilestoneRelease,
        };
        let result = fx.store.transact(|unit| {
            unit.begin_settlement(
                key,
                fx.project,
                fx.milestones[1],
                fx.freelancer,
                Amount::from_minor(25_000),
                None,
            )
        });
        assert!(matches!(
            result.unwrap_err(),
            LedgerError::InsufficientEscrow { .. }
        ));
    }

    #[test]
    fn pending_settlements_count_against_escrow() {
        let fx = funded_project(&[10_000]);
        let milestone = fx.milestones[0];
        let key = SettlementKey::Milestone {
            milestone_id: milestone,
            tx_type: TransactionType::MilestoneRelease,
        };
        fx.store
            .transact(|unit| {
                unit.begin_settlement(
                    key,
                    fx.project,
                    milestone,
                    fx.freelancer,
                    Amount::from_minor(10_000),
                    None,
                )
            })
            .unwrap();

        // A second, different settlement cannot claim escrow already
        // committed to the pending one.
        let dispute_key = SettlementKey::Dispute {
            dispute_id: DisputeId::new(),
            recipient: fx.client,
            tx_type: TransactionType::DisputeRefund,
        };
        let result = fx.store.transact(|unit| {
            unit.begin_settlement(
                dispute_key,
                fx.project,
                milestone,
                fx.client,
                Amount::from_minor(1_000),
                None,
            )
        });
        assert!(matches!(
            result.unwrap_err(),
            LedgerError::InsufficientEscrow { .. }
        ));
    }

    #[test]
    fn begin_settlement_reuses_pending_row() {
        let fx = funded_project(&[10_000]);
        let milestone = fx.milestones[0];
        let key = SettlementKey::Milestone {
            milestone_id: milestone,
            tx_type: TransactionType::MilestoneRelease,
        };
        let first = fx
            .store
            .transact(|unit| {
                unit.begin_settlement(
                    key,
                    fx.project,
                    milestone,
                    fx.freelancer,
                    Amount::from_minor(10_000),
                    None,
                )
            })
            .unwrap();
        let second = fx
            .store
            .transact(|unit| {
                unit.begin_settlement(
                    key,
                    fx.project,
                    milestone,
                    fx.freelancer,
                    Amount::from_minor(10_000),
                    None,
                )
            })
            .unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn failed_settlement_reopens_and_completes_once() {
        let fx = funded_project(&[10_000]);
        let milestone = fx.milestones[0];
        let key = SettlementKey::Milestone {
            milestone_id: milestone,
            tx_type: TransactionType::MilestoneRelease,
        };
        let txn = fx
            .store
            .transact(|unit| {
                unit.begin_settlement(
                    key,
                    fx.project,
                    milestone,
                    fx.freelancer,
                    Amount::from_minor(10_000),
                    None,
                )
            })
            .unwrap();
        fx.store
            .transact(|unit| unit.fail_settlement(txn, "rail timeout"))
            .unwrap();
        fx.store.read(|view| {
            assert_eq!(view.transaction(txn).unwrap().status, TxStatus::Failed);
            // No wallet moved.
            assert_eq!(view.wallet(fx.freelancer).unwrap().balance, Amount::ZERO);
        });

        // Retry: reopen the same row, then complete.
        let reopened = fx
            .store
            .transact(|unit| {
                unit.begin_settlement(
                    key,
                    fx.project,
                    milestone,
                    fx.freelancer,
                    Amount::from_minor(10_000),
                    None,
                )
            })
            .unwrap();
        assert_eq!(reopened, txn);
        fx.store
            .transact(|unit| unit.complete_settlement(txn, Some("cap_2".to_string())))
            .unwrap();
        fx.store.read(|view| {
            assert_eq!(view.transaction(txn).unwrap().status, TxStatus::Completed);
            assert_eq!(
                view.wallet(fx.freelancer).unwrap().balance,
                Amount::from_minor(9_000)
            );
        });
    }

    #[test]
    fn approve_rejects_existing_settlement() {
        let fx = funded_project(&[10_000]);
        let milestone = fx.milestones[0];
        submit(&fx, milestone);
        settle_release(&fx, milestone, 10_000);

        let result = fx
            .store
            .transact(|unit| unit.approve_milestone(milestone, Actor::Client(fx.client)));
        assert!(result.unwrap_err().is_duplicate_settlement());
    }

    #[test]
    fn dispute_flow_with_resolution_validation() {
        let fx = funded_project(&[10_000]);
        let milestone = fx.milestones[0];
        submit(&fx, milestone);

        let dispute = fx
            .store
            .transact(|unit| {
                unit.open_dispute(
                    milestone,
                    fx.client,
                    "Not what we agreed".to_string(),
                    vec![],
                    Actor::Client(fx.client),
                )
            })
            .unwrap();

        fx.store.read(|view| {
            assert_eq!(
                view.milestone(milestone).unwrap().status,
                crate::milestone::MilestoneStatus::Disputed
            );
            assert_eq!(
                view.dispute(dispute).unwrap().status,
                DisputeStatus::PendingReview
            );
        });

        // A second dispute by the same party is rejected.
        let result = fx.store.transact(|unit| {
            unit.open_dispute(
                milestone,
                fx.client,
                "again".to_string(),
                vec![],
                Actor::Client(fx.client),
            )
        });
        assert!(matches!(
            result.unwrap_err(),
            LedgerError::DisputeAlreadyOpen { .. }
        ));

        // Route to mediation, then resolve with a split that does not
        // sum to the milestone amount: rejected, state unchanged.
        fx.store
            .transact(|unit| {
                unit.apply_triage(
                    dispute,
                    TriageReport {
                        schema_version: 1,
                        confidence: 0.8,
                        key_issues: vec![],
                        recommended_to_freelancer: Amount::from_minor(5_000),
                        recommended_to_client: Amount::from_minor(5_000),
                        reasoning: "even split".to_string(),
                        generated_at: Utc::now(),
                    },
                    DisputeStatus::InMediation,
                )
            })
            .unwrap();

        let bad = Resolution {
            schema_version: RESOLUTION_SCHEMA_VERSION,
            decision: ResolutionDecision::Split,
            amount_to_freelancer: Amount::from_minor(6_000),
            amount_to_client: Amount::from_minor(3_000),
            decided_by: Actor::System,
            decided_at: Utc::now(),
        };
        let result = fx.store.transact(|unit| unit.resolve_dispute(dispute, bad));
        assert!(matches!(
            result.unwrap_err(),
            LedgerError::InvalidResolution { .. }
        ));
        fx.store.read(|view| {
            assert_eq!(
                view.dispute(dispute).unwrap().status,
                DisputeStatus::InMediation
            );
        });

        let good = Resolution {
            schema_version: RESOLUTION_SCHEMA_VERSION,
            decision: ResolutionDecision::Split,
            amount_to_freelancer: Amount::from_minor(6_000),
            amount_to_client: Amount::from_minor(4_000),
            decided_by: Actor::System,
            decided_at: Utc::now(),
        };
        fx.store
            .transact(|unit| unit.resolve_dispute(dispute, good))
            .unwrap();
        fx.store.read(|view| {
            assert_eq!(
                view.dispute(dispute).unwrap().status,
                DisputeStatus::Resolved
            );
        });
    }

    #[test]
    fn dispute_settlement_splits_escrow() {
        let fx = funded_project(&[10_000]);
        let milestone = fx.milestones[0];
        submit(&fx, milestone);
        let dispute = fx
            .store
            .transact(|unit| {
                unit.open_dispute(
                    milestone,
                    fx.client,
                    "disagreement".to_string(),
                    vec![],
                    Actor::Client(fx.client),
                )
            })
            .unwrap();

        // Freelancer leg.
        fx.store
            .transact(|unit| {
                let txn = unit.begin_settlement(
                    SettlementKey::Dispute {
                        dispute_id: dispute,
                        recipient: fx.freelancer,
                        tx_type: TransactionType::DisputePayment,
                    },
                    fx.project,
                    milestone,
                    fx.freelancer,
                    Amount::from_minor(6_000),
                    None,
                )?;
                unit.complete_settlement(txn, None)
            })
            .unwrap();

        // Client leg.
        fx.store
            .transact(|unit| {
                let txn = unit.begin_settlement(
                    SettlementKey::Dispute {
                        dispute_id: dispute,
                        recipient: fx.client,
                        tx_type: TransactionType::DisputeRefund,
                    },
                    fx.project,
                    milestone,
                    fx.client,
                    Amount::from_minor(4_000),
                    None,
                )?;
                unit.complete_settlement(txn, None)
            })
            .unwrap();

        fx.store.read(|view| {
            assert_eq!(view.available_escrow(fx.project).unwrap(), Amount::ZERO);
            let client = view.wallet(fx.client).unwrap();
            assert_eq!(client.balance, Amount::from_minor(4_000));
            assert_eq!(client.locked_balance, Amount::ZERO);
            let freelancer = view.wallet(fx.freelancer).unwrap();
            // 10% platform fee on the dispute payment leg.
            assert_eq!(freelancer.balance, Amount::from_minor(5_400));
        });
    }

    #[test]
    fn admin_adjust_respects_escrow() {
        let fx = funded_project(&[10_000]);
        let result = fx.store.transact(|unit| {
            unit.admin_adjust(
                fx.project,
                None,
                fx.freelancer,
                Amount::from_minor(15_000),
                "over-credit".to_string(),
                Actor::Admin(UserId::new()),
            )
        });
        assert!(matches!(
            result.unwrap_err(),
            LedgerError::InsufficientEscrow { .. }
        ));

        fx.store
            .transact(|unit| {
                unit.admin_adjust(
                    fx.project,
                    Some(fx.milestones[0]),
                    fx.freelancer,
                    Amount::from_minor(10_000),
                    "manual remediation".to_string(),
                    Actor::Admin(UserId::new()),
                )
            })
            .unwrap();
        fx.store.read(|view| {
            assert_eq!(
                view.wallet(fx.freelancer).unwrap().balance,
                Amount::from_minor(10_000)
            );
            assert_eq!(view.available_escrow(fx.project).unwrap(), Amount::ZERO);
        });
    }

    #[test]
    fn audit_trail_correlates_by_trace() {
        let fx = funded_project(&[10_000]);
        let records = fx.store.read(|view| view.audit_trail());
        assert!(!records.is_empty());
        // The funding fixture ran as one unit; its records share a trace.
        let trace = records.last().unwrap().trace_id;
        let correlated = records.iter().filter(|r| r.trace_id == trace).count();
        assert!(correlated >= 2);
    }

    #[test]
    fn outbox_records_and_marks_delivery() {
        let fx = funded_project(&[10_000]);
        let pending = fx.store.read(|view| view.undelivered_events(10));
        assert!(!pending.is_empty());
        let first = pending[0].clone();
        fx.store.mark_event_delivered(first.id);
        let still_pending = fx.store.read(|view| view.undelivered_events(10));
        assert!(still_pending.iter().all(|ev| ev.id != first.id));
    }

    #[test]
    fn auto_approval_scan_respects_window() {
        let fx = funded_project(&[10_000]);
        let milestone = fx.milestones[0];
        submit(&fx, milestone);

        let submitted_at = fx
            .store
            .read(|view| view.milestone(milestone).unwrap().submitted_at.unwrap());
        fx.store.read(|view| {
            assert!(view
                .milestones_due_for_auto_approval(submitted_at + chrono::Duration::days(13))
                .is_empty());
            assert_eq!(
                view.milestones_due_for_auto_approval(submitted_at + chrono::Duration::days(14)),
                vec![milestone]
            );
        });
    }

    #[test]
    fn wallet_balance_identity_holds() {
        let fx = funded_project(&[10_000]);
        let milestone = fx.milestones[0];
        submit(&fx, milestone);
        settle_release(&fx, milestone, 10_000);
        fx.store
            .transact(|unit| {
                unit.deposit(fx.freelancer, Amount::from_minor(500), None)?;
                unit.withdraw(fx.freelancer, Amount::from_minor(2_000))?;
                Ok(())
            })
            .unwrap();

        fx.store.read(|view| {
            for owner in [fx.client, fx.freelancer] {
                let wallet = view.wallet(owner).unwrap();
                let mut adjustments: i64 = 0;
                for tx in view.wallet_transactions() {
                    if tx.status != TxStatus::Completed {
                        continue;
                    }
                    let signed = match tx.tx_type {
                        WalletTxType::Deposit | WalletTxType::Withdrawal => continue,
                        _ => {
                            let mut delta = 0;
                            if tx.to_wallet == Some(wallet.id) {
                                delta += tx.amount.minor()
                                    - tx.fees.total().unwrap().minor();
                            }
                            if tx.from_wallet == Some(wallet.id) {
                                delta -= tx.amount.minor();
                            }
                            delta
                        }
                    };
                    adjustments += signed;
                }
                let expected = wallet.total_deposited.minor() - wallet.total_withdrawn.minor()
                    + adjustments;
                // The identity counts locked funds as part of the user's
                // holdings: balance + locked = deposits - withdrawals + net
                // adjustments.
                assert_eq!(
                    wallet.balance.minor() + wallet.locked_balance.minor(),
                    expected,
                    "identity violated for {}",
                    wallet.id
                );
                assert!(wallet.balance.minor() >= 0);
            }
        });
    }

    #[test]
    fn frozen_wallet_blocks_deposits() {
        let store = LedgerStore::new();
        let user = UserId::new();
        store
            .transact(|unit| {
                unit.open_wallet(user, usd())?;
                unit.freeze_wallet(user, Actor::Admin(UserId::new()))
            })
            .unwrap();
        let result = store.transact(|unit| unit.deposit(user, Amount::from_minor(100), None));
        assert!(matches!(
            result.unwrap_err(),
            LedgerError::WalletUnavailable { .. }
        ));
    }

    #[test]
    fn second_wallet_for_user_rejected() {
        let store = LedgerStore::new();
        let user = UserId::new();
        store
            .transact(|unit| unit.open_wallet(user, usd()))
            .unwrap();
        let result = store.transact(|unit| unit.open_wallet(user, usd()));
        assert!(matches!(result.unwrap_err(), LedgerError::WalletExists { .. }));
    }

    #[test]
    fn add_milestone_grows_budget_until_funding() {
        let store = LedgerStore::new();
        let client = UserId::new();
        let freelancer = UserId::new();
        let project = store
            .transact(|unit| {
                unit.open_wallet(client, usd())?;
                unit.open_wallet(freelancer, usd())?;
                unit.create_project(
                    client,
                    freelancer,
                    usd(),
                    Amount::from_minor(10_000),
                    14,
                    drafts(&[10_000]),
                    Actor::Client(client),
                )
            })
            .unwrap();
        store
            .transact(|unit| {
                unit.add_milestone(
                    project,
                    MilestoneDraft {
                        title: "Extra scope".to_string(),
                        amount: Amount::from_minor(5_000),
                        deadline: None,
                        acceptance_criteria: "Agreed in writing".to_string(),
                    },
                    Actor::Client(client),
                )
            })
            .unwrap();
        store.read(|view| {
            let p = view.project(project).unwrap();
            assert_eq!(p.budget, Amount::from_minor(15_000));
            assert_eq!(p.milestones.len(), 2);
        });

        // After funding, the plan is closed.
        store
            .transact(|unit| {
                unit.deposit(client, Amount::from_minor(15_000), None)?;
                unit.fund_project(project)?;
                Ok(())
            })
            .unwrap();
        let result = store.transact(|unit| {
            unit.add_milestone(
                project,
                MilestoneDraft {
                    title: "Too late".to_string(),
                    amount: Amount::from_minor(5_000),
                    deadline: None,
                    acceptance_criteria: "n/a".to_string(),
                },
                Actor::Client(client),
            )
        });
        assert!(result.is_err());
    }
}
