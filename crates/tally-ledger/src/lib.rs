//! # tally-ledger — Ledger Store
//!
//! Durable relational state for the Tally escrow stack and the atomic
//! write contract everything above it relies on:
//!
//! - **Wallets** ([`wallet`]): per-user balances mutated only by applying
//!   completed wallet transactions.
//!
//! - **Transactions** ([`transaction`]): project-facing escrow entries
//!   with the settlement idempotency key.
//!
//! - **Projects** ([`project`]) and **Milestones** ([`milestone`]): the
//!   milestone lifecycle state machine and its transition log.
//!
//! - **Disputes** ([`dispute`]): the dispute lifecycle state machine,
//!   triage reports, and resolutions.
//!
//! - **Audit** ([`audit`]) and **Outbox** ([`outbox`]): append-only
//!   records written in the same atomic unit as every change.
//!
//! - **Store** ([`store`]): [`LedgerStore::transact`] — stage, validate,
//!   commit-or-discard; the only way ledger state changes.

pub mod audit;
pub mod dispute;
pub mod error;
pub mod milestone;
pub mod outbox;
pub mod project;
pub mod store;
pub mod transaction;
pub mod wallet;

// Error types
pub use error::LedgerError;

// Wallets
pub use wallet::{Wallet, WalletStatus, WalletTransaction, WalletTxType};

// Project-facing transactions
pub use transaction::{SettlementKey, Transaction, TransactionType, TxStatus};

// Projects and milestones
pub use milestone::{
    Deliverable, Milestone, MilestoneDraft, MilestoneStatus, MilestoneTransition, RevisionRequest,
    MIN_MILESTONE_AMOUNT,
};
pub use project::{Project, DEFAULT_AUTO_APPROVE_DAYS};

// Disputes
pub use dispute::{
    Dispute, DisputeMessage, DisputeRole, DisputeStatus, DisputeTransition, EvidenceRef,
    Resolution, ResolutionDecision, ResolutionPhase, TriageReport, RESOLUTION_SCHEMA_VERSION,
    TRIAGE_SCHEMA_VERSION,
};

// Audit and outbox
pub use audit::AuditRecord;
pub use outbox::{DeliveryStatus, OutboxEvent};

// Store
pub use store::{FeeSchedule, LedgerStore, LedgerUnit, LedgerView};
