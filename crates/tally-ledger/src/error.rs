//! # Ledger Error Types
//!
//! Structured error hierarchy for the ledger store. Every variant carries
//! diagnostic context: the entity involved, the state at the time of
//! failure, and the amounts in play, so operators can act on an error
//! message without correlating logs.
//!
//! Two variants deserve special handling by callers:
//!
//! - [`LedgerError::DuplicateSettlement`] means a settlement with the same
//!   idempotency key already completed. A settlement worker receiving this
//!   must treat the job as already done and report success, not failure.
//! - [`LedgerError::InsufficientEscrow`] means a release would overdraw a
//!   project's escrow. It is an invariant violation, never retried.

use thiserror::Error;

use tally_core::CoreError;

/// Errors arising from ledger operations.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// A release would overdraw the project's escrow balance.
    #[error("insufficient escrow for {project_id}: requested {requested}, available {available}")]
    InsufficientEscrow {
        /// The project whose escrow would be overdrawn.
        project_id: String,
        /// The requested release amount (minor units).
        requested: i64,
        /// The escrow balance available (minor units).
        available: i64,
    },

    /// A settlement with this idempotency key has already completed.
    ///
    /// Callers must no-op and report success: the money already moved
    /// exactly once.
    #[error("settlement already completed for key {key}")]
    DuplicateSettlement {
        /// Display form of the settlement idempotency key.
        key: String,
    },

    /// A wallet debit exceeds the available balance.
    #[error("insufficient funds in {wallet_id}: requested {requested}, available {available}")]
    InsufficientFunds {
        /// The wallet being debited.
        wallet_id: String,
        /// The requested debit (minor units).
        requested: i64,
        /// The available balance (minor units).
        available: i64,
    },

    /// The wallet is frozen or closed and cannot take part in transfers.
    #[error("wallet {wallet_id} is {status} and cannot be used")]
    WalletUnavailable {
        /// The wallet identifier.
        wallet_id: String,
        /// The wallet status blocking the operation.
        status: String,
    },

    /// A wallet already exists for this user (the mapping is 1:1).
    #[error("user {user_id} already has a wallet")]
    WalletExists {
        /// The user identifier.
        user_id: String,
    },

    /// The referenced entity does not exist in the store.
    #[error("unknown {kind}: {id}")]
    UnknownEntity {
        /// The entity kind ("wallet", "project", "milestone", ...).
        kind: &'static str,
        /// Display form of the identifier.
        id: String,
    },

    /// Attempted state transition is not valid from the current state.
    #[error("invalid {entity} transition from {from} to {to}: {reason}")]
    InvalidTransition {
        /// The entity kind ("milestone", "dispute", "transaction").
        entity: &'static str,
        /// The current state name.
        from: String,
        /// The attempted target state name.
        to: String,
        /// Human-readable reason for the rejection.
        reason: String,
    },

    /// The entity is in a terminal state and accepts no further transitions.
    #[error("{entity} {id} is in terminal state {state}")]
    TerminalState {
        /// The entity kind.
        entity: &'static str,
        /// Display form of the identifier.
        id: String,
        /// The terminal state name.
        state: String,
    },

    /// A monetary amount failed validation.
    #[error("invalid amount: {0}")]
    InvalidAmount(String),

    /// The milestone plan does not sum to the project budget.
    #[error("milestone amounts sum to {milestone_total}, project budget is {budget}")]
    BudgetMismatch {
        /// The declared project budget (minor units).
        budget: i64,
        /// The sum of the milestone amounts (minor units).
        milestone_total: i64,
    },

    /// An active dispute already exists for this milestone and party.
    #[error("dispute already open for {milestone_id} raised by {raised_by}")]
    DisputeAlreadyOpen {
        /// The disputed milestone.
        milestone_id: String,
        /// The party that already raised a dispute.
        raised_by: String,
    },

    /// A resolution split does not sum to the disputed milestone amount.
    #[error("resolution split {split_total} does not equal milestone amount {milestone_amount}")]
    InvalidResolution {
        /// The disputed milestone amount (minor units).
        milestone_amount: i64,
        /// The sum of the proposed split (minor units).
        split_total: i64,
    },

    /// The currencies of the two sides of a transfer do not match.
    #[error("currency mismatch: expected {expected}, got {got}")]
    CurrencyMismatch {
        /// The expected currency code.
        expected: String,
        /// The provided currency code.
        got: String,
    },

    /// Arithmetic or validation failure bubbled up from core types.
    #[error(transparent)]
    Core(#[from] CoreError),
}

impl LedgerError {
    /// Whether this error is the duplicate-settlement signal that workers
    /// convert into a successful no-op.
    pub fn is_duplicate_settlement(&self) -> bool {
        matches!(self, Self::DuplicateSettlement { .. })
    }
}
