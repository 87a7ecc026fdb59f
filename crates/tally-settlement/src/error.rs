//! # Settlement Error Types
//!
//! The controller-boundary error taxonomy:
//!
//! - `Validation`: bad input, rejected synchronously, never enqueued.
//! - `Ledger`: invariant violations and unknown entities surfaced by the
//!   store; not retried.
//! - `Queue`: the job service refused the enqueue (unknown queue,
//!   draining).
//! - `Serialization`: a payload failed to encode; a programming error
//!   surfaced loudly rather than enqueued broken.

use thiserror::Error;

use tally_ledger::LedgerError;
use tally_queue::QueueError;

/// Errors from the settlement controllers.
#[derive(Error, Debug)]
pub enum SettlementError {
    /// Input failed validation before any state change.
    #[error("validation: {0}")]
    Validation(String),

    /// The ledger rejected the operation.
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    /// The queue service rejected the enqueue.
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// A job payload failed to serialize.
    #[error("payload serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SettlementError {
    /// Build a validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
