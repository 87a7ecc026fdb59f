//! # Project-Facing Transactions
//!
//! [`Transaction`] is the escrow-level ledger entry: it records money
//! entering a project's escrow (DEPOSIT) and leaving it (MILESTONE_RELEASE,
//! DISPUTE_PAYMENT, DISPUTE_REFUND, ...). Wallet-level entries live in
//! [`crate::wallet`]; the two ledgers reconcile through the store.
//!
//! A transaction's status moves PENDING → COMPLETED | FAILED exactly once.
//! COMPLETED may later become REFUNDED, but only through a new reversing
//! transaction plus a status update; amounts are never mutated.
//!
//! [`SettlementKey`] is the natural idempotency key settlement workers use
//! to detect re-delivered jobs: one key corresponds to at most one
//! COMPLETED transaction, ever.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{Amount, CurrencyCode, DisputeId, MilestoneId, ProjectId, TransactionId, UserId};

use crate::error::LedgerError;

// ── Status ─────────────────────────────────────────────────────────────

/// The lifecycle status of a ledger transaction (project- or wallet-level).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TxStatus {
    /// Created; settlement has not finished.
    Pending,
    /// Settlement finished and funds moved. Immutable from here on,
    /// except for the REFUNDED marker.
    Completed,
    /// The settlement attempt failed; the row stays open for retry or
    /// manual adjustment.
    Failed,
    /// A completed transaction later reversed by a new transaction.
    Refunded,
}

impl TxStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Completed => "COMPLETED",
            Self::Failed => "FAILED",
            Self::Refunded => "REFUNDED",
        }
    }
}

impl std::fmt::Display for TxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Transaction Type ───────────────────────────────────────────────────

/// Categories of project-facing ledger entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionType {
    /// Client funds entering project escrow.
    Deposit,
    /// Escrow released to the freelancer for an approved milestone.
    MilestoneRelease,
    /// Escrow returned to the client by a dispute resolution.
    DisputeRefund,
    /// Escrow paid to the freelancer by a dispute resolution.
    DisputePayment,
    /// Manual correction by an operator.
    AdminAdjustment,
    /// Escrow returned to the client outside a dispute.
    Refund,
    /// A fee charged against escrow.
    Fee,
}

impl TransactionType {
    /// The canonical string name of this transaction type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::MilestoneRelease => "MILESTONE_RELEASE",
            Self::DisputeRefund => "DISPUTE_REFUND",
            Self::DisputePayment => "DISPUTE_PAYMENT",
            Self::AdminAdjustment => "ADMIN_ADJUSTMENT",
            Self::Refund => "REFUND",
            Self::Fee => "FEE",
        }
    }

    /// Whether this type moves money out of project escrow.
    ///
    /// Outflows are the terms of the escrow non-negativity check:
    /// deposits in, everything else out.
    pub fn is_escrow_outflow(&self) -> bool {
        !matches!(self, Self::Deposit)
    }
}

impl std::fmt::Display for TransactionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Settlement Key ─────────────────────────────────────────────────────

/// Natural idempotency key for a settlement.
///
/// A re-delivered settlement job recomputes its key and finds the
/// COMPLETED transaction from the first delivery, turning the duplicate
/// into a no-op. Milestone releases are keyed by milestone and type;
/// dispute splits are keyed by dispute, recipient, and type so the two
/// legs of one resolution stay independent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SettlementKey {
    /// One settlement per milestone and transaction type.
    Milestone {
        milestone_id: MilestoneId,
        tx_type: TransactionType,
    },
    /// One settlement per dispute, recipient, and transaction type.
    Dispute {
        dispute_id: DisputeId,
        recipient: UserId,
        tx_type: TransactionType,
    },
}

impl std::fmt::Display for SettlementKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Milestone {
                milestone_id,
                tx_type,
            } => write!(f, "{milestone_id}/{tx_type}"),
            Self::Dispute {
                dispute_id,
                recipient,
                tx_type,
            } => write!(f, "{dispute_id}/{recipient}/{tx_type}"),
        }
    }
}

// ── Transaction ────────────────────────────────────────────────────────

/// A project-facing ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique transaction identifier.
    pub id: TransactionId,
    /// The project whose escrow this entry affects.
    pub project_id: ProjectId,
    /// The milestone being settled, if any.
    pub milestone_id: Option<MilestoneId>,
    /// The dispute being settled, if any.
    pub dispute_id: Option<DisputeId>,
    /// Category of the entry.
    pub tx_type: TransactionType,
    /// Amount in minor units. Always non-negative.
    pub amount: Amount,
    /// Currency of the amount.
    pub currency: CurrencyCode,
    /// The user receiving funds, if the entry pays someone out.
    pub recipient: Option<UserId>,
    /// Payment rail identifier ("stripe", "manual", ...).
    pub provider: Option<String>,
    /// Provider-side transaction reference from a successful capture.
    pub provider_ref: Option<String>,
    /// Current status.
    pub status: TxStatus,
    /// Last settlement failure, kept for operator diagnosis.
    pub last_error: Option<String>,
    /// When the entry was created (UTC).
    pub created_at: DateTime<Utc>,
    /// When the entry completed (UTC).
    pub completed_at: Option<DateTime<Utc>>,
}

impl Transaction {
    /// Create a new PENDING transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] if the amount is not
    /// strictly positive.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        project_id: ProjectId,
        milestone_id: Option<MilestoneId>,
        dispute_id: Option<DisputeId>,
        tx_type: TransactionType,
        amount: Amount,
        currency: CurrencyCode,
        recipient: Option<UserId>,
        provider: Option<String>,
    ) -> Result<Self, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "transaction amount must be positive, got {amount}"
            )));
        }
        Ok(Self {
            id: TransactionId::new(),
            project_id,
            milestone_id,
            dispute_id,
            tx_type,
            amount,
            currency,
            recipient,
            provider,
            provider_ref: None,
            status: TxStatus::Pending,
            last_error: None,
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    /// The settlement idempotency key this entry answers to, if it is a
    /// settlement (deposits and fees have no key).
    pub fn settlement_key(&self) -> Option<SettlementKey> {
        match self.tx_type {
            TransactionType::MilestoneRelease => self.milestone_id.map(|milestone_id| {
                SettlementKey::Milestone {
                    milestone_id,
                    tx_type: self.tx_type,
                }
            }),
            TransactionType::DisputePayment | TransactionType::DisputeRefund => {
                match (self.dispute_id, self.recipient) {
                    (Some(dispute_id), Some(recipient)) => Some(SettlementKey::Dispute {
                        dispute_id,
                        recipient,
                        tx_type: self.tx_type,
                    }),
                    _ => None,
                }
            }
            _ => None,
        }
    }

    /// Mark the transaction COMPLETED with the provider's reference.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless the transaction
    /// is PENDING.
    pub fn complete(&mut self, provider_ref: Option<String>) -> Result<(), LedgerError> {
        if self.status != TxStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                entity: "transaction",
                from: self.status.as_str().to_string(),
                to: TxStatus::Completed.as_str().to_string(),
                reason: "only a pending transaction can complete".to_string(),
            });
        }
        self.status = TxStatus::Completed;
        self.provider_ref = provider_ref;
        self.completed_at = Some(Utc::now());
        self.last_error = None;
        Ok(())
    }

    /// Mark the transaction FAILED, keeping the error for operators.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless the transaction
    /// is PENDING.
    pub fn fail(&mut self, error: impl Into<String>) -> Result<(), LedgerError> {
        if self.status != TxStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                entity: "transaction",
                from: self.status.as_str().to_string(),
                to: TxStatus::Failed.as_str().to_string(),
                reason: "only a pending transaction can fail".to_string(),
            });
        }
        self.status = TxStatus::Failed;
        self.last_error = Some(error.into());
        Ok(())
    }

    /// Reopen a FAILED transaction for another settlement attempt.
    ///
    /// The retry path reuses the original row so one settlement key maps
    /// to one transaction across all attempts.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless the transaction
    /// is FAILED.
    pub fn reopen(&mut self) -> Result<(), LedgerError> {
        if self.status != TxStatus::Failed {
            return Err(LedgerError::InvalidTransition {
                entity: "transaction",
                from: self.status.as_str().to_string(),
                to: TxStatus::Pending.as_str().to_string(),
                reason: "only a failed transaction can be reopened".to_string(),
            });
        }
        self.status = TxStatus::Pending;
        Ok(())
    }

    /// Mark a COMPLETED transaction REFUNDED.
    ///
    /// The caller must have recorded the reversing transaction in the
    /// same atomic unit; this only flips the marker.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless the transaction
    /// is COMPLETED.
    pub fn mark_refunded(&mut self) -> Result<(), LedgerError> {
        if self.status != TxStatus::Completed {
            return Err(LedgerError::InvalidTransition {
                entity: "transaction",
                from: self.status.as_str().to_string(),
                to: TxStatus::Refunded.as_str().to_string(),
                reason: "only a completed transaction can be refunded".to_string(),
            });
        }
        self.status = TxStatus::Refunded;
        Ok(())
    }
}
