//! # Wallets and Wallet Transactions
//!
//! One wallet per user. A wallet's balances are never assigned directly:
//! the only mutation path is [`Wallet::apply_completed`], called by the
//! store when a [`WalletTransaction`] reaches COMPLETED inside an atomic
//! unit. This single-writer-via-ledger-event discipline is the core
//! defense against lost updates under concurrent settlement.
//!
//! `locked_balance` tracks the portion of a client's funds committed to
//! project escrow and not yet released or refunded.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use tally_core::{Amount, CurrencyCode, FeeBreakdown, UserId, WalletId, WalletTransactionId};

use crate::error::LedgerError;
use crate::transaction::TxStatus;

// ── Wallet Status ──────────────────────────────────────────────────────

/// The administrative status of a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletStatus {
    /// Wallet can send and receive funds.
    Active,
    /// Wallet is frozen by an operator; all transfers are blocked.
    Frozen,
    /// Wallet is closed. Terminal.
    Closed,
}

impl WalletStatus {
    /// The canonical string name of this status.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "ACTIVE",
            Self::Frozen => "FROZEN",
            Self::Closed => "CLOSED",
        }
    }

    /// Whether the wallet can take part in new transfers.
    pub fn is_usable(&self) -> bool {
        matches!(self, Self::Active)
    }
}

impl std::fmt::Display for WalletStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Wallet Transaction Type ────────────────────────────────────────────

/// Categories of balance-affecting wallet events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WalletTxType {
    /// External funds entering a wallet.
    Deposit,
    /// Funds leaving the platform to an external destination.
    Withdrawal,
    /// Wallet-to-wallet transfer.
    Transfer,
    /// Client funds moving from spendable balance into project escrow.
    ProjectFunds,
    /// Escrowed funds returning to the client's spendable balance.
    ProjectRefund,
    /// The client-side leg of a settlement: escrowed funds leaving the
    /// client's locked balance.
    MilestonePayment,
    /// The freelancer-side leg of a settlement: earnings arriving, net
    /// of fees.
    MilestoneIncome,
    /// A refund outside the project escrow flow.
    Refund,
    /// A fee charged to a wallet.
    Fee,
    /// Manual correction by an operator.
    AdminAdjustment,
}

impl WalletTxType {
    /// The canonical string name of this type.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Deposit => "DEPOSIT",
            Self::Withdrawal => "WITHDRAWAL",
            Self::Transfer => "TRANSFER",
            Self::ProjectFunds => "PROJECT_FUNDS",
            Self::ProjectRefund => "PROJECT_REFUND",
            Self::MilestonePayment => "MILESTONE_PAYMENT",
            Self::MilestoneIncome => "MILESTONE_INCOME",
            Self::Refund => "REFUND",
            Self::Fee => "FEE",
            Self::AdminAdjustment => "ADMIN_ADJUSTMENT",
        }
    }
}

impl std::fmt::Display for WalletTxType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── Wallet Transaction ─────────────────────────────────────────────────

/// An immutable-once-completed record of a balance-affecting event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WalletTransaction {
    /// Unique identifier.
    pub id: WalletTransactionId,
    /// Category of the event.
    pub tx_type: WalletTxType,
    /// Current status. PENDING → COMPLETED | FAILED exactly once.
    pub status: TxStatus,
    /// Gross amount in minor units. Always positive.
    pub amount: Amount,
    /// Currency of the amount.
    pub currency: CurrencyCode,
    /// The wallet debited, if any.
    pub from_wallet: Option<WalletId>,
    /// The wallet credited, if any.
    pub to_wallet: Option<WalletId>,
    /// Fee breakdown deducted from the credited side.
    pub fees: FeeBreakdown,
    /// Free-form linkage reference (provider id, project transaction id).
    pub reference: Option<String>,
    /// The completed transaction this one reverses, if it is a reversal.
    pub reversal_of: Option<WalletTransactionId>,
    /// When the event was created (UTC).
    pub created_at: DateTime<Utc>,
    /// When the event completed (UTC).
    pub completed_at: Option<DateTime<Utc>>,
}

impl WalletTransaction {
    /// Create a new PENDING wallet transaction.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidAmount`] if the amount is not
    /// positive, the fees exceed the amount, or the same wallet appears
    /// on both sides.
    pub fn new(
        tx_type: WalletTxType,
        amount: Amount,
        currency: CurrencyCode,
        from_wallet: Option<WalletId>,
        to_wallet: Option<WalletId>,
        fees: FeeBreakdown,
    ) -> Result<Self, LedgerError> {
        if !amount.is_positive() {
            return Err(LedgerError::InvalidAmount(format!(
                "wallet transaction amount must be positive, got {amount}"
            )));
        }
        let fee_total = fees.total()?;
        if fee_total.is_negative() || fee_total > amount {
            return Err(LedgerError::InvalidAmount(format!(
                "fees {fee_total} exceed transaction amount {amount}"
            )));
        }
        if from_wallet.is_some() && from_wallet == to_wallet {
            return Err(LedgerError::InvalidAmount(
                "a wallet cannot transact with itself".to_string(),
            ));
        }
        Ok(Self {
            id: WalletTransactionId::new(),
            tx_type,
            status: TxStatus::Pending,
            amount,
            currency,
            from_wallet,
            to_wallet,
            fees,
            reference: None,
            reversal_of: None,
            created_at: Utc::now(),
            completed_at: None,
        })
    }

    /// Mark the transaction COMPLETED.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless PENDING.
    pub fn complete(&mut self) -> Result<(), LedgerError> {
        if self.status != TxStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                entity: "wallet transaction",
                from: self.status.as_str().to_string(),
                to: TxStatus::Completed.as_str().to_string(),
                reason: "only a pending wallet transaction can complete".to_string(),
            });
        }
        self.status = TxStatus::Completed;
        self.completed_at = Some(Utc::now());
        Ok(())
    }

    /// Mark the transaction FAILED.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless PENDING.
    pub fn fail(&mut self) -> Result<(), LedgerError> {
        if self.status != TxStatus::Pending {
            return Err(LedgerError::InvalidTransition {
                entity: "wallet transaction",
                from: self.status.as_str().to_string(),
                to: TxStatus::Failed.as_str().to_string(),
                reason: "only a pending wallet transaction can fail".to_string(),
            });
        }
        self.status = TxStatus::Failed;
        Ok(())
    }

    /// Mark a COMPLETED transaction REFUNDED, linking the reversal.
    ///
    /// Amounts are never mutated; the reversal is a separate transaction
    /// recorded in the same atomic unit.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] unless COMPLETED.
    pub fn mark_refunded(&mut self, reversal: WalletTransactionId) -> Result<(), LedgerError> {
        if self.status != TxStatus::Completed {
            return Err(LedgerError::InvalidTransition {
                entity: "wallet transaction",
                from: self.status.as_str().to_string(),
                to: TxStatus::Refunded.as_str().to_string(),
                reason: "only a completed wallet transaction can be refunded".to_string(),
            });
        }
        self.status = TxStatus::Refunded;
        self.reversal_of = Some(reversal);
        Ok(())
    }

    /// The net amount credited to the receiving wallet (gross minus fees).
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::Core`] on fee arithmetic overflow.
    pub fn net_credit(&self) -> Result<Amount, LedgerError> {
        Ok(self.amount.checked_sub(self.fees.total()?)?)
    }
}

// ── Wallet ─────────────────────────────────────────────────────────────

/// A user's wallet.
///
/// Balance identity: `balance = total_deposited − total_withdrawn +
/// Σ(completed adjustment transactions)`, where adjustments are all
/// completed wallet transactions other than deposits and withdrawals,
/// signed by direction. The store's tests hold this identity over random
/// operation sequences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Wallet {
    /// Unique wallet identifier.
    pub id: WalletId,
    /// The owning user. The mapping is 1:1.
    pub owner: UserId,
    /// Spendable balance in minor units.
    pub balance: Amount,
    /// Funds committed to project escrow, not spendable.
    pub locked_balance: Amount,
    /// Lifetime external deposits.
    pub total_deposited: Amount,
    /// Lifetime external withdrawals.
    pub total_withdrawn: Amount,
    /// Wallet currency.
    pub currency: CurrencyCode,
    /// Administrative status.
    pub status: WalletStatus,
    /// When the wallet was opened (UTC).
    pub created_at: DateTime<Utc>,
    /// When the wallet last changed (UTC).
    pub updated_at: DateTime<Utc>,
}

impl Wallet {
    /// Open a new, empty, active wallet for a user.
    pub fn open(owner: UserId, currency: CurrencyCode) -> Self {
        let now = Utc::now();
        Self {
            id: WalletId::new(),
            owner,
            balance: Amount::ZERO,
            locked_balance: Amount::ZERO,
            total_deposited: Amount::ZERO,
            total_withdrawn: Amount::ZERO,
            currency,
            status: WalletStatus::Active,
            created_at: now,
            updated_at: now,
        }
    }

    /// Apply a COMPLETED wallet transaction to this wallet's balances.
    ///
    /// This is the only code path that mutates balances. The effect
    /// depends on which side of the transaction this wallet is on and on
    /// the transaction type; see [`WalletTxType`].
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] if the transaction is
    /// not COMPLETED, [`LedgerError::InsufficientFunds`] if a debit would
    /// take a balance negative, and [`LedgerError::CurrencyMismatch`] if
    /// the currencies differ.
    pub fn apply_completed(&mut self, tx: &WalletTransaction) -> Result<(), LedgerError> {
        if tx.status != TxStatus::Completed {
            return Err(LedgerError::InvalidTransition {
                entity: "wallet transaction",
                from: tx.status.as_str().to_string(),
                to: "applied".to_string(),
                reason: "only completed wallet transactions apply to balances".to_string(),
            });
        }
        if tx.currency != self.currency {
            return Err(LedgerError::CurrencyMismatch {
                expected: self.currency.to_string(),
                got: tx.currency.to_string(),
            });
        }

        let debiting = tx.from_wallet == Some(self.id);
        let crediting = tx.to_wallet == Some(self.id);
        if !debiting && !crediting {
            return Err(LedgerError::InvalidAmount(format!(
                "wallet {} is not a party to transaction {}",
                self.id, tx.id
            )));
        }

        match tx.tx_type {
            WalletTxType::Deposit if crediting => {
                self.balance = self.balance.checked_add(tx.amount)?;
                self.total_deposited = self.total_deposited.checked_add(tx.amount)?;
            }
            WalletTxType::Withdrawal if debiting => {
                self.debit_balance(tx.amount)?;
                self.total_withdrawn = self.total_withdrawn.checked_add(tx.amount)?;
            }
            WalletTxType::ProjectFunds if debiting => {
                self.debit_balance(tx.amount)?;
                self.locked_balance = self.locked_balance.checked_add(tx.amount)?;
            }
            WalletTxType::ProjectRefund if crediting => {
                self.debit_locked(tx.amount)?;
                self.balance = self.balance.checked_add(tx.amount)?;
            }
            WalletTxType::MilestonePayment if debiting => {
                self.debit_locked(tx.amount)?;
            }
            WalletTxType::MilestoneIncome if crediting => {
                self.balance = self.balance.checked_add(tx.net_credit()?)?;
            }
            WalletTxType::Transfer
            | WalletTxType::Refund
            | WalletTxType::AdminAdjustment => {
                if debiting {
                    self.debit_balance(tx.amount)?;
                }
                if crediting {
                    self.balance = self.balance.checked_add(tx.net_credit()?)?;
                }
            }
            WalletTxType::Fee if debiting => {
                self.debit_balance(tx.amount)?;
            }
            _ => {
                return Err(LedgerError::InvalidAmount(format!(
                    "wallet {} is on the wrong side of a {} transaction",
                    self.id, tx.tx_type
                )));
            }
        }

        self.updated_at = Utc::now();
        Ok(())
    }

    fn debit_balance(&mut self, amount: Amount) -> Result<(), LedgerError> {
        if amount > self.balance {
            return Err(LedgerError::InsufficientFunds {
                wallet_id: self.id.to_string(),
                requested: amount.minor(),
                available: self.balance.minor(),
            });
        }
        self.balance = self.balance.checked_sub(amount)?;
        Ok(())
    }

    fn debit_locked(&mut self, amount: Amount) -> Result<(), LedgerError> {
        if amount > self.locked_balance {
            return Err(LedgerError::InsufficientFunds {
                wallet_id: self.id.to_string(),
                requested: amount.minor(),
                available: self.locked_balance.minor(),
            });
        }
        self.locked_balance = self.locked_balance.checked_sub(amount)?;
        Ok(())
    }

    /// Freeze the wallet, blocking all new transfers.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::WalletUnavailable`] if the wallet is closed.
    pub fn freeze(&mut self) -> Result<(), LedgerError> {
        if self.status == WalletStatus::Closed {
            return Err(LedgerError::WalletUnavailable {
                wallet_id: self.id.to_string(),
                status: self.status.as_str().to_string(),
            });
        }
        self.status = WalletStatus::Frozen;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Reactivate a frozen wallet.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::WalletUnavailable`] if the wallet is closed.
    pub fn unfreeze(&mut self) -> Result<(), LedgerError> {
        if self.status == WalletStatus::Closed {
            return Err(LedgerError::WalletUnavailable {
                wallet_id: self.id.to_string(),
                status: self.status.as_str().to_string(),
            });
        }
        self.status = WalletStatus::Active;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Close the wallet. Requires zero balances.
    ///
    /// # Errors
    ///
    /// Returns [`LedgerError::InvalidTransition`] if any balance remains.
    pub fn close(&mut self) -> Result<(), LedgerError> {
        if !self.balance.is_zero() || !self.locked_balance.is_zero() {
            return Err(LedgerError::InvalidTransition {
                entity: "wallet",
                from: self.status.as_str().to_string(),
                to: WalletStatus::Closed.as_str().to_string(),
                reason: "wallet must have zero balances to close".to_string(),
            });
        }
        self.status = WalletStatus::Closed;
        self.updated_at = Utc::now();
        Ok(())
    }
}
