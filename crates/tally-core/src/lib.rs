//! # tally-core — Shared Domain Types
//!
//! Leaf crate of the Tally escrow stack. Everything above it (ledger,
//! queue workers, controllers, API) speaks in these types:
//!
//! - **Identifiers** ([`id`]): Uuid-backed newtypes with prefixed display
//!   forms for every entity.
//!
//! - **Money** ([`money`]): integer minor-unit [`Amount`] with checked
//!   arithmetic and a float-rejecting deserializer, validated
//!   [`CurrencyCode`], and typed [`FeeBreakdown`].
//!
//! - **Actors** ([`actor`]): who performed a state change: client,
//!   freelancer, admin, or the system itself.
//!
//! - **Domain events** ([`event`]): outbox payloads describing settlement
//!   and dispute state changes for notification fan-out.

pub mod actor;
pub mod event;
pub mod id;
pub mod money;

pub use actor::Actor;
pub use event::DomainEvent;
pub use id::{
    DisputeId, MilestoneId, ProjectId, TransactionId, UserId, WalletId, WalletTransactionId,
};
pub use money::{Amount, CoreError, CurrencyCode, FeeBreakdown};
