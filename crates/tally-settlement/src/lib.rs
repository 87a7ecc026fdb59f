//! # tally-settlement — Escrow Settlement & Dispute Engine
//!
//! The orchestration layer of the Tally escrow stack:
//!
//! - **Controllers** ([`milestones`], [`disputes`]): guarded state
//!   transitions in the ledger plus job enqueueing — submit, approve,
//!   revision, auto-approve; open, triage, escalate, assign, resolve.
//!
//! - **Workers** ([`workers`]): idempotent settlement processors for
//!   milestone releases and dispute splits, triage, and notification
//!   fan-out, registered against the queue service.
//!
//! - **Boundaries** ([`rail`], [`notify`]): the payment rail and
//!   notification fan-out the core consumes, as traits.
//!
//! - **Triage** ([`triage`]): deterministic dispute scoring with the
//!   mediation/arbitration routing policy.
//!
//! - **Dispatch** ([`dispatch`]): the outbox dispatcher decoupling
//!   notification delivery from ledger correctness.
//!
//! - **Engine** ([`engine`]): one constructed instance wiring all of the
//!   above; drained cleanly on shutdown.

pub mod dispatch;
pub mod disputes;
pub mod engine;
pub mod error;
pub mod milestones;
pub mod notify;
pub mod payload;
pub mod rail;
pub mod triage;
pub mod workers;

pub use dispatch::OutboxDispatcher;
pub use disputes::DisputeControl;
pub use engine::{EngineConfig, SettlementEngine};
pub use error::SettlementError;
pub use milestones::MilestoneControl;
pub use notify::{NotificationSink, NotifyError, RecordingSink, TracingSink};
pub use payload::{
    DisputeLeg, DisputeLegPayload, NotifyPayload, ReleasePayload, TriagePayload, DISPUTE_QUEUE,
    EMAIL_QUEUE, JOB_DISPUTE_PAYMENT, JOB_DISPUTE_REFUND, JOB_DISPUTE_TRIAGE,
    JOB_MILESTONE_RELEASE, JOB_NOTIFY_PARTIES, PAYMENT_QUEUE,
};
pub use rail::{InstantRail, PaymentRail, RailError, ScriptedRail};
pub use triage::{TriageEngine, TriagePolicy};
pub use workers::{DisputeWorker, NotifyWorker, PaymentWorker};
