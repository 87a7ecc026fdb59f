//! # Notification Outbox
//!
//! State-changing ledger operations append a domain event here in the
//! same atomic unit as their writes. A separate dispatcher tails the log
//! and delivers events to the notification fan-out, marking them
//! delivered on success. A delivery failure leaves the event pending for
//! the next dispatch tick and can never roll back the ledger change that
//! produced it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use tally_core::DomainEvent;

/// Delivery status of an outbox event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeliveryStatus {
    /// Recorded, not yet delivered.
    Pending,
    /// Handed to the notification sink.
    Delivered,
}

/// One outbox row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxEvent {
    /// Unique event identifier.
    pub id: Uuid,
    /// Monotonic sequence number assigned by the store; dispatch order.
    pub seq: u64,
    /// The domain event payload.
    pub event: DomainEvent,
    /// Correlates the event with the audit records of its atomic unit.
    pub trace_id: Uuid,
    /// Delivery status.
    pub status: DeliveryStatus,
    /// When the event was recorded (UTC).
    pub recorded_at: DateTime<Utc>,
    /// When the event was delivered (UTC).
    pub delivered_at: Option<DateTime<Utc>>,
}

impl OutboxEvent {
    /// Create a pending outbox event.
    pub fn new(seq: u64, event: DomainEvent, trace_id: Uuid) -> Self {
        Self {
            id: Uuid::new_v4(),
            seq,
            event,
            trace_id,
            status: DeliveryStatus::Pending,
            recorded_at: Utc::now(),
            delivered_at: None,
        }
    }

    /// Mark the event delivered. Idempotent.
    pub fn mark_delivered(&mut self) {
        if self.status == DeliveryStatus::Pending {
            self.status = DeliveryStatus::Delivered;
            self.delivered_at = Some(Utc::now());
        }
    }
}
