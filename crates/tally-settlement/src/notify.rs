//! # Notification Fan-out Boundary
//!
//! Workers and the outbox dispatcher hand domain events to a
//! [`NotificationSink`]. Delivery is best-effort: a sink failure is
//! logged and retried by whichever loop attempted it, and can never roll
//! back the ledger transition that produced the event.

use parking_lot::Mutex;
use thiserror::Error;

use tally_core::DomainEvent;

/// A notification delivery failure.
#[derive(Error, Debug)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

/// The notification fan-out consumed by the core.
pub trait NotificationSink: Send + Sync {
    /// Deliver one event. Fire-and-forget from the core's perspective.
    fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError>;
}

/// Default sink: structured log lines. Deployments wire a real fan-out
/// (email, push, websocket bridge) behind the same trait.
#[derive(Debug, Default)]
pub struct TracingSink;

impl NotificationSink for TracingSink {
    fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        tracing::info!(event = event.event_type(), "notification");
        Ok(())
    }
}

/// Test sink that records every delivered event.
#[derive(Debug, Default)]
pub struct RecordingSink {
    events: Mutex<Vec<DomainEvent>>,
}

impl RecordingSink {
    /// Create an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything delivered so far.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().clone()
    }

    /// Delivered events of one type.
    pub fn events_of(&self, event_type: &str) -> Vec<DomainEvent> {
        self.events
            .lock()
            .iter()
            .filter(|ev| ev.event_type() == event_type)
            .cloned()
            .collect()
    }
}

impl NotificationSink for RecordingSink {
    fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        self.events.lock().push(event.clone());
        Ok(())
    }
}

/// Test sink that fails the first `n` deliveries, then records.
#[derive(Debug)]
pub struct FlakySink {
    failures_remaining: Mutex<u32>,
    inner: RecordingSink,
}

impl FlakySink {
    /// Fail the first `n` deliveries.
    pub fn fail_times(n: u32) -> Self {
        Self {
            failures_remaining: Mutex::new(n),
            inner: RecordingSink::new(),
        }
    }

    /// Everything delivered after the failures.
    pub fn events(&self) -> Vec<DomainEvent> {
        self.inner.events()
    }
}

impl NotificationSink for FlakySink {
    fn notify(&self, event: &DomainEvent) -> Result<(), NotifyError> {
        let mut remaining = self.failures_remaining.lock();
        if *remaining > 0 {
            *remaining -= 1;
            return Err(NotifyError("scripted delivery failure".to_string()));
        }
        self.inner.notify(event)
    }
}
