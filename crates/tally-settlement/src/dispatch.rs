//! # Outbox Dispatcher
//!
//! Tails the ledger's outbox and delivers pending events to the
//! notification sink, in sequence order. A delivery failure stops the
//! batch, so order is preserved and the event retries on the next tick.
//! Delivery never touches the ledger state that produced the event.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use tally_ledger::LedgerStore;

use crate::notify::NotificationSink;

/// Delivers outbox events to the notification fan-out.
pub struct OutboxDispatcher {
    ledger: LedgerStore,
    sink: Arc<dyn NotificationSink>,
    batch: usize,
}

impl OutboxDispatcher {
    /// Create a dispatcher over the ledger and a sink.
    pub fn new(ledger: LedgerStore, sink: Arc<dyn NotificationSink>) -> Self {
        Self {
            ledger,
            sink,
            batch: 64,
        }
    }

    /// Deliver up to one batch of pending events. Returns how many were
    /// delivered.
    pub fn run_once(&self) -> usize {
        let pending = self.ledger.read(|view| view.undelivered_events(self.batch));
        let mut delivered = 0;
        for event in pending {
            match self.sink.notify(&event.event) {
                Ok(()) => {
                    self.ledger.mark_event_delivered(event.id);
                    delivered += 1;
                }
                Err(err) => {
                    // Stop the batch: later events wait so delivery stays
                    // in sequence order. The whole batch retries next tick.
                    tracing::warn!(
                        event = event.event.event_type(),
                        seq = event.seq,
                        error = %err,
                        "outbox delivery failed; will retry"
                    );
                    break;
                }
            }
        }
        delivered
    }

    /// Run the dispatcher on an interval until shutdown.
    pub fn spawn(
        self,
        interval: Duration,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                if *shutdown_rx.borrow() {
                    break;
                }
                self.run_once();
                tokio::select! {
                    _ = tokio::time::sleep(interval) => {}
                    _ = shutdown_rx.changed() => {}
                }
            }
            // Final sweep so events recorded just before shutdown leave.
            self.run_once();
            tracing::debug!("outbox dispatcher stopped");
        })
    }
}
