//! # Payment Rail Boundary
//!
//! The external capture call a settlement wraps. The rail is possibly
//! slow and possibly failing; workers call it **outside** any ledger
//! atomic unit and settle the outcome afterwards under the idempotency
//! key, so a crash between capture and booking re-runs safely.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

use thiserror::Error;
use uuid::Uuid;

use tally_core::{Amount, CurrencyCode};

/// Errors from a payment rail capture.
#[derive(Error, Debug)]
pub enum RailError {
    /// Timeout, connection loss, or rate limit; worth retrying.
    #[error("rail transient failure: {0}")]
    Transient(String),

    /// The rail refused the capture; retrying will not help.
    #[error("rail declined capture: {0}")]
    Declined(String),
}

/// The future a capture returns: a provider transaction reference or an
/// error.
pub type RailFuture<'a> = Pin<Box<dyn Future<Output = Result<String, RailError>> + Send + 'a>>;

/// An external payment rail.
pub trait PaymentRail: Send + Sync {
    /// Capture `amount` over the rail, returning the provider's
    /// transaction reference.
    fn capture(&self, amount: Amount, currency: CurrencyCode, method: &str) -> RailFuture<'_>;

    /// The rail's name, recorded on transactions.
    fn name(&self) -> &str;
}

// ── Implementations ────────────────────────────────────────────────────

/// A rail that always succeeds instantly. Default for wallet-to-wallet
/// escrow settlements, where the money never leaves the platform and the
/// "capture" is a book-keeping acknowledgement.
#[derive(Debug, Default)]
pub struct InstantRail {
    captures: AtomicUsize,
}

impl InstantRail {
    /// Create a new instant rail.
    pub fn new() -> Self {
        Self::default()
    }

    /// How many captures have been performed.
    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl PaymentRail for InstantRail {
    fn capture(&self, _amount: Amount, _currency: CurrencyCode, _method: &str) -> RailFuture<'_> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        Box::pin(async { Ok(format!("cap_{}", Uuid::new_v4().simple())) })
    }

    fn name(&self) -> &str {
        "instant"
    }
}

/// A scriptable rail for exercising failure paths: fails the first `n`
/// captures and then succeeds, or declines every capture.
#[derive(Debug)]
pub struct ScriptedRail {
    failures_remaining: AtomicU32,
    decline_always: bool,
    captures: AtomicUsize,
}

impl ScriptedRail {
    /// Fail the first `n` captures with a transient error, then succeed.
    pub fn fail_times(n: u32) -> Self {
        Self {
            failures_remaining: AtomicU32::new(n),
            decline_always: false,
            captures: AtomicUsize::new(0),
        }
    }

    /// Decline every capture.
    pub fn always_decline() -> Self {
        Self {
            failures_remaining: AtomicU32::new(0),
            decline_always: true,
            captures: AtomicUsize::new(0),
        }
    }

    /// How many captures have been attempted.
    pub fn capture_count(&self) -> usize {
        self.captures.load(Ordering::SeqCst)
    }
}

impl PaymentRail for ScriptedRail {
    fn capture(&self, _amount: Amount, _currency: CurrencyCode, _method: &str) -> RailFuture<'_> {
        self.captures.fetch_add(1, Ordering::SeqCst);
        if self.decline_always {
            return Box::pin(async { Err(RailError::Declined("scripted decline".to_string())) });
        }
        let fail = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        Box::pin(async move {
            if fail {
                Err(RailError::Transient("scripted transient failure".to_string()))
            } else {
                Ok(format!("cap_{}", Uuid::new_v4().simple()))
            }
        })
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
