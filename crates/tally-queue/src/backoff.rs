//! # Retry Backoff
//!
//! Exponential backoff with a cap: attempt `n` waits
//! `base × 2^(n−1)` milliseconds, never more than the cap. Money-moving
//! jobs use short bases because user-visible latency matters;
//! notification jobs use long bases because they are not money-moving
//! and can afford to be patient.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Exponential, capped retry backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Delay before the second attempt, in milliseconds.
    pub base_ms: u64,
    /// Upper bound on any delay, in milliseconds.
    pub cap_ms: u64,
}

impl BackoffPolicy {
    /// Build an exponential policy from a base and a cap.
    pub const fn exponential(base_ms: u64, cap_ms: u64) -> Self {
        Self { base_ms, cap_ms }
    }

    /// Preset for payment jobs: fast, tightly bounded retries.
    pub const fn payments() -> Self {
        Self::exponential(250, 5_000)
    }

    /// Preset for notification jobs: patient retries.
    pub const fn notifications() -> Self {
        Self::exponential(5_000, 600_000)
    }

    /// The delay before attempt `attempt` (1-based) may be retried.
    ///
    /// `attempt` is the number of the attempt that just failed; the
    /// first failure waits `base_ms`, the second `2 × base_ms`, and so
    /// on up to `cap_ms`. The shift is clamped so pathological attempt
    /// counts cannot overflow.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let ms = self
            .base_ms
            .saturating_mul(1u64 << exponent)
            .min(self.cap_ms);
        Duration::from_millis(ms)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::exponential(1_000, 60_000)
    }
}
