//! Reconnect backoff calculation.
//!
//! - [`BackoffConfig`]: base delay, ceiling, and jitter for reconnect delays
//! - [`backoff_delay_ms_with_random`]: the pure formula, for tests and callers
//!   that supply their own randomness
//! - [`BackoffConfig::delay`]: the formula with a fresh random sample
//!
//! The delay grows as `base * 2^n` with `n` the number of consecutive failed
//! attempts, is capped at `max`, and is then scaled by a symmetric jitter
//! factor. Without jitter the sequence is monotonically non-decreasing.

use std::time::Duration;

use serde::{Deserialize, Serialize};

// ─────────────────────────────────────────────────────────────────────────────
// Configuration
// ─────────────────────────────────────────────────────────────────────────────

/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 500;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 30_000;
/// Default jitter factor (0.0–1.0).
pub const DEFAULT_JITTER_FACTOR: f64 = 0.2;

/// Backoff parameters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffConfig {
    /// Delay before the first retry, in ms.
    pub base_delay_ms: u64,
    /// Upper bound on the un-jittered delay, in ms.
    pub max_delay_ms: u64,
    /// Jitter range as a fraction of the delay (0.2 = ±20%).
    pub jitter_factor: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl BackoffConfig {
    /// Config with the given bounds and no jitter.
    #[must_use]
    pub fn exact(base: Duration, max: Duration) -> Self {
        Self {
            base_delay_ms: duration_ms(base),
            max_delay_ms: duration_ms(max),
            jitter_factor: 0.0,
        }
    }

    /// Delay before retry number `failures` (zero-based), jittered with
    /// `rand::random`.
    #[must_use]
    pub fn delay(&self, failures: u32) -> Duration {
        let random = if self.jitter_factor > 0.0 {
            rand::random::<f64>()
        } else {
            0.5
        };
        Duration::from_millis(backoff_delay_ms_with_random(
            failures,
            self.base_delay_ms,
            self.max_delay_ms,
            self.jitter_factor,
            random,
        ))
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

// ─────────────────────────────────────────────────────────────────────────────
// Backoff calculation
// ─────────────────────────────────────────────────────────────────────────────

/// Exponential backoff with symmetric jitter.
///
/// Formula: `min(max, base * 2^failures) * (1 + (2 * random - 1) * jitter)`
///
/// `random` should be in `[0.0, 1.0)`; `0.5` yields the un-jittered value.
/// The jitter factor is clamped to `[0.0, 1.0]`. The jittered result never
/// exceeds `max`.
#[must_use]
#[allow(
    clippy::cast_precision_loss,
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss
)]
pub fn backoff_delay_ms_with_random(
    failures: u32,
    base_delay_ms: u64,
    max_delay_ms: u64,
    jitter_factor: f64,
    random: f64,
) -> u64 {
    let exponential = base_delay_ms.saturating_mul(1u64 << failures.min(31));
    let capped = exponential.min(max_delay_ms);

    let jitter = 1.0 + (random * 2.0 - 1.0) * jitter_factor.clamp(0.0, 1.0);
    let with_jitter = (capped as f64) * jitter;

    (with_jitter.round().max(0.0) as u64).min(max_delay_ms)
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
