//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` and `#[serde(default)]`,
//! so a settings file only needs the fields it changes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_core::backoff::{
    BackoffConfig, DEFAULT_BASE_DELAY_MS, DEFAULT_JITTER_FACTOR, DEFAULT_MAX_DELAY_MS,
};

use crate::errors::{Result, SettingsError};

/// Default probe timeout in milliseconds.
pub const DEFAULT_PROBE_TIMEOUT_MS: u64 = 10_000;
/// Default stale grace window in milliseconds.
pub const DEFAULT_STALE_GRACE_MS: u64 = 60_000;

/// Root settings type.
///
/// ```json
/// {
///   "session": { "keepaliveIntervalMs": 15000, "reconnect": { "enabled": true } },
///   "logging": { "level": "debug" }
/// }
/// ```
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TetherSettings {
    /// Settings schema version.
    pub version: String,
    /// Session behaviour.
    pub session: SessionSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl Default for TetherSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            session: SessionSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl TetherSettings {
    /// Reject combinations the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        self.session.validate()
    }
}

// ── Session ─────────────────────────────────────────────────────────────────

/// Connection lifecycle settings for one session.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Name recorded on the session's tracing span.
    pub name: String,
    /// Liveness probe interval. `None` disables keepalive.
    pub keepalive_interval_ms: Option<u64>,
    /// How long a single probe may wait for its answer.
    pub probe_timeout_ms: u64,
    /// Silence after which a connection is force-closed. `None` disables.
    pub stale_timeout_ms: Option<u64>,
    /// Window after connecting during which silence is tolerated.
    pub stale_grace_ms: u64,
    /// Dial attempts allowed without a successful connect. `0` is unlimited.
    pub max_attempts: u32,
    /// Reconnect behaviour.
    pub reconnect: ReconnectSettings,
    /// Outbound rate limit. `None` disables limiting.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub write_rate: Option<WriteRateSettings>,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            name: "tether".to_string(),
            keepalive_interval_ms: None,
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT_MS,
            stale_timeout_ms: None,
            stale_grace_ms: DEFAULT_STALE_GRACE_MS,
            max_attempts: 0,
            reconnect: ReconnectSettings::default(),
            write_rate: None,
        }
    }
}

impl SessionSettings {
    /// Keepalive interval, if enabled.
    pub fn keepalive_interval(&self) -> Option<Duration> {
        self.keepalive_interval_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Probe timeout.
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_millis(self.probe_timeout_ms)
    }

    /// Stale timeout, if enabled.
    pub fn stale_timeout(&self) -> Option<Duration> {
        self.stale_timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Stale grace window.
    pub fn stale_grace(&self) -> Duration {
        Duration::from_millis(self.stale_grace_ms)
    }

    /// Reject combinations the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.reconnect.base_delay_ms > self.reconnect.max_delay_ms {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.baseDelayMs ({}) exceeds reconnect.maxDelayMs ({})",
                self.reconnect.base_delay_ms, self.reconnect.max_delay_ms
            )));
        }
        if !(0.0..=1.0).contains(&self.reconnect.jitter_factor) {
            return Err(SettingsError::InvalidValue(format!(
                "reconnect.jitterFactor must be within 0..=1, got {}",
                self.reconnect.jitter_factor
            )));
        }
        if let Some(rate) = &self.write_rate {
            if rate.per_second <= 0.0 || !rate.per_second.is_finite() {
                return Err(SettingsError::InvalidValue(format!(
                    "writeRate.perSecond must be positive, got {}",
                    rate.per_second
                )));
            }
            if rate.burst == 0 {
                return Err(SettingsError::InvalidValue(
                    "writeRate.burst must be at least 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Reconnect settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ReconnectSettings {
    /// Whether to redial after a connection ends.
    pub enabled: bool,
    /// Delay before the first redial, in ms.
    pub base_delay_ms: u64,
    /// Ceiling on the redial delay, in ms.
    pub max_delay_ms: u64,
    /// Jitter as a fraction of the delay.
    pub jitter_factor: f64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
            jitter_factor: DEFAULT_JITTER_FACTOR,
        }
    }
}

impl ReconnectSettings {
    /// Backoff parameters for the reconnect policy.
    pub fn backoff(&self) -> BackoffConfig {
        BackoffConfig {
            base_delay_ms: self.base_delay_ms,
            max_delay_ms: self.max_delay_ms,
            jitter_factor: self.jitter_factor,
        }
    }
}

/// Token-bucket write limit.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WriteRateSettings {
    /// Sustained writes per second.
    pub per_second: f64,
    /// Writes allowed back to back before the rate applies.
    pub burst: u32,
}

impl Default for WriteRateSettings {
    fn default() -> Self {
        Self {
            per_second: 10.0,
            burst: 10,
        }
    }
}

// ── Logging ─────────────────────────────────────────────────────────────────

/// Log output format.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable single line.
    #[default]
    Compact,
    /// One JSON object per event.
    Json,
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive when `RUST_LOG` is unset.
    pub level: String,
    /// Output format.
    pub format: LogFormat,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Compact,
        }
    }
}
