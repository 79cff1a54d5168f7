//! WebSocket transport configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tether_settings::SessionSettings;

/// Default bound on the close handshake send.
pub const DEFAULT_CLOSE_TIMEOUT: Duration = Duration::from_secs(5);

/// How outbound payloads are framed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// Text frames; payloads must be UTF-8.
    #[default]
    Text,
    /// Binary frames.
    Binary,
}

/// Options shared by every connection a [`WsDialer`](crate::WsDialer) opens.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WsConfig {
    /// Frame type used for `send`.
    pub framing: Framing,
    /// How long a ping waits for its pong.
    pub probe_timeout: Duration,
    /// How long `close` waits to flush the close frame.
    pub close_timeout: Duration,
    /// Upper bound on an inbound message. `None` is unlimited.
    pub max_message_size: Option<usize>,
}

impl Default for WsConfig {
    fn default() -> Self {
        Self {
            framing: Framing::Text,
            probe_timeout: Duration::from_millis(tether_settings::DEFAULT_PROBE_TIMEOUT_MS),
            close_timeout: DEFAULT_CLOSE_TIMEOUT,
            max_message_size: None,
        }
    }
}

impl WsConfig {
    /// Defaults with the probe timeout taken from a settings block.
    pub fn from_settings(settings: &SessionSettings) -> Self {
        Self {
            probe_timeout: settings.probe_timeout(),
            ..Self::default()
        }
    }

    /// Use binary frames.
    #[must_use]
    pub fn binary(mut self) -> Self {
        self.framing = Framing::Binary;
        self
    }

    /// Set the pong wait.
    #[must_use]
    pub fn probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    /// Set the close-frame flush bound.
    #[must_use]
    pub fn close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Cap inbound message size.
    #[must_use]
    pub fn max_message_size(mut self, limit: usize) -> Self {
        self.max_message_size = Some(limit);
        self
    }
}
