//! Transport primitive.
//!
//! A [`Dialer`] opens a [`Connection`] to an endpoint. A connection exposes
//! byte-message receive, send, a liveness probe, and close-with-reason. Every
//! method takes `&self` so one [`ConnectionPtr`] can be shared by the reader,
//! the keepalive task, writers, and the supervisor at the same time.
//!
//! Implementations must make [`Connection::close`] unblock a pending
//! [`Connection::receive`], which then fails with [`TransportError::Closed`].

pub mod memory;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::errors::TransportError;

/// Shared handle to a live connection.
pub type ConnectionPtr = Arc<dyn Connection>;

/// Shared handle to a dialer.
pub type DialerPtr = Arc<dyn Dialer>;

// ── Close codes ─────────────────────────────────────────────────────────────

/// Close status sent with a close frame (RFC 6455 §7.4).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum CloseCode {
    /// 1000: purpose fulfilled.
    Normal,
    /// 1001: endpoint going away.
    GoingAway,
    /// 1002: protocol violation.
    ProtocolError,
    /// 1011: unexpected condition.
    InternalError,
    /// Any other code.
    Other(u16),
}

impl CloseCode {
    /// Numeric wire value.
    #[must_use]
    pub fn as_u16(self) -> u16 {
        match self {
            Self::Normal => 1000,
            Self::GoingAway => 1001,
            Self::ProtocolError => 1002,
            Self::InternalError => 1011,
            Self::Other(code) => code,
        }
    }
}

impl From<u16> for CloseCode {
    fn from(code: u16) -> Self {
        match code {
            1000 => Self::Normal,
            1001 => Self::GoingAway,
            1002 => Self::ProtocolError,
            1011 => Self::InternalError,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for CloseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Normal => "normal",
            Self::GoingAway => "going away",
            Self::ProtocolError => "protocol error",
            Self::InternalError => "internal error",
            Self::Other(_) => "other",
        };
        write!(f, "{} {name}", self.as_u16())
    }
}

// ── Dial options ────────────────────────────────────────────────────────────

/// Options applied to a single dial.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DialOptions {
    /// Extra handshake headers, in order.
    pub headers: Vec<(String, String)>,
    /// Requested subprotocols, in preference order.
    pub subprotocols: Vec<String>,
    /// Bound on the handshake. `None` waits for the transport's own timeout.
    pub connect_timeout: Option<Duration>,
}

impl DialOptions {
    /// Add a handshake header.
    #[must_use]
    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    /// Add a requested subprotocol.
    #[must_use]
    pub fn subprotocol(mut self, protocol: impl Into<String>) -> Self {
        self.subprotocols.push(protocol.into());
        self
    }

    /// Bound the handshake.
    #[must_use]
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = Some(timeout);
        self
    }
}

// ── Traits ──────────────────────────────────────────────────────────────────

/// Opens connections.
#[async_trait]
pub trait Dialer: Send + Sync {
    /// Open a connection to `endpoint`.
    async fn dial(
        &self,
        endpoint: &str,
        options: &DialOptions,
    ) -> Result<ConnectionPtr, TransportError>;
}

/// One live physical connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Wait for the next inbound message.
    async fn receive(&self) -> Result<Bytes, TransportError>;

    /// Send one message.
    async fn send(&self, payload: Bytes) -> Result<(), TransportError>;

    /// Liveness probe. Resolves once the peer has answered.
    async fn probe(&self) -> Result<(), TransportError>;

    /// Close with a status code and reason.
    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError>;
}
