//! Error hierarchy for tether sessions.
//!
//! - [`TransportError`]: failures reported by a [`Connection`](crate::Connection)
//!   or [`Dialer`](crate::Dialer)
//! - [`SessionError`]: the terminating error of a connection attempt, or the
//!   synchronous failure of a write, classified by [`ErrorKind`]
//!
//! Dial, read and handler errors are what a reconnect policy sees. Write-path
//! errors are returned to the caller and never change connection state.

use std::fmt;

use thiserror::Error;

use crate::transport::CloseCode;

/// Boxed error returned by application callbacks (handlers, hooks, encoders).
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

// ─────────────────────────────────────────────────────────────────────────────
// TransportError
// ─────────────────────────────────────────────────────────────────────────────

/// Failure reported by the transport primitive.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote refused the connection or the handshake failed.
    #[error("connection refused: {0}")]
    Refused(String),

    /// The operation did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(std::time::Duration),

    /// The connection was closed, locally or by the remote.
    #[error("connection closed ({code}): {reason}")]
    Closed {
        /// Close code sent or received.
        code: CloseCode,
        /// Close reason text.
        reason: String,
    },

    /// The connection went away without a close handshake.
    #[error("connection lost")]
    ConnectionLost,

    /// `close` was called on a connection that was already closed.
    #[error("connection already closed")]
    AlreadyClosed,

    /// The endpoint could not be turned into a dialable address.
    #[error("invalid endpoint {endpoint}: {message}")]
    InvalidEndpoint {
        /// The endpoint as given.
        endpoint: String,
        /// Why it was rejected.
        message: String,
    },

    /// The peer violated the framing protocol.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Underlying socket error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Build a [`TransportError::Closed`].
    pub fn closed(code: CloseCode, reason: impl Into<String>) -> Self {
        Self::Closed {
            code,
            reason: reason.into(),
        }
    }

    /// Close code carried by this error, if it is a close.
    pub fn close_code(&self) -> Option<CloseCode> {
        match self {
            Self::Closed { code, .. } => Some(*code),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// ErrorKind
// ─────────────────────────────────────────────────────────────────────────────

/// Coarse classification of a [`SessionError`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The attempt never reached the connected state.
    Dial,
    /// Receive failure, including forced stale closure and probe failure.
    Read,
    /// The application message handler asked to end the connection.
    Handler,
    /// The on-open callback failed.
    Lifecycle,
    /// A write was attempted with no active connection.
    NotConnected,
    /// An outbound message could not be encoded.
    Encode,
    /// The transport rejected an outbound message or a close.
    Write,
    /// The configured attempt ceiling was reached.
    AttemptsExhausted,
    /// The session's cancellation signal fired.
    Cancelled,
    /// The session API was misused.
    Usage,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Dial => "dial",
            Self::Read => "read",
            Self::Handler => "handler",
            Self::Lifecycle => "lifecycle",
            Self::NotConnected => "not_connected",
            Self::Encode => "encode",
            Self::Write => "write",
            Self::AttemptsExhausted => "attempts_exhausted",
            Self::Cancelled => "cancelled",
            Self::Usage => "usage",
        };
        f.write_str(s)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// SessionError
// ─────────────────────────────────────────────────────────────────────────────

/// Error produced by a session: either the terminating error of one attempt,
/// or the synchronous failure of a write.
#[derive(Debug, Error)]
pub enum SessionError {
    /// The endpoint resolver failed.
    #[error("endpoint: {0}")]
    Endpoint(#[source] BoxError),

    /// The dial-option provider failed.
    #[error("dial options: {0}")]
    DialOptions(#[source] BoxError),

    /// Opening the transport failed.
    #[error("dial {endpoint}: {source}")]
    Dial {
        /// Endpoint that was dialed.
        endpoint: String,
        /// Transport failure.
        #[source]
        source: TransportError,
    },

    /// Receiving from the transport failed, or the connection was force-closed.
    #[error("read: {0}")]
    Read(#[source] TransportError),

    /// The message handler returned an error.
    #[error("handler: {0}")]
    Handler(#[source] BoxError),

    /// The on-open callback returned an error.
    #[error("on_open: {0}")]
    OnOpen(#[source] BoxError),

    /// No connection is active.
    #[error("not connected")]
    NotConnected,

    /// The outbound encoder failed.
    #[error("encode: {0}")]
    Encode(#[source] BoxError),

    /// The transport rejected an outbound message.
    #[error("send: {0}")]
    Send(#[source] TransportError),

    /// Closing the connection failed.
    #[error("close: {0}")]
    Close(#[source] TransportError),

    /// The attempt ceiling was reached.
    #[error("{attempts}: max connection attempts")]
    AttemptsExhausted {
        /// Number of dial attempts made since the last successful connect.
        attempts: u32,
    },

    /// `start` was called while the session was already running.
    #[error("session already running")]
    AlreadyRunning,

    /// The session's cancellation signal fired while waiting.
    #[error("cancelled")]
    Cancelled,
}

impl SessionError {
    /// Error classification.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Endpoint(_) | Self::DialOptions(_) | Self::Dial { .. } => ErrorKind::Dial,
            Self::Read(_) => ErrorKind::Read,
            Self::Handler(_) => ErrorKind::Handler,
            Self::OnOpen(_) => ErrorKind::Lifecycle,
            Self::NotConnected => ErrorKind::NotConnected,
            Self::Encode(_) => ErrorKind::Encode,
            Self::Send(_) | Self::Close(_) => ErrorKind::Write,
            Self::AttemptsExhausted { .. } => ErrorKind::AttemptsExhausted,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::AlreadyRunning => ErrorKind::Usage,
        }
    }

    /// Whether the failure originated in the network rather than in
    /// application code.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Dial { .. } | Self::Read(_))
    }

    /// The transport error underneath, if any.
    pub fn transport(&self) -> Option<&TransportError> {
        match self {
            Self::Dial { source, .. } => Some(source),
            Self::Read(e) | Self::Send(e) | Self::Close(e) => Some(e),
            _ => None,
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
