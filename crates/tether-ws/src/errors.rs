//! Mapping from `tungstenite` errors onto [`TransportError`].

use std::io;

use tether_core::TransportError;
use tokio_tungstenite::tungstenite::Error as WsError;

/// Classify a `tungstenite` error.
pub(crate) fn map_ws_error(err: WsError) -> TransportError {
    match err {
        WsError::ConnectionClosed => TransportError::ConnectionLost,
        WsError::AlreadyClosed => TransportError::AlreadyClosed,
        WsError::Io(e) => map_io_error(e),
        WsError::Http(response) => {
            TransportError::Refused(format!("handshake rejected with {}", response.status()))
        }
        WsError::Url(e) => TransportError::Refused(format!("bad url: {e}")),
        other => TransportError::Protocol(other.to_string()),
    }
}

fn map_io_error(err: io::Error) -> TransportError {
    match err.kind() {
        io::ErrorKind::ConnectionRefused => TransportError::Refused(err.to_string()),
        io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof => TransportError::ConnectionLost,
        _ => TransportError::Io(err),
    }
}
