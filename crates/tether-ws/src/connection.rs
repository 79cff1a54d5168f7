//! One open WebSocket connection.
//!
//! The stream is split so a pending `receive` never blocks `send`, `probe`
//! or `close`. Pongs are observed by `receive`; the reader pump keeps it
//! polled for the life of the connection, which is what lets `probe`
//! complete. `close` fires a token that unblocks a pending `receive` before
//! the close frame is flushed.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tether_core::{CloseCode, Connection, TransportError};
use tokio::net::TcpStream;
use tokio::sync::{Mutex as AsyncMutex, Notify};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::config::{Framing, WsConfig};
use crate::errors::map_ws_error;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// [`Connection`] over a `tokio-tungstenite` stream.
pub struct WsConnection {
    sink: AsyncMutex<SplitSink<WsStream, Message>>,
    stream: AsyncMutex<SplitStream<WsStream>>,
    framing: Framing,
    probe_timeout: Duration,
    close_timeout: Duration,
    closed: CancellationToken,
    close_frame: Mutex<Option<(CloseCode, String)>>,
    pong: Notify,
}

impl WsConnection {
    pub(crate) fn new(stream: WsStream, config: &WsConfig) -> Self {
        let (sink, stream) = stream.split();
        Self {
            sink: AsyncMutex::new(sink),
            stream: AsyncMutex::new(stream),
            framing: config.framing,
            probe_timeout: config.probe_timeout,
            close_timeout: config.close_timeout,
            closed: CancellationToken::new(),
            close_frame: Mutex::new(None),
            pong: Notify::new(),
        }
    }

    /// Record the first close frame, local or remote. Returns `false` if one
    /// was already recorded.
    fn mark_closed(&self, code: CloseCode, reason: &str) -> bool {
        let mut frame = self.close_frame.lock();
        if frame.is_some() {
            return false;
        }
        *frame = Some((code, reason.to_owned()));
        drop(frame);
        self.closed.cancel();
        true
    }

    fn closed_error(&self) -> TransportError {
        match self.close_frame.lock().clone() {
            Some((code, reason)) => TransportError::Closed { code, reason },
            None => TransportError::ConnectionLost,
        }
    }

    async fn next_message(&self) -> Result<Bytes, TransportError> {
        let mut stream = self.stream.lock().await;
        loop {
            let Some(item) = stream.next().await else {
                return Err(TransportError::ConnectionLost);
            };
            match item.map_err(map_ws_error)? {
                msg @ (Message::Text(_) | Message::Binary(_)) => return Ok(msg.into_data()),
                Message::Ping(_) => trace!("ping"),
                Message::Pong(_) => self.pong.notify_waiters(),
                Message::Close(frame) => {
                    let (code, reason) = frame.map_or_else(
                        || (CloseCode::Normal, String::new()),
                        |f| (CloseCode::from(u16::from(f.code)), f.reason.to_string()),
                    );
                    debug!(%code, %reason, "remote closed");
                    let _ = self.mark_closed(code, &reason);
                    return Err(TransportError::Closed { code, reason });
                }
                Message::Frame(_) => {}
            }
        }
    }

    /// Write one frame, giving up as soon as the connection is closed.
    async fn write_frame(&self, message: Message) -> Result<(), TransportError> {
        if self.closed.is_cancelled() {
            return Err(self.closed_error());
        }
        let written = async {
            self.sink
                .lock()
                .await
                .send(message)
                .await
                .map_err(map_ws_error)
        };
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(self.closed_error()),
            result = written => result,
        }
    }

    fn encode(&self, payload: Bytes) -> Result<Message, TransportError> {
        match self.framing {
            Framing::Binary => Ok(Message::binary(payload)),
            Framing::Text => String::from_utf8(payload.to_vec())
                .map(Message::text)
                .map_err(|_| TransportError::Protocol("text frame payload is not UTF-8".into())),
        }
    }
}

#[async_trait]
impl Connection for WsConnection {
    async fn receive(&self) -> Result<Bytes, TransportError> {
        tokio::select! {
            biased;
            () = self.closed.cancelled() => Err(self.closed_error()),
            received = self.next_message() => received,
        }
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        let message = self.encode(payload)?;
        self.write_frame(message).await
    }

    async fn probe(&self) -> Result<(), TransportError> {
        let pong = self.pong.notified();
        tokio::pin!(pong);
        let _ = pong.as_mut().enable();

        let answered = async {
            self.write_frame(Message::Ping(Bytes::new())).await?;
            tokio::select! {
                () = self.closed.cancelled() => Err(self.closed_error()),
                () = &mut pong => Ok(()),
            }
        };
        tokio::time::timeout(self.probe_timeout, answered)
            .await
            .unwrap_or(Err(TransportError::Timeout(self.probe_timeout)))
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        if !self.mark_closed(code, reason) {
            return Err(TransportError::AlreadyClosed);
        }

        let frame = CloseFrame {
            code: code.as_u16().into(),
            reason: reason.to_owned().into(),
        };
        // A send stuck on a peer that stopped reading holds the sink until
        // the closed token releases it, so the lock wait is bounded too.
        let sent = async {
            self.sink
                .lock()
                .await
                .send(Message::Close(Some(frame)))
                .await
                .map_err(map_ws_error)
        };
        tokio::time::timeout(self.close_timeout, sent)
            .await
            .unwrap_or(Err(TransportError::Timeout(self.close_timeout)))
    }
}
