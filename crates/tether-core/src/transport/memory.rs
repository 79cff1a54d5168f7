//! In-memory transport.
//!
//! [`MemoryDialer`] hands out [`MemoryConnection`]s whose far end is a
//! [`MemoryPeer`] the test holds. The peer pushes inbound messages and
//! failures, reads what the client sent, counts probes, and observes the
//! close frame. Dial outcomes can be scripted ahead of time.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::{CloseCode, Connection, ConnectionPtr, DialOptions, Dialer};
use crate::errors::TransportError;

type Inbound = Result<Bytes, TransportError>;

// ─────────────────────────────────────────────────────────────────────────────
// Dialer
// ─────────────────────────────────────────────────────────────────────────────

enum DialStep {
    Fail(TransportError),
    Hang,
}

struct DialerShared {
    script: Mutex<VecDeque<DialStep>>,
    refusing: AtomicBool,
    dials: AtomicU32,
    endpoints: Mutex<Vec<String>>,
    options: Mutex<Vec<DialOptions>>,
    peers_tx: mpsc::UnboundedSender<MemoryPeer>,
    peers_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<MemoryPeer>>,
}

/// Dialer backed by in-process channels.
#[derive(Clone)]
pub struct MemoryDialer {
    shared: Arc<DialerShared>,
}

impl Default for MemoryDialer {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryDialer {
    /// Dialer whose dials succeed unless scripted otherwise.
    pub fn new() -> Self {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        Self {
            shared: Arc::new(DialerShared {
                script: Mutex::new(VecDeque::new()),
                refusing: AtomicBool::new(false),
                dials: AtomicU32::new(0),
                endpoints: Mutex::new(Vec::new()),
                options: Mutex::new(Vec::new()),
                peers_tx,
                peers_rx: tokio::sync::Mutex::new(peers_rx),
            }),
        }
    }

    /// Fail the next unscripted dial with `error`.
    pub fn fail_next(&self, error: TransportError) {
        self.shared.script.lock().push_back(DialStep::Fail(error));
    }

    /// Make the next unscripted dial never complete.
    pub fn hang_next(&self) {
        self.shared.script.lock().push_back(DialStep::Hang);
    }

    /// Refuse every dial not otherwise scripted.
    pub fn set_refusing(&self, refusing: bool) {
        self.shared.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Number of dials made, successful or not.
    pub fn dial_count(&self) -> u32 {
        self.shared.dials.load(Ordering::SeqCst)
    }

    /// Endpoints dialed, in order.
    pub fn endpoints(&self) -> Vec<String> {
        self.shared.endpoints.lock().clone()
    }

    /// Options passed to each dial, in order.
    pub fn dial_options(&self) -> Vec<DialOptions> {
        self.shared.options.lock().clone()
    }

    /// Wait for the peer of the next successful dial.
    pub async fn next_peer(&self) -> Option<MemoryPeer> {
        self.shared.peers_rx.lock().await.recv().await
    }
}

#[async_trait]
impl Dialer for MemoryDialer {
    async fn dial(
        &self,
        endpoint: &str,
        options: &DialOptions,
    ) -> Result<ConnectionPtr, TransportError> {
        let _ = self.shared.dials.fetch_add(1, Ordering::SeqCst);
        self.shared.endpoints.lock().push(endpoint.to_owned());
        self.shared.options.lock().push(options.clone());

        let step = self.shared.script.lock().pop_front();
        match step {
            Some(DialStep::Fail(err)) => return Err(err),
            Some(DialStep::Hang) => std::future::pending::<()>().await,
            None if self.shared.refusing.load(Ordering::SeqCst) => {
                return Err(TransportError::Refused(format!("{endpoint} refused")));
            }
            None => {}
        }

        let (conn, peer) = pair();
        // The dialer owns the receiver, so this send cannot fail while `self` lives.
        let _ = self.shared.peers_tx.send(peer);
        Ok(Arc::new(conn))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Connection / Peer
// ─────────────────────────────────────────────────────────────────────────────

struct LinkShared {
    closed: CancellationToken,
    close_frame: Mutex<Option<(CloseCode, String)>>,
    probes: AtomicU32,
    fail_probes: AtomicBool,
    fail_sends: AtomicBool,
}

impl LinkShared {
    /// Record the first close frame and wake everything waiting on the link.
    fn close(&self, code: CloseCode, reason: &str) -> bool {
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
}

/// Create a connected client/peer pair.
pub fn pair() -> (MemoryConnection, MemoryPeer) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let link = Arc::new(LinkShared {
        closed: CancellationToken::new(),
        close_frame: Mutex::new(None),
        probes: AtomicU32::new(0),
        fail_probes: AtomicBool::new(false),
        fail_sends: AtomicBool::new(false),
    });
    (
        MemoryConnection {
            inbound: tokio::sync::Mutex::new(in_rx),
            outbound: out_tx,
            link: Arc::clone(&link),
        },
        MemoryPeer {
            inbound: in_tx,
            outbound: tokio::sync::Mutex::new(out_rx),
            link,
        },
    )
}

/// Client side of an in-memory link.
pub struct MemoryConnection {
    inbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Inbound>>,
    outbound: mpsc::UnboundedSender<Bytes>,
    link: Arc<LinkShared>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn receive(&self) -> Result<Bytes, TransportError> {
        let mut rx = self.inbound.lock().await;
        tokio::select! {
            biased;
            () = self.link.closed.cancelled() => Err(self.link.closed_error()),
            item = rx.recv() => item.unwrap_or(Err(TransportError::ConnectionLost)),
        }
    }

    async fn send(&self, payload: Bytes) -> Result<(), TransportError> {
        if self.link.closed.is_cancelled() {
            return Err(self.link.closed_error());
        }
        if self.link.fail_sends.load(Ordering::SeqCst) {
            return Err(TransportError::ConnectionLost);
        }
        self.outbound
            .send(payload)
            .map_err(|_| TransportError::ConnectionLost)
    }

    async fn probe(&self) -> Result<(), TransportError> {
        if self.link.closed.is_cancelled() {
            return Err(self.link.closed_error());
        }
        let _ = self.link.probes.fetch_add(1, Ordering::SeqCst);
        if self.link.fail_probes.load(Ordering::SeqCst) {
            return Err(TransportError::Timeout(Duration::ZERO));
        }
        Ok(())
    }

    async fn close(&self, code: CloseCode, reason: &str) -> Result<(), TransportError> {
        if self.link.close(code, reason) {
            Ok(())
        } else {
            Err(TransportError::AlreadyClosed)
        }
    }
}

/// Remote side of an in-memory link, held by tests.
pub struct MemoryPeer {
    inbound: mpsc::UnboundedSender<Inbound>,
    outbound: tokio::sync::Mutex<mpsc::UnboundedReceiver<Bytes>>,
    link: Arc<LinkShared>,
}

impl MemoryPeer {
    /// Deliver a message to the client. Returns `false` once the client is gone.
    pub fn send(&self, payload: impl Into<Bytes>) -> bool {
        self.inbound.send(Ok(payload.into())).is_ok()
    }

    /// Make the client's next receive fail with `error`.
    pub fn fail(&self, error: TransportError) -> bool {
        self.inbound.send(Err(error)).is_ok()
    }

    /// Close from the remote side.
    pub fn close(&self, code: CloseCode, reason: &str) {
        let _ = self.link.close(code, reason);
    }

    /// Next message the client sent, or `None` once the client side is dropped.
    pub async fn recv(&self) -> Option<Bytes> {
        self.outbound.lock().await.recv().await
    }

    /// Next message the client sent, if one is already queued.
    pub fn try_recv(&self) -> Option<Bytes> {
        self.outbound.try_lock().ok()?.try_recv().ok()
    }

    /// Wait until either side closes, and return the close frame.
    pub async fn closed(&self) -> Option<(CloseCode, String)> {
        self.link.closed.cancelled().await;
        self.close_frame()
    }

    /// Close frame, if the link has been closed.
    pub fn close_frame(&self) -> Option<(CloseCode, String)> {
        self.link.close_frame.lock().clone()
    }

    /// Whether either side has closed the link.
    pub fn is_closed(&self) -> bool {
        self.link.closed.is_cancelled()
    }

    /// Number of probes the client has made.
    pub fn probes(&self) -> u32 {
        self.link.probes.load(Ordering::SeqCst)
    }

    /// Make probes fail.
    pub fn fail_probes(&self, fail: bool) {
        self.link.fail_probes.store(fail, Ordering::SeqCst);
    }

    /// Make sends fail.
    pub fn fail_sends(&self, fail: bool) {
        self.link.fail_sends.store(fail, Ordering::SeqCst);
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
