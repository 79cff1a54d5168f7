//! Reader pump: one task per connection that blocks on `receive` and forwards
//! everything, in order, over a single channel.
//!
//! The channel carries zero or more [`Inbound::Message`]s followed by at most
//! one [`Inbound::Failed`], after which the task ends and the sender drops.
//! The pump never retries.

use bytes::Bytes;
use tether_core::{ConnectionPtr, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// Messages buffered between the pump and the event loop.
const READER_BUFFER: usize = 16;

/// What the pump saw.
#[derive(Debug)]
pub(crate) enum Inbound {
    /// A message and when it arrived.
    Message { payload: Bytes, received_at: Instant },
    /// The terminal receive error.
    Failed(TransportError),
}

/// Start pumping `conn` until it fails or `cancel` fires.
pub(crate) fn spawn_reader(
    conn: ConnectionPtr,
    cancel: CancellationToken,
) -> (mpsc::Receiver<Inbound>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(READER_BUFFER);
    let handle = tokio::spawn(run_reader(conn, tx, cancel));
    (rx, handle)
}

async fn run_reader(conn: ConnectionPtr, tx: mpsc::Sender<Inbound>, cancel: CancellationToken) {
    loop {
        let received = tokio::select! {
            () = cancel.cancelled() => return,
            r = conn.receive() => r,
        };

        let (item, terminal) = match received {
            Ok(payload) => (
                Inbound::Message {
                    payload,
                    received_at: Instant::now(),
                },
                false,
            ),
            Err(e) => (Inbound::Failed(e), true),
        };

        tokio::select! {
            () = cancel.cancelled() => return,
            sent = tx.send(item) => {
                if sent.is_err() || terminal {
                    return;
                }
            }
        }
    }
}
