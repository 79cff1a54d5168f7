//! Keepalive scheduler: probes the connection on a fixed interval.

use std::time::Duration;

use tether_core::{ConnectionPtr, TransportError};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Why the keepalive loop stopped.
#[derive(Debug)]
pub(crate) enum KeepaliveOutcome {
    /// A probe failed; the connection should end with this error.
    ProbeFailed(TransportError),
    /// The connection's token fired.
    Cancelled,
}

pub(crate) fn spawn_keepalive(
    conn: ConnectionPtr,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<KeepaliveOutcome> {
    tokio::spawn(run_keepalive(conn, interval, cancel))
}

/// Probe `conn` every `interval` until a probe fails or `cancel` fires.
///
/// The first probe happens one interval after start.
pub(crate) async fn run_keepalive(
    conn: ConnectionPtr,
    interval: Duration,
    cancel: CancellationToken,
) -> KeepaliveOutcome {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = cancel.cancelled() => return KeepaliveOutcome::Cancelled,
            _ = ticker.tick() => {}
        }

        tracing::trace!("keepalive probe");
        let probed = tokio::select! {
            () = cancel.cancelled() => return KeepaliveOutcome::Cancelled,
            r = conn.probe() => r,
        };
        if let Err(e) = probed {
            tracing::debug!(error = %e, "keepalive probe failed");
            return KeepaliveOutcome::ProbeFailed(e);
        }
    }
}
