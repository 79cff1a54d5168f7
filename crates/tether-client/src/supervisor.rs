//! Connection supervisor: the outer reconnect loop and the per-connection
//! event loop.
//!
//! One attempt runs `Dialing → Connected → Draining → Closed`. While
//! connected, the event loop waits on whichever is ready first of: the reader
//! pump, the stale ticker, the keepalive task, and cancellation. Every
//! per-connection task is tied to a child token and joined before the active
//! connection is cleared.

use std::sync::Arc;
use std::sync::atomic::Ordering;

use tether_core::{CloseCode, ConnectionPtr, SessionError, TransportError};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::active::ActiveConnection;
use crate::keepalive::{KeepaliveOutcome, spawn_keepalive};
use crate::reader::{Inbound, spawn_reader};
use crate::session::{Session, SessionState};
use crate::stale::{StaleCheck, StaleDetector};

/// Close reason sent when the stale detector fires.
pub const STALE_CLOSE_REASON: &str = "connection appears stale";

impl<M: Send + Sync + 'static> Session<M> {
    /// Outer loop: run attempts until cancelled, exhausted, or the policy
    /// declines.
    pub(crate) async fn supervise(&self, cancel: &CancellationToken) -> Result<(), SessionError> {
        loop {
            let err = self.run_attempt(cancel).await;

            if cancel.is_cancelled() || matches!(err, SessionError::Cancelled) {
                info!("session cancelled");
                return Ok(());
            }
            if let SessionError::AttemptsExhausted { attempts } = err {
                warn!(attempts, "max connection attempts reached");
                return Err(err);
            }

            let decision = self.inner.policy.decide(&err);
            if !decision.retry {
                warn!(error = %err, kind = %err.kind(), "session ended");
                return Err(err);
            }

            if decision.delay.is_zero() {
                info!(error = %err, kind = %err.kind(), "connection ended, reconnecting");
            } else {
                info!(
                    error = %err,
                    kind = %err.kind(),
                    delay_ms = u64::try_from(decision.delay.as_millis()).unwrap_or(u64::MAX),
                    "reconnect backoff"
                );
                tokio::select! {
                    () = cancel.cancelled() => {
                        info!("session cancelled during backoff");
                        return Ok(());
                    }
                    () = tokio::time::sleep(decision.delay) => {}
                }
                info!("reconnecting");
            }
        }
    }

    /// One attempt. Always ends with the error that terminated it.
    async fn run_attempt(&self, cancel: &CancellationToken) -> SessionError {
        self.set_state(SessionState::Dialing);
        let conn = match self.dial(cancel).await {
            Ok(conn) => conn,
            Err(e) => {
                self.set_state(SessionState::Closed);
                return e;
            }
        };

        self.inner.attempts.store(0, Ordering::Relaxed);
        self.inner.policy.reset();

        let id = self.inner.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let active = Arc::new(ActiveConnection::new(id, Arc::clone(&conn)));
        self.inner.active.set(Arc::clone(&active));
        self.set_state(SessionState::Connected);
        info!(conn_id = id, "connected");

        let conn_cancel = cancel.child_token();
        let (inbound, reader) = spawn_reader(Arc::clone(&conn), conn_cancel.clone());
        let keepalive = self
            .inner
            .keepalive_interval
            .map(|interval| spawn_keepalive(Arc::clone(&conn), interval, conn_cancel.clone()));

        let mut tasks = ConnectionTasks {
            inbound: Some(inbound),
            reader,
            keepalive,
        };

        if let Err(e) = self.inner.hooks.on_open(self).await {
            warn!(conn_id = id, error = %e, "on_open failed");
            let err = SessionError::OnOpen(e);
            self.teardown(&active, &conn_cancel, tasks, &err).await;
            return err;
        }

        let err = self.event_loop(&active, &mut tasks, cancel).await;
        self.teardown(&active, &conn_cancel, tasks, &err).await;

        if let Err(e) = self.inner.hooks.on_close(self).await {
            warn!(conn_id = id, error = %e, "on_close failed");
        }
        err
    }

    async fn dial(&self, cancel: &CancellationToken) -> Result<ConnectionPtr, SessionError> {
        let attempt = self.inner.attempts.load(Ordering::Relaxed);
        let max = self.inner.max_attempts;
        if max > 0 && attempt >= max {
            return Err(SessionError::AttemptsExhausted { attempts: attempt });
        }
        self.inner.attempts.store(attempt + 1, Ordering::Relaxed);

        let options = self
            .inner
            .dial_options
            .build()
            .map_err(SessionError::DialOptions)?;
        let endpoint = self.inner.endpoint.resolve().map_err(SessionError::Endpoint)?;

        debug!(%endpoint, attempt = attempt + 1, "dialing");
        tokio::select! {
            () = cancel.cancelled() => Err(SessionError::Cancelled),
            dialed = self.inner.dialer.dial(&endpoint, &options) => {
                dialed.map_err(|source| {
                    warn!(%endpoint, error = %source, "dial failed");
                    SessionError::Dial { endpoint: endpoint.clone(), source }
                })
            }
        }
    }

    async fn event_loop(
        &self,
        active: &ActiveConnection,
        tasks: &mut ConnectionTasks,
        cancel: &CancellationToken,
    ) -> SessionError {
        let ConnectionTasks {
            inbound, keepalive, ..
        } = tasks;
        let Some(inbound) = inbound.as_mut() else {
            return SessionError::Read(TransportError::ConnectionLost);
        };
        let mut stale = StaleDetector::new(
            self.inner.stale_timeout,
            self.inner.stale_grace,
            active.connected_at,
        );
        let mut stale_ticker = Some(stale.ticker());

        loop {
            tokio::select! {
                () = cancel.cancelled() => return SessionError::Cancelled,

                item = inbound.recv() => match item {
                    Some(Inbound::Message { payload, received_at }) => {
                        stale.record_message(received_at);
                        debug!(conn_id = active.id, len = payload.len(), "recv");
                        if let Err(e) = self.inner.handler.on_message(payload).await {
                            return SessionError::Handler(e);
                        }
                    }
                    Some(Inbound::Failed(e)) => return SessionError::Read(e),
                    None => return SessionError::Read(TransportError::ConnectionLost),
                },

                () = tick(&mut stale_ticker) => match stale.check(Instant::now()) {
                    StaleCheck::Stale { silent } => {
                        warn!(
                            conn_id = active.id,
                            silent_ms = u64::try_from(silent.as_millis()).unwrap_or(u64::MAX),
                            "connection appears stale, closing"
                        );
                        stale_ticker = None;
                        if let Err(e) = active.conn.close(CloseCode::GoingAway, STALE_CLOSE_REASON).await {
                            debug!(conn_id = active.id, error = %e, "failed to close stale connection");
                        }
                    }
                    check => tracing::trace!(conn_id = active.id, ?check, "stale check"),
                },

                outcome = keepalive_outcome(keepalive) => match outcome {
                    KeepaliveOutcome::ProbeFailed(e) => {
                        warn!(conn_id = active.id, error = %e, "keepalive failed");
                        return SessionError::Read(e);
                    }
                    KeepaliveOutcome::Cancelled => {}
                },
            }
        }
    }

    /// Close the transport, join per-connection tasks, clear the active slot.
    async fn teardown(
        &self,
        active: &ActiveConnection,
        conn_cancel: &CancellationToken,
        tasks: ConnectionTasks,
        err: &SessionError,
    ) {
        self.set_state(SessionState::Draining);
        conn_cancel.cancel();

        let (code, reason) = close_frame_for(err);
        if let Err(e) = active.conn.close(code, reason).await {
            debug!(conn_id = active.id, error = %e, "close during teardown");
        }

        tasks.join().await;
        let _ = self.inner.active.clear();
        self.set_state(SessionState::Closed);
        info!(conn_id = active.id, error = %err, "disconnected");
    }
}

fn close_frame_for(err: &SessionError) -> (CloseCode, &'static str) {
    match err {
        SessionError::Cancelled => (CloseCode::Normal, "client closing"),
        SessionError::Read(_) => (CloseCode::GoingAway, "connection lost"),
        _ => (CloseCode::InternalError, "app closing"),
    }
}

/// Resolves on the next tick, or never once the ticker has been stopped.
async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(t) => {
            let _ = t.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Handles for the tasks spawned for one connection.
struct ConnectionTasks {
    inbound: Option<mpsc::Receiver<Inbound>>,
    reader: JoinHandle<()>,
    keepalive: Option<JoinHandle<KeepaliveOutcome>>,
}

/// Resolves when the keepalive task ends; never if there is none.
async fn keepalive_outcome(handle: &mut Option<JoinHandle<KeepaliveOutcome>>) -> KeepaliveOutcome {
    let Some(task) = handle.as_mut() else {
        return std::future::pending().await;
    };
    let joined = task.await;
    *handle = None;
    joined.unwrap_or_else(|e| {
        warn!(error = %e, "keepalive task failed");
        KeepaliveOutcome::Cancelled
    })
}

impl ConnectionTasks {
    async fn join(mut self) {
        drop(self.inbound.take());
        if let Err(e) = self.reader.await {
            warn!(error = %e, "reader task failed");
        }
        if let Some(keepalive) = self.keepalive {
            if let Err(e) = keepalive.await {
                warn!(error = %e, "keepalive task failed");
            }
        }
    }
}
