//! The user-facing session handle and its builder.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tether_core::{BoxError, DialOptions, Dialer, DialerPtr, SessionError, TransportError};
use tether_settings::SessionSettings;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::active::ActiveSlot;
use crate::codec::{Encoder, JsonEncoder};
use crate::endpoint::{DialOptionsSource, Endpoint};
use crate::hooks::{DiscardHandler, MessageHandler, NoHooks, SessionHooks};
use crate::limiter::WriteLimiter;
use crate::policy::{ExponentialBackoff, NeverReconnect, ReconnectPolicy};
use crate::stale::DEFAULT_STALE_GRACE;

/// Reason used by [`Session::stop`] when none is given.
pub const DEFAULT_STOP_REASON: &str = "going away";

// ─────────────────────────────────────────────────────────────────────────────
// State
// ─────────────────────────────────────────────────────────────────────────────

/// Where the session is in its current attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Not started.
    Idle,
    /// Resolving the endpoint and opening the transport.
    Dialing,
    /// Connection up, event loop running.
    Connected,
    /// Connection ending; tasks being joined.
    Draining,
    /// Connection gone. Either about to redial or `start` is returning.
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Idle => "idle",
            Self::Dialing => "dialing",
            Self::Connected => "connected",
            Self::Draining => "draining",
            Self::Closed => "closed",
        })
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Session
// ─────────────────────────────────────────────────────────────────────────────

pub(crate) struct Inner<M: Send + Sync + 'static> {
    pub(crate) name: String,
    pub(crate) dialer: DialerPtr,
    pub(crate) endpoint: Endpoint,
    pub(crate) dial_options: DialOptionsSource,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) hooks: Arc<dyn SessionHooks<M>>,
    pub(crate) encoder: Arc<dyn Encoder<M>>,
    pub(crate) keepalive_interval: Option<Duration>,
    pub(crate) stale_timeout: Option<Duration>,
    pub(crate) stale_grace: Duration,
    pub(crate) policy: Arc<dyn ReconnectPolicy>,
    pub(crate) max_attempts: u32,
    pub(crate) limiter: Option<WriteLimiter>,

    pub(crate) active: ActiveSlot,
    pub(crate) attempts: AtomicU32,
    pub(crate) next_conn_id: AtomicU64,
    pub(crate) state: watch::Sender<SessionState>,
    running: AtomicBool,
    run_token: Mutex<CancellationToken>,
}

/// A logical connection that survives many physical ones.
///
/// Cheap to clone; every clone drives and observes the same session. `M` is
/// the outbound message type accepted by [`write`](Self::write).
pub struct Session<M: Send + Sync + 'static = serde_json::Value> {
    pub(crate) inner: Arc<Inner<M>>,
}

impl<M: Send + Sync + 'static> Clone for Session<M> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<M: Send + Sync + 'static> fmt::Debug for Session<M> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("name", &self.inner.name)
            .field("endpoint", &self.inner.endpoint)
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

impl Session {
    /// Builder for a session writing JSON values.
    pub fn builder<D: Dialer + 'static>(
        dialer: D,
        endpoint: impl Into<Endpoint>,
    ) -> SessionBuilder {
        SessionBuilder::new(dialer, endpoint)
    }
}

/// Clears the running flag when `start` returns or is dropped.
struct RunGuard<'a>(&'a AtomicBool);

impl<'a> RunGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl<M: Send + Sync + 'static> Session<M> {
    /// Run the session until the reconnect policy gives up, the attempt
    /// ceiling is reached, or `cancel` fires.
    ///
    /// Returns `Ok(())` on cancellation, otherwise the error that ended the
    /// last attempt. Intermediate errors are only logged.
    pub async fn start(&self, cancel: CancellationToken) -> Result<(), SessionError> {
        let Some(_guard) = RunGuard::acquire(&self.inner.running) else {
            return Err(SessionError::AlreadyRunning);
        };
        *self.inner.run_token.lock() = cancel.clone();
        self.inner.attempts.store(0, Ordering::Relaxed);
        self.inner.policy.reset();

        let span = tracing::info_span!("session", name = %self.inner.name);
        self.supervise(&cancel).instrument(span).await
    }

    /// Gracefully close the active connection, if any.
    ///
    /// Idempotent per connection. The close surfaces to the supervisor as a
    /// read error, so whether the session redials is the policy's decision.
    /// An empty `reason` becomes [`DEFAULT_STOP_REASON`].
    pub async fn stop(&self, reason: &str) -> Result<(), SessionError> {
        let Some(active) = self.inner.active.snapshot() else {
            return Ok(());
        };
        if !active.begin_stop() {
            return Ok(());
        }
        let reason = if reason.is_empty() {
            DEFAULT_STOP_REASON
        } else {
            reason
        };
        tracing::info!(conn_id = active.id, reason, "stopping connection");
        match active
            .conn
            .close(tether_core::CloseCode::GoingAway, reason)
            .await
        {
            // The supervisor or the peer closed it first.
            Ok(()) | Err(TransportError::AlreadyClosed) => Ok(()),
            Err(e) => Err(SessionError::Close(e)),
        }
    }

    /// Whether a connection is active right now.
    pub fn is_connected(&self) -> bool {
        self.inner.active.is_set()
    }

    /// Current state.
    pub fn state(&self) -> SessionState {
        *self.inner.state.borrow()
    }

    /// Watch state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.state.subscribe()
    }

    /// Dial attempts since the last successful connect.
    pub fn attempts(&self) -> u32 {
        self.inner.attempts.load(Ordering::Relaxed)
    }

    /// Session name.
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Encode `message` and send it on the active connection.
    ///
    /// Fails with [`SessionError::NotConnected`] immediately when there is no
    /// connection. Encoding errors never reach the transport.
    pub async fn write(&self, message: &M) -> Result<(), SessionError> {
        if !self.inner.active.is_set() {
            return Err(SessionError::NotConnected);
        }
        let payload = self
            .inner
            .encoder
            .encode(message)
            .map_err(SessionError::Encode)?;
        self.send(payload).await
    }

    /// Send an already-encoded payload on the active connection.
    ///
    /// With a write limit configured this waits for a token first; the wait
    /// ends early with [`SessionError::Cancelled`] if the session is
    /// cancelled. Dropping the future abandons the write.
    pub async fn send(&self, payload: Bytes) -> Result<(), SessionError> {
        if !self.inner.active.is_set() {
            return Err(SessionError::NotConnected);
        }

        if let Some(limiter) = &self.inner.limiter {
            let cancel = self.inner.run_token.lock().clone();
            tokio::select! {
                () = cancel.cancelled() => return Err(SessionError::Cancelled),
                () = limiter.acquire() => {}
            }
        }

        // The connection may have gone while we waited.
        let active = self
            .inner
            .active
            .snapshot()
            .ok_or(SessionError::NotConnected)?;
        tracing::debug!(conn_id = active.id, len = payload.len(), "send");
        active
            .conn
            .send(payload)
            .await
            .map_err(SessionError::Send)
    }

    pub(crate) fn set_state(&self, state: SessionState) {
        let previous = self.inner.state.send_replace(state);
        if previous != state {
            tracing::trace!(from = %previous, to = %state, "state");
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Builder
// ─────────────────────────────────────────────────────────────────────────────

/// Construction-time options for a [`Session`].
pub struct SessionBuilder<M: Send + Sync + 'static = serde_json::Value> {
    name: String,
    dialer: DialerPtr,
    endpoint: Endpoint,
    dial_options: DialOptionsSource,
    handler: Arc<dyn MessageHandler>,
    hooks: Arc<dyn SessionHooks<M>>,
    encoder: Arc<dyn Encoder<M>>,
    keepalive_interval: Option<Duration>,
    stale_timeout: Option<Duration>,
    stale_grace: Duration,
    policy: Arc<dyn ReconnectPolicy>,
    max_attempts: u32,
    write_limit: Option<(f64, u32)>,
}

impl<M: Serialize + Send + Sync + 'static> SessionBuilder<M> {
    /// Builder encoding outbound messages as JSON.
    pub fn new<D: Dialer + 'static>(dialer: D, endpoint: impl Into<Endpoint>) -> Self {
        Self::with_encoder(dialer, endpoint, JsonEncoder)
    }
}

impl<M: Send + Sync + 'static> SessionBuilder<M> {
    /// Builder with a custom encoder.
    pub fn with_encoder<D, E>(dialer: D, endpoint: impl Into<Endpoint>, encoder: E) -> Self
    where
        D: Dialer + 'static,
        E: Encoder<M> + 'static,
    {
        Self {
            name: "tether".to_string(),
            dialer: Arc::new(dialer),
            endpoint: endpoint.into(),
            dial_options: DialOptionsSource::default(),
            handler: Arc::new(DiscardHandler),
            hooks: Arc::new(NoHooks),
            encoder: Arc::new(encoder),
            keepalive_interval: None,
            stale_timeout: None,
            stale_grace: DEFAULT_STALE_GRACE,
            policy: Arc::new(NeverReconnect),
            max_attempts: 0,
            write_limit: None,
        }
    }

    /// Name recorded on the session span.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Inbound message handler.
    #[must_use]
    pub fn handler(mut self, handler: impl MessageHandler + 'static) -> Self {
        self.handler = Arc::new(handler);
        self
    }

    /// `on_open` / `on_close` callbacks.
    #[must_use]
    pub fn hooks(mut self, hooks: impl SessionHooks<M> + 'static) -> Self {
        self.hooks = Arc::new(hooks);
        self
    }

    /// Outbound encoder.
    #[must_use]
    pub fn encoder(mut self, encoder: impl Encoder<M> + 'static) -> Self {
        self.encoder = Arc::new(encoder);
        self
    }

    /// Probe the connection every `interval`. Zero disables keepalive.
    #[must_use]
    pub fn keepalive_interval(mut self, interval: Duration) -> Self {
        self.keepalive_interval = (!interval.is_zero()).then_some(interval);
        self
    }

    /// Force-close a connection silent for longer than `timeout`. Zero
    /// disables stale detection.
    #[must_use]
    pub fn stale_timeout(mut self, timeout: Duration) -> Self {
        self.stale_timeout = (!timeout.is_zero()).then_some(timeout);
        self
    }

    /// Silence tolerated after connecting before any message arrives.
    #[must_use]
    pub fn stale_grace(mut self, grace: Duration) -> Self {
        self.stale_grace = grace;
        self
    }

    /// Reconnect policy.
    #[must_use]
    pub fn reconnect_policy(mut self, policy: impl ReconnectPolicy + 'static) -> Self {
        self.policy = Arc::new(policy);
        self
    }

    /// Always reconnect with exponential backoff capped at `max`.
    #[must_use]
    pub fn reconnect_backoff(self, max: Duration) -> Self {
        self.reconnect_policy(ExponentialBackoff::with_max(max))
    }

    /// Dial attempts allowed without a successful connect. Zero is unlimited.
    #[must_use]
    pub fn max_attempts(mut self, attempts: u32) -> Self {
        self.max_attempts = attempts;
        self
    }

    /// Limit outbound writes to `per_second`, allowing bursts of `burst`.
    #[must_use]
    pub fn write_limit(mut self, per_second: f64, burst: u32) -> Self {
        self.write_limit = Some((per_second, burst));
        self
    }

    /// Fixed dial options.
    #[must_use]
    pub fn dial_options(mut self, options: DialOptions) -> Self {
        self.dial_options = DialOptionsSource::Fixed(options);
        self
    }

    /// Build dial options before every dial. An error fails that attempt.
    #[must_use]
    pub fn dial_options_fn<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<DialOptions, BoxError> + Send + Sync + 'static,
    {
        self.dial_options = DialOptionsSource::provider(f);
        self
    }

    /// Apply a settings block.
    ///
    /// Replaces the reconnect policy: exponential backoff when
    /// `reconnect.enabled`, otherwise never reconnect.
    #[must_use]
    pub fn settings(mut self, settings: &SessionSettings) -> Self {
        self.name.clone_from(&settings.name);
        self.keepalive_interval = settings.keepalive_interval();
        self.stale_timeout = settings.stale_timeout();
        self.stale_grace = settings.stale_grace();
        self.max_attempts = settings.max_attempts;
        self.policy = if settings.reconnect.enabled {
            Arc::new(ExponentialBackoff::new(settings.reconnect.backoff()))
        } else {
            Arc::new(NeverReconnect)
        };
        self.write_limit = settings
            .write_rate
            .as_ref()
            .map(|rate| (rate.per_second, rate.burst));
        self
    }

    /// Finish building.
    pub fn build(self) -> Session<M> {
        let (state, _) = watch::channel(SessionState::Idle);
        Session {
            inner: Arc::new(Inner {
                name: self.name,
                dialer: self.dialer,
                endpoint: self.endpoint,
                dial_options: self.dial_options,
                handler: self.handler,
                hooks: self.hooks,
                encoder: self.encoder,
                keepalive_interval: self.keepalive_interval,
                stale_timeout: self.stale_timeout,
                stale_grace: self.stale_grace,
                policy: self.policy,
                max_attempts: self.max_attempts,
                limiter: self
                    .write_limit
                    .map(|(per_second, burst)| WriteLimiter::new(per_second, burst)),
                active: ActiveSlot::default(),
                attempts: AtomicU32::new(0),
                next_conn_id: AtomicU64::new(1),
                state,
                running: AtomicBool::new(false),
                run_token: Mutex::new(CancellationToken::new()),
            }),
        }
    }
}
