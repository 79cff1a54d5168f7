//! Stale detector: decides when an open but silent connection should be
//! force-closed.
//!
//! The supervisor ticks the detector every [`STALE_CHECK_INTERVAL`] when a
//! timeout is configured and every [`STALE_IDLE_INTERVAL`] otherwise, in
//! which case every check is a no-op.

use std::time::Duration;

use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Check period with a timeout configured.
pub const STALE_CHECK_INTERVAL: Duration = Duration::from_secs(1);
/// Check period with no timeout configured.
pub const STALE_IDLE_INTERVAL: Duration = Duration::from_secs(60);
/// Default window after connecting in which silence is tolerated.
pub const DEFAULT_STALE_GRACE: Duration = Duration::from_secs(60);

/// Result of one check.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum StaleCheck {
    /// No timeout configured.
    Disabled,
    /// Nothing received yet and still inside the grace window.
    Grace,
    /// Traffic within the timeout.
    Healthy,
    /// Silent for longer than the timeout; close the connection.
    Stale { silent: Duration },
    /// Already fired for this connection.
    Fired,
}

#[derive(Debug)]
pub(crate) struct StaleDetector {
    timeout: Option<Duration>,
    grace: Duration,
    connected_at: Instant,
    last_message: Option<Instant>,
    fired: bool,
}

impl StaleDetector {
    pub(crate) fn new(timeout: Option<Duration>, grace: Duration, connected_at: Instant) -> Self {
        Self {
            timeout,
            grace,
            connected_at,
            last_message: None,
            fired: false,
        }
    }

    pub(crate) fn check_interval(&self) -> Duration {
        if self.timeout.is_some() {
            STALE_CHECK_INTERVAL
        } else {
            STALE_IDLE_INTERVAL
        }
    }

    /// Ticker for this detector; the first tick is one period out.
    pub(crate) fn ticker(&self) -> Interval {
        let period = self.check_interval();
        let mut ticker = time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    pub(crate) fn record_message(&mut self, at: Instant) {
        self.last_message = Some(at);
    }

    pub(crate) fn check(&mut self, now: Instant) -> StaleCheck {
        let Some(timeout) = self.timeout else {
            return StaleCheck::Disabled;
        };
        if self.fired {
            return StaleCheck::Fired;
        }
        if self.last_message.is_none() && now.duration_since(self.connected_at) < self.grace {
            return StaleCheck::Grace;
        }

        let since = self.last_message.unwrap_or(self.connected_at);
        let silent = now.duration_since(since);
        if silent > timeout {
            self.fired = true;
            StaleCheck::Stale { silent }
        } else {
            StaleCheck::Healthy
        }
    }
}
