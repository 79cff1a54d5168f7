//! Reconnect policies.
//!
//! After every attempt the supervisor hands the terminating error to the
//! session's [`ReconnectPolicy`] and follows its [`ReconnectDecision`]. The
//! supervisor performs the delay itself, racing it against cancellation.
//!
//! [`ReconnectPolicy::reset`] is called whenever an attempt reaches the
//! connected state, so stateful policies count consecutive failures only.

use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use tether_core::SessionError;
use tether_core::backoff::BackoffConfig;

/// Whether, and after how long, to dial again.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ReconnectDecision {
    /// Dial again.
    pub retry: bool,
    /// Wait this long first.
    pub delay: Duration,
}

impl ReconnectDecision {
    /// Give up; `start` returns the error.
    pub const STOP: Self = Self {
        retry: false,
        delay: Duration::ZERO,
    };

    /// Redial immediately.
    pub const NOW: Self = Self {
        retry: true,
        delay: Duration::ZERO,
    };

    /// Redial after `delay`.
    pub fn after(delay: Duration) -> Self {
        Self { retry: true, delay }
    }
}

/// Decides what happens after a connection attempt ends.
pub trait ReconnectPolicy: Send + Sync {
    /// Decide based on the error that ended the last attempt.
    fn decide(&self, error: &SessionError) -> ReconnectDecision;

    /// An attempt reached the connected state.
    fn reset(&self) {}
}

/// Never redial. The default.
#[derive(Clone, Copy, Debug, Default)]
pub struct NeverReconnect;

impl ReconnectPolicy for NeverReconnect {
    fn decide(&self, _error: &SessionError) -> ReconnectDecision {
        ReconnectDecision::STOP
    }
}

/// Always redial, immediately.
#[derive(Clone, Copy, Debug, Default)]
pub struct AlwaysReconnect;

impl ReconnectPolicy for AlwaysReconnect {
    fn decide(&self, _error: &SessionError) -> ReconnectDecision {
        ReconnectDecision::NOW
    }
}

/// Always redial, waiting `base * 2^n` (capped, jittered) where `n` counts
/// failures since the last successful connect.
#[derive(Debug)]
pub struct ExponentialBackoff {
    config: BackoffConfig,
    failures: AtomicU32,
}

impl ExponentialBackoff {
    /// Policy with the given backoff parameters.
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            failures: AtomicU32::new(0),
        }
    }

    /// Default base and jitter, delay capped at `max`.
    pub fn with_max(max: Duration) -> Self {
        Self::new(BackoffConfig {
            max_delay_ms: u64::try_from(max.as_millis()).unwrap_or(u64::MAX),
            ..BackoffConfig::default()
        })
    }

    /// Failures counted since the last reset.
    pub fn failures(&self) -> u32 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl ReconnectPolicy for ExponentialBackoff {
    fn decide(&self, _error: &SessionError) -> ReconnectDecision {
        let n = self.failures.fetch_add(1, Ordering::Relaxed);
        ReconnectDecision::after(self.config.delay(n))
    }

    fn reset(&self) {
        self.failures.store(0, Ordering::Relaxed);
    }
}

/// Adapter returned by [`policy_fn`].
pub struct FnPolicy<F>(F);

/// Policy from a closure.
pub fn policy_fn<F>(f: F) -> FnPolicy<F>
where
    F: Fn(&SessionError) -> ReconnectDecision + Send + Sync,
{
    FnPolicy(f)
}

impl<F> ReconnectPolicy for FnPolicy<F>
where
    F: Fn(&SessionError) -> ReconnectDecision + Send + Sync,
{
    fn decide(&self, error: &SessionError) -> ReconnectDecision {
        (self.0)(error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::TransportError;

    fn lost() -> SessionError {
        SessionError::Read(TransportError::ConnectionLost)
    }

    #[test]
    fn never_and_always() {
        assert_eq!(NeverReconnect.decide(&lost()), ReconnectDecision::STOP);
        assert_eq!(AlwaysReconnect.decide(&lost()), ReconnectDecision::NOW);
    }

    #[test]
    fn backoff_grows_and_resets() {
        let policy = ExponentialBackoff::new(BackoffConfig::exact(
            Duration::from_millis(100),
            Duration::from_millis(1000),
        ));
        let delays: Vec<Duration> = (0..6).map(|_| policy.decide(&lost()).delay).collect();
        assert_eq!(
            delays,
            [100, 200, 400, 800, 1000, 1000].map(Duration::from_millis)
        );
        assert_eq!(policy.failures(), 6);

        policy.reset();
        assert_eq!(policy.decide(&lost()).delay, Duration::from_millis(100));
    }

    #[test]
    fn backoff_always_retries_within_ceiling() {
        let max = Duration::from_secs(5);
        let policy = ExponentialBackoff::with_max(max);
        for _ in 0..200 {
            let decision = policy.decide(&SessionError::Handler("x".into()));
            assert!(decision.retry);
            assert!(decision.delay <= max, "{:?} over {max:?}", decision.delay);
        }
    }

    #[test]
    fn closure_policy_sees_error() {
        let policy = policy_fn(|err: &SessionError| {
            if err.is_transient() {
                ReconnectDecision::after(Duration::from_secs(1))
            } else {
                ReconnectDecision::STOP
            }
        });
        assert!(policy.decide(&lost()).retry);
        assert!(!policy.decide(&SessionError::Handler("done".into())).retry);
    }
}
