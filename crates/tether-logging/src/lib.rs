//! # tether-logging
//!
//! `tracing` subscriber setup for applications embedding tether sessions,
//! plus [`capture`] for asserting on log output in tests.
//!
//! Sessions emit structured events under a `session` span carrying the
//! session name. Connection lifecycle events log at `info`/`warn`,
//! per-message traffic at `debug`, timer ticks at `trace`.

#![deny(unsafe_code)]

pub mod capture;

pub use capture::{CapturedEvent, CapturedLogs, capture_logs};

use tether_settings::{LogFormat, LoggingSettings};
use tracing_subscriber::EnvFilter;

fn filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level))
}

/// Install a compact, human-readable stderr subscriber.
///
/// `RUST_LOG` wins over `level` when set. Subsequent calls are no-ops.
pub fn init_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact();

    let _ = subscriber.try_init();
}

/// Install a JSON-lines stderr subscriber, one object per event with the
/// current span list attached.
pub fn init_json_subscriber(level: &str) {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter(level))
        .with_writer(std::io::stderr)
        .json()
        .with_current_span(true)
        .with_span_list(false);

    let _ = subscriber.try_init();
}

/// Install the subscriber described by a settings block.
pub fn init_from_settings(settings: &LoggingSettings) {
    match settings.format {
        LogFormat::Compact => init_subscriber(&settings.level),
        LogFormat::Json => init_json_subscriber(&settings.level),
    }
}
