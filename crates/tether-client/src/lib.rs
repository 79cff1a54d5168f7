//! # tether-client
//!
//! A persistent-connection client that keeps one logical [`Session`] alive
//! across many physical connections.
//!
//! - **Supervisor**: dials, runs the per-connection event loop, tears down,
//!   and consults the [`ReconnectPolicy`] after every attempt
//! - **Reader pump**: one task per connection forwarding inbound messages in
//!   order
//! - **Keepalive**: probes the connection on an interval; a failed probe ends
//!   the connection
//! - **Stale detector**: force-closes a connection that has gone silent
//! - **Write path**: [`Session::write`] / [`Session::send`], optionally rate
//!   limited by a [`WriteLimiter`]
//!
//! At most one connection is active at a time. Writes with no active
//! connection fail immediately with
//! [`SessionError::NotConnected`](tether_core::SessionError::NotConnected).
//!
//! ```no_run
//! use std::time::Duration;
//! use tether_client::{Session, handler_fn};
//! use tokio_util::sync::CancellationToken;
//! # async fn run(dialer: impl tether_core::Dialer + 'static) {
//! let session = Session::builder(dialer, "wss://feed.example/ws")
//!     .handler(handler_fn(|msg| async move {
//!         println!("{}", String::from_utf8_lossy(&msg));
//!         Ok(())
//!     }))
//!     .stale_timeout(Duration::from_secs(30))
//!     .reconnect_backoff(Duration::from_secs(10))
//!     .build();
//! session.start(CancellationToken::new()).await.ok();
//! # }
//! ```

#![deny(unsafe_code)]

mod active;
pub mod codec;
pub mod endpoint;
pub mod hooks;
mod keepalive;
pub mod limiter;
pub mod policy;
mod reader;
mod session;
pub mod stale;
mod supervisor;

pub use codec::{Encoder, FnEncoder, JsonEncoder};
pub use endpoint::Endpoint;
pub use hooks::{
    DecodeError, DiscardHandler, MessageHandler, NoHooks, SessionHooks, handler_fn, json_handler,
};
pub use limiter::WriteLimiter;
pub use policy::{
    AlwaysReconnect, ExponentialBackoff, NeverReconnect, ReconnectDecision, ReconnectPolicy,
    policy_fn,
};
pub use session::{DEFAULT_STOP_REASON, Session, SessionBuilder, SessionState};
pub use supervisor::STALE_CLOSE_REASON;
pub use tether_core::{BoxError, ErrorKind, SessionError, TransportError};
