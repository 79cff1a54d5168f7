//! # tether-ws
//!
//! WebSocket transport for tether sessions, built on `tokio-tungstenite`.
//!
//! - [`WsDialer`]: handshake with extra headers, requested subprotocols and
//!   an optional connect timeout
//! - [`WsConnection`]: text or binary framing, ping/pong liveness probe,
//!   close handshake that unblocks a pending receive
//!
//! Inbound message size is unlimited unless
//! [`WsConfig::max_message_size`] is set.

#![deny(unsafe_code)]

pub mod config;
mod connection;
mod dialer;
mod errors;

pub use config::{Framing, WsConfig};
pub use connection::WsConnection;
pub use dialer::WsDialer;
