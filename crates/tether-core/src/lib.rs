//! # tether-core
//!
//! Foundation types for tether sessions.
//!
//! This crate provides the shared vocabulary that the other tether crates depend on:
//!
//! - **Transport primitive**: [`Dialer`] and [`Connection`] traits, [`DialOptions`], [`CloseCode`]
//! - **Errors**: [`TransportError`] and the session-level [`SessionError`] taxonomy via `thiserror`
//! - **Backoff**: exponential backoff with jitter for reconnect policies
//! - **In-memory transport**: [`transport::memory`] for exercising sessions without a network

#![deny(unsafe_code)]

pub mod backoff;
pub mod errors;
pub mod transport;

pub use errors::{BoxError, ErrorKind, SessionError, TransportError};
pub use transport::{CloseCode, Connection, ConnectionPtr, DialOptions, Dialer, DialerPtr};
