//! Application capabilities injected into a session.
//!
//! - [`MessageHandler`]: receives every inbound message, in order
//! - [`SessionHooks`]: `on_open` / `on_close` around each connection
//!
//! Closures can be adapted with [`handler_fn`] and [`json_handler`].

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use bytes::Bytes;
use serde::de::DeserializeOwned;
use tether_core::BoxError;
use thiserror::Error;

use crate::session::Session;

// ── Message handler ─────────────────────────────────────────────────────────

/// Receives inbound messages.
///
/// Calls are sequential: the next message is not delivered until the previous
/// call returns. Returning an error ends the current connection with
/// [`SessionError::Handler`](tether_core::SessionError::Handler).
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Handle one inbound message.
    async fn on_message(&self, payload: Bytes) -> Result<(), BoxError>;
}

/// Handler that discards every message.
#[derive(Clone, Copy, Debug, Default)]
pub struct DiscardHandler;

#[async_trait]
impl MessageHandler for DiscardHandler {
    async fn on_message(&self, payload: Bytes) -> Result<(), BoxError> {
        tracing::trace!(len = payload.len(), "message discarded");
        Ok(())
    }
}

/// Adapter returned by [`handler_fn`].
pub struct FnHandler<F>(F);

/// Build a handler from an async closure over the raw payload.
pub fn handler_fn<F, Fut>(f: F) -> FnHandler<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    FnHandler(f)
}

#[async_trait]
impl<F, Fut> MessageHandler for FnHandler<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn on_message(&self, payload: Bytes) -> Result<(), BoxError> {
        (self.0)(payload).await
    }
}

/// Inbound payload that did not decode.
#[derive(Debug, Error)]
#[error("decode message {body:?}: {source}")]
pub struct DecodeError {
    /// The payload, lossily converted to text.
    pub body: String,
    /// Parser error.
    #[source]
    pub source: serde_json::Error,
}

/// Adapter returned by [`json_handler`].
pub struct JsonHandler<T, F> {
    f: F,
    _message: PhantomData<fn() -> T>,
}

/// Build a handler that decodes each payload as JSON into `T` first.
///
/// A payload that fails to decode ends the connection with a
/// [`DecodeError`] carrying the offending body.
pub fn json_handler<T, F, Fut>(f: F) -> JsonHandler<T, F>
where
    T: DeserializeOwned + Send,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    JsonHandler {
        f,
        _message: PhantomData,
    }
}

#[async_trait]
impl<T, F, Fut> MessageHandler for JsonHandler<T, F>
where
    T: DeserializeOwned + Send,
    F: Fn(T) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), BoxError>> + Send,
{
    async fn on_message(&self, payload: Bytes) -> Result<(), BoxError> {
        let message: T = serde_json::from_slice(&payload).map_err(|source| DecodeError {
            body: String::from_utf8_lossy(&payload).into_owned(),
            source,
        })?;
        (self.f)(message).await
    }
}

// ── Lifecycle hooks ─────────────────────────────────────────────────────────

/// Callbacks around each connection.
///
/// `on_open` runs once the connection is up and the reader is running, so it
/// may write (for example to subscribe). An `on_open` error ends the attempt
/// and `on_close` is skipped for it. `on_close` runs exactly once for every
/// connection whose `on_open` succeeded; its error is logged and dropped.
#[async_trait]
pub trait SessionHooks<M = serde_json::Value>: Send + Sync
where
    M: Send + Sync + 'static,
{
    /// Called after connecting.
    async fn on_open(&self, _session: &Session<M>) -> Result<(), BoxError> {
        Ok(())
    }

    /// Called after the connection has been torn down.
    async fn on_close(&self, _session: &Session<M>) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Hooks that do nothing.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoHooks;

impl<M: Send + Sync + 'static> SessionHooks<M> for NoHooks {}
