#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use bytes::Bytes;
use tether_client::{BoxError, MessageHandler, Session, SessionError, SessionHooks, SessionState};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Handler forwarding every payload to a channel.
pub fn recording_handler() -> (impl MessageHandler, mpsc::UnboundedReceiver<Bytes>) {
    let (tx, rx) = mpsc::unbounded_channel();
    let handler = tether_client::handler_fn(move |payload: Bytes| {
        let tx = tx.clone();
        async move {
            let _ = tx.send(payload);
            Ok::<(), BoxError>(())
        }
    });
    (handler, rx)
}

/// Hooks counting calls, optionally failing `on_open` or writing from it.
#[derive(Clone, Default)]
pub struct CountingHooks {
    pub opens: Arc<AtomicU32>,
    pub closes: Arc<AtomicU32>,
    pub fail_open: bool,
    pub fail_close: bool,
    pub subscribe: Option<serde_json::Value>,
}

impl CountingHooks {
    pub fn opens(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    pub fn closes(&self) -> u32 {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SessionHooks for CountingHooks {
    async fn on_open(&self, session: &Session) -> Result<(), BoxError> {
        let _ = self.opens.fetch_add(1, Ordering::SeqCst);
        if self.fail_open {
            return Err("refusing to open".into());
        }
        if let Some(msg) = &self.subscribe {
            session.write(msg).await?;
        }
        Ok(())
    }

    async fn on_close(&self, _session: &Session) -> Result<(), BoxError> {
        let _ = self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err("close hook failed".into());
        }
        Ok(())
    }
}

pub fn spawn_session(
    session: &Session,
    cancel: &CancellationToken,
) -> JoinHandle<Result<(), SessionError>> {
    let session = session.clone();
    let cancel = cancel.clone();
    tokio::spawn(async move { session.start(cancel).await })
}

pub async fn wait_for_state(session: &Session, state: SessionState) {
    let mut rx = session.subscribe_state();
    let _ = rx.wait_for(|s| *s == state).await;
}
