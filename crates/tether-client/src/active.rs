//! The single active connection and the lock that guards it.
//!
//! The supervisor replaces the slot on connect and clears it on teardown;
//! writers and [`Session::stop`](crate::Session::stop) take a snapshot and
//! never hold the lock across an await.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::RwLock;
use tether_core::ConnectionPtr;
use tokio::time::Instant;

/// A live transport handle plus what the session knows about it.
pub(crate) struct ActiveConnection {
    /// Per-session sequence number, for logs.
    pub(crate) id: u64,
    pub(crate) conn: ConnectionPtr,
    pub(crate) connected_at: Instant,
    stopping: AtomicBool,
}

impl ActiveConnection {
    pub(crate) fn new(id: u64, conn: ConnectionPtr) -> Self {
        Self {
            id,
            conn,
            connected_at: Instant::now(),
            stopping: AtomicBool::new(false),
        }
    }

    /// Mark the connection as being stopped. Returns `true` only for the
    /// first caller.
    pub(crate) fn begin_stop(&self) -> bool {
        !self.stopping.swap(true, Ordering::AcqRel)
    }
}

/// Reader/writer-locked reference to the active connection.
#[derive(Default)]
pub(crate) struct ActiveSlot {
    current: RwLock<Option<Arc<ActiveConnection>>>,
}

impl ActiveSlot {
    pub(crate) fn set(&self, active: Arc<ActiveConnection>) {
        *self.current.write() = Some(active);
    }

    pub(crate) fn clear(&self) -> Option<Arc<ActiveConnection>> {
        self.current.write().take()
    }

    pub(crate) fn snapshot(&self) -> Option<Arc<ActiveConnection>> {
        self.current.read().clone()
    }

    pub(crate) fn is_set(&self) -> bool {
        self.current.read().is_some()
    }
}
