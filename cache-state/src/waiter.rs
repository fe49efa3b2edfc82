//! "Wait for the next sync" notifications.
//!
//! Each waiter owns a bounded channel of capacity 1. The applier only ever
//! uses `try_send`, so a slow waiter never blocks a batch: if its slot is
//! still full the cursor is skipped for that waiter, and it gets the next
//! one. Dropping a [`Waiter`] (for example when a `timeout` cancels the
//! future holding it) deregisters it.

use roomcache_types::Cursor;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

#[derive(Default)]
struct WaiterMap {
    next_id: u64,
    senders: HashMap<u64, mpsc::Sender<Cursor>>,
}

fn lock(map: &Mutex<WaiterMap>) -> MutexGuard<'_, WaiterMap> {
    map.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Registry of waiters for committed sync cursors.
#[derive(Clone, Default)]
pub struct SyncWaiters {
    inner: Arc<Mutex<WaiterMap>>,
}

impl SyncWaiters {
    /// New, empty set of waiters.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter. It receives every cursor notified from now on
    /// that it has room for.
    pub fn subscribe(&self) -> Waiter {
        let (tx, rx) = mpsc::channel(1);
        let mut map = lock(&self.inner);
        let id = map.next_id;
        map.next_id += 1;
        map.senders.insert(id, tx);
        Waiter {
            id,
            rx,
            owner: Arc::downgrade(&self.inner),
        }
    }

    /// Offer `cursor` to every waiter without blocking.
    ///
    /// Returns the number of waiters that received it.
    pub fn notify(&self, cursor: &Cursor) -> usize {
        let mut delivered = 0;
        lock(&self.inner).senders.retain(|id, tx| match tx.try_send(cursor.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                tracing::debug!("Waiter {} not ready for {}, retrying next batch", id, cursor);
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        delivered
    }

    /// Number of registered waiters.
    pub fn len(&self) -> usize {
        lock(&self.inner).senders.len()
    }

    /// True if nobody is waiting.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One registered waiter. Deregisters on drop.
pub struct Waiter {
    id: u64,
    rx: mpsc::Receiver<Cursor>,
    owner: Weak<Mutex<WaiterMap>>,
}

impl Waiter {
    /// Wait for the next delivered cursor.
    ///
    /// Returns `None` once the owning [`SyncWaiters`] is gone.
    pub async fn next(&mut self) -> Option<Cursor> {
        self.rx.recv().await
    }
}

impl Drop for Waiter {
    fn drop(&mut self) {
        if let Some(map) = self.owner.upgrade() {
            lock(&map).senders.remove(&self.id);
        }
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter").field("id", &self.id).finish()
    }
}
