//! Per-transaction fan-out of committed snapshots to live observers.
//!
//! The hub owns a keyed set of observer queues. [`NotificationHub::subscribe`]
//! seeds a new queue with the current snapshot from the store, so an observer
//! that joins after the final transition still sees it.
//! [`NotificationHub::publish`] is best effort: a full queue drops that one
//! message, a closed queue drops the observer.

use crate::entities::TransactionId;
use crate::events::StateCommitted;
use crate::store::{StateStore, StoreError};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use subcoord_sdk::objects::StatusSnapshot;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

/// Default per-observer queue length.
pub const DEFAULT_OBSERVER_QUEUE: usize = 32;

#[derive(Debug, Error)]
pub enum HubError {
    #[error("transaction {0} not found")]
    UnknownTransaction(TransactionId),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

struct Slot {
    id: u64,
    tx: mpsc::Sender<StatusSnapshot>,
}

struct HubInner {
    store: Arc<dyn StateStore>,
    observers: DashMap<TransactionId, Vec<Slot>>,
    next_id: AtomicU64,
    queue_capacity: usize,
}

impl HubInner {
    fn remove(&self, transaction_id: &TransactionId, id: u64) {
        if let Some(mut slots) = self.observers.get_mut(transaction_id) {
            slots.retain(|slot| slot.id != id);
        }
        self.observers
            .remove_if(transaction_id, |_, slots| slots.is_empty());
    }
}

#[derive(Clone)]
pub struct NotificationHub {
    inner: Arc<HubInner>,
}

impl NotificationHub {
    pub fn new(store: Arc<dyn StateStore>) -> Self {
        Self::with_queue_capacity(store, DEFAULT_OBSERVER_QUEUE)
    }

    pub fn with_queue_capacity(store: Arc<dyn StateStore>, queue_capacity: usize) -> Self {
        Self {
            inner: Arc::new(HubInner {
                store,
                observers: DashMap::new(),
                next_id: AtomicU64::new(1),
                queue_capacity: queue_capacity.max(1),
            }),
        }
    }

    /// Register an observer for one transaction.
    ///
    /// The returned [`Observer`] already holds the current snapshot. Callers
    /// that must not miss a commit racing with this call hold the
    /// transaction's intake lock while subscribing.
    pub async fn subscribe(&self, transaction_id: &TransactionId) -> Result<Observer, HubError> {
        let state = self
            .inner
            .store
            .load(transaction_id)
            .await?
            .ok_or_else(|| HubError::UnknownTransaction(transaction_id.clone()))?;

        let (tx, rx) = mpsc::channel(self.inner.queue_capacity);
        // Fresh queue with capacity >= 1, cannot be full.
        let _ = tx.try_send(state.snapshot());

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .observers
            .entry(transaction_id.clone())
            .or_default()
            .push(Slot { id, tx });
        tracing::debug!(transaction_id = %transaction_id, observer = id, "Observer subscribed");

        Ok(Observer {
            id,
            transaction_id: transaction_id.clone(),
            rx,
            hub: Arc::downgrade(&self.inner),
        })
    }

    /// Remove an observer explicitly. Dropping the [`Observer`] does the same.
    pub fn unsubscribe(&self, observer: Observer) {
        drop(observer);
    }

    /// Deliver a committed snapshot to every observer of its transaction.
    pub fn publish(&self, committed: &StateCommitted) {
        let Some(mut slots) = self.inner.observers.get_mut(&committed.transaction_id) else {
            return;
        };
        slots.retain(|slot| match slot.tx.try_send(committed.snapshot.clone()) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    transaction_id = %committed.transaction_id,
                    observer = slot.id,
                    "Observer queue full, dropping snapshot"
                );
                true
            }
            Err(TrySendError::Closed(_)) => false,
        });
        let empty = slots.is_empty();
        drop(slots);
        if empty {
            self.inner
                .observers
                .remove_if(&committed.transaction_id, |_, slots| slots.is_empty());
        }
    }

    /// Number of observers currently registered for `transaction_id`.
    pub fn observer_count(&self, transaction_id: &TransactionId) -> usize {
        self.inner
            .observers
            .get(transaction_id)
            .map_or(0, |slots| slots.len())
    }

    /// Number of transactions with at least one observer.
    pub fn watched_transactions(&self) -> usize {
        self.inner.observers.len()
    }
}

/// A live subscription to one transaction's snapshots.
///
/// Unregisters itself from the hub when dropped.
pub struct Observer {
    id: u64,
    transaction_id: TransactionId,
    rx: mpsc::Receiver<StatusSnapshot>,
    hub: Weak<HubInner>,
}

impl Observer {
    pub fn transaction_id(&self) -> &TransactionId {
        &self.transaction_id
    }

    /// Wait for the next snapshot. Returns `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<StatusSnapshot> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<StatusSnapshot> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Observer {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.transaction_id, self.id);
        }
    }
}

impl std::fmt::Debug for Observer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Observer")
            .field("id", &self.id)
            .field("transaction_id", &self.transaction_id)
            .finish()
    }
}
