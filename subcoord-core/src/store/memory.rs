//! In-process [`StateStore`] used by tests and database-less runs.

use super::{Commit, CreatedWindow, NewTransaction, StateStore, StoreError, SubscriptionSlot};
use crate::entities::subscription::ExpiryCandidate;
use crate::entities::{Payment, PaymentStatus, Subscription, SubscriptionStatus, TransactionId, TransactionState};
use async_trait::async_trait;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU32, Ordering};
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    payments: BTreeMap<TransactionId, Payment>,
    subscriptions: BTreeMap<Uuid, Subscription>,
    /// Unique index: latest transaction id → subscription.
    subscription_by_transaction: HashMap<TransactionId, Uuid>,
}

/// A [`StateStore`] backed by ordered maps behind a single async lock.
///
/// Every operation holds the lock only for the duration of one map lookup
/// or one commit, never across an await point in the caller.
#[derive(Default)]
pub struct MemoryStateStore {
    tables: RwLock<Tables>,
    injected_conflicts: AtomicU32,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` commits fail with [`StoreError::Conflict`].
    pub fn inject_conflicts(&self, count: u32) {
        self.injected_conflicts.store(count, Ordering::SeqCst);
    }

    /// Overwrite a subscription directly, bypassing versioning. Stages
    /// states nothing in the coordinator produces, such as CANCELLED.
    pub async fn put_subscription(&self, subscription: Subscription) {
        let mut tables = self.tables.write().await;
        tables
            .subscription_by_transaction
            .insert(subscription.transaction_id.clone(), subscription.subscription_id);
        tables
            .subscriptions
            .insert(subscription.subscription_id, subscription);
    }

    fn take_injected_conflict(&self) -> bool {
        self.injected_conflicts
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl StateStore for MemoryStateStore {
    async fn create(&self, new: NewTransaction) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let transaction_id = new.payment.transaction_id.clone();
        if tables.payments.contains_key(&transaction_id)
            || tables.subscription_by_transaction.contains_key(&transaction_id)
        {
            return Err(StoreError::DuplicateTransaction(transaction_id));
        }

        match new.subscription {
            SubscriptionSlot::Create(subscription) => {
                tables
                    .subscription_by_transaction
                    .insert(transaction_id.clone(), subscription.subscription_id);
                tables
                    .subscriptions
                    .insert(subscription.subscription_id, subscription);
            }
            SubscriptionSlot::Renew(subscription_id) => {
                let subscription = tables
                    .subscriptions
                    .get_mut(&subscription_id)
                    .ok_or_else(|| StoreError::NotFound(format!("subscription {subscription_id}")))?;
                let previous = std::mem::replace(&mut subscription.transaction_id, transaction_id.clone());
                subscription.updated_at = new.payment.created_at;
                subscription.version += 1;
                tables.subscription_by_transaction.remove(&previous);
                tables
                    .subscription_by_transaction
                    .insert(transaction_id.clone(), subscription_id);
            }
        }

        tables.payments.insert(transaction_id, new.payment);
        Ok(())
    }

    async fn load(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<TransactionState>, StoreError> {
        let tables = self.tables.read().await;
        let Some(payment) = tables.payments.get(transaction_id) else {
            return Ok(None);
        };
        let subscription = tables
            .subscriptions
            .get(&payment.subscription_id)
            .ok_or_else(|| StoreError::NotFound(format!("subscription {}", payment.subscription_id)))?;
        Ok(Some(TransactionState {
            payment: payment.clone(),
            subscription: subscription.clone(),
        }))
    }

    async fn load_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self.tables.read().await.subscriptions.get(&subscription_id).cloned())
    }

    async fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        if self.take_injected_conflict() {
            return Err(StoreError::Conflict(commit.transaction_id));
        }

        // Check every version before writing anything.
        if let Some(payment) = &commit.payment {
            let stored = tables
                .payments
                .get(&payment.transaction_id)
                .ok_or_else(|| StoreError::NotFound(format!("payment {}", payment.transaction_id)))?;
            if stored.version != payment.version {
                return Err(StoreError::Conflict(commit.transaction_id));
            }
        }
        if let Some(subscription) = &commit.subscription {
            let stored = tables
                .subscriptions
                .get(&subscription.subscription_id)
                .ok_or_else(|| {
                    StoreError::NotFound(format!("subscription {}", subscription.subscription_id))
                })?;
            if stored.version != subscription.version {
                return Err(StoreError::Conflict(commit.transaction_id));
            }
        }

        if let Some(mut payment) = commit.payment {
            payment.version += 1;
            tables.payments.insert(payment.transaction_id.clone(), payment);
        }
        if let Some(incoming) = commit.subscription {
            if let Some(stored) = tables.subscriptions.get_mut(&incoming.subscription_id) {
                stored.status = incoming.status;
                stored.activated_at = incoming.activated_at;
                stored.expiry_date = incoming.expiry_date;
                stored.updated_at = incoming.updated_at;
                stored.version += 1;
            }
        }
        Ok(())
    }

    async fn record_gateway_reference(
        &self,
        transaction_id: &TransactionId,
        gateway_reference: &str,
        now: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let mut tables = self.tables.write().await;
        let payment = tables
            .payments
            .get_mut(transaction_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {transaction_id}")))?;
        payment.gateway_reference = Some(gateway_reference.to_owned());
        payment.last_updated_at = now;
        payment.version += 1;
        Ok(())
    }

    async fn list_expired_active(
        &self,
        now: OffsetDateTime,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<ExpiryCandidate>, StoreError> {
        let tables = self.tables.read().await;
        let start = match after {
            Some(after) => std::ops::Bound::Excluded(after),
            None => std::ops::Bound::Unbounded,
        };
        Ok(tables
            .subscriptions
            .range((start, std::ops::Bound::Unbounded))
            .map(|(_, s)| s)
            .filter_map(|s| match (s.status, s.expiry_date) {
                (SubscriptionStatus::Active, Some(expiry)) if expiry <= now => Some(ExpiryCandidate {
                    subscription_id: s.subscription_id,
                    transaction_id: s.transaction_id.clone(),
                    expiry_date: expiry,
                }),
                _ => None,
            })
            .take(limit as usize)
            .collect())
    }

    async fn list_awaiting_confirmation(
        &self,
        window: CreatedWindow,
        after: Option<TransactionId>,
        limit: u32,
    ) -> Result<Vec<Payment>, StoreError> {
        let tables = self.tables.read().await;
        let start = match after {
            Some(after) => std::ops::Bound::Excluded(after),
            None => std::ops::Bound::Unbounded,
        };
        Ok(tables
            .payments
            .range((start, std::ops::Bound::Unbounded))
            .map(|(_, p)| p)
            .filter(|p| matches!(p.status, PaymentStatus::Initiated | PaymentStatus::Pending))
            .filter(|p| p.created_at >= window.created_from && p.created_at < window.created_until)
            .take(limit as usize)
            .cloned()
            .collect())
    }
}
