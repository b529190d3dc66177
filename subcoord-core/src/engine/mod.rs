//! The transition engine: the only writer of payment and subscription status.
//!
//! `apply` is read-compute-write. The caller must hold the transaction's
//! intake lock; optimistic version checks in the store catch writers that
//! bypass it (the initiate path recording a gateway reference, another
//! process sharing the database).

pub mod transition;

use crate::entities::{PaymentStatus, SubscriptionStatus, TransactionId, TransactionState};
use crate::events::{StateCommitted, TransitionEvent};
use crate::hub::NotificationHub;
use crate::store::{Commit, StateStore, StoreError};
use crate::utils::retry::Attempt;
use crate::utils::{Clock, RetryError, RetryPolicy};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info};

pub use transition::Transition;

#[derive(Debug, Error)]
pub enum TransitionError {
    #[error("transaction {0} not found")]
    UnknownTransaction(TransactionId),

    /// Optimistic commits kept conflicting.
    #[error("commit for transaction {transaction_id} failed after {attempts} attempts")]
    CommitFailed {
        transaction_id: TransactionId,
        attempts: u32,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// Statuses after applying an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub payment_status: PaymentStatus,
    pub subscription_status: SubscriptionStatus,
    /// Whether anything was written (and published).
    pub changed: bool,
}

#[derive(Clone)]
pub struct TransitionEngine {
    store: Arc<dyn StateStore>,
    hub: NotificationHub,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl TransitionEngine {
    pub fn new(
        store: Arc<dyn StateStore>,
        hub: NotificationHub,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            hub,
            clock,
            retry,
        }
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Apply `event` to one transaction, retrying on commit conflicts.
    pub async fn apply(
        &self,
        transaction_id: &TransactionId,
        event: &TransitionEvent,
    ) -> Result<TransitionOutcome, TransitionError> {
        let this = self;
        self.retry
            .run(move |attempt| async move { this.try_apply(transaction_id, event, attempt).await })
            .await
            .map_err(|e| match e {
                RetryError::Exhausted { attempts, .. } => TransitionError::CommitFailed {
                    transaction_id: transaction_id.clone(),
                    attempts,
                },
                RetryError::Aborted(e) => e,
            })
    }

    async fn try_apply(
        &self,
        transaction_id: &TransactionId,
        event: &TransitionEvent,
        attempt: u32,
    ) -> Result<TransitionOutcome, Attempt<TransitionError>> {
        let state = self
            .store
            .load(transaction_id)
            .await
            .map_err(|e| Attempt::Abort(e.into()))?
            .ok_or_else(|| Attempt::Abort(TransitionError::UnknownTransaction(transaction_id.clone())))?;

        let now = self.clock.now();
        let transition = transition::next(&state, event, now);
        if transition.is_noop() {
            debug!(
                transaction_id = %transaction_id,
                event = event.kind(),
                payment_status = ?state.payment.status,
                subscription_status = ?state.subscription.status,
                "Event absorbed without change"
            );
            return Ok(TransitionOutcome {
                payment_status: state.payment.status,
                subscription_status: state.subscription.status,
                changed: false,
            });
        }

        let commit = Commit {
            transaction_id: transaction_id.clone(),
            payment: transition.payment.clone(),
            subscription: transition.subscription.clone(),
        };
        match self.store.commit(commit).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                debug!(transaction_id = %transaction_id, attempt, "Commit conflict, retrying");
                return Err(Attempt::Retry(TransitionError::Store(StoreError::Conflict(
                    transaction_id.clone(),
                ))));
            }
            Err(e) => return Err(Attempt::Abort(e.into())),
        }

        let committed = TransactionState {
            payment: transition.payment.unwrap_or(state.payment.clone()),
            subscription: transition.subscription.unwrap_or(state.subscription.clone()),
        };
        info!(
            transaction_id = %transaction_id,
            event = event.kind(),
            payment_from = ?state.payment.status,
            payment_to = ?committed.payment.status,
            subscription_from = ?state.subscription.status,
            subscription_to = ?committed.subscription.status,
            expiry_date = ?committed.subscription.expiry_date,
            "Transition committed"
        );
        self.hub.publish(&StateCommitted {
            transaction_id: transaction_id.clone(),
            snapshot: committed.snapshot(),
        });

        Ok(TransitionOutcome {
            payment_status: committed.payment.status,
            subscription_status: committed.subscription.status,
            changed: true,
        })
    }
}
