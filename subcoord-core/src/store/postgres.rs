use super::{Commit, CreatedWindow, NewTransaction, StateStore, StoreError, SubscriptionSlot};
use crate::entities::payment::{
    GetPaymentByTransactionId, ListPaymentsAwaitingConfirmation, RecordGatewayReference,
};
use crate::entities::subscription::{
    ExpiryCandidate, GetSubscriptionById, ListExpiredActiveSubscriptions,
};
use crate::entities::{Payment, Subscription, TransactionId, TransactionState};
use crate::framework::DatabaseProcessor;
use async_trait::async_trait;
use kanau::processor::Processor;
use time::OffsetDateTime;
use uuid::Uuid;

/// [`StateStore`] on PostgreSQL.
///
/// Multi-row writes run inside one database transaction; a versioned update
/// that matches no row rolls the whole transaction back.
#[derive(Debug, Clone)]
pub struct PgStateStore {
    db: DatabaseProcessor,
}

impl PgStateStore {
    pub fn new(db: DatabaseProcessor) -> Self {
        Self { db }
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[async_trait]
impl StateStore for PgStateStore {
    #[tracing::instrument(skip_all, err, fields(transaction_id = %new.payment.transaction_id))]
    async fn create(&self, new: NewTransaction) -> Result<(), StoreError> {
        let transaction_id = new.payment.transaction_id.clone();
        let mut tx = self.db.begin().await?;

        if !Payment::insert_tx(&mut tx, &new.payment).await? {
            tx.rollback().await?;
            return Err(StoreError::DuplicateTransaction(transaction_id));
        }

        let linked = match &new.subscription {
            SubscriptionSlot::Create(subscription) => {
                Subscription::insert_tx(&mut tx, subscription).await.map(|_| true)
            }
            SubscriptionSlot::Renew(subscription_id) => {
                Subscription::repoint_tx(
                    &mut tx,
                    *subscription_id,
                    &transaction_id,
                    new.payment.created_at,
                )
                .await
            }
        };
        match linked {
            Ok(true) => {}
            // Only a renewal can miss its subscription row.
            Ok(false) => {
                tx.rollback().await?;
                return Err(StoreError::NotFound(format!(
                    "subscription {}",
                    new.payment.subscription_id
                )));
            }
            Err(e) if is_unique_violation(&e) => {
                tx.rollback().await?;
                return Err(StoreError::DuplicateTransaction(transaction_id));
            }
            Err(e) => return Err(e.into()),
        }

        tx.commit().await?;
        Ok(())
    }

    async fn load(
        &self,
        transaction_id: &TransactionId,
    ) -> Result<Option<TransactionState>, StoreError> {
        let Some(payment) = self
            .db
            .process(GetPaymentByTransactionId {
                transaction_id: transaction_id.clone(),
            })
            .await?
        else {
            return Ok(None);
        };
        let subscription = self
            .db
            .process(GetSubscriptionById {
                subscription_id: payment.subscription_id,
            })
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("subscription {}", payment.subscription_id)))?;
        Ok(Some(TransactionState {
            payment,
            subscription,
        }))
    }

    async fn load_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, StoreError> {
        Ok(self
            .db
            .process(GetSubscriptionById { subscription_id })
            .await?)
    }

    #[tracing::instrument(skip_all, err, fields(transaction_id = %commit.transaction_id))]
    async fn commit(&self, commit: Commit) -> Result<(), StoreError> {
        let mut tx = self.db.begin().await?;

        if let Some(payment) = &commit.payment
            && !Payment::update_versioned_tx(&mut tx, payment).await?
        {
            tx.rollback().await?;
            return Err(StoreError::Conflict(commit.transaction_id));
        }
        if let Some(subscription) = &commit.subscription
            && !Subscription::update_versioned_tx(&mut tx, subscription).await?
        {
            tx.rollback().await?;
            return Err(StoreError::Conflict(commit.transaction_id));
        }

        tx.commit().await?;
        Ok(())
    }

    async fn record_gateway_reference(
        &self,
        transaction_id: &TransactionId,
        gateway_reference: &str,
        now: OffsetDateTime,
    ) -> Result<(), StoreError> {
        let found = self
            .db
            .process(RecordGatewayReference {
                transaction_id: transaction_id.clone(),
                gateway_reference: gateway_reference.to_owned(),
                now,
            })
            .await?;
        if found {
            Ok(())
        } else {
            Err(StoreError::NotFound(format!("payment {transaction_id}")))
        }
    }

    async fn list_expired_active(
        &self,
        now: OffsetDateTime,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<ExpiryCandidate>, StoreError> {
        Ok(self
            .db
            .process(ListExpiredActiveSubscriptions { now, after, limit })
            .await?)
    }

    async fn list_awaiting_confirmation(
        &self,
        window: CreatedWindow,
        after: Option<TransactionId>,
        limit: u32,
    ) -> Result<Vec<Payment>, StoreError> {
        Ok(self
            .db
            .process(ListPaymentsAwaitingConfirmation {
                created_from: window.created_from,
                created_until: window.created_until,
                after,
                limit,
            })
            .await?)
    }
}
