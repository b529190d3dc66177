use crate::entities::{BillingCycle, SubscriptionStatus, TransactionId};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Subscription {
    pub subscription_id: Uuid,
    pub user_id: String,
    /// Latest payment for this subscription (back-reference, not ownership).
    pub transaction_id: TransactionId,
    pub plan_title: String,
    pub billing_cycle: BillingCycle,
    pub status: SubscriptionStatus,
    pub activated_at: Option<OffsetDateTime>,
    pub expiry_date: Option<OffsetDateTime>,
    pub updated_at: OffsetDateTime,
    pub version: i64,
}

const SUBSCRIPTION_COLUMNS: &str = "subscription_id, user_id, transaction_id, plan_title, \
     billing_cycle, status, activated_at, expiry_date, updated_at, version";

impl Subscription {
    pub async fn insert_tx(
        conn: &mut PgConnection,
        subscription: &Subscription,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            r#"
            INSERT INTO subscriptions (subscription_id, user_id, transaction_id, plan_title,
                billing_cycle, status, activated_at, expiry_date, updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(subscription.subscription_id)
        .bind(&subscription.user_id)
        .bind(&subscription.transaction_id)
        .bind(&subscription.plan_title)
        .bind(subscription.billing_cycle)
        .bind(subscription.status)
        .bind(subscription.activated_at)
        .bind(subscription.expiry_date)
        .bind(subscription.updated_at)
        .bind(subscription.version)
        .execute(&mut *conn)
        .await?;
        Ok(())
    }

    /// Conditionally overwrite the mutable fields of a subscription if its
    /// stored version still equals `subscription.version`.
    ///
    /// Returns `false` on a version mismatch.
    pub async fn update_versioned_tx(
        conn: &mut PgConnection,
        subscription: &Subscription,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET status = $2,
                activated_at = $3,
                expiry_date = $4,
                updated_at = $5,
                version = version + 1
            WHERE subscription_id = $1 AND version = $6
            "#,
        )
        .bind(subscription.subscription_id)
        .bind(subscription.status)
        .bind(subscription.activated_at)
        .bind(subscription.expiry_date)
        .bind(subscription.updated_at)
        .bind(subscription.version)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Point an existing subscription at a new renewal payment.
    ///
    /// Returns `false` if the subscription does not exist.
    pub async fn repoint_tx(
        conn: &mut PgConnection,
        subscription_id: Uuid,
        transaction_id: &TransactionId,
        now: OffsetDateTime,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE subscriptions
            SET transaction_id = $2, updated_at = $3, version = version + 1
            WHERE subscription_id = $1
            "#,
        )
        .bind(subscription_id)
        .bind(transaction_id)
        .bind(now)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
pub struct GetSubscriptionById {
    pub subscription_id: Uuid,
}

impl Processor<GetSubscriptionById> for DatabaseProcessor {
    type Output = Option<Subscription>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetSubscriptionById")]
    async fn process(&self, query: GetSubscriptionById) -> Result<Option<Subscription>, sqlx::Error> {
        let sql = format!("SELECT {SUBSCRIPTION_COLUMNS} FROM subscriptions WHERE subscription_id = $1");
        sqlx::query_as::<_, Subscription>(&sql)
            .bind(query.subscription_id)
            .fetch_optional(&self.pool)
            .await
    }
}

/// An active subscription whose term has lapsed.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ExpiryCandidate {
    pub subscription_id: Uuid,
    pub transaction_id: TransactionId,
    pub expiry_date: OffsetDateTime,
}

#[derive(Debug, Clone)]
/// One keyset page of ACTIVE subscriptions with `expiry_date <= now`,
/// ordered by subscription id.
pub struct ListExpiredActiveSubscriptions {
    pub now: OffsetDateTime,
    pub after: Option<Uuid>,
    pub limit: u32,
}

impl Processor<ListExpiredActiveSubscriptions> for DatabaseProcessor {
    type Output = Vec<ExpiryCandidate>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListExpiredActiveSubscriptions")]
    async fn process(
        &self,
        query: ListExpiredActiveSubscriptions,
    ) -> Result<Vec<ExpiryCandidate>, sqlx::Error> {
        sqlx::query_as::<_, ExpiryCandidate>(
            r#"
            SELECT subscription_id, transaction_id, expiry_date
            FROM subscriptions
            WHERE status = 'active'
              AND expiry_date <= $1
              AND ($2::uuid IS NULL OR subscription_id > $2)
            ORDER BY subscription_id
            LIMIT $3
            "#,
        )
        .bind(query.now)
        .bind(query.after)
        .bind(i64::from(query.limit))
        .fetch_all(&self.pool)
        .await
    }
}
