use crate::entities::{PaymentStatus, TransactionId};
use crate::framework::DatabaseProcessor;
use kanau::processor::Processor;
use rust_decimal::Decimal;
use sqlx::PgConnection;
use time::OffsetDateTime;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct Payment {
    pub transaction_id: TransactionId,
    pub subscription_id: Uuid,
    pub status: PaymentStatus,
    pub amount: Decimal,
    pub customer_id: String,
    pub order_id: String,
    /// Opaque processor id, unknown until the processor answers.
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: OffsetDateTime,
    pub last_updated_at: OffsetDateTime,
    /// Optimistic-concurrency counter, bumped on every committed write.
    pub version: i64,
}

const PAYMENT_COLUMNS: &str = "transaction_id, subscription_id, status, amount, customer_id, \
     order_id, gateway_reference, failure_reason, created_at, last_updated_at, version";

impl Payment {
    /// Insert a new payment row inside a transaction.
    ///
    /// Returns `false` if the transaction id is already taken.
    pub async fn insert_tx(conn: &mut PgConnection, payment: &Payment) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            INSERT INTO payments (transaction_id, subscription_id, status, amount, customer_id,
                order_id, gateway_reference, failure_reason, created_at, last_updated_at, version)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            ON CONFLICT (transaction_id) DO NOTHING
            "#,
        )
        .bind(&payment.transaction_id)
        .bind(payment.subscription_id)
        .bind(payment.status)
        .bind(payment.amount)
        .bind(&payment.customer_id)
        .bind(&payment.order_id)
        .bind(&payment.gateway_reference)
        .bind(&payment.failure_reason)
        .bind(payment.created_at)
        .bind(payment.last_updated_at)
        .bind(payment.version)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Conditionally overwrite a payment if its stored version still equals
    /// `payment.version`. The stored version is incremented.
    ///
    /// Returns `false` on a version mismatch.
    pub async fn update_versioned_tx(
        conn: &mut PgConnection,
        payment: &Payment,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET status = $2,
                gateway_reference = $3,
                failure_reason = $4,
                last_updated_at = $5,
                version = version + 1
            WHERE transaction_id = $1 AND version = $6
            "#,
        )
        .bind(&payment.transaction_id)
        .bind(payment.status)
        .bind(&payment.gateway_reference)
        .bind(&payment.failure_reason)
        .bind(payment.last_updated_at)
        .bind(payment.version)
        .execute(&mut *conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
pub struct GetPaymentByTransactionId {
    pub transaction_id: TransactionId,
}

impl Processor<GetPaymentByTransactionId> for DatabaseProcessor {
    type Output = Option<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:GetPaymentByTransactionId")]
    async fn process(&self, query: GetPaymentByTransactionId) -> Result<Option<Payment>, sqlx::Error> {
        let sql = format!("SELECT {PAYMENT_COLUMNS} FROM payments WHERE transaction_id = $1");
        sqlx::query_as::<_, Payment>(&sql)
            .bind(&query.transaction_id)
            .fetch_optional(&self.pool)
            .await
    }
}

#[derive(Debug, Clone)]
/// Store the processor's reference for a payment.
///
/// Only the reference is written; status belongs to the transition engine.
/// Returns `false` if the payment does not exist.
pub struct RecordGatewayReference {
    pub transaction_id: TransactionId,
    pub gateway_reference: String,
    pub now: OffsetDateTime,
}

impl Processor<RecordGatewayReference> for DatabaseProcessor {
    type Output = bool;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:RecordGatewayReference")]
    async fn process(&self, update: RecordGatewayReference) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            r#"
            UPDATE payments
            SET gateway_reference = $2, last_updated_at = $3, version = version + 1
            WHERE transaction_id = $1
            "#,
        )
        .bind(&update.transaction_id)
        .bind(&update.gateway_reference)
        .bind(update.now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}

#[derive(Debug, Clone)]
/// One keyset page of payments still waiting for a confirmation, created in
/// `[created_from, created_until)`, ordered by transaction id.
pub struct ListPaymentsAwaitingConfirmation {
    pub created_from: OffsetDateTime,
    pub created_until: OffsetDateTime,
    pub after: Option<TransactionId>,
    pub limit: u32,
}

impl Processor<ListPaymentsAwaitingConfirmation> for DatabaseProcessor {
    type Output = Vec<Payment>;
    type Error = sqlx::Error;
    #[tracing::instrument(skip_all, err, name = "SQL:ListPaymentsAwaitingConfirmation")]
    async fn process(&self, query: ListPaymentsAwaitingConfirmation) -> Result<Vec<Payment>, sqlx::Error> {
        let sql = format!(
            "SELECT {PAYMENT_COLUMNS} FROM payments \
             WHERE status IN ('initiated', 'pending') \
               AND created_at >= $1 AND created_at < $2 \
               AND ($3::text IS NULL OR transaction_id > $3) \
             ORDER BY transaction_id \
             LIMIT $4"
        );
        sqlx::query_as::<_, Payment>(&sql)
            .bind(query.created_from)
            .bind(query.created_until)
            .bind(&query.after)
            .bind(i64::from(query.limit))
            .fetch_all(&self.pool)
            .await
    }
}
