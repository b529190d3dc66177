//! Persistent records for payments and subscriptions.
//!
//! The [`StateStore`] trait is the only mutable shared resource in the
//! coordinator. Status writes go through [`StateStore::commit`], which is an
//! atomic compare-and-set on the `version` column of every record it
//! touches: if any record changed since it was read, nothing is written and
//! [`StoreError::Conflict`] is returned.

mod memory;
mod postgres;

pub use memory::MemoryStateStore;
pub use postgres::PgStateStore;

use crate::entities::subscription::ExpiryCandidate;
use crate::entities::{Payment, Subscription, TransactionId, TransactionState};
use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

/// Errors returned by a [`StateStore`].
#[derive(Debug, Error)]
pub enum StoreError {
    /// A record changed between read and write.
    #[error("optimistic concurrency conflict on transaction {0}")]
    Conflict(TransactionId),

    /// The transaction id is already in use.
    #[error("transaction {0} already exists")]
    DuplicateTransaction(TransactionId),

    /// A referenced record does not exist.
    #[error("{0} not found")]
    NotFound(String),

    /// Database error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Which subscription a newly initiated payment is for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionSlot {
    /// Create this PENDING subscription alongside the payment.
    Create(Subscription),
    /// Re-point an existing subscription at the new payment (renewal).
    Renew(Uuid),
}

/// The records created by one payment initiation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTransaction {
    pub payment: Payment,
    pub subscription: SubscriptionSlot,
}

/// A conditional write produced by the transition engine.
///
/// Each record carries the version it was read at; the store writes all of
/// them or none.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub transaction_id: TransactionId,
    pub payment: Option<Payment>,
    pub subscription: Option<Subscription>,
}

/// Creation-time window for scanning payments that still wait for a
/// confirmation: `[created_from, created_until)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CreatedWindow {
    pub created_from: OffsetDateTime,
    pub created_until: OffsetDateTime,
}

#[async_trait]
pub trait StateStore: Send + Sync {
    /// Atomically create the payment and its subscription slot.
    async fn create(&self, new: NewTransaction) -> Result<(), StoreError>;

    /// Load a payment and the subscription it pays for.
    async fn load(&self, transaction_id: &TransactionId)
    -> Result<Option<TransactionState>, StoreError>;

    /// Load a subscription by id, whichever payment it points at.
    async fn load_subscription(
        &self,
        subscription_id: Uuid,
    ) -> Result<Option<Subscription>, StoreError>;

    /// Apply a versioned write; see the module docs.
    async fn commit(&self, commit: Commit) -> Result<(), StoreError>;

    /// Store the processor's reference for a payment. Never touches status.
    async fn record_gateway_reference(
        &self,
        transaction_id: &TransactionId,
        gateway_reference: &str,
        now: OffsetDateTime,
    ) -> Result<(), StoreError>;

    /// One keyset page of ACTIVE subscriptions with `expiry_date <= now`.
    async fn list_expired_active(
        &self,
        now: OffsetDateTime,
        after: Option<Uuid>,
        limit: u32,
    ) -> Result<Vec<ExpiryCandidate>, StoreError>;

    /// One keyset page of INITIATED/PENDING payments created inside `window`.
    async fn list_awaiting_confirmation(
        &self,
        window: CreatedWindow,
        after: Option<TransactionId>,
        limit: u32,
    ) -> Result<Vec<Payment>, StoreError>;
}
