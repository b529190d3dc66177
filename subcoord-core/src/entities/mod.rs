pub mod payment;
pub mod subscription;

use compact_str::CompactString;
use subcoord_sdk::objects::{
    BillingCycle as SdkBillingCycle, PaymentStatus as SdkPaymentStatus,
    SubscriptionStatus as SdkSubscriptionStatus,
};

pub use payment::Payment;
pub use subscription::Subscription;

/// Correlation key linking one payment attempt to one subscription
/// activation attempt.
#[derive(
    Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, serde::Serialize, serde::Deserialize, sqlx::Type,
)]
#[serde(transparent)]
#[sqlx(transparent)]
pub struct TransactionId(CompactString);

impl TransactionId {
    pub fn new(value: impl Into<CompactString>) -> Self {
        Self(value.into())
    }

    /// Generate a fresh, time-ordered id (`txn_` + UUIDv7).
    pub fn generate() -> Self {
        Self(compact_str::format_compact!(
            "txn_{}",
            uuid::Uuid::now_v7().simple()
        ))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TransactionId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Payment status for database operations.
///
/// This is the sqlx::Type version. For API/DTO use, see `subcoord_sdk::objects::PaymentStatus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "payment_status")]
pub enum PaymentStatus {
    Initiated,
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    /// SUCCESS and FAILED admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }
}

impl From<PaymentStatus> for SdkPaymentStatus {
    fn from(value: PaymentStatus) -> Self {
        match value {
            PaymentStatus::Initiated => SdkPaymentStatus::Initiated,
            PaymentStatus::Pending => SdkPaymentStatus::Pending,
            PaymentStatus::Success => SdkPaymentStatus::Success,
            PaymentStatus::Failed => SdkPaymentStatus::Failed,
        }
    }
}

/// Subscription status for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "subscription_status")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl From<SubscriptionStatus> for SdkSubscriptionStatus {
    fn from(value: SubscriptionStatus) -> Self {
        match value {
            SubscriptionStatus::Pending => SdkSubscriptionStatus::Pending,
            SubscriptionStatus::Active => SdkSubscriptionStatus::Active,
            SubscriptionStatus::Expired => SdkSubscriptionStatus::Expired,
            SubscriptionStatus::Cancelled => SdkSubscriptionStatus::Cancelled,
        }
    }
}

/// Billing cycle for database operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, sqlx::Type)]
#[sqlx(rename_all = "lowercase", type_name = "billing_cycle")]
pub enum BillingCycle {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

impl BillingCycle {
    /// Length of one paid term.
    pub fn term(self) -> time::Duration {
        match self {
            BillingCycle::Weekly => time::Duration::days(7),
            BillingCycle::Monthly => time::Duration::days(30),
            BillingCycle::Quarterly => time::Duration::days(90),
            BillingCycle::Yearly => time::Duration::days(365),
        }
    }
}

impl From<BillingCycle> for SdkBillingCycle {
    fn from(value: BillingCycle) -> Self {
        match value {
            BillingCycle::Weekly => SdkBillingCycle::Weekly,
            BillingCycle::Monthly => SdkBillingCycle::Monthly,
            BillingCycle::Quarterly => SdkBillingCycle::Quarterly,
            BillingCycle::Yearly => SdkBillingCycle::Yearly,
        }
    }
}

impl From<SdkBillingCycle> for BillingCycle {
    fn from(value: SdkBillingCycle) -> Self {
        match value {
            SdkBillingCycle::Weekly => BillingCycle::Weekly,
            SdkBillingCycle::Monthly => BillingCycle::Monthly,
            SdkBillingCycle::Quarterly => BillingCycle::Quarterly,
            SdkBillingCycle::Yearly => BillingCycle::Yearly,
        }
    }
}

/// A payment together with the subscription it pays for.
///
/// This is the unit the transition engine reads and writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionState {
    pub payment: Payment,
    pub subscription: Subscription,
}

impl TransactionState {
    /// Build the snapshot pushed to live observers.
    pub fn snapshot(&self) -> subcoord_sdk::objects::StatusSnapshot {
        use subcoord_sdk::objects::{SnapshotData, StatusSnapshot};
        StatusSnapshot {
            transaction_id: self.payment.transaction_id.to_string(),
            status: self.payment.status.into(),
            subscription_status: self.subscription.status.into(),
            data: SnapshotData {
                subscription_id: self.subscription.subscription_id,
                order_id: self.payment.order_id.clone(),
                amount: self.payment.amount,
                plan_title: self.subscription.plan_title.clone(),
                billing_cycle: self.subscription.billing_cycle.into(),
                gateway_reference: self.payment.gateway_reference.clone(),
                failure_reason: self.payment.failure_reason.clone(),
                expiry_date: self.subscription.expiry_date.map(|t| t.unix_timestamp()),
                updated_at: self.payment.last_updated_at.unix_timestamp(),
            },
        }
    }
}
