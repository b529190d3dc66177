//! Payment initiation and status snapshot types.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Request payload for starting a subscription purchase.
///
/// Sent by the application backend on behalf of the paying user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePaymentRequest {
    pub customer_id: String,
    pub amount: rust_decimal::Decimal,
    pub order_id: String,
    pub plan_title: String,
    pub billing_cycle: BillingCycle,
    /// Caller-supplied correlation id. One is generated when absent.
    #[serde(default)]
    pub transaction_id: Option<String>,
    /// Renew this existing subscription instead of creating a new one.
    #[serde(default)]
    pub renew_subscription_id: Option<Uuid>,
}

/// Response returned after the processor accepted the charge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InitiatePaymentResponse {
    pub transaction_id: String,
    pub subscription_id: Uuid,
    /// Redirect URL or client token handed back by the processor.
    pub redirect_or_token: String,
}

/// Billing cycle of a subscription plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Weekly,
    Monthly,
    Quarterly,
    Yearly,
}

/// Payment status for API responses.
///
/// This is the API/DTO version without sqlx::Type.
/// For database operations, use the version in `subcoord-core::entities`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Initiated,
    Pending,
    Success,
    Failed,
}

impl PaymentStatus {
    /// Whether no further transition can change this status.
    pub fn is_terminal(self) -> bool {
        matches!(self, PaymentStatus::Success | PaymentStatus::Failed)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentStatus::Initiated => write!(f, "initiated"),
            PaymentStatus::Pending => write!(f, "pending"),
            PaymentStatus::Success => write!(f, "success"),
            PaymentStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Subscription status for API responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Expired,
    Cancelled,
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SubscriptionStatus::Pending => write!(f, "pending"),
            SubscriptionStatus::Active => write!(f, "active"),
            SubscriptionStatus::Expired => write!(f, "expired"),
            SubscriptionStatus::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Authoritative state of one transaction, as pushed to live observers and
/// returned by the status query.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub transaction_id: String,
    pub status: PaymentStatus,
    pub subscription_status: SubscriptionStatus,
    pub data: SnapshotData,
}

/// Details accompanying a [`StatusSnapshot`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotData {
    pub subscription_id: Uuid,
    pub order_id: String,
    pub amount: rust_decimal::Decimal,
    pub plan_title: String,
    pub billing_cycle: BillingCycle,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    /// Unix timestamp of the subscription's expiry, once activated.
    pub expiry_date: Option<i64>,
    /// Unix timestamp of the last payment update.
    pub updated_at: i64,
}
