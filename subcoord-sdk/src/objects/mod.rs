pub mod callback;
pub mod payment;
pub mod ws;

pub use callback::{CallbackStatus, GatewayCallbackPayload};
pub use payment::{
    BillingCycle, InitiatePaymentRequest, InitiatePaymentResponse, PaymentStatus, SnapshotData,
    StatusSnapshot, SubscriptionStatus,
};
