//! The external payment processor and the adapter in front of it.
//!
//! [`PaymentGateway`] is the processor's API as this coordinator sees it:
//! create a charge, ask for a charge's status. [`GatewayAdapter`] turns
//! those answers, and signed callbacks, into transition events.

mod adapter;
mod http;
mod sandbox;

pub use adapter::{
    CallbackError, CallbackOutcome, CallbackResult, GatewayAdapter, InitiateError, ValidationError,
    VerificationError,
};
pub use http::HttpGateway;
pub use sandbox::{SandboxCharge, SandboxGateway};

use crate::config::GatewayConfig;
use crate::entities::{BillingCycle, Payment, TransactionId};
use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

/// What the processor is asked to charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeRequest {
    pub transaction_id: TransactionId,
    pub amount: Decimal,
    pub customer_id: String,
    pub order_id: String,
    pub plan_title: String,
    pub billing_cycle: BillingCycle,
}

/// A charge the processor accepted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChargeCreated {
    pub gateway_reference: String,
    /// Hosted checkout URL or client-side token, passed through untouched.
    pub redirect_or_token: String,
}

/// The processor's view of a charge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GatewayStatus {
    Succeeded { gateway_reference: Option<String> },
    Failed { reason: String },
    /// Not settled yet, or a status this coordinator does not act on.
    Pending,
}

#[derive(Debug, Error)]
pub enum GatewayError {
    /// The processor answered and declined.
    #[error("processor rejected the charge: {reason}")]
    Rejected { reason: String },

    /// The processor could not be reached or failed internally.
    #[error("processor unreachable: {0}")]
    Unreachable(String),

    /// No answer within the allotted time; the outcome is unknown.
    #[error("processor did not answer within {0:?}")]
    Timeout(Duration),

    #[error("invalid processor response: {0}")]
    InvalidResponse(String),
}

impl GatewayError {
    /// Whether the charge may still have gone through.
    pub fn is_timeout(&self) -> bool {
        matches!(self, GatewayError::Timeout(_))
    }
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeCreated, GatewayError>;

    async fn fetch_status(&self, payment: &Payment) -> Result<GatewayStatus, GatewayError>;
}

/// Build the processor client for `config`: HTTP when a base URL is set,
/// the in-process sandbox otherwise.
pub fn build_gateway(config: &GatewayConfig) -> Arc<dyn PaymentGateway> {
    match &config.base_url {
        Some(base_url) => Arc::new(HttpGateway::new(
            base_url.clone(),
            config.api_key.clone(),
            config.initiate_timeout,
        )),
        None => {
            tracing::warn!("No gateway base_url configured, using the sandbox gateway");
            Arc::new(SandboxGateway::new())
        }
    }
}
