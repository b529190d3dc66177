use super::{ChargeRequest, GatewayError, PaymentGateway};
use crate::config::{ConfigStore, GatewayConfig};
use crate::engine::TransitionOutcome;
use crate::entities::{
    BillingCycle, Payment, PaymentStatus, Subscription, SubscriptionStatus, TransactionId,
};
use crate::events::{EventSource, PaymentEvent, TransitionEvent};
use crate::intake::{EventIntake, IntakeError, SubmitOutcome};
use crate::store::{NewTransaction, StateStore, StoreError, SubscriptionSlot};
use crate::utils::Clock;
use rust_decimal::Decimal;
use std::sync::Arc;
use subcoord_sdk::objects::{
    CallbackStatus, GatewayCallbackPayload, InitiatePaymentRequest, InitiatePaymentResponse,
};
use subcoord_sdk::signature::{SignatureError, verify_raw_at};
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

/// Longest caller-supplied transaction id accepted.
pub const MAX_TRANSACTION_ID_LEN: usize = 128;

/// The initiate request was refused before anything was charged.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("amount must be positive")]
    NonPositiveAmount,

    #[error("{0} must not be empty")]
    EmptyField(&'static str),

    #[error("transaction_id must be 1 to 128 printable ASCII characters")]
    InvalidTransactionId,

    #[error("transaction {0} already exists")]
    DuplicateTransaction(TransactionId),

    #[error("subscription {0} not found")]
    UnknownSubscription(Uuid),

    #[error("subscription {0} is cancelled")]
    SubscriptionCancelled(Uuid),

    /// A renewal must match the customer and plan it renews.
    #[error("{field} does not match subscription {subscription_id}")]
    RenewalMismatch {
        subscription_id: Uuid,
        field: &'static str,
    },
}

#[derive(Debug, Error)]
pub enum InitiateError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// The records exist; the processor call failed or timed out.
    #[error("gateway error for transaction {transaction_id}: {source}")]
    Gateway {
        transaction_id: TransactionId,
        source: GatewayError,
    },

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// A callback that must not change any state.
#[derive(Debug, Error)]
pub enum VerificationError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("signature rejected: {0}")]
    Signature(#[from] SignatureError),

    #[error("malformed callback body: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("transaction {0} not found")]
    UnknownTransaction(TransactionId),
}

#[derive(Debug, Error)]
pub enum CallbackError {
    #[error(transparent)]
    Verification(#[from] VerificationError),

    /// Verified, but could not be handed to the engine.
    #[error("intake error: {0}")]
    Intake(IntakeError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}

/// What happened to a verified callback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackOutcome {
    pub transaction_id: TransactionId,
    pub result: CallbackResult,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallbackResult {
    Applied(TransitionOutcome),
    Deferred,
    /// A non-terminal processor status; acknowledged without an event.
    Ignored(CallbackStatus),
}

/// Front door to the payment processor.
#[derive(Clone)]
pub struct GatewayAdapter {
    store: Arc<dyn StateStore>,
    intake: EventIntake,
    gateway: Arc<dyn PaymentGateway>,
    config: ConfigStore<GatewayConfig>,
    clock: Arc<dyn Clock>,
}

impl GatewayAdapter {
    pub fn new(
        store: Arc<dyn StateStore>,
        intake: EventIntake,
        gateway: Arc<dyn PaymentGateway>,
        config: ConfigStore<GatewayConfig>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            intake,
            gateway,
            config,
            clock,
        }
    }

    /// Create the payment and its subscription slot, then ask the processor
    /// to charge.
    ///
    /// A processor error fails the payment. A timeout moves it to PENDING
    /// and leaves the outcome to the callback or the poller. Neither is
    /// retried here.
    pub async fn initiate(
        &self,
        request: InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, InitiateError> {
        validate(&request)?;
        let transaction_id = match request.transaction_id.as_deref() {
            Some(id) => TransactionId::new(id),
            None => TransactionId::generate(),
        };
        let now = self.clock.now();

        let (subscription_id, slot) = match request.renew_subscription_id {
            Some(id) => {
                self.check_renewal(id, &request).await?;
                (id, SubscriptionSlot::Renew(id))
            }
            None => {
                let id = Uuid::now_v7();
                let subscription = Subscription {
                    subscription_id: id,
                    user_id: request.customer_id.clone(),
                    transaction_id: transaction_id.clone(),
                    plan_title: request.plan_title.clone(),
                    billing_cycle: request.billing_cycle.into(),
                    status: SubscriptionStatus::Pending,
                    activated_at: None,
                    expiry_date: None,
                    updated_at: now,
                    version: 0,
                };
                (id, SubscriptionSlot::Create(subscription))
            }
        };
        let payment = Payment {
            transaction_id: transaction_id.clone(),
            subscription_id,
            status: PaymentStatus::Initiated,
            amount: request.amount,
            customer_id: request.customer_id.clone(),
            order_id: request.order_id.clone(),
            gateway_reference: None,
            failure_reason: None,
            created_at: now,
            last_updated_at: now,
            version: 0,
        };

        match self
            .store
            .create(NewTransaction {
                payment,
                subscription: slot,
            })
            .await
        {
            Ok(()) => {}
            Err(StoreError::DuplicateTransaction(id)) => {
                return Err(ValidationError::DuplicateTransaction(id).into());
            }
            Err(StoreError::NotFound(_)) if request.renew_subscription_id.is_some() => {
                return Err(ValidationError::UnknownSubscription(subscription_id).into());
            }
            Err(e) => return Err(e.into()),
        }
        info!(
            transaction_id = %transaction_id,
            subscription_id = %subscription_id,
            renewal = request.renew_subscription_id.is_some(),
            "Payment initiated"
        );

        let charge = ChargeRequest {
            transaction_id: transaction_id.clone(),
            amount: request.amount,
            customer_id: request.customer_id,
            order_id: request.order_id,
            plan_title: request.plan_title,
            billing_cycle: request.billing_cycle.into(),
        };
        let timeout = self.config.read().await.initiate_timeout;
        let result = match tokio::time::timeout(timeout, self.gateway.create_charge(&charge)).await {
            Ok(result) => result,
            Err(_) => Err(GatewayError::Timeout(timeout)),
        };

        match result {
            Ok(created) => {
                // The charge exists either way; the callback carries the
                // reference again.
                if let Err(e) = self
                    .store
                    .record_gateway_reference(&transaction_id, &created.gateway_reference, self.clock.now())
                    .await
                {
                    warn!(
                        transaction_id = %transaction_id,
                        gateway_reference = %created.gateway_reference,
                        error = %e,
                        "Could not record gateway reference"
                    );
                }
                Ok(InitiatePaymentResponse {
                    transaction_id: transaction_id.to_string(),
                    subscription_id,
                    redirect_or_token: created.redirect_or_token,
                })
            }
            Err(e) => {
                let event = if e.is_timeout() {
                    warn!(transaction_id = %transaction_id, error = %e, "Charge outcome unknown, awaiting confirmation");
                    TransitionEvent::AwaitConfirmation
                } else {
                    warn!(transaction_id = %transaction_id, error = %e, "Charge failed");
                    TransitionEvent::ConfirmFailure {
                        reason: e.to_string(),
                    }
                };
                let submitted = self
                    .intake
                    .submit(PaymentEvent::new(transaction_id.clone(), event, EventSource::Initiate))
                    .await;
                if let Err(intake_error) = submitted {
                    warn!(
                        transaction_id = %transaction_id,
                        error = %intake_error,
                        "Could not record charge outcome"
                    );
                }
                Err(InitiateError::Gateway {
                    transaction_id,
                    source: e,
                })
            }
        }
    }

    /// A renewal must name a live subscription of the same customer, plan
    /// and cycle, so the charge matches the term it grants.
    async fn check_renewal(
        &self,
        subscription_id: Uuid,
        request: &InitiatePaymentRequest,
    ) -> Result<(), InitiateError> {
        let subscription = self
            .store
            .load_subscription(subscription_id)
            .await?
            .ok_or(ValidationError::UnknownSubscription(subscription_id))?;
        if subscription.status == SubscriptionStatus::Cancelled {
            return Err(ValidationError::SubscriptionCancelled(subscription_id).into());
        }
        let mismatch = if subscription.user_id != request.customer_id {
            Some("customer_id")
        } else if subscription.plan_title != request.plan_title {
            Some("plan_title")
        } else if subscription.billing_cycle != BillingCycle::from(request.billing_cycle) {
            Some("billing_cycle")
        } else {
            None
        };
        match mismatch {
            Some(field) => Err(ValidationError::RenewalMismatch {
                subscription_id,
                field,
            }
            .into()),
            None => Ok(()),
        }
    }

    /// Authenticate a raw callback and translate it into an event.
    ///
    /// `Ok(None)` means a verified callback carrying a non-terminal status.
    /// Nothing is mutated here.
    pub async fn parse_callback(
        &self,
        signature: Option<&str>,
        raw_body: &[u8],
    ) -> Result<(TransactionId, Option<PaymentEvent>, CallbackStatus), VerificationError> {
        let signature = signature.ok_or(VerificationError::MissingSignature)?;
        {
            let config = self.config.read().await;
            verify_raw_at(
                signature,
                raw_body,
                config.secret_bytes(),
                config.signature_tolerance_secs,
                self.clock.now().unix_timestamp(),
            )?;
        }
        let payload: GatewayCallbackPayload = serde_json::from_slice(raw_body)?;
        let transaction_id = TransactionId::new(payload.transaction_id.as_str());

        let event = match payload.status {
            CallbackStatus::Success => Some(TransitionEvent::ConfirmSuccess {
                gateway_reference: payload.gateway_reference,
            }),
            CallbackStatus::Failed => Some(TransitionEvent::ConfirmFailure {
                reason: payload
                    .failure_reason
                    .unwrap_or_else(|| "declined".to_owned()),
            }),
            CallbackStatus::Pending | CallbackStatus::Unknown => None,
        };
        let event =
            event.map(|event| PaymentEvent::new(transaction_id.clone(), event, EventSource::Callback));
        Ok((transaction_id, event, payload.status))
    }

    /// Verify, translate and submit a callback.
    ///
    /// Duplicates and deferrals are successes; only unverifiable payloads
    /// and internal failures are errors.
    pub async fn handle_callback(
        &self,
        signature: Option<&str>,
        raw_body: &[u8],
    ) -> Result<CallbackOutcome, CallbackError> {
        let (transaction_id, event, status) = match self.parse_callback(signature, raw_body).await {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "Rejected gateway callback");
                return Err(e.into());
            }
        };

        let result = match event {
            Some(event) => match self.intake.submit(event).await {
                Ok(SubmitOutcome::Applied(outcome)) => CallbackResult::Applied(outcome),
                Ok(SubmitOutcome::Deferred) => CallbackResult::Deferred,
                Err(IntakeError::UnknownTransaction(id)) => {
                    warn!(transaction_id = %id, "Verified callback for unknown transaction");
                    return Err(VerificationError::UnknownTransaction(id).into());
                }
                Err(e) => return Err(CallbackError::Intake(e)),
            },
            None => {
                if self.store.load(&transaction_id).await?.is_none() {
                    warn!(transaction_id = %transaction_id, "Verified callback for unknown transaction");
                    return Err(VerificationError::UnknownTransaction(transaction_id).into());
                }
                CallbackResult::Ignored(status)
            }
        };
        info!(transaction_id = %transaction_id, result = ?result, "Gateway callback handled");
        Ok(CallbackOutcome {
            transaction_id,
            result,
        })
    }
}

fn validate(request: &InitiatePaymentRequest) -> Result<(), ValidationError> {
    if request.amount <= Decimal::ZERO {
        return Err(ValidationError::NonPositiveAmount);
    }
    for (name, value) in [
        ("customer_id", &request.customer_id),
        ("order_id", &request.order_id),
        ("plan_title", &request.plan_title),
    ] {
        if value.trim().is_empty() {
            return Err(ValidationError::EmptyField(name));
        }
    }
    if let Some(id) = &request.transaction_id {
        let valid = !id.is_empty()
            && id.len() <= MAX_TRANSACTION_ID_LEN
            && id.bytes().all(|b| b.is_ascii_graphic());
        if !valid {
            return Err(ValidationError::InvalidTransactionId);
        }
    }
    Ok(())
}
