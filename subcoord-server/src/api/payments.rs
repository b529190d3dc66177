//! Payment endpoints, called by the application backend.
//!
//! - `POST /payments`                  – initiate a subscription payment
//! - `GET  /payments/{transaction_id}` – current status snapshot

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use subcoord_core::entities::TransactionId;
use subcoord_core::gateway::{InitiateError, ValidationError};
use subcoord_core::store::StoreError;
use subcoord_sdk::objects::InitiatePaymentRequest;

use crate::state::AppState;

/// `POST /payments`: start a purchase or renewal.
pub(super) async fn initiate_payment(
    State(state): State<AppState>,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<impl IntoResponse, PaymentsApiError> {
    let response = state.adapter().initiate(request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /payments/{transaction_id}`: read the authoritative state.
pub(super) async fn get_payment_status(
    State(state): State<AppState>,
    Path(transaction_id): Path<String>,
) -> Result<impl IntoResponse, PaymentsApiError> {
    let transaction_id = TransactionId::new(transaction_id);
    let snapshot = state
        .store()
        .load(&transaction_id)
        .await
        .map_err(PaymentsApiError::Store)?
        .ok_or(PaymentsApiError::NotFound)?
        .snapshot();
    Ok(Json(snapshot))
}

/// Errors that can occur in payment handlers.
#[derive(Debug)]
pub(super) enum PaymentsApiError {
    Initiate(InitiateError),
    Store(StoreError),
    NotFound,
}

impl From<InitiateError> for PaymentsApiError {
    fn from(e: InitiateError) -> Self {
        PaymentsApiError::Initiate(e)
    }
}

impl IntoResponse for PaymentsApiError {
    fn into_response(self) -> Response {
        match self {
            PaymentsApiError::Initiate(InitiateError::Validation(e)) => {
                let status = match e {
                    ValidationError::DuplicateTransaction(_) => StatusCode::CONFLICT,
                    _ => StatusCode::BAD_REQUEST,
                };
                (status, e.to_string()).into_response()
            }
            PaymentsApiError::Initiate(InitiateError::Gateway {
                transaction_id,
                source,
            }) => {
                let status = if source.is_timeout() {
                    StatusCode::GATEWAY_TIMEOUT
                } else {
                    StatusCode::BAD_GATEWAY
                };
                (
                    status,
                    format!("payment processor error for transaction {transaction_id}"),
                )
                    .into_response()
            }
            PaymentsApiError::Initiate(InitiateError::Store(e)) | PaymentsApiError::Store(e) => {
                tracing::error!(error = %e, "Payments API store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error").into_response()
            }
            PaymentsApiError::NotFound => {
                (StatusCode::NOT_FOUND, "transaction not found").into_response()
            }
        }
    }
}
