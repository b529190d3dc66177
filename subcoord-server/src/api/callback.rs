//! `POST /gateway/callback`: asynchronous charge results from the processor.
//!
//! Any verified callback is acknowledged with `200`, including duplicates
//! and events parked for re-delivery, so the processor stops retrying.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;
use subcoord_core::gateway::{CallbackError, CallbackResult, VerificationError};
use subcoord_sdk::signature::SignatureError;

use crate::api::extractors::RawCallback;
use crate::state::AppState;

#[derive(Debug, Serialize)]
pub(super) struct CallbackAck {
    transaction_id: String,
    /// `applied`, `duplicate`, `deferred` or `ignored`.
    result: &'static str,
}

pub(super) async fn gateway_callback(
    State(state): State<AppState>,
    callback: RawCallback,
) -> Result<impl IntoResponse, CallbackApiError> {
    let outcome = state
        .adapter()
        .handle_callback(callback.signature.as_deref(), &callback.body)
        .await?;
    let result = match outcome.result {
        CallbackResult::Applied(o) if o.changed => "applied",
        CallbackResult::Applied(_) => "duplicate",
        CallbackResult::Deferred => "deferred",
        CallbackResult::Ignored(_) => "ignored",
    };
    Ok(Json(CallbackAck {
        transaction_id: outcome.transaction_id.to_string(),
        result,
    }))
}

#[derive(Debug)]
pub(super) struct CallbackApiError(CallbackError);

impl From<CallbackError> for CallbackApiError {
    fn from(e: CallbackError) -> Self {
        Self(e)
    }
}

impl IntoResponse for CallbackApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self.0 {
            CallbackError::Verification(e) => match e {
                VerificationError::MissingSignature => {
                    (StatusCode::UNAUTHORIZED, "missing signature header")
                }
                VerificationError::Signature(
                    SignatureError::InvalidFormat | SignatureError::InvalidBase64,
                ) => (StatusCode::BAD_REQUEST, "invalid signature header format"),
                VerificationError::Malformed(_) => {
                    (StatusCode::BAD_REQUEST, "malformed callback body")
                }
                VerificationError::Signature(
                    SignatureError::SignatureMismatch | SignatureError::Expired,
                ) => (StatusCode::UNAUTHORIZED, "signature verification failed"),
                VerificationError::UnknownTransaction(_) => {
                    (StatusCode::NOT_FOUND, "transaction not found")
                }
            },
            CallbackError::Intake(e) => {
                tracing::error!(error = %e, "Callback could not be handed to the intake");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
            CallbackError::Store(e) => {
                tracing::error!(error = %e, "Callback store error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal server error")
            }
        };
        (status, message).into_response()
    }
}
