//! Custom Axum extractors.
//!
//! Provides `RawCallback`, which captures the gateway's signature header
//! together with the exact body bytes it was computed over. Verification
//! itself happens in [`subcoord_core::gateway::GatewayAdapter`], since
//! re-serializing a parsed body would not reproduce the signed bytes.

use axum::{
    body::Bytes,
    extract::{FromRequest, Request},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use subcoord_sdk::signature::SIGNATURE_HEADER;

/// Largest callback body accepted.
const MAX_CALLBACK_BODY: usize = 64 * 1024;

/// An unverified gateway callback.
pub struct RawCallback {
    /// Value of the `Subcoord-Gateway-Signature` header, if present.
    pub signature: Option<String>,
    pub body: Bytes,
}

/// Errors that can occur while reading a callback.
#[derive(Debug, thiserror::Error)]
pub enum RawCallbackError {
    #[error("invalid Subcoord-Gateway-Signature header encoding")]
    InvalidHeader,
    #[error("failed to read request body")]
    BodyReadError,
}

impl IntoResponse for RawCallbackError {
    fn into_response(self) -> Response {
        let message = match self {
            RawCallbackError::InvalidHeader => "invalid Subcoord-Gateway-Signature header encoding",
            RawCallbackError::BodyReadError => "failed to read request body",
        };
        (StatusCode::BAD_REQUEST, message).into_response()
    }
}

impl<S: Send + Sync> FromRequest<S> for RawCallback {
    type Rejection = RawCallbackError;

    async fn from_request(req: Request, _state: &S) -> Result<Self, Self::Rejection> {
        let signature = req
            .headers()
            .get(SIGNATURE_HEADER)
            .map(|value| value.to_str().map(str::to_owned))
            .transpose()
            .map_err(|_| RawCallbackError::InvalidHeader)?;

        let body = axum::body::to_bytes(req.into_body(), MAX_CALLBACK_BODY)
            .await
            .map_err(|_| RawCallbackError::BodyReadError)?;

        Ok(RawCallback { signature, body })
    }
}
