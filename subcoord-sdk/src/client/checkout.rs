//! Checkout client (application backend → coordinator).

use reqwest::Client;
use url::Url;

use super::{ClientError, LiveStatus};
use crate::objects::{InitiatePaymentRequest, InitiatePaymentResponse, StatusSnapshot};

/// Typed client for the payment endpoints and the live status channel.
#[derive(Debug, Clone)]
pub struct CheckoutClient {
    http: Client,
    base_url: Url,
}

impl CheckoutClient {
    /// Create a new `CheckoutClient` for the coordinator at `base_url`.
    pub fn new(base_url: Url) -> Self {
        Self {
            http: Client::new(),
            base_url,
        }
    }

    /// Replace the default `reqwest::Client` with a custom one.
    pub fn with_http_client(mut self, client: Client) -> Self {
        self.http = client;
        self
    }

    /// `POST /api/v1/payments` – start a subscription purchase.
    pub async fn initiate(
        &self,
        request: &InitiatePaymentRequest,
    ) -> Result<InitiatePaymentResponse, ClientError> {
        let url = self.base_url.join("/api/v1/payments")?;
        let resp = self.http.post(url).json(request).send().await?;
        parse_response(resp).await
    }

    /// `GET /api/v1/payments/{transaction_id}` – fetch the current snapshot.
    pub async fn status(&self, transaction_id: &str) -> Result<StatusSnapshot, ClientError> {
        let url = self.base_url.join(&format!(
            "/api/v1/payments/{}",
            urlencoding::encode(transaction_id)
        ))?;
        let resp = self.http.get(url).send().await?;
        parse_response(resp).await
    }

    /// Open the live channel and join `transaction_id`.
    pub async fn live(&self, transaction_id: &str) -> Result<LiveStatus, ClientError> {
        let mut url = self.base_url.join("/api/v1/live")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        // http(s) → ws(s) is always a valid scheme change
        let _ = url.set_scheme(scheme);
        LiveStatus::connect(url, transaction_id).await
    }
}

async fn parse_response<T: serde::de::DeserializeOwned>(
    resp: reqwest::Response,
) -> Result<T, ClientError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(ClientError::Api { status, body });
    }
    let bytes = resp.bytes().await?;
    serde_json::from_slice(&bytes).map_err(ClientError::Json)
}
