//! [`PaymentGateway`] over the processor's JSON HTTP API.

use super::{ChargeCreated, ChargeRequest, GatewayError, GatewayStatus, PaymentGateway};
use crate::entities::Payment;
use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use subcoord_sdk::objects::{BillingCycle as SdkBillingCycle, CallbackStatus};
use tracing::debug;
use url::Url;

#[derive(Debug, serde::Serialize)]
struct CreateChargeBody<'a> {
    transaction_id: &'a str,
    amount: String,
    customer_id: &'a str,
    order_id: &'a str,
    description: &'a str,
    billing_cycle: SdkBillingCycle,
}

#[derive(Debug, serde::Deserialize)]
struct ChargeResponse {
    id: String,
    #[serde(default)]
    redirect_url: Option<String>,
    #[serde(default)]
    client_token: Option<String>,
}

#[derive(Debug, serde::Deserialize)]
struct ChargeStatusResponse {
    #[serde(default)]
    id: Option<String>,
    status: CallbackStatus,
    #[serde(default)]
    failure_reason: Option<String>,
}

/// Talks to `POST {base}/charges` and `GET {base}/charges/{transaction_id}`
/// with a bearer API key.
pub struct HttpGateway {
    base_url: Url,
    api_key: String,
    request_timeout: Duration,
    http_client: reqwest::Client,
}

impl HttpGateway {
    pub fn new(base_url: Url, api_key: String, request_timeout: Duration) -> Self {
        Self {
            base_url,
            api_key,
            request_timeout,
            http_client: reqwest::Client::builder()
                .timeout(request_timeout)
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.as_str().trim_end_matches('/'), path)
    }

    fn map_error(&self, e: reqwest::Error) -> GatewayError {
        if e.is_timeout() {
            GatewayError::Timeout(self.request_timeout)
        } else if e.is_decode() {
            GatewayError::InvalidResponse(e.to_string())
        } else {
            GatewayError::Unreachable(e.to_string())
        }
    }

    /// Turn a non-success status into the matching error.
    async fn check_status(&self, response: reqwest::Response) -> Result<reqwest::Response, GatewayError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        if status.is_client_error() {
            Err(GatewayError::Rejected {
                reason: if body.is_empty() {
                    status.to_string()
                } else {
                    body
                },
            })
        } else {
            Err(GatewayError::Unreachable(format!("{status}: {body}")))
        }
    }
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    #[tracing::instrument(skip_all, err, fields(transaction_id = %request.transaction_id))]
    async fn create_charge(&self, request: &ChargeRequest) -> Result<ChargeCreated, GatewayError> {
        let body = CreateChargeBody {
            transaction_id: request.transaction_id.as_str(),
            amount: request.amount.to_string(),
            customer_id: &request.customer_id,
            order_id: &request.order_id,
            description: &request.plan_title,
            billing_cycle: request.billing_cycle.into(),
        };
        let response = self
            .http_client
            .post(self.endpoint("charges"))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;
        let response = self.check_status(response).await?;
        let charge: ChargeResponse = response.json().await.map_err(|e| self.map_error(e))?;

        let redirect_or_token = charge
            .redirect_url
            .or(charge.client_token)
            .ok_or_else(|| {
                GatewayError::InvalidResponse("neither redirect_url nor client_token present".into())
            })?;
        Ok(ChargeCreated {
            gateway_reference: charge.id,
            redirect_or_token,
        })
    }

    #[tracing::instrument(skip_all, err, fields(transaction_id = %payment.transaction_id))]
    async fn fetch_status(&self, payment: &Payment) -> Result<GatewayStatus, GatewayError> {
        let path = format!(
            "charges/{}",
            urlencoding::encode(payment.transaction_id.as_str())
        );
        let response = self
            .http_client
            .get(self.endpoint(&path))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| self.map_error(e))?;

        if response.status() == StatusCode::NOT_FOUND {
            // The charge request may never have reached the processor.
            debug!(transaction_id = %payment.transaction_id, "Charge unknown to processor");
            return Ok(GatewayStatus::Pending);
        }
        let response = self.check_status(response).await?;
        let charge: ChargeStatusResponse = response.json().await.map_err(|e| self.map_error(e))?;

        Ok(match charge.status {
            CallbackStatus::Success => GatewayStatus::Succeeded {
                gateway_reference: charge.id,
            },
            CallbackStatus::Failed => GatewayStatus::Failed {
                reason: charge
                    .failure_reason
                    .unwrap_or_else(|| "declined".to_owned()),
            },
            CallbackStatus::Pending | CallbackStatus::Unknown => GatewayStatus::Pending,
        })
    }
}
