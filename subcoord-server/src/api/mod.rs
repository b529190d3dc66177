//! HTTP API, mounted under `/api/v1`.
//!
//! # Endpoints
//!
//! - `POST /payments`                  – initiate a payment
//! - `GET  /payments/{transaction_id}` – status snapshot
//! - `POST /gateway/callback`          – signed processor callback
//! - `GET  /live`                      – WebSocket status stream
//! - `GET  /dead-letters`              – exhausted events awaiting reconciliation

use axum::{
    Router,
    routing::{get, post},
};

use crate::state::AppState;

mod callback;
pub mod extractors;
mod live;
mod operator;
mod payments;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/payments", post(payments::initiate_payment))
        .route(
            "/payments/{transaction_id}",
            get(payments::get_payment_status),
        )
        .route("/gateway/callback", post(callback::gateway_callback))
        .route("/live", get(live::live_status_ws))
        .route("/dead-letters", get(operator::list_dead_letters))
}

#[cfg(test)]
mod tests {
    use crate::server::build_router;
    use crate::state::AppState;
    use axum::Router;
    use axum::body::Body;
    use axum::http::{Request, StatusCode, header};
    use rust_decimal::Decimal;
    use std::sync::Arc;
    use std::time::Duration;
    use subcoord_core::Coordinator;
    use subcoord_core::config::{
        ConfigStore, GatewayConfig, IntakeConfig, PollerConfig, ServerConfig, SharedConfig,
        SweeperConfig,
    };
    use subcoord_core::gateway::{SandboxCharge, SandboxGateway};
    use subcoord_core::store::MemoryStateStore;
    use subcoord_core::utils::SystemClock;
    use subcoord_sdk::objects::{
        BillingCycle, CallbackStatus, GatewayCallbackPayload, InitiatePaymentRequest,
        InitiatePaymentResponse, StatusSnapshot,
    };
    use subcoord_sdk::signature::{SIGNATURE_HEADER, sign_raw};
    use tower::ServiceExt;

    const SECRET: &[u8] = b"whsec_api";

    fn app() -> (Router, SandboxGateway) {
        let (router, gateway, _store) = app_with(IntakeConfig::default());
        (router, gateway)
    }

    fn app_with(intake: IntakeConfig) -> (Router, SandboxGateway, Arc<MemoryStateStore>) {
        let store = Arc::new(MemoryStateStore::new());
        let gateway = SandboxGateway::new();
        let mut gateway_config = GatewayConfig::new(None, String::new(), SECRET);
        gateway_config.initiate_timeout = Duration::from_millis(50);
        let config = SharedConfig {
            server: ConfigStore::new(ServerConfig {
                listen: "127.0.0.1:0".parse().unwrap(),
            }),
            gateway: ConfigStore::new(gateway_config),
            sweeper: ConfigStore::new(SweeperConfig::default()),
            poller: ConfigStore::new(PollerConfig::default()),
            intake,
        };
        let (coordinator, _tasks) = Coordinator::new(
            store.clone(),
            Arc::new(gateway.clone()),
            config,
            Arc::new(SystemClock),
        );
        (build_router(AppState::new(coordinator)), gateway, store)
    }

    fn initiate_body(transaction_id: &str) -> Body {
        let request = InitiatePaymentRequest {
            customer_id: "cust_1".into(),
            amount: Decimal::new(1999, 2),
            order_id: "ord_1".into(),
            plan_title: "Pro".into(),
            billing_cycle: BillingCycle::Yearly,
            transaction_id: Some(transaction_id.into()),
            renew_subscription_id: None,
        };
        Body::from(serde_json::to_vec(&request).unwrap())
    }

    async fn post_initiate(app: &Router, transaction_id: &str) -> axum::response::Response {
        app.clone()
            .oneshot(
                Request::post("/api/v1/payments")
                    .header(header::CONTENT_TYPE, "application/json")
                    .body(initiate_body(transaction_id))
                    .unwrap(),
            )
            .await
            .unwrap()
    }

    fn callback_request(transaction_id: &str, key: &[u8]) -> Request<Body> {
        let body = serde_json::to_vec(&GatewayCallbackPayload {
            transaction_id: transaction_id.into(),
            status: CallbackStatus::Success,
            gateway_reference: None,
            failure_reason: None,
        })
        .unwrap();
        let now = time::OffsetDateTime::now_utc().unix_timestamp();
        Request::post("/api/v1/gateway/callback")
            .header(SIGNATURE_HEADER, sign_raw(now, &body, key))
            .body(Body::from(body))
            .unwrap()
    }

    async fn json<T: serde::de::DeserializeOwned>(response: axum::response::Response) -> T {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_health() {
        let (app, _) = app();
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body: serde_json::Value = json(response).await;
        assert_eq!(body["status"], "healthy");
    }

    #[tokio::test]
    async fn test_initiate_then_query_status() {
        let (app, _) = app();
        let response = post_initiate(&app, "t1").await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let created: InitiatePaymentResponse = json(response).await;
        assert_eq!(created.transaction_id, "t1");
        assert_eq!(created.redirect_or_token, "sandbox_token_t1");

        let response = app
            .clone()
            .oneshot(Request::get("/api/v1/payments/t1").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let snapshot: StatusSnapshot = json(response).await;
        assert_eq!(snapshot.data.subscription_id, created.subscription_id);
        assert_eq!(snapshot.status, subcoord_sdk::objects::PaymentStatus::Initiated);

        let response = app
            .oneshot(Request::get("/api/v1/payments/nope").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_initiate_error_statuses() {
        let (app, gateway) = app();
        assert_eq!(post_initiate(&app, "t1").await.status(), StatusCode::CREATED);
        assert_eq!(post_initiate(&app, "t1").await.status(), StatusCode::CONFLICT);
        assert_eq!(post_initiate(&app, " ").await.status(), StatusCode::BAD_REQUEST);

        gateway.script(SandboxCharge::Unreachable);
        assert_eq!(post_initiate(&app, "t2").await.status(), StatusCode::BAD_GATEWAY);

        gateway.script(SandboxCharge::Hang);
        assert_eq!(
            post_initiate(&app, "t3").await.status(),
            StatusCode::GATEWAY_TIMEOUT
        );
    }

    #[tokio::test]
    async fn test_callback_statuses() {
        let (app, _) = app();
        post_initiate(&app, "t1").await;

        let response = app
            .clone()
            .oneshot(callback_request("t1", SECRET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack: serde_json::Value = json(response).await;
        assert_eq!(ack["result"], "applied");

        let replay = app
            .clone()
            .oneshot(callback_request("t1", SECRET))
            .await
            .unwrap();
        assert_eq!(replay.status(), StatusCode::OK);
        let ack: serde_json::Value = json(replay).await;
        assert_eq!(ack["result"], "duplicate");

        let forged = app
            .clone()
            .oneshot(callback_request("t1", b"not the secret"))
            .await
            .unwrap();
        assert_eq!(forged.status(), StatusCode::UNAUTHORIZED);

        let unknown = app
            .clone()
            .oneshot(callback_request("nope", SECRET))
            .await
            .unwrap();
        assert_eq!(unknown.status(), StatusCode::NOT_FOUND);

        let garbled = app
            .oneshot(
                Request::post("/api/v1/gateway/callback")
                    .header(SIGNATURE_HEADER, "not-a-signature")
                    .body(Body::from("{}"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(garbled.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_dead_letters_are_listed() {
        let (app, _, store) = app_with(IntakeConfig {
            max_attempts: 0,
            ..IntakeConfig::default()
        });
        post_initiate(&app, "t1").await;

        // Every commit attempt of the callback conflicts.
        store.inject_conflicts(5);
        let response = app
            .clone()
            .oneshot(callback_request("t1", SECRET))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ack: serde_json::Value = json(response).await;
        assert_eq!(ack["result"], "deferred");

        let response = app
            .oneshot(Request::get("/api/v1/dead-letters").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let letters: serde_json::Value = json(response).await;
        assert_eq!(letters.as_array().map(Vec::len), Some(1));
        assert_eq!(letters[0]["transaction_id"], "t1");
        assert_eq!(letters[0]["event"], "confirm_success");
        assert_eq!(letters[0]["source"], "callback");
    }
}
