//! Test harness: the full router over in-memory stores, with the card
//! processor and the wallet pointed at wiremock servers.
#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use axum::body::{self, Body};
use axum::http::{Method, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use checkout_backend::api::{create_router, AppState};
use checkout_backend::checkout::{
    CheckoutService, CheckoutSettings, CsrfGuard, InMemorySessionStore,
};
use checkout_backend::config::Capabilities;
use checkout_backend::database::memory::{InMemoryMandateRepository, InMemoryOrderRepository};
use checkout_backend::orders::{Order, OrderEventBus, OrderLifecycleManager, OrderObserver};
use checkout_backend::payments::providers::wallet::TOKEN_PATH;
use checkout_backend::payments::providers::{
    BankTransferConfig, BankTransferGateway, CardConfig, CardGateway, DirectDebitConfig,
    DirectDebitGateway, ShapeValidator, WalletConfig, WalletGateway,
};
use checkout_backend::payments::{ApiClient, ApiClientConfig, GatewayRegistry};
use checkout_backend::webhooks::signature::sign_hex;
use checkout_backend::webhooks::WebhookReconciler;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

pub const CARD_WEBHOOK_SECRET: &str = "whsec_test";
pub const BANK_TRANSFER_SECRET: &str = "bt-secret";
pub const DIRECT_DEBIT_SECRET: &str = "dd-secret";
pub const WALLET_WEBHOOK_ID: &str = "WH-TEST";
pub const ADMIN_TOKEN: &str = "admin-test-token";
pub const CSRF_SECRET: &str = "test-csrf-secret-with-at-least-32-chars";
pub const BASE_URL: &str = "https://shop.test";

#[derive(Default)]
pub struct CountingObserver {
    pub finalized: AtomicUsize,
    pub refunded: AtomicUsize,
}

#[async_trait]
impl OrderObserver for CountingObserver {
    fn name(&self) -> &'static str {
        "counting"
    }

    async fn on_order_finalized(&self, _order: &Order) -> anyhow::Result<()> {
        self.finalized.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn on_order_refunded(
        &self,
        _order: &Order,
        _amount: checkout_backend::payments::Money,
    ) -> anyhow::Result<()> {
        self.refunded.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub struct TestApp {
    router: Router,
    pub state: AppState,
    pub card_server: MockServer,
    pub wallet_server: MockServer,
    pub mandates: Arc<InMemoryMandateRepository>,
    pub observer: Arc<CountingObserver>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::build(Some(DIRECT_DEBIT_SECRET)).await
    }

    /// Direct-debit status events are not configured and get rejected.
    pub async fn without_direct_debit_events() -> Self {
        Self::build(None).await
    }

    async fn build(direct_debit_secret: Option<&str>) -> Self {
        let card_server = MockServer::start().await;
        let wallet_server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A21AA-test", "expires_in": 32400
            })))
            .mount(&wallet_server)
            .await;
        Mock::given(method("POST"))
            .and(path("/v1/notifications/verify-webhook-signature"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"verification_status": "SUCCESS"})),
            )
            .mount(&wallet_server)
            .await;

        let card_config = CardConfig {
            base_url: card_server.uri(),
            secret_key: "sk_test".to_string(),
            webhook_secret: Some(CARD_WEBHOOK_SECRET.to_string()),
        };
        let client = ApiClient::new(ApiClientConfig {
            timeout: Duration::from_secs(5),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(1),
            token_safety_margin: Duration::from_secs(60),
        })
        .expect("http client")
        .with_provider(card_config.endpoint());
        let wallet_config = WalletConfig {
            base_url: wallet_server.uri(),
            client_id: "wallet-client".to_string(),
            client_secret: "wallet-secret".to_string(),
            webhook_id: Some(WALLET_WEBHOOK_ID.to_string()),
        };
        let client = client.with_provider(wallet_config.endpoint());
        let client = Arc::new(client);

        let orders = Arc::new(InMemoryOrderRepository::new());
        let mandates = Arc::new(InMemoryMandateRepository::new());
        let sessions = Arc::new(InMemorySessionStore::new());

        let card = Arc::new(CardGateway::new(client.clone(), &card_config));
        let wallet = Arc::new(WalletGateway::new(client, &wallet_config));
        let bank_transfer = Arc::new(BankTransferGateway::new(BankTransferConfig {
            account_holder: "Example Shop GmbH".to_string(),
            iban: "DE02120300000000202051".to_string(),
            events_secret: Some(BANK_TRANSFER_SECRET.to_string()),
            ..BankTransferConfig::default()
        }));
        let direct_debit = Arc::new(DirectDebitGateway::new(
            DirectDebitConfig {
                events_secret: direct_debit_secret.map(str::to_string),
                ..DirectDebitConfig::default()
            },
            Arc::new(ShapeValidator),
            mandates.clone(),
        ));

        let gateways = GatewayRegistry::new()
            .with(card.clone())
            .with(wallet.clone())
            .with(bank_transfer.clone())
            .with(direct_debit.clone());

        let observer = Arc::new(CountingObserver::default());
        let events = OrderEventBus::new().with_observer(observer.clone());
        let lifecycle = OrderLifecycleManager::new(orders, sessions.clone(), gateways, events);

        let capabilities = Capabilities::default();
        let reconciler = WebhookReconciler::new(lifecycle.clone(), &capabilities)
            .with_mandates(mandates.clone())
            .with_source(card)
            .with_source(wallet)
            .with_source(bank_transfer)
            .with_source(direct_debit);

        let checkout = CheckoutService::new(
            lifecycle.clone(),
            sessions,
            capabilities,
            CheckoutSettings {
                public_base_url: BASE_URL.to_string(),
                success_url: format!("{}/checkout/success", BASE_URL),
                failure_url: format!("{}/checkout/failure", BASE_URL),
            },
        );

        let state = AppState {
            checkout,
            lifecycle,
            reconciler: Arc::new(reconciler),
            csrf: CsrfGuard::new(CSRF_SECRET),
            admin_token: Some(Arc::from(ADMIN_TOKEN)),
            pending_order_ttl: chrono::Duration::hours(1),
            hold_alert_after: chrono::Duration::days(7),
            environment: "development".to_string(),
            db: None,
        };

        Self {
            router: create_router(state.clone()),
            state,
            card_server,
            wallet_server,
            mandates,
            observer,
        }
    }

    pub async fn request(
        &self,
        method: Method,
        uri: &str,
        headers: &[(&str, String)],
        body: Option<Value>,
    ) -> Response {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, value);
        }
        let body = match body {
            Some(json) => {
                builder = builder.header("content-type", "application/json");
                Body::from(json.to_string())
            }
            None => Body::empty(),
        };

        self.router
            .clone()
            .oneshot(builder.body(body).expect("request"))
            .await
            .expect("router response")
    }

    /// Headers of a browser session holding a valid anti-forgery token.
    pub fn session_headers(&self, session_id: &str) -> Vec<(&'static str, String)> {
        vec![
            ("x-session-id", session_id.to_string()),
            ("x-csrf-token", self.state.csrf.issue(session_id)),
        ]
    }

    pub fn admin_headers(&self) -> Vec<(&'static str, String)> {
        vec![("authorization", format!("Bearer {}", ADMIN_TOKEN))]
    }

    pub async fn checkout(
        &self,
        session_id: &str,
        path: &str,
        body: Value,
    ) -> Response {
        self.request(Method::POST, path, &self.session_headers(session_id), Some(body))
            .await
    }

    /// Prepare an order of 49.99 EUR and return its id.
    pub async fn prepare_order(&self, session_id: &str, method: &str) -> Uuid {
        let response = self
            .checkout(session_id, "/checkout/prepare", checkout_form(method))
            .await;
        assert_eq!(response.status(), StatusCode::CREATED);
        let body = response_json(response).await;
        assert_eq!(body["total"], 4999);
        body["temp_order_id"]
            .as_str()
            .and_then(|id| Uuid::parse_str(id).ok())
            .expect("temp_order_id")
    }

    pub async fn order(&self, order_id: Uuid) -> Order {
        self.state.lifecycle.find(order_id).await.expect("order")
    }

    /// Card processor answers intent creation with a 3-D Secure challenge
    /// and every later read of the intent with `final_status`.
    pub async fn mount_card_intent(&self, intent_id: &str, final_status: Value) {
        Mock::given(method("POST"))
            .and(path("/v1/payment_intents"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": intent_id,
                "status": "requires_action",
                "client_secret": format!("{}_secret", intent_id),
                "next_action": {"type": "use_sdk"}
            })))
            .mount(&self.card_server)
            .await;

        let mut intent = final_status;
        intent["id"] = Value::String(intent_id.to_string());
        Mock::given(method("GET"))
            .and(path(format!("/v1/payment_intents/{}", intent_id)))
            .respond_with(ResponseTemplate::new(200).set_body_json(intent))
            .mount(&self.card_server)
            .await;
    }

    pub async fn start_card_payment(&self, session_id: &str, order_id: Uuid) -> Value {
        let response = self
            .checkout(
                session_id,
                "/checkout/payment",
                json!({
                    "method": "card",
                    "temp_order_id": order_id,
                    "payment_method_token": "pm_card_visa"
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        response_json(response).await
    }

    pub async fn confirm(&self, session_id: &str, order_id: Uuid, reference: &str) -> Response {
        self.checkout(
            session_id,
            "/checkout/confirm",
            json!({"payment_reference": reference, "order_reference": order_id}),
        )
        .await
    }

    /// Run a 49.99 EUR card checkout through to `paid` with intent `tx_123`.
    pub async fn paid_card_order(&self, session_id: &str) -> Uuid {
        self.mount_card_intent(
            "tx_123",
            json!({"status": "succeeded", "amount": 4999, "amount_received": 4999}),
        )
        .await;
        let order_id = self.prepare_order(session_id, "card").await;
        self.start_card_payment(session_id, order_id).await;
        let response = self.confirm(session_id, order_id, "tx_123").await;
        assert_eq!(response.status(), StatusCode::OK);
        let body = response_json(response).await;
        assert_eq!(body["order_status"], "paid");
        order_id
    }

    /// Wallet accepts order creation for `wallet_order_id` with an approval link.
    pub async fn mount_wallet_order(&self, wallet_order_id: &str) {
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders"))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": wallet_order_id,
                "status": "CREATED",
                "links": [
                    {"rel": "self", "href": format!("https://wallet.test/v2/checkout/orders/{}", wallet_order_id)},
                    {"rel": "approve", "href": format!("https://wallet.test/checkoutnow?token={}", wallet_order_id)}
                ]
            })))
            .mount(&self.wallet_server)
            .await;
    }

    /// Capturing `wallet_order_id` completes with capture `capture_id`,
    /// exactly `times` times.
    pub async fn mount_wallet_capture(&self, wallet_order_id: &str, capture_id: &str, times: u64) {
        Mock::given(method("POST"))
            .and(path(format!("/v2/checkout/orders/{}/capture", wallet_order_id)))
            .respond_with(ResponseTemplate::new(201).set_body_json(json!({
                "id": wallet_order_id,
                "status": "COMPLETED",
                "purchase_units": [{"payments": {"captures": [{
                    "id": capture_id,
                    "status": "COMPLETED",
                    "amount": {"currency_code": "EUR", "value": "49.99"}
                }]}}]
            })))
            .expect(times)
            .mount(&self.wallet_server)
            .await;
    }

    pub async fn start_wallet_payment(&self, session_id: &str, order_id: Uuid) -> Value {
        let response = self
            .checkout(
                session_id,
                "/checkout/payment",
                json!({"method": "wallet", "temp_order_id": order_id}),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        response_json(response).await
    }

    pub async fn start_direct_debit_payment(&self, session_id: &str, order_id: Uuid) -> Value {
        let response = self
            .checkout(
                session_id,
                "/checkout/payment",
                json!({
                    "method": "direct_debit",
                    "temp_order_id": order_id,
                    "direct_debit": {
                        "account_reference": "DE89 3704 0044 0532 0130 00",
                        "holder_name": "Ada Buyer"
                    }
                }),
            )
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        response_json(response).await
    }

    /// Mandate checkout for a 49.99 EUR order, collected through
    /// `mandate.completed`. The first order of an app gets mandate `MNDT-1001`.
    pub async fn paid_direct_debit_order(&self, session_id: &str) -> Uuid {
        let order_id = self.prepare_order(session_id, "direct_debit").await;
        let step = self.start_direct_debit_payment(session_id, order_id).await;
        assert_eq!(step["order_status"], "on_hold");

        let reference = format!("MNDT-{}", self.order(order_id).await.number);
        let response = self
            .direct_debit_webhook(&json!({
                "id": format!("dd_evt_{}", reference),
                "type": "mandate.completed",
                "mandate_reference": reference,
                "amount": 4999
            }))
            .await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(self.order(order_id).await.status.as_str(), "paid");
        order_id
    }

    pub async fn card_webhook(&self, payload: &Value) -> Response {
        let body = payload.to_string();
        let timestamp = chrono::Utc::now().timestamp();
        let signature = sign_hex(
            CARD_WEBHOOK_SECRET,
            format!("{}.{}", timestamp, body).as_bytes(),
        );
        self.raw_webhook(
            "card",
            vec![("card-signature", format!("t={},v1={}", timestamp, signature))],
            body,
        )
        .await
    }

    pub async fn bank_transfer_webhook(&self, payload: &Value) -> Response {
        let body = payload.to_string();
        let signature = sign_hex(BANK_TRANSFER_SECRET, body.as_bytes());
        self.raw_webhook("bank_transfer", vec![("x-signature", signature)], body)
            .await
    }

    pub async fn direct_debit_webhook(&self, payload: &Value) -> Response {
        let body = payload.to_string();
        let signature = sign_hex(DIRECT_DEBIT_SECRET, body.as_bytes());
        self.raw_webhook("direct_debit", vec![("x-signature", signature)], body)
            .await
    }

    /// Wallet delivery with transmission headers; the mocked verification
    /// endpoint accepts them.
    pub async fn wallet_webhook(&self, payload: &Value) -> Response {
        let headers = vec![
            ("wallet-transmission-id", Uuid::new_v4().to_string()),
            ("wallet-transmission-time", chrono::Utc::now().to_rfc3339()),
            ("wallet-transmission-sig", "c2lnbmF0dXJl".to_string()),
            ("wallet-cert-url", "https://wallet.test/certs/CERT-1".to_string()),
            ("wallet-auth-algo", "SHA256withRSA".to_string()),
        ];
        self.raw_webhook("wallet", headers, payload.to_string()).await
    }

    pub async fn raw_webhook(
        &self,
        provider: &str,
        headers: Vec<(&str, String)>,
        body: String,
    ) -> Response {
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(format!("/webhooks/{}", provider))
            .header("content-type", "application/json");
        for (name, value) in headers {
            builder = builder.header(name, value);
        }
        self.router
            .clone()
            .oneshot(builder.body(Body::from(body)).expect("request"))
            .await
            .expect("router response")
    }
}

/// 2 x 15.00 + 14.99 + 10.00 shipping - 5.00 discount = 49.99 EUR
pub fn checkout_form(method: &str) -> Value {
    let address = json!({
        "name": "Ada Buyer",
        "line1": "Hauptstrasse 1",
        "city": "Berlin",
        "postal_code": "10115",
        "country": "DE",
        "email": "buyer@example.com"
    });
    json!({
        "lines": [
            {"sku": "MUG", "name": "Mug", "quantity": 2, "unit_price": 1500},
            {"sku": "TEA", "name": "Tea", "quantity": 1, "unit_price": 1499}
        ],
        "currency": "EUR",
        "shipping_total": 1000,
        "discount": 500,
        "shipping_address": address,
        "payment_method": method
    })
}

pub async fn response_json(response: Response) -> Value {
    let bytes = body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("response body bytes");
    serde_json::from_slice(&bytes).expect("json response")
}
