//! Redirect wallet
//!
//! A provider-side order is created up front with amount, items and shipping.
//! The customer approves it on the wallet's site and comes back through the
//! return URL; `confirm` then captures explicitly.

use async_trait::async_trait;
use reqwest::Method;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::orders::model::Order;
use crate::payments::client::{ApiClient, ApiError, ProviderAuth, ProviderEndpoint};
use crate::payments::error::GatewayError;
use crate::payments::money::Money;
use crate::payments::traits::GatewayAdapter;
use crate::payments::types::{
    CheckoutData, ClientResult, Continuation, PaymentHandle, PaymentMethod, PaymentOutcome,
    PaymentRef, RefundReceipt,
};
use crate::webhooks::error::WebhookError;
use crate::webhooks::source::WebhookSource;
use crate::webhooks::types::{uuid_field, EventKind, ProviderEvent, WebhookRequest};

const PROVIDER: &str = "wallet";
pub const TOKEN_PATH: &str = "/v1/oauth2/token";

const TRANSMISSION_HEADERS: [(&str, &str); 5] = [
    ("transmission_id", "wallet-transmission-id"),
    ("transmission_time", "wallet-transmission-time"),
    ("transmission_sig", "wallet-transmission-sig"),
    ("cert_url", "wallet-cert-url"),
    ("auth_algo", "wallet-auth-algo"),
];

#[derive(Debug, Clone)]
pub struct WalletConfig {
    pub base_url: String,
    pub client_id: String,
    pub client_secret: String,
    /// Webhook id registered with the wallet; required for verification
    pub webhook_id: Option<String>,
}

impl WalletConfig {
    /// API client registration; bearer tokens come from the OAuth2 endpoint.
    pub fn endpoint(&self) -> ProviderEndpoint {
        ProviderEndpoint {
            name: PROVIDER.to_string(),
            base_url: self.base_url.clone(),
            auth: ProviderAuth::ClientCredentials {
                client_id: self.client_id.clone(),
                client_secret: self.client_secret.clone(),
                token_path: TOKEN_PATH.to_string(),
            },
        }
    }
}

pub struct WalletGateway {
    client: Arc<ApiClient>,
    webhook_id: Option<String>,
}

impl WalletGateway {
    pub fn new(client: Arc<ApiClient>, config: &WalletConfig) -> Self {
        Self {
            client,
            webhook_id: config.webhook_id.clone(),
        }
    }

    async fn capture(&self, order_ref: &str) -> Result<Value, GatewayError> {
        let result = self
            .client
            .post(
                PROVIDER,
                &format!("/v2/checkout/orders/{}/capture", order_ref),
                &json!({}),
            )
            .await;

        match result {
            Ok(response) => Ok(response.body),
            Err(err) if err.provider_code() == Some("ORDER_ALREADY_CAPTURED") => {
                warn!(
                    "Wallet order {} already captured, reading existing capture",
                    order_ref
                );
                self.fetch_order(order_ref).await
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn fetch_order(&self, order_ref: &str) -> Result<Value, GatewayError> {
        let response = self
            .client
            .get(PROVIDER, &format!("/v2/checkout/orders/{}", order_ref))
            .await?;
        Ok(response.body)
    }
}

fn approval_link(order: &Value) -> Option<String> {
    order
        .get("links")
        .and_then(Value::as_array)?
        .iter()
        .find(|link| {
            matches!(
                link.get("rel").and_then(Value::as_str),
                Some("approve") | Some("payer-action")
            )
        })
        .and_then(|link| link.get("href"))
        .and_then(Value::as_str)
        .map(str::to_string)
}

fn amount_value(amount: Money, currency: &str) -> Value {
    json!({
        "currency_code": currency,
        "value": amount.to_decimal_string(currency),
    })
}

fn order_payload(order: &Order, data: &CheckoutData) -> Result<Value, GatewayError> {
    let return_url = data
        .return_url
        .as_deref()
        .ok_or_else(|| GatewayError::validation("return_url is required for wallet payments"))?;
    let cancel_url = data.cancel_url.as_deref().unwrap_or(return_url);
    let currency = order.currency.as_str();

    let mut item_total = Money::ZERO;
    let mut items = Vec::with_capacity(order.lines.len());
    for line in &order.lines {
        let line_total = line
            .line_total()
            .and_then(|t| item_total.checked_add(t))
            .ok_or_else(|| GatewayError::validation("order amount overflow"))?;
        item_total = line_total;
        items.push(json!({
            "name": line.name,
            "sku": line.sku,
            "quantity": line.quantity.to_string(),
            "unit_amount": amount_value(line.unit_price, currency),
        }));
    }

    let address = &order.shipping_address;
    Ok(json!({
        "intent": "CAPTURE",
        "purchase_units": [{
            "reference_id": order.id.to_string(),
            "custom_id": order.id.to_string(),
            "invoice_id": order.number.to_string(),
            "amount": {
                "currency_code": currency,
                "value": order.total.to_decimal_string(currency),
                "breakdown": {
                    "item_total": amount_value(item_total, currency),
                    "shipping": amount_value(order.shipping_total, currency),
                    "discount": amount_value(order.discount, currency),
                },
            },
            "items": items,
            "shipping": {
                "name": { "full_name": address.name },
                "address": {
                    "address_line_1": address.line1,
                    "address_line_2": address.line2,
                    "admin_area_2": address.city,
                    "postal_code": address.postal_code,
                    "country_code": address.country,
                },
            },
        }],
        "application_context": {
            "return_url": return_url,
            "cancel_url": cancel_url,
            "shipping_preference": "SET_PROVIDED_ADDRESS",
            "user_action": "PAY_NOW",
        },
    }))
}

/// Outcome of a capture (or of re-reading an already captured order).
fn capture_outcome(order_ref: &str, body: &Value) -> PaymentOutcome {
    let capture = body.pointer("/purchase_units/0/payments/captures/0");
    let transaction_id = capture
        .and_then(|c| c.get("id"))
        .and_then(Value::as_str)
        .unwrap_or(order_ref)
        .to_string();
    let status = capture
        .and_then(|c| c.get("status"))
        .or_else(|| body.get("status"))
        .and_then(Value::as_str)
        .unwrap_or("UNKNOWN");

    match status {
        "COMPLETED" => PaymentOutcome::Succeeded { transaction_id },
        "PENDING" => PaymentOutcome::Pending {
            reason: capture
                .and_then(|c| c.pointer("/status_details/reason"))
                .and_then(Value::as_str)
                .map(|r| format!("wallet capture pending: {}", r))
                .unwrap_or_else(|| "wallet capture pending".to_string()),
        },
        other => PaymentOutcome::Failed {
            reason: format!("wallet capture {}", other.to_ascii_lowercase()),
        },
    }
}

#[async_trait]
impl GatewayAdapter for WalletGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Wallet
    }

    async fn initiate(
        &self,
        data: &CheckoutData,
        order: &Order,
    ) -> Result<PaymentHandle, GatewayError> {
        let payload = order_payload(order, data)?;
        let response = self
            .client
            .post(PROVIDER, "/v2/checkout/orders", &payload)
            .await?;

        let wallet_order_id = response
            .body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::provider(PROVIDER, "order response without id", false))?
            .to_string();
        let status = response
            .body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("CREATED")
            .to_string();
        let url = approval_link(&response.body).ok_or_else(|| {
            GatewayError::provider(PROVIDER, "order response without approval link", false)
        })?;

        info!(
            "Wallet order created: order_id={}, wallet_order={}",
            order.id, wallet_order_id
        );

        Ok(
            PaymentHandle::new(order.id, PaymentMethod::Wallet, wallet_order_id, status)
                .with_continuation(Continuation::Redirect { url }),
        )
    }

    async fn confirm(
        &self,
        handle: &PaymentHandle,
        _client: &ClientResult,
    ) -> Result<PaymentOutcome, GatewayError> {
        let order_ref = handle.external_ref.as_str();
        match self.capture(order_ref).await {
            Ok(body) => {
                let outcome = capture_outcome(order_ref, &body);
                info!(
                    "Wallet capture: wallet_order={}, outcome={:?}",
                    order_ref, outcome
                );
                Ok(outcome)
            }
            Err(GatewayError::Provider { message, .. })
                if message.starts_with("ORDER_NOT_APPROVED")
                    || message.starts_with("PAYER_ACTION_REQUIRED") =>
            {
                // Customer has not approved yet; send them back to the wallet
                let order = self.fetch_order(order_ref).await?;
                match approval_link(&order) {
                    Some(url) => Ok(PaymentOutcome::RequiresAction {
                        continuation: Continuation::Redirect { url },
                    }),
                    None => Ok(PaymentOutcome::Failed { reason: message }),
                }
            }
            Err(err) => Err(err),
        }
    }

    async fn refund(
        &self,
        payment_ref: &PaymentRef,
        amount: Money,
        currency: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        let response = self
            .client
            .request(
                PROVIDER,
                &format!("/v2/payments/captures/{}/refund", payment_ref.external_id),
                Method::POST,
                Some(&json!({ "amount": amount_value(amount, currency) })),
                &[("Prefer", "return=representation".to_string())],
            )
            .await?;

        let refund_id = response
            .body
            .get("id")
            .and_then(Value::as_str)
            .ok_or_else(|| GatewayError::provider(PROVIDER, "refund response without id", false))?
            .to_string();
        let refunded = match response.body.pointer("/amount/value").and_then(Value::as_str) {
            Some(value) => Money::parse_decimal(value, currency)
                .map_err(|e| GatewayError::provider(PROVIDER, e.to_string(), false))?,
            None => amount,
        };
        let status = response
            .body
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("PENDING")
            .to_string();

        info!(
            "Wallet refund created: capture={}, refund={}, status={}",
            payment_ref.external_id, refund_id, status
        );

        Ok(RefundReceipt {
            refund_id,
            amount: refunded,
            status,
        })
    }
}

/// Capture id from a refund's `up` link (`.../captures/{id}`).
fn capture_id_from_links(resource: &Value) -> Option<String> {
    resource
        .get("links")
        .and_then(Value::as_array)?
        .iter()
        .find(|link| link.get("rel").and_then(Value::as_str) == Some("up"))
        .and_then(|link| link.get("href"))
        .and_then(Value::as_str)
        .and_then(|href| href.split("/captures/").nth(1))
        .map(|rest| rest.trim_end_matches('/').to_string())
}

fn parse_amount(resource: &Value) -> Result<Option<Money>, WebhookError> {
    let Some(amount) = resource.get("amount") else {
        return Ok(None);
    };
    let value = amount.get("value").and_then(Value::as_str);
    let currency = amount.get("currency_code").and_then(Value::as_str);
    match (value, currency) {
        (Some(value), Some(currency)) => Money::parse_decimal(value, currency)
            .map(Some)
            .map_err(|e| WebhookError::malformed(e.to_string())),
        _ => Err(WebhookError::malformed("amount without value or currency")),
    }
}

#[async_trait]
impl WebhookSource for WalletGateway {
    fn provider(&self) -> PaymentMethod {
        PaymentMethod::Wallet
    }

    fn is_configured(&self) -> bool {
        self.webhook_id.as_deref().is_some_and(|s| !s.is_empty())
    }

    fn signature_header(&self) -> &'static str {
        "wallet-transmission-sig"
    }

    /// Certificate-backed verification is delegated to the wallet's
    /// verification endpoint.
    async fn verify(&self, request: &WebhookRequest) -> Result<(), WebhookError> {
        let webhook_id = self
            .webhook_id
            .as_deref()
            .ok_or_else(|| WebhookError::MissingSecret(PROVIDER.to_string()))?;

        let mut body = json!({ "webhook_id": webhook_id });
        for (field, header) in TRANSMISSION_HEADERS {
            let value = request
                .header(header)
                .ok_or_else(|| WebhookError::signature(format!("missing {} header", header)))?;
            body[field] = Value::String(value.to_string());
        }
        body["webhook_event"] = serde_json::from_slice(&request.body)
            .map_err(|e| WebhookError::malformed(format!("invalid JSON: {}", e)))?;

        let response = self
            .client
            .post(PROVIDER, "/v1/notifications/verify-webhook-signature", &body)
            .await
            .map_err(|err| match err {
                ApiError::Provider { status, .. } if status < 500 => {
                    WebhookError::signature(err.to_string())
                }
                other => WebhookError::VerificationUnavailable(other.to_string()),
            })?;

        match response
            .body
            .get("verification_status")
            .and_then(Value::as_str)
        {
            Some("SUCCESS") => Ok(()),
            other => Err(WebhookError::signature(format!(
                "verification status {}",
                other.unwrap_or("missing")
            ))),
        }
    }

    fn parse(&self, payload: &Value) -> Result<ProviderEvent, WebhookError> {
        let event_type = payload
            .get("event_type")
            .and_then(Value::as_str)
            .ok_or_else(|| WebhookError::malformed("missing event_type"))?;
        let resource = payload
            .get("resource")
            .ok_or_else(|| WebhookError::malformed("missing resource"))?;

        let kind = match event_type {
            "PAYMENT.CAPTURE.COMPLETED" => EventKind::CaptureCompleted,
            "CHECKOUT.ORDER.APPROVED" => EventKind::Approved,
            "PAYMENT.CAPTURE.DENIED" => EventKind::Denied,
            "PAYMENT.CAPTURE.REVERSED" => EventKind::Reversed,
            "PAYMENT.CAPTURE.REFUNDED" => EventKind::Refunded,
            _ => EventKind::Unknown,
        };

        let mut event = ProviderEvent::new(PaymentMethod::Wallet, event_type, kind);
        event.event_id = payload.get("id").and_then(Value::as_str).map(str::to_string);
        if kind == EventKind::Unknown {
            return Ok(event);
        }

        let resource_id = resource
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string);

        match kind {
            EventKind::Approved => {
                event.order_hint = uuid_field(resource.pointer("/purchase_units/0/custom_id"));
                event.references.extend(resource_id);
            }
            EventKind::CaptureCompleted | EventKind::Denied => {
                event.order_hint = uuid_field(resource.get("custom_id"));
                event.amount = parse_amount(resource)?;
                event.reason = resource
                    .pointer("/status_details/reason")
                    .and_then(Value::as_str)
                    .map(str::to_string);
                event.transaction_id = resource_id.clone();
                event.references.extend(resource_id);
                event.references.extend(
                    resource
                        .pointer("/supplementary_data/related_ids/order_id")
                        .and_then(Value::as_str)
                        .map(str::to_string),
                );
            }
            EventKind::Refunded | EventKind::Reversed => {
                event.order_hint = uuid_field(resource.get("custom_id"));
                event.amount = parse_amount(resource)?;
                event.refund_id = resource_id.clone();
                event.references.extend(capture_id_from_links(resource));
                event.references.extend(resource_id);
            }
            EventKind::Unknown => {}
        }

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::client::ApiClientConfig;
    use std::time::Duration;
    use uuid::Uuid;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn gateway(server: &MockServer) -> WalletGateway {
        Mock::given(method("POST"))
            .and(path(TOKEN_PATH))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "A21AA", "expires_in": 32400
            })))
            .mount(server)
            .await;

        let config = WalletConfig {
            base_url: server.uri(),
            client_id: "id".to_string(),
            client_secret: "secret".to_string(),
            webhook_id: Some("WH-1".to_string()),
        };
        let client = ApiClient::new(ApiClientConfig {
            timeout: Duration::from_secs(2),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(1),
            token_safety_margin: Duration::from_secs(60),
        })
        .unwrap()
        .with_provider(config.endpoint());
        WalletGateway::new(Arc::new(client), &config)
    }

    fn handle(order_ref: &str) -> PaymentHandle {
        PaymentHandle::new(Uuid::new_v4(), PaymentMethod::Wallet, order_ref, "APPROVED")
    }

    #[test]
    fn test_capture_falls_back_to_order_reference() {
        let outcome = capture_outcome("5O190127", &json!({"id": "5O190127", "status": "COMPLETED"}));
        assert_eq!(
            outcome,
            PaymentOutcome::Succeeded {
                transaction_id: "5O190127".to_string()
            }
        );

        let nested = json!({
            "status": "COMPLETED",
            "purchase_units": [{"payments": {"captures": [{"id": "3C679366", "status": "COMPLETED"}]}}]
        });
        assert_eq!(
            capture_outcome("5O190127", &nested),
            PaymentOutcome::Succeeded {
                transaction_id: "3C679366".to_string()
            }
        );
    }

    #[test]
    fn test_pending_capture_is_not_success() {
        let body = json!({
            "status": "COMPLETED",
            "purchase_units": [{"payments": {"captures": [{
                "id": "3C6", "status": "PENDING", "status_details": {"reason": "PENDING_REVIEW"}
            }]}}]
        });
        assert_eq!(
            capture_outcome("O1", &body),
            PaymentOutcome::Pending {
                reason: "wallet capture pending: PENDING_REVIEW".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_already_captured_reads_existing_capture() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/O1/capture"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "name": "UNPROCESSABLE_ENTITY",
                "details": [{"issue": "ORDER_ALREADY_CAPTURED", "description": "Order already captured."}]
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/v2/checkout/orders/O1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "O1",
                "status": "COMPLETED",
                "purchase_units": [{"payments": {"captures": [{"id": "CAP-9", "status": "COMPLETED"}]}}]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let outcome = gateway(&server)
            .await
            .confirm(&handle("O1"), &ClientResult::default())
            .await
            .unwrap();
        assert_eq!(
            outcome,
            PaymentOutcome::Succeeded {
                transaction_id: "CAP-9".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_declined_capture_is_a_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v2/checkout/orders/O2/capture"))
            .respond_with(ResponseTemplate::new(422).set_body_json(json!({
                "name": "UNPROCESSABLE_ENTITY",
                "details": [{"issue": "INSTRUMENT_DECLINED", "description": "Declined."}]
            })))
            .mount(&server)
            .await;

        let err = gateway(&server)
            .await
            .confirm(&handle("O2"), &ClientResult::default())
            .await
            .unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.to_string().contains("INSTRUMENT_DECLINED"));
    }

    #[tokio::test]
    async fn test_refund_event_resolves_capture_from_links() {
        let server = MockServer::start().await;
        let order_id = Uuid::new_v4();
        let event = gateway(&server)
            .await
            .parse(&json!({
                "id": "WH-EVT-1",
                "event_type": "PAYMENT.CAPTURE.REFUNDED",
                "resource": {
                    "id": "REF-9",
                    "custom_id": order_id.to_string(),
                    "amount": {"value": "10.00", "currency_code": "EUR"},
                    "links": [{"rel": "up", "href": "https://api.wallet.test/v2/payments/captures/CAP-9"}]
                }
            }))
            .unwrap();

        assert_eq!(event.kind, EventKind::Refunded);
        assert_eq!(event.refund_id.as_deref(), Some("REF-9"));
        assert_eq!(event.amount, Some(Money::from_minor(1000)));
        assert_eq!(event.order_hint, Some(order_id));
        assert_eq!(event.references[0], "CAP-9");
    }

    #[tokio::test]
    async fn test_verification_requires_transmission_headers() {
        let server = MockServer::start().await;
        let request = WebhookRequest::new(
            "wallet",
            vec![("wallet-transmission-id", "abc".to_string())],
            b"{}".to_vec(),
        );
        let err = gateway(&server).await.verify(&request).await.unwrap_err();
        assert!(matches!(err, WebhookError::InvalidSignature(_)));
    }
}
