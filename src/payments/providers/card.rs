//! Card processor with strong customer authentication
//!
//! Payments are modelled as payment intents scoped to the order total. The
//! browser completes any 3-D Secure challenge with the intent's client secret
//! or redirect URL, after which `confirm` re-reads the intent server-side.

use async_trait::async_trait;
use chrono::Utc;
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::{info, warn};

use crate::orders::model::Order;
use crate::payments::client::{ApiClient, ProviderAuth, ProviderEndpoint};
use crate::payments::error::GatewayError;
use crate::payments::money::Money;
use crate::payments::traits::GatewayAdapter;
use crate::payments::types::{
    CheckoutData, ClientResult, Continuation, PaymentHandle, PaymentMethod, PaymentOutcome,
    PaymentRef, RefundReceipt,
};
use crate::webhooks::error::WebhookError;
use crate::webhooks::signature::TimestampedSignature;
use crate::webhooks::source::WebhookSource;
use crate::webhooks::types::{uuid_field, EventKind, ProviderEvent, WebhookRequest};

const PROVIDER: &str = "card";
pub const SIGNATURE_HEADER: &str = "Card-Signature";

/// Statuses that need the customer before the intent can proceed.
const SCA_STATUSES: [&str; 3] = [
    "requires_action",
    "requires_confirmation",
    "requires_payment_method",
];

#[derive(Debug, Clone)]
pub struct CardConfig {
    pub base_url: String,
    pub secret_key: String,
    pub webhook_secret: Option<String>,
}

impl CardConfig {
    /// API client registration for the card processor.
    pub fn endpoint(&self) -> ProviderEndpoint {
        ProviderEndpoint {
            name: PROVIDER.to_string(),
            base_url: self.base_url.clone(),
            auth: ProviderAuth::Bearer(self.secret_key.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PaymentIntent {
    id: String,
    status: String,
    #[serde(default)]
    client_secret: Option<String>,
    #[serde(default)]
    next_action: Option<Value>,
    #[serde(default)]
    last_payment_error: Option<Value>,
    #[serde(default)]
    cancellation_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CardRefund {
    id: String,
    amount: i64,
    status: String,
}

pub struct CardGateway {
    client: Arc<ApiClient>,
    webhook_secret: Option<String>,
}

impl CardGateway {
    pub fn new(client: Arc<ApiClient>, config: &CardConfig) -> Self {
        Self {
            client,
            webhook_secret: config.webhook_secret.clone(),
        }
    }

    async fn fetch_intent(&self, id: &str) -> Result<PaymentIntent, GatewayError> {
        let response = self
            .client
            .get(PROVIDER, &format!("/v1/payment_intents/{}", id))
            .await?;
        parse_body(response.body)
    }
}

fn parse_body<T: for<'de> Deserialize<'de>>(body: Value) -> Result<T, GatewayError> {
    serde_json::from_value(body)
        .map_err(|e| GatewayError::provider(PROVIDER, format!("unexpected response: {}", e), false))
}

/// Map an intent to an outcome. A pending next-step marker or one of the
/// customer-facing statuses means the customer has work to do.
fn outcome_for(intent: &PaymentIntent) -> PaymentOutcome {
    if intent.status == "succeeded" {
        return PaymentOutcome::Succeeded {
            transaction_id: intent.id.clone(),
        };
    }

    let has_next_action = intent
        .next_action
        .as_ref()
        .is_some_and(|action| !action.is_null());
    if has_next_action || SCA_STATUSES.contains(&intent.status.as_str()) {
        return PaymentOutcome::RequiresAction {
            continuation: continuation_for(intent),
        };
    }

    match intent.status.as_str() {
        "requires_capture" | "processing" => PaymentOutcome::Pending {
            reason: format!("card payment {}", intent.status.replace('_', " ")),
        },
        _ => PaymentOutcome::Failed {
            reason: intent
                .last_payment_error
                .as_ref()
                .and_then(|e| e.get("message"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| intent.cancellation_reason.clone())
                .unwrap_or_else(|| format!("card payment {}", intent.status)),
        },
    }
}

fn continuation_for(intent: &PaymentIntent) -> Continuation {
    let redirect = intent
        .next_action
        .as_ref()
        .and_then(|action| action.pointer("/redirect_to_url/url"))
        .and_then(Value::as_str);

    match (redirect, &intent.client_secret) {
        (Some(url), _) => Continuation::Redirect {
            url: url.to_string(),
        },
        (None, Some(secret)) => Continuation::ClientSecret {
            client_secret: secret.clone(),
        },
        (None, None) => Continuation::None,
    }
}

#[async_trait]
impl GatewayAdapter for CardGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    async fn initiate(
        &self,
        data: &CheckoutData,
        order: &Order,
    ) -> Result<PaymentHandle, GatewayError> {
        if !order.total.is_positive() {
            return Err(GatewayError::validation("order total must be positive"));
        }

        let mut payload = json!({
            "amount": order.total.minor(),
            "currency": order.currency.to_ascii_lowercase(),
            "description": format!("Order {}", order.number),
            "metadata": {
                "order_id": order.id.to_string(),
                "order_number": order.number.to_string(),
            },
        });
        if let Some(token) = &data.payment_method_token {
            payload["payment_method"] = Value::String(token.clone());
        }

        let response = self
            .client
            .post(PROVIDER, "/v1/payment_intents", &payload)
            .await?;
        let intent: PaymentIntent = parse_body(response.body)?;

        info!(
            "Card payment intent created: order_id={}, intent={}, status={}",
            order.id, intent.id, intent.status
        );

        let continuation = continuation_for(&intent);
        Ok(
            PaymentHandle::new(order.id, PaymentMethod::Card, intent.id, intent.status)
                .with_continuation(continuation),
        )
    }

    async fn confirm(
        &self,
        handle: &PaymentHandle,
        client: &ClientResult,
    ) -> Result<PaymentOutcome, GatewayError> {
        let mut intent = self.fetch_intent(&handle.external_ref).await?;

        let confirmable = matches!(
            intent.status.as_str(),
            "requires_confirmation" | "requires_payment_method"
        );
        if let (true, Some(payment_method)) = (confirmable, &client.payment_method) {
            let response = self
                .client
                .post(
                    PROVIDER,
                    &format!("/v1/payment_intents/{}/confirm", handle.external_ref),
                    &json!({ "payment_method": payment_method }),
                )
                .await?;
            intent = parse_body(response.body)?;
        }

        let outcome = outcome_for(&intent);
        info!(
            "Card payment confirmed: intent={}, status={}, outcome={:?}",
            intent.id, intent.status, outcome
        );
        Ok(outcome)
    }

    async fn refund(
        &self,
        payment_ref: &PaymentRef,
        amount: Money,
        _currency: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        let response = self
            .client
            .post(
                PROVIDER,
                "/v1/refunds",
                &json!({
                    "payment_intent": payment_ref.external_id,
                    "amount": amount.minor(),
                }),
            )
            .await?;
        let refund: CardRefund = parse_body(response.body)?;

        info!(
            "Card refund created: intent={}, refund={}, amount={}",
            payment_ref.external_id, refund.id, refund.amount
        );

        Ok(RefundReceipt {
            refund_id: refund.id,
            amount: Money::from_minor(refund.amount),
            status: refund.status,
        })
    }

    async fn cancel(&self, handle: &PaymentHandle) -> Result<(), GatewayError> {
        self.client
            .post(
                PROVIDER,
                &format!("/v1/payment_intents/{}/cancel", handle.external_ref),
                &json!({}),
            )
            .await?;
        info!("Card payment intent canceled: {}", handle.external_ref);
        Ok(())
    }
}

#[async_trait]
impl WebhookSource for CardGateway {
    fn provider(&self) -> PaymentMethod {
        PaymentMethod::Card
    }

    fn is_configured(&self) -> bool {
        self.webhook_secret.as_deref().is_some_and(|s| !s.is_empty())
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    async fn verify(&self, request: &WebhookRequest) -> Result<(), WebhookError> {
        let secret = self
            .webhook_secret
            .as_deref()
            .ok_or_else(|| WebhookError::MissingSecret(PROVIDER.to_string()))?;
        let header = request
            .header(SIGNATURE_HEADER)
            .ok_or_else(|| WebhookError::signature("missing Card-Signature header"))?;

        TimestampedSignature::parse(header)?.verify(secret, &request.body, Utc::now().timestamp())
    }

    fn parse(&self, payload: &Value) -> Result<ProviderEvent, WebhookError> {
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| WebhookError::malformed("missing event type"))?;
        let object = payload
            .pointer("/data/object")
            .ok_or_else(|| WebhookError::malformed("missing data.object"))?;

        let kind = match event_type {
            "payment_intent.succeeded" => EventKind::CaptureCompleted,
            "payment_intent.amount_capturable_updated" => EventKind::Approved,
            "payment_intent.payment_failed" | "payment_intent.canceled" => EventKind::Denied,
            "charge.refunded" => EventKind::Refunded,
            "charge.dispute.funds_withdrawn" => EventKind::Reversed,
            _ => EventKind::Unknown,
        };

        let mut event = ProviderEvent::new(PaymentMethod::Card, event_type, kind);
        event.event_id = payload.get("id").and_then(Value::as_str).map(str::to_string);
        event.order_hint = uuid_field(object.pointer("/metadata/order_id"));

        let str_field = |name: &str| object.get(name).and_then(Value::as_str).map(str::to_string);
        let amount_field =
            |value: Option<&Value>| value.and_then(Value::as_i64).map(Money::from_minor);

        match kind {
            EventKind::CaptureCompleted | EventKind::Approved | EventKind::Denied => {
                let intent_id =
                    str_field("id").ok_or_else(|| WebhookError::malformed("intent without id"))?;
                event.amount = amount_field(
                    object
                        .get("amount_received")
                        .filter(|v| v.as_i64().unwrap_or(0) > 0)
                        .or_else(|| object.get("amount")),
                );
                event.reason = object
                    .pointer("/last_payment_error/message")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| str_field("cancellation_reason"));
                event.transaction_id = Some(intent_id.clone());
                event.references.push(intent_id);
            }
            EventKind::Refunded => {
                // Refund list is newest first
                let latest = object.pointer("/refunds/data/0");
                event.refund_id = latest
                    .and_then(|r| r.get("id"))
                    .and_then(Value::as_str)
                    .map(str::to_string);
                event.amount = amount_field(latest.and_then(|r| r.get("amount")));
                if event.refund_id.is_none() {
                    warn!(event_type, "Refund event without refund details");
                }
                event.references.extend(str_field("payment_intent"));
                event.references.extend(str_field("id"));
            }
            EventKind::Reversed => {
                event.refund_id = str_field("id");
                event.amount = amount_field(object.get("amount"));
                event.reason = str_field("reason");
                event.references.extend(str_field("payment_intent"));
                event.references.extend(str_field("charge"));
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
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn intent(value: Value) -> PaymentIntent {
        serde_json::from_value(value).unwrap()
    }

    fn gateway(base_url: &str) -> CardGateway {
        let config = CardConfig {
            base_url: base_url.to_string(),
            secret_key: "sk_test".to_string(),
            webhook_secret: Some("whsec_test".to_string()),
        };
        let client = ApiClient::new(ApiClientConfig {
            timeout: Duration::from_secs(2),
            max_attempts: 1,
            retry_backoff: Duration::from_millis(1),
            token_safety_margin: Duration::from_secs(60),
        })
        .unwrap()
        .with_provider(config.endpoint());
        CardGateway::new(Arc::new(client), &config)
    }

    #[test]
    fn test_sca_detection_by_status() {
        for status in SCA_STATUSES {
            let outcome = outcome_for(&intent(json!({"id": "pi_1", "status": status})));
            assert!(
                matches!(outcome, PaymentOutcome::RequiresAction { .. }),
                "{} should require action",
                status
            );
        }
    }

    #[test]
    fn test_sca_detection_by_next_action_marker() {
        let outcome = outcome_for(&intent(json!({
            "id": "pi_1",
            "status": "processing",
            "next_action": {"type": "redirect_to_url", "redirect_to_url": {"url": "https://acs.test/3ds"}}
        })));
        assert_eq!(
            outcome,
            PaymentOutcome::RequiresAction {
                continuation: Continuation::Redirect {
                    url: "https://acs.test/3ds".to_string()
                }
            }
        );
    }

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            outcome_for(&intent(json!({"id": "tx_123", "status": "succeeded"}))),
            PaymentOutcome::Succeeded {
                transaction_id: "tx_123".to_string()
            }
        );
        assert!(matches!(
            outcome_for(&intent(json!({"id": "pi_1", "status": "requires_capture"}))),
            PaymentOutcome::Pending { .. }
        ));
        assert_eq!(
            outcome_for(&intent(json!({
                "id": "pi_1",
                "status": "canceled",
                "cancellation_reason": "abandoned"
            }))),
            PaymentOutcome::Failed {
                reason: "abandoned".to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_refund_posts_minor_units() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/refunds"))
            .and(body_partial_json(json!({"payment_intent": "tx_123", "amount": 1000})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "id": "re_1", "amount": 1000, "status": "succeeded"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let receipt = gateway(&server.uri())
            .refund(
                &PaymentRef::new(PaymentMethod::Card, "tx_123"),
                Money::from_minor(1000),
                "EUR",
            )
            .await
            .unwrap();
        assert_eq!(receipt.refund_id, "re_1");
        assert_eq!(receipt.amount, Money::from_minor(1000));
    }

    #[test]
    fn test_parse_refund_event() {
        let gateway = gateway("http://unused");
        let event = gateway
            .parse(&json!({
                "id": "evt_9",
                "type": "charge.refunded",
                "data": {"object": {
                    "id": "ch_1",
                    "payment_intent": "tx_123",
                    "amount_refunded": 1500,
                    "refunds": {"data": [{"id": "re_2", "amount": 500}, {"id": "re_1", "amount": 1000}]}
                }}
            }))
            .unwrap();

        assert_eq!(event.kind, EventKind::Refunded);
        assert_eq!(event.refund_id.as_deref(), Some("re_2"));
        assert_eq!(event.amount, Some(Money::from_minor(500)));
        assert_eq!(event.references, vec!["tx_123".to_string(), "ch_1".to_string()]);
    }

    #[test]
    fn test_parse_unknown_event_is_not_an_error() {
        let event = gateway("http://unused")
            .parse(&json!({"id": "evt_1", "type": "customer.created", "data": {"object": {}}}))
            .unwrap();
        assert_eq!(event.kind, EventKind::Unknown);
        assert!(event.references.is_empty());
    }
}
