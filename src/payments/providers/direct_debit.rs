//! Direct-debit mandates
//!
//! No processor is called synchronously. Initiation validates the account,
//! issues a mandate reference derived from the order number and stores a
//! pending `MandateRecord`. Collection is confirmed later by status events from
//! the settlement tooling, so a fresh mandate is never reported as paid.

use async_trait::async_trait;
use chrono::Utc;
use regex::Regex;
use serde_json::Value;
use std::sync::{Arc, OnceLock};
use tracing::{info, warn};
use uuid::Uuid;

use crate::database::error::DatabaseError;
use crate::database::repository::MandateRepository;
use crate::orders::model::Order;
use crate::payments::error::GatewayError;
use crate::payments::money::Money;
use crate::payments::redact::mask_account;
use crate::payments::traits::GatewayAdapter;
use crate::payments::types::{
    CheckoutData, ClientResult, MandateRecord, MandateStatus, PaymentHandle, PaymentMethod,
    PaymentOutcome, PaymentRef, RefundReceipt,
};
use crate::webhooks::error::WebhookError;
use crate::webhooks::signature::verify_hex;
use crate::webhooks::source::WebhookSource;
use crate::webhooks::types::{uuid_field, EventKind, ProviderEvent, WebhookRequest};

pub const SIGNATURE_HEADER: &str = "X-Signature";

/// Reason attached to orders awaiting mandate collection
pub const NOT_CONFIRMED: &str = "direct debit mandate issued, collection not confirmed";

/// Account reference check, e.g. IBAN checksum or a bank directory lookup.
pub trait AccountValidator: Send + Sync {
    fn validate(&self, account_reference: &str) -> bool;
}

/// Shape-only validation: two-letter country prefix, two check digits and
/// 11 to 30 alphanumerics. Checksums are left to a real validator.
#[derive(Debug, Default, Clone, Copy)]
pub struct ShapeValidator;

impl AccountValidator for ShapeValidator {
    fn validate(&self, account_reference: &str) -> bool {
        static SHAPE: OnceLock<Option<Regex>> = OnceLock::new();
        let compact: String = account_reference
            .chars()
            .filter(|c| !c.is_whitespace())
            .collect::<String>()
            .to_ascii_uppercase();

        SHAPE
            .get_or_init(|| Regex::new(r"^[A-Z]{2}[0-9]{2}[A-Z0-9]{11,30}$").ok())
            .as_ref()
            .is_some_and(|re| re.is_match(&compact))
    }
}

#[derive(Debug, Clone)]
pub struct DirectDebitConfig {
    pub mandate_prefix: String,
    pub creditor_id: Option<String>,
    pub events_secret: Option<String>,
}

impl Default for DirectDebitConfig {
    fn default() -> Self {
        Self {
            mandate_prefix: "MNDT".to_string(),
            creditor_id: None,
            events_secret: None,
        }
    }
}

pub struct DirectDebitGateway {
    config: DirectDebitConfig,
    validator: Arc<dyn AccountValidator>,
    mandates: Arc<dyn MandateRepository>,
}

impl DirectDebitGateway {
    pub fn new(
        config: DirectDebitConfig,
        validator: Arc<dyn AccountValidator>,
        mandates: Arc<dyn MandateRepository>,
    ) -> Self {
        Self {
            config,
            validator,
            mandates,
        }
    }

    /// Mandate reference for an order; the same order always gets the same one.
    pub fn mandate_reference(&self, order: &Order) -> String {
        format!("{}-{}", self.config.mandate_prefix, order.number)
    }
}

fn storage_error(err: DatabaseError) -> GatewayError {
    GatewayError::provider(
        PaymentMethod::DirectDebit.as_str(),
        format!("mandate storage failed: {}", err),
        err.is_retryable(),
    )
}

#[async_trait]
impl GatewayAdapter for DirectDebitGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::DirectDebit
    }

    async fn initiate(
        &self,
        data: &CheckoutData,
        order: &Order,
    ) -> Result<PaymentHandle, GatewayError> {
        let details = data
            .direct_debit
            .as_ref()
            .ok_or_else(|| GatewayError::validation("direct debit account details are required"))?;

        let holder_name = details.holder_name.trim();
        if holder_name.is_empty() {
            return Err(GatewayError::validation("account holder name is required"));
        }
        if !self.validator.validate(&details.account_reference) {
            return Err(GatewayError::validation("account reference is not valid"));
        }

        let reference = self.mandate_reference(order);
        let now = Utc::now();
        let record = MandateRecord {
            order_id: order.id,
            mandate_reference: reference.clone(),
            masked_account: mask_account(&details.account_reference),
            holder_name: holder_name.to_string(),
            status: MandateStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.mandates.upsert(&record).await.map_err(storage_error)?;

        info!(
            "Direct debit mandate issued: order_id={}, mandate={}, account={}",
            order.id, reference, record.masked_account
        );

        Ok(PaymentHandle::new(
            order.id,
            PaymentMethod::DirectDebit,
            reference,
            MandateStatus::Pending.as_str(),
        ))
    }

    async fn confirm(
        &self,
        handle: &PaymentHandle,
        _client: &ClientResult,
    ) -> Result<PaymentOutcome, GatewayError> {
        let mandate = self
            .mandates
            .find_by_reference(&handle.external_ref)
            .await
            .map_err(storage_error)?
            .ok_or_else(|| {
                GatewayError::provider(
                    PaymentMethod::DirectDebit.as_str(),
                    format!("mandate {} not found", handle.external_ref),
                    false,
                )
            })?;

        Ok(match mandate.status {
            MandateStatus::Pending => PaymentOutcome::Pending {
                reason: NOT_CONFIRMED.to_string(),
            },
            MandateStatus::Completed => PaymentOutcome::Succeeded {
                transaction_id: mandate.mandate_reference,
            },
            MandateStatus::Failed => PaymentOutcome::Failed {
                reason: "direct debit collection failed".to_string(),
            },
            MandateStatus::Refunded => PaymentOutcome::Failed {
                reason: "direct debit collection was returned".to_string(),
            },
        })
    }

    /// Reversals are executed by the settlement tooling; this records the
    /// request. The tooling reports back with the returned `refund_id`.
    async fn refund(
        &self,
        payment_ref: &PaymentRef,
        amount: Money,
        _currency: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        let refund_id = format!("{}-R-{}", payment_ref.external_id, Uuid::new_v4().simple());
        info!(
            "Direct debit refund requested: mandate={}, refund={}, amount={}",
            payment_ref.external_id, refund_id, amount
        );
        Ok(RefundReceipt {
            refund_id,
            amount,
            status: "pending_settlement".to_string(),
        })
    }

    async fn cancel(&self, handle: &PaymentHandle) -> Result<(), GatewayError> {
        let updated = self
            .mandates
            .update_status(&handle.external_ref, MandateStatus::Failed)
            .await
            .map_err(storage_error)?;
        if updated.is_none() {
            warn!("Canceled unknown mandate {}", handle.external_ref);
        }
        Ok(())
    }
}

#[async_trait]
impl WebhookSource for DirectDebitGateway {
    fn provider(&self) -> PaymentMethod {
        PaymentMethod::DirectDebit
    }

    fn is_configured(&self) -> bool {
        self.config
            .events_secret
            .as_deref()
            .is_some_and(|s| !s.is_empty())
    }

    fn signature_header(&self) -> &'static str {
        SIGNATURE_HEADER
    }

    async fn verify(&self, request: &WebhookRequest) -> Result<(), WebhookError> {
        let secret = self
            .config
            .events_secret
            .as_deref()
            .ok_or_else(|| WebhookError::MissingSecret(PaymentMethod::DirectDebit.to_string()))?;
        let signature = request
            .header(SIGNATURE_HEADER)
            .ok_or_else(|| WebhookError::signature("missing X-Signature header"))?;

        if verify_hex(secret, &request.body, signature) {
            Ok(())
        } else {
            Err(WebhookError::signature("signature mismatch"))
        }
    }

    fn parse(&self, payload: &Value) -> Result<ProviderEvent, WebhookError> {
        let event_type = payload
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| WebhookError::malformed("missing event type"))?;

        let kind = match event_type {
            "mandate.completed" => EventKind::CaptureCompleted,
            "mandate.failed" => EventKind::Denied,
            "mandate.refunded" => EventKind::Refunded,
            _ => EventKind::Unknown,
        };

        let mut event = ProviderEvent::new(PaymentMethod::DirectDebit, event_type, kind);
        event.event_id = payload.get("id").and_then(Value::as_str).map(str::to_string);
        if kind == EventKind::Unknown {
            return Ok(event);
        }

        let reference = payload
            .get("mandate_reference")
            .and_then(Value::as_str)
            .ok_or_else(|| WebhookError::malformed("missing mandate_reference"))?
            .to_string();

        event.order_hint = uuid_field(payload.get("order_id"));
        event.amount = payload
            .get("amount")
            .and_then(Value::as_i64)
            .map(Money::from_minor);
        event.reason = payload.get("reason").and_then(Value::as_str).map(str::to_string);
        if kind == EventKind::Refunded {
            // Must echo the id `refund` handed out, or the reversal would be
            // counted a second time
            let refund_id = payload
                .get("refund_id")
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|id| !id.is_empty())
                .ok_or_else(|| WebhookError::malformed("missing refund_id"))?;
            event.refund_id = Some(refund_id.to_string());
        }
        event.transaction_id = Some(reference.clone());
        event.references.push(reference);

        Ok(event)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::memory::{InMemoryMandateRepository, InMemoryOrderRepository};
    use crate::database::repository::OrderRepository;
    use crate::orders::model::{Address, NewOrder};
    use crate::payments::types::DirectDebitDetails;
    use serde_json::json;

    async fn order() -> Order {
        InMemoryOrderRepository::new()
            .insert(NewOrder {
                session_id: "s".to_string(),
                lines: vec![],
                shipping_total: Money::ZERO,
                discount: Money::ZERO,
                total: Money::from_minor(2500),
                currency: "EUR".to_string(),
                shipping_address: Address::default(),
                billing_address: Address::default(),
                coupon_code: None,
                payment_method: None,
            })
            .await
            .unwrap()
    }

    fn gateway(mandates: Arc<InMemoryMandateRepository>) -> DirectDebitGateway {
        DirectDebitGateway::new(
            DirectDebitConfig {
                events_secret: Some("dd-secret".to_string()),
                ..DirectDebitConfig::default()
            },
            Arc::new(ShapeValidator),
            mandates,
        )
    }

    fn checkout(account: &str, holder: &str) -> CheckoutData {
        CheckoutData {
            direct_debit: Some(DirectDebitDetails {
                account_reference: account.to_string(),
                holder_name: holder.to_string(),
            }),
            ..CheckoutData::default()
        }
    }

    #[test]
    fn test_shape_validator() {
        assert!(ShapeValidator.validate("DE89 3704 0044 0532 0130 00"));
        assert!(ShapeValidator.validate("gb82west12345698765432"));
        assert!(!ShapeValidator.validate("DE89"));
        assert!(!ShapeValidator.validate("1234567890123456"));
        assert!(!ShapeValidator.validate("DE89-3704-0044-0532-0130-00"));
    }

    #[tokio::test]
    async fn test_mandate_is_deterministic_and_masked() {
        let mandates = Arc::new(InMemoryMandateRepository::new());
        let gateway = gateway(mandates.clone());
        let order = order().await;
        let data = checkout("DE89 3704 0044 0532 0130 00", " Ada Lovelace ");

        let first = gateway.initiate(&data, &order).await.unwrap();
        let second = gateway.initiate(&data, &order).await.unwrap();
        assert_eq!(first.external_ref, "MNDT-1001");
        assert_eq!(first.external_ref, second.external_ref);

        let record = mandates.find_by_reference("MNDT-1001").await.unwrap().unwrap();
        assert_eq!(record.masked_account, "******************3000");
        assert_eq!(record.holder_name, "Ada Lovelace");
        assert_eq!(record.status, MandateStatus::Pending);

        let outcome = gateway.confirm(&first, &ClientResult::default()).await.unwrap();
        assert_eq!(
            outcome,
            PaymentOutcome::Pending {
                reason: NOT_CONFIRMED.to_string()
            }
        );
    }

    #[tokio::test]
    async fn test_invalid_details_are_rejected_before_storage() {
        let mandates = Arc::new(InMemoryMandateRepository::new());
        let gateway = gateway(mandates.clone());
        let order = order().await;

        let err = gateway
            .initiate(&checkout("not-an-account", "Ada"), &order)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        let err = gateway
            .initiate(&checkout("DE89370400440532013000", "  "), &order)
            .await
            .unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        let err = gateway.initiate(&CheckoutData::default(), &order).await.unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));

        assert!(mandates.find_by_reference("MNDT-1001").await.unwrap().is_none());
    }

    #[test]
    fn test_parse_status_events() {
        let gateway = gateway(Arc::new(InMemoryMandateRepository::new()));

        let completed = gateway
            .parse(&json!({"type": "mandate.completed", "mandate_reference": "MNDT-1001", "amount": 2500}))
            .unwrap();
        assert_eq!(completed.kind, EventKind::CaptureCompleted);
        assert_eq!(completed.transaction_id.as_deref(), Some("MNDT-1001"));
        assert_eq!(completed.amount, Some(Money::from_minor(2500)));

        let refunded = gateway
            .parse(&json!({
                "type": "mandate.refunded",
                "mandate_reference": "MNDT-1001",
                "refund_id": "MNDT-1001-R-1",
                "amount": 500
            }))
            .unwrap();
        assert_eq!(refunded.kind, EventKind::Refunded);
        assert_eq!(refunded.refund_id.as_deref(), Some("MNDT-1001-R-1"));

        let err = gateway
            .parse(&json!({"type": "mandate.refunded", "mandate_reference": "MNDT-1001"}))
            .unwrap_err();
        assert!(matches!(err, WebhookError::Malformed(_)));

        assert!(gateway.parse(&json!({"type": "mandate.completed"})).is_err());
    }

    #[tokio::test]
    async fn test_refund_echo_carries_the_issued_id() {
        let gateway = gateway(Arc::new(InMemoryMandateRepository::new()));
        let receipt = gateway
            .refund(
                &PaymentRef::new(PaymentMethod::DirectDebit, "MNDT-1001"),
                Money::from_minor(500),
                "EUR",
            )
            .await
            .unwrap();
        assert!(receipt.refund_id.starts_with("MNDT-1001-R-"));
        assert_eq!(receipt.status, "pending_settlement");

        let echo = gateway
            .parse(&json!({
                "type": "mandate.refunded",
                "mandate_reference": "MNDT-1001",
                "refund_id": receipt.refund_id.clone(),
                "amount": 500
            }))
            .unwrap();
        assert_eq!(echo.refund_id, Some(receipt.refund_id));
        assert_eq!(echo.amount, Some(Money::from_minor(500)));
    }
}
