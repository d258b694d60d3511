//! Manual bank transfer
//!
//! The customer gets a human-readable reference and the creditor account. The
//! order waits on hold until the batch import reports the transfer.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::orders::model::Order;
use crate::payments::error::GatewayError;
use crate::payments::money::Money;
use crate::payments::traits::GatewayAdapter;
use crate::payments::types::{
    CheckoutData, ClientResult, Continuation, PaymentHandle, PaymentMethod, PaymentOutcome,
    PaymentRef, RefundReceipt,
};
use crate::webhooks::error::WebhookError;
use crate::webhooks::signature::verify_hex;
use crate::webhooks::source::WebhookSource;
use crate::webhooks::types::{uuid_field, EventKind, ProviderEvent, WebhookRequest};

pub const SIGNATURE_HEADER: &str = "X-Signature";

#[derive(Debug, Clone)]
pub struct BankTransferConfig {
    pub reference_prefix: String,
    pub account_holder: String,
    pub iban: String,
    pub events_secret: Option<String>,
}

impl Default for BankTransferConfig {
    fn default() -> Self {
        Self {
            reference_prefix: "REF".to_string(),
            account_holder: String::new(),
            iban: String::new(),
            events_secret: None,
        }
    }
}

pub struct BankTransferGateway {
    config: BankTransferConfig,
}

impl BankTransferGateway {
    pub fn new(config: BankTransferConfig) -> Self {
        Self { config }
    }

    pub fn reference(&self, order: &Order) -> String {
        format!("{}-{}", self.config.reference_prefix, order.number)
    }
}

#[async_trait]
impl GatewayAdapter for BankTransferGateway {
    fn method(&self) -> PaymentMethod {
        PaymentMethod::BankTransfer
    }

    async fn initiate(
        &self,
        _data: &CheckoutData,
        order: &Order,
    ) -> Result<PaymentHandle, GatewayError> {
        let reference = self.reference(order);
        info!(
            "Bank transfer reference issued: order_id={}, reference={}",
            order.id, reference
        );

        let instructions = Continuation::TransferInstructions {
            reference: reference.clone(),
            account_holder: self.config.account_holder.clone(),
            iban: self.config.iban.clone(),
            amount: order.total.to_decimal_string(&order.currency),
            currency: order.currency.clone(),
        };
        Ok(
            PaymentHandle::new(order.id, PaymentMethod::BankTransfer, reference, "awaiting_transfer")
                .with_continuation(instructions),
        )
    }

    /// Never settles synchronously; the order goes on hold.
    async fn confirm(
        &self,
        handle: &PaymentHandle,
        _client: &ClientResult,
    ) -> Result<PaymentOutcome, GatewayError> {
        Ok(PaymentOutcome::Pending {
            reason: format!("awaiting bank transfer {}", handle.external_ref),
        })
    }

    /// Paid back by hand; the receipt id keys the refund on the order.
    async fn refund(
        &self,
        payment_ref: &PaymentRef,
        amount: Money,
        _currency: &str,
    ) -> Result<RefundReceipt, GatewayError> {
        let refund_id = format!("{}-R-{}", payment_ref.external_id, Uuid::new_v4().simple());
        info!(
            "Manual transfer refund recorded: reference={}, refund={}, amount={}",
            payment_ref.external_id, refund_id, amount
        );
        Ok(RefundReceipt {
            refund_id,
            amount,
            status: "pending_manual".to_string(),
        })
    }
}

#[async_trait]
impl WebhookSource for BankTransferGateway {
    fn provider(&self) -> PaymentMethod {
        PaymentMethod::BankTransfer
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
            .ok_or_else(|| WebhookError::MissingSecret(PaymentMethod::BankTransfer.to_string()))?;
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
            "transfer.received" => EventKind::CaptureCompleted,
            "transfer.returned" => EventKind::Reversed,
            _ => EventKind::Unknown,
        };

        let mut event = ProviderEvent::new(PaymentMethod::BankTransfer, event_type, kind);
        event.event_id = payload.get("id").and_then(Value::as_str).map(str::to_string);
        if kind == EventKind::Unknown {
            return Ok(event);
        }

        let reference = payload
            .get("reference")
            .and_then(Value::as_str)
            .map(|r| r.trim().to_ascii_uppercase())
            .ok_or_else(|| WebhookError::malformed("missing reference"))?;

        event.order_hint = uuid_field(payload.get("order_id"));
        event.amount = payload
            .get("amount")
            .and_then(Value::as_i64)
            .map(Money::from_minor);
        event.reason = payload.get("reason").and_then(Value::as_str).map(str::to_string);
        if kind == EventKind::Reversed {
            // A return of a manual refund echoes the id `refund` handed out
            event.refund_id = Some(
                payload
                    .get("refund_id")
                    .and_then(Value::as_str)
                    .map(str::to_string)
                    .or_else(|| event.event_id.clone())
                    .unwrap_or_else(|| format!("{}-returned", reference)),
            );
        }
        event.transaction_id = Some(reference.clone());
        event.references.push(reference);

        Ok(event)
    }
}
