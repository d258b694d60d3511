//! Webhook reconciler
//!
//! `received -> signature_verified -> order_resolved -> applied`, stopping at
//! the first failed gate. Only authenticity and payload-shape failures are
//! errors. An event the order cannot act on (a capture for a failed order, a
//! denial after payment) is acknowledged and logged, since redelivery would
//! not change the answer.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::config::Capabilities;
use crate::database::repository::MandateRepository;
use crate::orders::error::LifecycleError;
use crate::orders::manager::{OrderLifecycleManager, Transition};
use crate::orders::model::{Order, REVIEW_HOLD_PREFIX};
use crate::payments::redact::redact_json;
use crate::payments::types::{MandateStatus, PaymentMethod, PaymentRef};
use crate::webhooks::error::WebhookError;
use crate::webhooks::source::WebhookSource;
use crate::webhooks::types::{EventKind, ProviderEvent, WebhookEvent, WebhookOutcome, WebhookRequest};

pub struct WebhookReconciler {
    sources: HashMap<PaymentMethod, Arc<dyn WebhookSource>>,
    lifecycle: OrderLifecycleManager,
    mandates: Option<Arc<dyn MandateRepository>>,
    allow_unsigned: bool,
}

impl WebhookReconciler {
    pub fn new(lifecycle: OrderLifecycleManager, capabilities: &Capabilities) -> Self {
        Self {
            sources: HashMap::new(),
            lifecycle,
            mandates: None,
            allow_unsigned: capabilities.capability("allow_unsigned_webhooks"),
        }
    }

    pub fn with_source(mut self, source: Arc<dyn WebhookSource>) -> Self {
        self.sources.insert(source.provider(), source);
        self
    }

    pub fn with_mandates(mut self, mandates: Arc<dyn MandateRepository>) -> Self {
        self.mandates = Some(mandates);
        self
    }

    /// Providers with a registered source, in a stable order.
    pub fn providers(&self) -> Vec<PaymentMethod> {
        PaymentMethod::ALL
            .into_iter()
            .filter(|m| self.sources.contains_key(m))
            .collect()
    }

    #[instrument(skip(self, request), fields(provider = %request.provider))]
    pub async fn process(&self, request: &WebhookRequest) -> Result<WebhookOutcome, WebhookError> {
        let source = request
            .provider
            .parse::<PaymentMethod>()
            .ok()
            .and_then(|method| self.sources.get(&method))
            .ok_or_else(|| WebhookError::UnknownProvider(request.provider.clone()))?;

        self.authenticate(source.as_ref(), request).await?;
        debug!(stage = "signature_verified", "Webhook authenticated");

        let payload: serde_json::Value = serde_json::from_slice(&request.body)
            .map_err(|e| WebhookError::malformed(format!("body is not JSON: {}", e)))?;
        let parsed = source.parse(&payload)?;

        let mut event = WebhookEvent {
            provider: parsed.provider,
            event_type: parsed.event_type.clone(),
            payload,
            signature: request.header(source.signature_header()).map(str::to_string),
            order_id: None,
        };

        if parsed.kind == EventKind::Unknown {
            info!(
                event_type = %event.event_type,
                "Unrecognized webhook event acknowledged"
            );
            return Ok(WebhookOutcome::Ignored);
        }

        if parsed.provider == PaymentMethod::DirectDebit {
            self.update_mandate(&parsed).await?;
        }

        let order = match self.resolve(&parsed).await? {
            Some(order) => order,
            None => {
                warn!(
                    stage = "order_resolved",
                    event_type = %event.event_type,
                    references = ?parsed.references,
                    payload = %redact_json(&event.payload),
                    "No order matches webhook event; manual reconciliation required"
                );
                return Ok(WebhookOutcome::Unresolved);
            }
        };
        event.order_id = Some(order.id);
        debug!(stage = "order_resolved", order_id = %order.id, "Webhook order resolved");

        let outcome = self.dispatch(&order, &parsed).await?;
        info!(
            stage = "applied",
            order_id = %order.id,
            event_type = %event.event_type,
            kind = parsed.kind.as_str(),
            outcome = outcome.as_str(),
            signed = event.signature.is_some(),
            "Webhook processed"
        );
        Ok(outcome)
    }

    async fn authenticate(
        &self,
        source: &dyn WebhookSource,
        request: &WebhookRequest,
    ) -> Result<(), WebhookError> {
        if !source.is_configured() {
            if self.allow_unsigned {
                warn!(
                    provider = %source.provider(),
                    "Accepting unsigned webhook: allow_unsigned_webhooks is enabled"
                );
                return Ok(());
            }
            let err = WebhookError::MissingSecret(source.provider().to_string());
            warn!(stage = err.stage(), "Webhook rejected: {}", err);
            return Err(err);
        }

        source.verify(request).await.map_err(|err| {
            warn!(
                stage = err.stage(),
                header = source.signature_header(),
                "Webhook rejected: {}",
                err
            );
            err
        })
    }

    /// Payment reference first, then the order id from provider metadata.
    async fn resolve(&self, event: &ProviderEvent) -> Result<Option<Order>, WebhookError> {
        for reference in &event.references {
            let payment_ref = PaymentRef::new(event.provider, reference.clone());
            if let Some(order) = self
                .lifecycle
                .find_by_payment_ref(&payment_ref)
                .await
                .map_err(storage)?
            {
                return Ok(Some(order));
            }
        }

        if let Some(order_id) = event.order_hint {
            return match self.lifecycle.find(order_id).await {
                Ok(order) => Ok(Some(order)),
                Err(LifecycleError::NotFound(_)) => Ok(None),
                Err(e) => Err(storage(e)),
            };
        }

        Ok(None)
    }

    async fn update_mandate(&self, event: &ProviderEvent) -> Result<(), WebhookError> {
        let (Some(mandates), Some(reference)) = (&self.mandates, event.references.first()) else {
            return Ok(());
        };
        let status = match event.kind {
            EventKind::CaptureCompleted => MandateStatus::Completed,
            EventKind::Denied => MandateStatus::Failed,
            EventKind::Refunded | EventKind::Reversed => MandateStatus::Refunded,
            EventKind::Approved | EventKind::Unknown => return Ok(()),
        };

        match mandates.update_status(reference, status).await {
            Ok(Some(_)) => {
                info!(mandate = %reference, status = status.as_str(), "Mandate status updated");
                Ok(())
            }
            Ok(None) => {
                warn!(mandate = %reference, "Mandate not found for status event");
                Ok(())
            }
            Err(e) => Err(WebhookError::Storage(e.to_string())),
        }
    }

    async fn dispatch(&self, order: &Order, event: &ProviderEvent) -> Result<WebhookOutcome, WebhookError> {
        let result = match event.kind {
            EventKind::CaptureCompleted => return self.apply_capture(order, event).await,
            EventKind::Approved => {
                self.lifecycle
                    .mark_on_hold(order.id, "payment approved, awaiting capture")
                    .await
            }
            EventKind::Denied => {
                let reason = event
                    .reason
                    .clone()
                    .unwrap_or_else(|| format!("payment denied by {}", event.provider));
                self.lifecycle.mark_failed(order.id, &reason).await
            }
            EventKind::Refunded => self.apply_refund(order, event).await,
            EventKind::Reversed => {
                if order.status.is_refundable() {
                    self.apply_refund(order, event).await
                } else {
                    let reason = event
                        .reason
                        .clone()
                        .unwrap_or_else(|| format!("payment reversed by {}", event.provider));
                    self.lifecycle.mark_failed(order.id, &reason).await
                }
            }
            EventKind::Unknown => return Ok(WebhookOutcome::Ignored),
        };

        outcome_of(order, event, result)
    }

    async fn apply_capture(&self, order: &Order, event: &ProviderEvent) -> Result<WebhookOutcome, WebhookError> {
        if let Some(amount) = event.amount {
            if amount != order.total {
                warn!(
                    order_id = %order.id,
                    %amount,
                    total = %order.total,
                    "Captured amount does not match order total"
                );
                let reason = format!(
                    "{}captured amount {} does not match order total {}",
                    REVIEW_HOLD_PREFIX, amount, order.total
                );
                let result = self.lifecycle.mark_on_hold(order.id, &reason).await;
                return outcome_of(order, event, result);
            }
        }

        let transaction_id = event
            .transaction_id
            .clone()
            .or_else(|| event.references.first().cloned())
            .ok_or_else(|| WebhookError::malformed("capture event carries no transaction id"))?;
        let result = self
            .lifecycle
            .finalize(order.id, PaymentRef::new(event.provider, transaction_id))
            .await;
        outcome_of(order, event, result)
    }

    async fn apply_refund(
        &self,
        order: &Order,
        event: &ProviderEvent,
    ) -> Result<Transition, LifecycleError> {
        let refund_id = event
            .refund_id
            .clone()
            .or_else(|| event.event_id.clone())
            .ok_or_else(|| LifecycleError::validation("refund event carries no refund id"))?;
        let amount = event.amount.unwrap_or_else(|| order.remaining());
        self.lifecycle
            .record_provider_refund(order.id, &refund_id, amount)
            .await
    }
}

/// Map a lifecycle result to the acknowledgement. Business conflicts are
/// acknowledged as `Ignored`; storage failures are errors so the provider
/// redelivers.
fn outcome_of(
    order: &Order,
    event: &ProviderEvent,
    result: Result<Transition, LifecycleError>,
) -> Result<WebhookOutcome, WebhookError> {
    match result {
        Ok(Transition::Applied(_)) => Ok(WebhookOutcome::Applied),
        Ok(Transition::Unchanged(_)) => Ok(WebhookOutcome::Duplicate),
        Err(LifecycleError::InvalidTransition { from, to, .. }) => {
            warn!(
                order_id = %order.id,
                event_type = %event.event_type,
                "Webhook event conflicts with order state ({} -> {}); acknowledged without change",
                from,
                to
            );
            Ok(WebhookOutcome::Ignored)
        }
        Err(LifecycleError::Validation(message)) => {
            warn!(
                order_id = %order.id,
                event_type = %event.event_type,
                "Webhook event not applied: {}",
                message
            );
            Ok(WebhookOutcome::Ignored)
        }
        Err(LifecycleError::NotFound(_)) => Ok(WebhookOutcome::Unresolved),
        Err(e) => Err(storage(e)),
    }
}

fn storage(err: LifecycleError) -> WebhookError {
    WebhookError::Storage(err.to_string())
}
