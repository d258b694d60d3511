//! Checkout flow
//!
//! Turns browser requests into gateway calls and lifecycle transitions:
//! prepare a provisional order, start a payment attempt, and settle it from
//! the provider's own view of the payment. Client-reported success is never
//! taken at face value; every confirmation re-reads provider state.

use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::checkout::session::CheckoutSessionStore;
use crate::checkout::state::CheckoutState;
use crate::config::Capabilities;
use crate::orders::error::{LifecycleError, LifecycleResult};
use crate::orders::manager::OrderLifecycleManager;
use crate::orders::model::{Order, OrderStatus};
use crate::payments::error::GatewayError;
use crate::payments::types::{
    CheckoutData, ClientResult, Continuation, PaymentHandle, PaymentMethod, PaymentOutcome,
    PaymentRef,
};

#[derive(Debug, Clone)]
pub struct CheckoutSettings {
    pub public_base_url: String,
    pub success_url: String,
    pub failure_url: String,
}

impl CheckoutSettings {
    pub fn return_url(&self, method: PaymentMethod, order_id: Uuid) -> String {
        format!(
            "{}/checkout/return/{}?order={}",
            self.public_base_url.trim_end_matches('/'),
            method,
            order_id
        )
    }

    pub fn success_redirect(&self, order_id: Uuid) -> String {
        with_order(&self.success_url, order_id)
    }

    pub fn failure_redirect(&self, order_id: Uuid) -> String {
        with_order(&self.failure_url, order_id)
    }
}

fn with_order(base: &str, order_id: Uuid) -> String {
    let separator = if base.contains('?') { '&' } else { '?' };
    format!("{}{}order={}", base, separator, order_id)
}

/// Where a payment attempt stands after a checkout call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentStep {
    /// The browser must complete a provider step, then confirm again
    Continue {
        order_id: Uuid,
        payment_reference: String,
        continuation: Continuation,
    },
    /// The order is committed: paid, or on hold awaiting settlement
    Completed {
        order_id: Uuid,
        order_status: OrderStatus,
        redirect_url: String,
    },
    /// The attempt is over; the customer may start again with a fresh order
    Failed {
        order_id: Uuid,
        reason: String,
        redirect_url: String,
    },
}

impl PaymentStep {
    pub fn order_id(&self) -> Uuid {
        match self {
            PaymentStep::Continue { order_id, .. }
            | PaymentStep::Completed { order_id, .. }
            | PaymentStep::Failed { order_id, .. } => *order_id,
        }
    }
}

#[derive(Clone)]
pub struct CheckoutService {
    lifecycle: OrderLifecycleManager,
    sessions: Arc<dyn CheckoutSessionStore>,
    capabilities: Capabilities,
    settings: CheckoutSettings,
}

impl CheckoutService {
    pub fn new(
        lifecycle: OrderLifecycleManager,
        sessions: Arc<dyn CheckoutSessionStore>,
        capabilities: Capabilities,
        settings: CheckoutSettings,
    ) -> Self {
        Self {
            lifecycle,
            sessions,
            capabilities,
            settings,
        }
    }

    pub fn settings(&self) -> &CheckoutSettings {
        &self.settings
    }

    /// Methods that are both enabled and have a configured gateway.
    pub fn available_methods(&self) -> Vec<PaymentMethod> {
        self.lifecycle
            .gateways()
            .methods()
            .into_iter()
            .filter(|m| self.is_enabled(*m))
            .collect()
    }

    fn is_enabled(&self, method: PaymentMethod) -> bool {
        self.capabilities
            .capability(&format!("{}_enabled", method.as_str()))
    }

    /// Store the submitted form state and create a provisional order from it.
    #[instrument(skip(self, state))]
    pub async fn prepare(&self, session_id: &str, state: CheckoutState) -> LifecycleResult<Order> {
        if let Some(method) = state.payment_method {
            if !self.is_enabled(method) {
                return Err(GatewayError::NotConfigured(method).into());
            }
        }
        self.sessions.save(session_id, &state).await?;
        self.lifecycle.create_pending(session_id, &state).await
    }

    /// Load an order, treating orders of other sessions as absent.
    pub async fn order_for_session(&self, order_id: Uuid, session_id: &str) -> LifecycleResult<Order> {
        let order = self.lifecycle.find(order_id).await?;
        if order.session_id != session_id {
            warn!(order_id = %order_id, "Order requested by a different session");
            return Err(LifecycleError::NotFound(order_id));
        }
        Ok(order)
    }

    /// Start a payment attempt. Methods without a client-side step (manual
    /// transfer, mandate) settle right away.
    #[instrument(skip(self, data), fields(order_id = %order_id, method = %method))]
    pub async fn initiate_payment(
        &self,
        session_id: &str,
        method: PaymentMethod,
        order_id: Uuid,
        mut data: CheckoutData,
    ) -> LifecycleResult<PaymentStep> {
        if !self.is_enabled(method) {
            return Err(GatewayError::NotConfigured(method).into());
        }
        let gateway = self.lifecycle.gateways().get(method)?;

        let order = self.order_for_session(order_id, session_id).await?;
        if !order.status.is_provisional() {
            return Err(LifecycleError::InvalidTransition {
                order_id,
                from: order.status,
                to: OrderStatus::PendingPayment,
            });
        }

        if data.return_url.is_none() {
            data.return_url = Some(self.settings.return_url(method, order.id));
        }
        if data.cancel_url.is_none() {
            data.cancel_url = Some(self.settings.failure_redirect(order.id));
        }

        let handle = gateway.initiate(&data, &order).await?;
        let order = self.lifecycle.attach_handle(&handle).await?;
        info!(
            external_ref = %handle.external_ref,
            "Payment attempt started"
        );

        if handle.continuation.requires_client() {
            return Ok(PaymentStep::Continue {
                order_id: order.id,
                payment_reference: handle.external_ref.clone(),
                continuation: handle.continuation,
            });
        }

        let continuation = handle.continuation.clone();
        let step = self.confirm_handle(&order, &handle, &ClientResult::default()).await?;
        // Transfer instructions still have to reach the customer
        match (step, continuation) {
            (
                PaymentStep::Completed {
                    order_id,
                    order_status: OrderStatus::OnHold,
                    ..
                },
                continuation @ Continuation::TransferInstructions { .. },
            ) => Ok(PaymentStep::Continue {
                order_id,
                payment_reference: handle.external_ref,
                continuation,
            }),
            (step, _) => Ok(step),
        }
    }

    /// Re-verify an attempt with the provider and settle the order.
    ///
    /// `payment_reference` must match the active attempt when given.
    #[instrument(skip(self, client), fields(order_id = %order_id))]
    pub async fn confirm(
        &self,
        order_id: Uuid,
        payment_reference: Option<&str>,
        client: &ClientResult,
    ) -> LifecycleResult<PaymentStep> {
        let order = self.lifecycle.find(order_id).await?;
        if let Some(step) = self.settled_step(&order) {
            return Ok(step);
        }

        let Some(handle) = self.lifecycle.active_handle(&order).await? else {
            if order.status == OrderStatus::OnHold {
                return Ok(self.completed(&order));
            }
            return Err(LifecycleError::validation("order has no payment attempt"));
        };
        if let Some(reference) = payment_reference.map(str::trim).filter(|r| !r.is_empty()) {
            if reference != handle.external_ref {
                return Err(LifecycleError::validation(
                    "payment reference does not match the active attempt",
                ));
            }
        }

        if order.status == OrderStatus::OnHold {
            return self.confirm_held(&order, &handle, client).await;
        }
        self.confirm_handle(&order, &handle, client).await
    }

    /// `finalize(tempOrderId, paymentRef, method)` from the checkout page.
    pub async fn finalize(
        &self,
        session_id: &str,
        order_id: Uuid,
        payment_reference: &str,
        method: PaymentMethod,
    ) -> LifecycleResult<PaymentStep> {
        let order = self.order_for_session(order_id, session_id).await?;
        if order.payment_method != Some(method) {
            return Err(LifecycleError::validation(format!(
                "order is not being paid by {}",
                method
            )));
        }
        self.confirm(order.id, Some(payment_reference), &ClientResult::default())
            .await
    }

    /// Browser came back from a provider page. Always yields a redirect.
    #[instrument(skip(self, client))]
    pub async fn handle_return(
        &self,
        method: PaymentMethod,
        order_id: Uuid,
        reference: Option<&str>,
        client: &ClientResult,
    ) -> String {
        let result = match self.lifecycle.find(order_id).await {
            Ok(order) if order.payment_method == Some(method) => {
                self.confirm(order_id, reference, client).await
            }
            Ok(_) => Err(LifecycleError::validation("payment method does not match order")),
            Err(e) => Err(e),
        };

        match result {
            Ok(PaymentStep::Completed { redirect_url, .. })
            | Ok(PaymentStep::Failed { redirect_url, .. }) => redirect_url,
            Ok(PaymentStep::Continue {
                continuation: Continuation::Redirect { url },
                ..
            }) => url,
            Ok(PaymentStep::Continue { .. }) => self.settings.failure_redirect(order_id),
            Err(e) => {
                warn!(order_id = %order_id, "Return verification failed: {}", e);
                self.settings.failure_redirect(order_id)
            }
        }
    }

    /// Step for an order the checkout has nothing left to do for.
    fn settled_step(&self, order: &Order) -> Option<PaymentStep> {
        match order.status {
            OrderStatus::Paid | OrderStatus::Refunded | OrderStatus::PartiallyRefunded => {
                Some(self.completed(order))
            }
            OrderStatus::OnHold if order.needs_review() => Some(self.completed(order)),
            OrderStatus::Failed => Some(PaymentStep::Failed {
                order_id: order.id,
                reason: order
                    .failure_reason
                    .clone()
                    .unwrap_or_else(|| "payment failed".to_string()),
                redirect_url: self.settings.failure_redirect(order.id),
            }),
            _ => None,
        }
    }

    fn completed(&self, order: &Order) -> PaymentStep {
        PaymentStep::Completed {
            order_id: order.id,
            order_status: order.status,
            redirect_url: self.settings.success_redirect(order.id),
        }
    }

    /// A held order only moves forward from here. Declines and reversals of
    /// money already in flight arrive as provider events.
    async fn confirm_held(
        &self,
        order: &Order,
        handle: &PaymentHandle,
        client: &ClientResult,
    ) -> LifecycleResult<PaymentStep> {
        let gateway = self.lifecycle.gateways().get(handle.provider)?;
        match gateway.confirm(handle, client).await {
            Ok(outcome @ PaymentOutcome::Succeeded { .. }) => {
                self.settle(order, handle, outcome).await
            }
            Ok(outcome) => {
                debug!(order_id = %order.id, ?outcome, "Held order not settled yet");
                Ok(self.completed(order))
            }
            Err(e) => {
                warn!(order_id = %order.id, "Provider check for held order failed: {}", e);
                Ok(self.completed(order))
            }
        }
    }

    async fn confirm_handle(
        &self,
        order: &Order,
        handle: &PaymentHandle,
        client: &ClientResult,
    ) -> LifecycleResult<PaymentStep> {
        let gateway = self.lifecycle.gateways().get(handle.provider)?;
        let outcome = match gateway.confirm(handle, client).await {
            Ok(outcome) => outcome,
            Err(GatewayError::Provider {
                message,
                retryable: false,
                ..
            }) => PaymentOutcome::Failed { reason: message },
            // Validation and transient errors leave the order pending
            Err(e) => return Err(e.into()),
        };

        self.settle(order, handle, outcome).await
    }

    async fn settle(
        &self,
        order: &Order,
        handle: &PaymentHandle,
        outcome: PaymentOutcome,
    ) -> LifecycleResult<PaymentStep> {
        match outcome {
            PaymentOutcome::Succeeded { transaction_id } => {
                let transition = self
                    .lifecycle
                    .finalize(order.id, PaymentRef::new(handle.provider, transaction_id))
                    .await?;
                Ok(self.completed(transition.order()))
            }
            PaymentOutcome::RequiresAction { continuation } => Ok(PaymentStep::Continue {
                order_id: order.id,
                payment_reference: handle.external_ref.clone(),
                continuation,
            }),
            PaymentOutcome::Pending { reason } => {
                let transition = self.lifecycle.mark_on_hold(order.id, &reason).await?;
                Ok(self.completed(transition.order()))
            }
            PaymentOutcome::Failed { reason } => {
                let order = match self.lifecycle.mark_failed(order.id, &reason).await {
                    Ok(transition) => transition.into_order(),
                    // A webhook paid the order in the meantime
                    Err(LifecycleError::InvalidTransition { .. }) => {
                        let current = self.lifecycle.find(order.id).await?;
                        if current.status.is_committed() {
                            return Ok(self.completed(&current));
                        }
                        current
                    }
                    Err(e) => return Err(e),
                };
                Ok(PaymentStep::Failed {
                    order_id: order.id,
                    reason,
                    redirect_url: self.settings.failure_redirect(order.id),
                })
            }
        }
    }
}
