//! Order lifecycle manager
//!
//! The only component that creates orders or changes their status. Every
//! transition is a compare-and-set in the repository, so a webhook racing a
//! browser confirmation cannot finalize the same order twice: one caller wins
//! and fires the side effects, the other sees `Transition::Unchanged`.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use crate::checkout::session::CheckoutSessionStore;
use crate::checkout::state::CheckoutState;
use crate::database::repository::{
    AttachResult, OrderRepository, RefundApplication, RefundReservation,
};
use crate::orders::error::{LifecycleError, LifecycleResult};
use crate::orders::events::OrderEventBus;
use crate::orders::model::{Order, OrderStatus, StatusChange};
use crate::payments::money::Money;
use crate::payments::registry::GatewayRegistry;
use crate::payments::types::{PaymentHandle, PaymentRef};

pub const EXPIRED_REASON: &str = "payment window expired";

/// Result of a lifecycle operation that succeeded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// This call moved the order and fired its side effects
    Applied(Order),
    /// The order already reflected the request; nothing was repeated
    Unchanged(Order),
}

impl Transition {
    pub fn order(&self) -> &Order {
        match self {
            Transition::Applied(order) | Transition::Unchanged(order) => order,
        }
    }

    pub fn into_order(self) -> Order {
        match self {
            Transition::Applied(order) | Transition::Unchanged(order) => order,
        }
    }

    pub fn is_applied(&self) -> bool {
        matches!(self, Transition::Applied(_))
    }
}

#[derive(Clone)]
pub struct OrderLifecycleManager {
    orders: Arc<dyn OrderRepository>,
    sessions: Arc<dyn CheckoutSessionStore>,
    gateways: GatewayRegistry,
    events: OrderEventBus,
}

impl OrderLifecycleManager {
    pub fn new(
        orders: Arc<dyn OrderRepository>,
        sessions: Arc<dyn CheckoutSessionStore>,
        gateways: GatewayRegistry,
        events: OrderEventBus,
    ) -> Self {
        Self {
            orders,
            sessions,
            gateways,
            events,
        }
    }

    pub fn gateways(&self) -> &GatewayRegistry {
        &self.gateways
    }

    /// Materialize a provisional order from the session's checkout state.
    #[instrument(skip(self, state))]
    pub async fn create_pending(
        &self,
        session_id: &str,
        state: &CheckoutState,
    ) -> LifecycleResult<Order> {
        let new_order = state.snapshot(session_id)?;
        let order = self.orders.insert(new_order).await?;
        info!(
            order_id = %order.id,
            number = order.number,
            total = %order.total,
            currency = %order.currency,
            "Pending order created"
        );
        Ok(order)
    }

    pub async fn find(&self, order_id: Uuid) -> LifecycleResult<Order> {
        self.orders
            .find_by_id(order_id)
            .await?
            .ok_or(LifecycleError::NotFound(order_id))
    }

    pub async fn find_by_payment_ref(&self, payment_ref: &PaymentRef) -> LifecycleResult<Option<Order>> {
        Ok(self.orders.find_by_payment_ref(payment_ref).await?)
    }

    /// Handle for the order's current payment method, if one was attached.
    pub async fn active_handle(&self, order: &Order) -> LifecycleResult<Option<PaymentHandle>> {
        match order.payment_method {
            Some(method) => Ok(self.orders.find_handle(order.id, method).await?),
            None => Ok(None),
        }
    }

    /// Make `handle` the active attempt for its gateway and move the order
    /// to `pending_payment`. An earlier handle for the same gateway is
    /// superseded and voided at the provider on a best-effort basis.
    #[instrument(skip(self, handle), fields(order_id = %handle.order_id, provider = %handle.provider))]
    pub async fn attach_handle(&self, handle: &PaymentHandle) -> LifecycleResult<Order> {
        match self.orders.attach_handle(handle).await? {
            AttachResult::Attached { order, superseded } => {
                if let Some(old) = superseded.filter(|old| old.external_ref != handle.external_ref) {
                    info!(
                        superseded_ref = %old.external_ref,
                        external_ref = %handle.external_ref,
                        "Payment handle superseded"
                    );
                    self.void_best_effort(&old).await;
                }
                Ok(order)
            }
            AttachResult::NotAttachable(order) => {
                error!(
                    "Cannot attach payment handle to order in status {}",
                    order.status
                );
                Err(LifecycleError::InvalidTransition {
                    order_id: order.id,
                    from: order.status,
                    to: OrderStatus::PendingPayment,
                })
            }
            AttachResult::NotFound => Err(LifecycleError::NotFound(handle.order_id)),
        }
    }

    /// Move the order to `paid`. Idempotent: if the order is already paid
    /// (or refunded since) the call succeeds with `Unchanged` and fires
    /// nothing.
    #[instrument(skip(self), fields(order_id = %order_id, provider = %payment_ref.provider))]
    pub async fn finalize(
        &self,
        order_id: Uuid,
        payment_ref: PaymentRef,
    ) -> LifecycleResult<Transition> {
        if payment_ref.external_id.trim().is_empty() {
            return Err(LifecycleError::validation(
                "finalize requires a non-empty payment reference",
            ));
        }

        let change = StatusChange::to(OrderStatus::Paid).with_payment_ref(payment_ref);
        if let Some(order) = self
            .orders
            .transition(order_id, OrderStatus::Paid.allowed_sources(), &change)
            .await?
        {
            info!(number = order.number, "Order finalized");
            self.events.order_finalized(&order).await;
            self.clear_session(&order).await;
            return Ok(Transition::Applied(order));
        }

        let order = self.find(order_id).await?;
        match order.status {
            OrderStatus::Paid | OrderStatus::Refunded | OrderStatus::PartiallyRefunded => {
                debug!("Order already paid, finalize is a no-op");
                Ok(Transition::Unchanged(order))
            }
            from => {
                error!("Invalid status transition from {} to paid", from);
                Err(LifecycleError::InvalidTransition {
                    order_id,
                    from,
                    to: OrderStatus::Paid,
                })
            }
        }
    }

    /// Park a pending order until settlement is confirmed (manual transfer,
    /// authorized-not-captured, issued mandate).
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn mark_on_hold(
        &self,
        order_id: Uuid,
        reason: &str,
    ) -> LifecycleResult<Transition> {
        let change = StatusChange::to(OrderStatus::OnHold).with_reason(reason);
        if let Some(order) = self
            .orders
            .transition(order_id, OrderStatus::OnHold.allowed_sources(), &change)
            .await?
        {
            info!(reason, "Order placed on hold");
            self.events.order_on_hold(&order).await;
            self.clear_session(&order).await;
            return Ok(Transition::Applied(order));
        }

        let order = self.find(order_id).await?;
        match order.status {
            // Money movement is monotone; a late hold signal changes nothing
            OrderStatus::OnHold
            | OrderStatus::Paid
            | OrderStatus::Refunded
            | OrderStatus::PartiallyRefunded => Ok(Transition::Unchanged(order)),
            from => {
                error!("Invalid status transition from {} to on_hold", from);
                Err(LifecycleError::InvalidTransition {
                    order_id,
                    from,
                    to: OrderStatus::OnHold,
                })
            }
        }
    }

    /// Fail an order that was never paid.
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn mark_failed(&self, order_id: Uuid, reason: &str) -> LifecycleResult<Transition> {
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(LifecycleError::validation(
                "a failed order requires a reason",
            ));
        }

        let change = StatusChange::to(OrderStatus::Failed).with_reason(reason);
        if let Some(order) = self
            .orders
            .transition(order_id, OrderStatus::Failed.allowed_sources(), &change)
            .await?
        {
            info!(reason, "Order failed");
            self.events.order_failed(&order).await;
            return Ok(Transition::Applied(order));
        }

        let order = self.find(order_id).await?;
        match order.status {
            OrderStatus::Failed => Ok(Transition::Unchanged(order)),
            from => {
                error!("Invalid status transition from {} to failed", from);
                Err(LifecycleError::InvalidTransition {
                    order_id,
                    from,
                    to: OrderStatus::Failed,
                })
            }
        }
    }

    /// Refund through the owning gateway. `None` refunds the remaining
    /// balance.
    ///
    /// The amount is claimed on the order before the provider is called, so
    /// concurrent refunds can never send back more than was paid.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn refund(
        &self,
        order_id: Uuid,
        amount: Option<Money>,
    ) -> LifecycleResult<Transition> {
        let order = self.find(order_id).await?;
        if !order.status.is_refundable() {
            error!("Order in status {} cannot be refunded", order.status);
            return Err(LifecycleError::InvalidTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Refunded,
            });
        }

        let amount = amount.unwrap_or_else(|| order.refundable_balance());
        if !amount.is_positive() {
            return Err(LifecycleError::validation("refund amount must be positive"));
        }
        let payment_ref = order.payment_ref.clone().ok_or_else(|| {
            LifecycleError::validation("paid order has no payment reference")
        })?;
        let gateway = self.gateways.get(payment_ref.provider)?;

        let order = match self.orders.reserve_refund(order_id, amount).await? {
            RefundReservation::Reserved(order) => order,
            RefundReservation::NotRefundable(order) => {
                return Err(LifecycleError::InvalidTransition {
                    order_id,
                    from: order.status,
                    to: OrderStatus::Refunded,
                })
            }
            RefundReservation::ExceedsBalance(order) => {
                return Err(LifecycleError::validation(format!(
                    "refund of {} exceeds remaining balance {}",
                    amount,
                    order.refundable_balance()
                )))
            }
            RefundReservation::NotFound => return Err(LifecycleError::NotFound(order_id)),
        };

        let receipt = match gateway.refund(&payment_ref, amount, &order.currency).await {
            Ok(receipt) => receipt,
            Err(e) => {
                if let Err(release) = self.orders.release_refund(order_id, amount).await {
                    error!(amount = %amount, "Failed to release refund claim: {}", release);
                }
                return Err(e.into());
            }
        };
        info!(
            refund_id = %receipt.refund_id,
            amount = %amount,
            status = %receipt.status,
            "Provider refund issued"
        );

        let application = self
            .orders
            .apply_refund(order_id, &receipt.refund_id, amount, amount)
            .await?;
        self.refund_applied(order_id, &receipt.refund_id, amount, application)
            .await
    }

    /// Apply a refund the provider already executed. Each refund id is
    /// applied at most once, so the webhook echo of an API refund is a no-op.
    #[instrument(skip(self), fields(order_id = %order_id))]
    pub async fn record_provider_refund(
        &self,
        order_id: Uuid,
        refund_id: &str,
        amount: Money,
    ) -> LifecycleResult<Transition> {
        if refund_id.trim().is_empty() {
            return Err(LifecycleError::validation("refund id is required"));
        }
        if !amount.is_positive() {
            return Err(LifecycleError::validation("refund amount must be positive"));
        }

        let application = self
            .orders
            .apply_refund(order_id, refund_id, amount, Money::ZERO)
            .await?;
        self.refund_applied(order_id, refund_id, amount, application)
            .await
    }

    async fn refund_applied(
        &self,
        order_id: Uuid,
        refund_id: &str,
        amount: Money,
        application: RefundApplication,
    ) -> LifecycleResult<Transition> {
        match application {
            RefundApplication::Applied(order) => {
                info!(
                    status = %order.status,
                    refunded = %order.refunded,
                    remaining = %order.remaining(),
                    "Refund recorded"
                );
                self.events.order_refunded(&order, amount).await;
                Ok(Transition::Applied(order))
            }
            RefundApplication::Duplicate(order) => {
                debug!(refund_id, "Refund already recorded");
                Ok(Transition::Unchanged(order))
            }
            RefundApplication::NotRefundable(order) => Err(LifecycleError::InvalidTransition {
                order_id,
                from: order.status,
                to: OrderStatus::Refunded,
            }),
            RefundApplication::ExceedsBalance(order) => {
                Err(LifecycleError::validation(format!(
                    "refund of {} exceeds remaining balance {}",
                    amount,
                    order.remaining()
                )))
            }
            RefundApplication::NotFound => Err(LifecycleError::NotFound(order_id)),
        }
    }

    /// Explicit cancellation: paid orders are refunded in full, unpaid ones
    /// are voided at the provider and failed.
    #[instrument(skip(self, reason), fields(order_id = %order_id))]
    pub async fn cancel(&self, order_id: Uuid, reason: &str) -> LifecycleResult<Transition> {
        let order = self.find(order_id).await?;

        if order.status.is_refundable() {
            return self.refund(order_id, None).await;
        }

        if order.status.is_terminal() {
            return Ok(Transition::Unchanged(order));
        }

        if let Some(handle) = self.active_handle(&order).await? {
            self.void_best_effort(&handle).await;
        }
        self.mark_failed(order_id, &format!("canceled: {}", reason.trim()))
            .await
    }

    /// Fail provisional orders untouched for longer than `older_than`.
    /// Returns the orders this call expired.
    #[instrument(skip(self))]
    pub async fn expire_stale(&self, older_than: chrono::Duration) -> LifecycleResult<Vec<Order>> {
        let cutoff = Utc::now() - older_than;
        let stale = self.orders.find_stale(cutoff).await?;

        let mut expired = Vec::with_capacity(stale.len());
        for order in stale {
            if let Ok(Some(handle)) = self.active_handle(&order).await {
                self.void_best_effort(&handle).await;
            }
            match self.mark_failed(order.id, EXPIRED_REASON).await {
                Ok(Transition::Applied(order)) => expired.push(order),
                Ok(Transition::Unchanged(_)) => {}
                // Paid or put on hold while we were looking
                Err(LifecycleError::InvalidTransition { .. }) => {}
                Err(e) => {
                    warn!(order_id = %order.id, "Failed to expire order: {}", e);
                }
            }
        }

        if !expired.is_empty() {
            info!(count = expired.len(), "Expired stale orders");
        }
        Ok(expired)
    }

    /// Orders on hold for longer than `older_than`. Holds never expire on
    /// their own; each one found is logged for an operator to chase.
    #[instrument(skip(self))]
    pub async fn aged_holds(&self, older_than: chrono::Duration) -> LifecycleResult<Vec<Order>> {
        let cutoff = Utc::now() - older_than;
        let held = self.orders.find_aged_holds(cutoff).await?;
        for order in &held {
            warn!(
                order_id = %order.id,
                number = order.number,
                payment_method = ?order.payment_method,
                held_since = %order.updated_at,
                reason = ?order.hold_reason,
                "Order on hold past the alert window"
            );
        }
        Ok(held)
    }

    async fn void_best_effort(&self, handle: &PaymentHandle) {
        let gateway = match self.gateways.get(handle.provider) {
            Ok(gateway) => gateway,
            Err(_) => return,
        };
        if let Err(e) = gateway.cancel(handle).await {
            warn!(
                order_id = %handle.order_id,
                external_ref = %handle.external_ref,
                "Failed to void payment attempt: {}",
                e
            );
        }
    }

    async fn clear_session(&self, order: &Order) {
        if let Err(e) = self.sessions.clear(&order.session_id).await {
            warn!(order_id = %order.id, "Failed to clear checkout session: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkout::session::InMemorySessionStore;
    use crate::checkout::state::tests::state;
    use crate::database::memory::InMemoryOrderRepository;
    use crate::orders::events::OrderObserver;
    use crate::payments::error::GatewayError;
    use crate::payments::traits::GatewayAdapter;
    use crate::payments::types::{
        CheckoutData, ClientResult, PaymentMethod, PaymentOutcome, RefundReceipt,
    };
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[derive(Default)]
    struct Counter {
        finalized: AtomicUsize,
        refunded: AtomicUsize,
    }

    #[async_trait]
    impl OrderObserver for Counter {
        fn name(&self) -> &'static str {
            "counter"
        }

        async fn on_order_finalized(&self, _order: &Order) -> anyhow::Result<()> {
            self.finalized.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn on_order_refunded(&self, _order: &Order, _amount: Money) -> anyhow::Result<()> {
            self.refunded.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[derive(Default)]
    struct StubGateway {
        refunds: AtomicUsize,
        voids: AtomicUsize,
        refund_latency: Option<Duration>,
        decline_refunds: bool,
    }

    #[async_trait]
    impl GatewayAdapter for StubGateway {
        fn method(&self) -> PaymentMethod {
            PaymentMethod::Card
        }

        async fn initiate(
            &self,
            _data: &CheckoutData,
            order: &Order,
        ) -> Result<PaymentHandle, GatewayError> {
            Ok(PaymentHandle::new(order.id, PaymentMethod::Card, "pi_1", "requires_payment_method"))
        }

        async fn confirm(
            &self,
            _handle: &PaymentHandle,
            _client: &ClientResult,
        ) -> Result<PaymentOutcome, GatewayError> {
            Ok(PaymentOutcome::Succeeded {
                transaction_id: "pi_1".to_string(),
            })
        }

        async fn refund(
            &self,
            _payment_ref: &PaymentRef,
            amount: Money,
            _currency: &str,
        ) -> Result<RefundReceipt, GatewayError> {
            if let Some(latency) = self.refund_latency {
                tokio::time::sleep(latency).await;
            }
            if self.decline_refunds {
                return Err(GatewayError::provider("card", "charge_disputed", false));
            }
            let n = self.refunds.fetch_add(1, Ordering::SeqCst);
            Ok(RefundReceipt {
                refund_id: format!("re_{}", n),
                amount,
                status: "succeeded".to_string(),
            })
        }

        async fn cancel(&self, _handle: &PaymentHandle) -> Result<(), GatewayError> {
            self.voids.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct Fixture {
        manager: OrderLifecycleManager,
        sessions: InMemorySessionStore,
        counter: Arc<Counter>,
        gateway: Arc<StubGateway>,
    }

    fn fixture() -> Fixture {
        fixture_with(StubGateway::default())
    }

    fn fixture_with(gateway: StubGateway) -> Fixture {
        let sessions = InMemorySessionStore::new();
        let counter = Arc::new(Counter::default());
        let gateway = Arc::new(gateway);
        let manager = OrderLifecycleManager::new(
            Arc::new(InMemoryOrderRepository::new()),
            Arc::new(sessions.clone()),
            GatewayRegistry::new().with(gateway.clone()),
            OrderEventBus::new().with_observer(counter.clone()),
        );
        Fixture {
            manager,
            sessions,
            counter,
            gateway,
        }
    }

    async fn pending_order(f: &Fixture) -> Order {
        f.sessions.save("sess-1", &state()).await.unwrap();
        let order = f.manager.create_pending("sess-1", &state()).await.unwrap();
        let handle = PaymentHandle::new(order.id, PaymentMethod::Card, "pi_1", "requires_action");
        f.manager.attach_handle(&handle).await.unwrap()
    }

    async fn paid_order(f: &Fixture) -> Order {
        let order = pending_order(f).await;
        f.manager
            .finalize(order.id, PaymentRef::new(PaymentMethod::Card, "pi_1"))
            .await
            .unwrap()
            .into_order()
    }

    #[tokio::test]
    async fn test_finalize_is_idempotent() {
        let f = fixture();
        let order = pending_order(&f).await;

        let first = f
            .manager
            .finalize(order.id, PaymentRef::new(PaymentMethod::Card, "pi_1"))
            .await
            .unwrap();
        let second = f
            .manager
            .finalize(order.id, PaymentRef::new(PaymentMethod::Card, "other"))
            .await
            .unwrap();

        assert!(first.is_applied());
        assert!(!second.is_applied());
        assert_eq!(second.order().status, OrderStatus::Paid);
        assert_eq!(
            second.order().payment_ref,
            Some(PaymentRef::new(PaymentMethod::Card, "pi_1"))
        );
        assert_eq!(f.counter.finalized.load(Ordering::SeqCst), 1);
        assert_eq!(f.sessions.load("sess-1").await.unwrap(), None);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_finalize_has_one_winner() {
        let f = fixture();
        let order = pending_order(&f).await;

        let mut tasks = Vec::new();
        for i in 0..16 {
            let manager = f.manager.clone();
            tasks.push(tokio::spawn(async move {
                manager
                    .finalize(order.id, PaymentRef::new(PaymentMethod::Card, format!("pi_{}", i)))
                    .await
            }));
        }

        let mut applied = 0;
        for task in tasks {
            if task.await.unwrap().unwrap().is_applied() {
                applied += 1;
            }
        }
        assert_eq!(applied, 1);
        assert_eq!(f.counter.finalized.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_finalize_rejects_empty_reference() {
        let f = fixture();
        let order = pending_order(&f).await;
        let result = f
            .manager
            .finalize(order.id, PaymentRef::new(PaymentMethod::Card, "  "))
            .await;
        assert!(matches!(result, Err(LifecycleError::Validation(_))));
    }

    #[tokio::test]
    async fn test_failed_requires_reason_and_is_unreachable_after_paid() {
        let f = fixture();
        let order = pending_order(&f).await;
        assert!(matches!(
            f.manager.mark_failed(order.id, "").await,
            Err(LifecycleError::Validation(_))
        ));

        let paid = paid_order(&f).await;
        assert!(matches!(
            f.manager.mark_failed(paid.id, "declined").await,
            Err(LifecycleError::InvalidTransition { from: OrderStatus::Paid, .. })
        ));
    }

    #[tokio::test]
    async fn test_late_hold_signal_does_not_demote_paid_order() {
        let f = fixture();
        let paid = paid_order(&f).await;
        let result = f.manager.mark_on_hold(paid.id, "approved").await.unwrap();
        assert!(!result.is_applied());
        assert_eq!(result.order().status, OrderStatus::Paid);
    }

    #[tokio::test]
    async fn test_refund_arithmetic() {
        let f = fixture();
        let order = paid_order(&f).await;
        assert_eq!(order.total, Money::from_minor(4999));

        let partial = f
            .manager
            .refund(order.id, Some(Money::from_minor(1999)))
            .await
            .unwrap()
            .into_order();
        assert_eq!(partial.status, OrderStatus::PartiallyRefunded);
        assert_eq!(partial.remaining(), Money::from_minor(3000));

        let over = f.manager.refund(order.id, Some(Money::from_minor(3001))).await;
        assert!(matches!(over, Err(LifecycleError::Validation(_))));

        let full = f.manager.refund(order.id, None).await.unwrap().into_order();
        assert_eq!(full.status, OrderStatus::Refunded);
        assert_eq!(full.remaining(), Money::ZERO);
        assert_eq!(f.gateway.refunds.load(Ordering::SeqCst), 2);
        assert_eq!(f.counter.refunded.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_refund_echo_is_applied_once() {
        let f = fixture();
        let order = paid_order(&f).await;

        let api = f
            .manager
            .refund(order.id, Some(Money::from_minor(999)))
            .await
            .unwrap();
        assert!(api.is_applied());

        // Webhook for the same provider refund id
        let echo = f
            .manager
            .record_provider_refund(order.id, "re_0", Money::from_minor(999))
            .await
            .unwrap();
        assert!(!echo.is_applied());
        assert_eq!(echo.order().refunded, Money::from_minor(999));
    }

    #[tokio::test]
    async fn test_concurrent_refunds_reach_provider_once() {
        let f = fixture_with(StubGateway {
            refund_latency: Some(Duration::from_millis(20)),
            ..StubGateway::default()
        });
        let order = paid_order(&f).await;

        let (a, b) = tokio::join!(
            f.manager.refund(order.id, None),
            f.manager.refund(order.id, None)
        );
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert!(matches!(
            a.err().or(b.err()),
            Some(LifecycleError::Validation(_))
        ));
        assert_eq!(f.gateway.refunds.load(Ordering::SeqCst), 1);

        let order = f.manager.find(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Refunded);
        assert_eq!(order.refunded, Money::from_minor(4999));
        assert_eq!(order.refund_pending, Money::ZERO);
    }

    #[tokio::test]
    async fn test_declined_refund_releases_its_claim() {
        let f = fixture_with(StubGateway {
            decline_refunds: true,
            ..StubGateway::default()
        });
        let order = paid_order(&f).await;

        let result = f.manager.refund(order.id, Some(Money::from_minor(1000))).await;
        assert!(matches!(result, Err(LifecycleError::Gateway(_))));

        let order = f.manager.find(order.id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        assert_eq!(order.refund_pending, Money::ZERO);
        assert_eq!(order.refundable_balance(), Money::from_minor(4999));
    }

    #[tokio::test]
    async fn test_cancel_unpaid_voids_and_fails() {
        let f = fixture();
        let order = pending_order(&f).await;

        let result = f.manager.cancel(order.id, "customer request").await.unwrap();
        assert_eq!(result.order().status, OrderStatus::Failed);
        assert_eq!(
            result.order().failure_reason.as_deref(),
            Some("canceled: customer request")
        );
        assert_eq!(f.gateway.voids.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancel_paid_refunds_remaining() {
        let f = fixture();
        let order = paid_order(&f).await;
        let result = f.manager.cancel(order.id, "out of stock").await.unwrap();
        assert_eq!(result.order().status, OrderStatus::Refunded);
    }

    #[tokio::test]
    async fn test_superseding_handle_voids_previous_attempt() {
        let f = fixture();
        let order = pending_order(&f).await;
        let retry = PaymentHandle::new(order.id, PaymentMethod::Card, "pi_2", "requires_action");
        f.manager.attach_handle(&retry).await.unwrap();

        assert_eq!(f.gateway.voids.load(Ordering::SeqCst), 1);
        let active = f.manager.active_handle(&order).await.unwrap().unwrap();
        assert_eq!(active.external_ref, "pi_2");
    }

    #[tokio::test]
    async fn test_expire_stale_only_touches_provisional_orders() {
        let f = fixture();
        let stale = pending_order(&f).await;
        let paid = paid_order(&f).await;

        let expired = f
            .manager
            .expire_stale(chrono::Duration::zero())
            .await
            .unwrap();
        let ids: Vec<Uuid> = expired.iter().map(|o| o.id).collect();
        assert!(ids.contains(&stale.id));
        assert!(!ids.contains(&paid.id));
        assert_eq!(
            f.manager.find(stale.id).await.unwrap().failure_reason.as_deref(),
            Some(EXPIRED_REASON)
        );

        let again = f.manager.expire_stale(chrono::Duration::zero()).await.unwrap();
        assert!(again.is_empty());
    }

    #[tokio::test]
    async fn test_aged_holds_are_reported_not_expired() {
        let f = fixture();
        let order = pending_order(&f).await;
        f.manager
            .mark_on_hold(order.id, "awaiting bank transfer")
            .await
            .unwrap();

        let aged = f.manager.aged_holds(chrono::Duration::zero()).await.unwrap();
        assert_eq!(aged.iter().map(|o| o.id).collect::<Vec<_>>(), vec![order.id]);
        assert!(f
            .manager
            .aged_holds(chrono::Duration::hours(1))
            .await
            .unwrap()
            .is_empty());

        f.manager.expire_stale(chrono::Duration::zero()).await.unwrap();
        assert_eq!(f.manager.find(order.id).await.unwrap().status, OrderStatus::OnHold);
    }
}
