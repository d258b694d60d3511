//! Order domain events
//!
//! The lifecycle manager calls the bus synchronously after a transition has
//! been committed. Notification and fulfilment code subscribes here instead
//! of being invoked by name.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::orders::model::Order;
use crate::payments::money::Money;

/// Subscriber to order lifecycle events. All hooks default to no-ops.
#[async_trait]
#[allow(unused_variables)]
pub trait OrderObserver: Send + Sync {
    fn name(&self) -> &'static str;

    /// Fired exactly once per order, on the winning `paid` transition.
    async fn on_order_finalized(&self, order: &Order) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_order_on_hold(&self, order: &Order) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_order_failed(&self, order: &Order) -> anyhow::Result<()> {
        Ok(())
    }

    async fn on_order_refunded(&self, order: &Order, amount: Money) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Observer that only logs. Registered by default.
pub struct LoggingObserver;

#[async_trait]
impl OrderObserver for LoggingObserver {
    fn name(&self) -> &'static str {
        "logging"
    }

    async fn on_order_finalized(&self, order: &Order) -> anyhow::Result<()> {
        info!(
            order_id = %order.id,
            number = order.number,
            payment_ref = ?order.payment_ref,
            "Order finalized"
        );
        Ok(())
    }

    async fn on_order_on_hold(&self, order: &Order) -> anyhow::Result<()> {
        info!(
            order_id = %order.id,
            reason = ?order.hold_reason,
            "Order on hold"
        );
        Ok(())
    }

    async fn on_order_failed(&self, order: &Order) -> anyhow::Result<()> {
        info!(
            order_id = %order.id,
            reason = ?order.failure_reason,
            "Order failed"
        );
        Ok(())
    }

    async fn on_order_refunded(&self, order: &Order, amount: Money) -> anyhow::Result<()> {
        info!(
            order_id = %order.id,
            %amount,
            status = %order.status,
            remaining = %order.remaining(),
            "Order refunded"
        );
        Ok(())
    }
}

#[derive(Clone, Default)]
pub struct OrderEventBus {
    observers: Vec<Arc<dyn OrderObserver>>,
}

impl OrderEventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_observer(mut self, observer: Arc<dyn OrderObserver>) -> Self {
        self.observers.push(observer);
        self
    }

    pub fn len(&self) -> usize {
        self.observers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observers.is_empty()
    }

    pub async fn order_finalized(&self, order: &Order) {
        for observer in &self.observers {
            if let Err(e) = observer.on_order_finalized(order).await {
                warn!(observer = observer.name(), order_id = %order.id, "on_order_finalized failed: {:#}", e);
            }
        }
    }

    pub async fn order_on_hold(&self, order: &Order) {
        for observer in &self.observers {
            if let Err(e) = observer.on_order_on_hold(order).await {
                warn!(observer = observer.name(), order_id = %order.id, "on_order_on_hold failed: {:#}", e);
            }
        }
    }

    pub async fn order_failed(&self, order: &Order) {
        for observer in &self.observers {
            if let Err(e) = observer.on_order_failed(order).await {
                warn!(observer = observer.name(), order_id = %order.id, "on_order_failed failed: {:#}", e);
            }
        }
    }

    pub async fn order_refunded(&self, order: &Order, amount: Money) {
        for observer in &self.observers {
            if let Err(e) = observer.on_order_refunded(order, amount).await {
                warn!(observer = observer.name(), order_id = %order.id, "on_order_refunded failed: {:#}", e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orders::model::{Address, NewOrder};
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use uuid::Uuid;

    struct Failing;

    #[async_trait]
    impl OrderObserver for Failing {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn on_order_finalized(&self, _order: &Order) -> anyhow::Result<()> {
            anyhow::bail!("mail server down")
        }
    }

    #[derive(Default)]
    struct Counting(AtomicUsize);

    #[async_trait]
    impl OrderObserver for Counting {
        fn name(&self) -> &'static str {
            "counting"
        }

        async fn on_order_finalized(&self, _order: &Order) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn order() -> Order {
        NewOrder {
            session_id: "sess".to_string(),
            lines: vec![],
            shipping_total: Money::ZERO,
            discount: Money::ZERO,
            total: Money::from_minor(100),
            currency: "EUR".to_string(),
            shipping_address: Address::default(),
            billing_address: Address::default(),
            coupon_code: None,
            payment_method: None,
        }
        .into_order(Uuid::new_v4(), 1001, Utc::now())
    }

    #[tokio::test]
    async fn test_failing_observer_does_not_stop_fan_out() {
        let counting = Arc::new(Counting::default());
        let bus = OrderEventBus::new()
            .with_observer(Arc::new(Failing))
            .with_observer(counting.clone());

        bus.order_finalized(&order()).await;
        assert_eq!(counting.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_default_hooks_are_no_ops() {
        let bus = OrderEventBus::new().with_observer(Arc::new(Failing));
        bus.order_failed(&order()).await;
        bus.order_refunded(&order(), Money::from_minor(1)).await;
        assert_eq!(bus.len(), 1);
    }
}
