//! In-memory repositories for tests and for running without Postgres.
//!
//! All state sits behind one `RwLock`, so each compare-and-set runs under a
//! single write guard and is as atomic as the conditional UPDATEs in the
//! Postgres implementation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::database::error::DbResult;
use crate::database::repository::{
    AttachResult, MandateRepository, OrderRepository, RefundApplication, RefundReservation,
};
use crate::orders::model::{NewOrder, Order, OrderStatus, StatusChange};
use crate::payments::money::Money;
use crate::payments::types::{
    MandateRecord, MandateStatus, PaymentHandle, PaymentMethod, PaymentRef,
};

/// First order number handed out, matching the Postgres identity column
pub const FIRST_ORDER_NUMBER: i64 = 1001;

#[derive(Default)]
struct OrderState {
    orders: HashMap<Uuid, Order>,
    handles: HashMap<(Uuid, PaymentMethod), PaymentHandle>,
    issued: i64,
}

#[derive(Default, Clone)]
pub struct InMemoryOrderRepository {
    state: Arc<RwLock<OrderState>>,
}

impl InMemoryOrderRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl OrderRepository for InMemoryOrderRepository {
    async fn insert(&self, order: NewOrder) -> DbResult<Order> {
        let mut state = self.state.write().await;
        let number = FIRST_ORDER_NUMBER + state.issued;
        state.issued += 1;

        let order = order.into_order(Uuid::new_v4(), number, Utc::now());
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Order>> {
        let state = self.state.read().await;
        Ok(state.orders.get(&id).cloned())
    }

    async fn find_by_payment_ref(&self, payment_ref: &PaymentRef) -> DbResult<Option<Order>> {
        let state = self.state.read().await;

        let by_order = state.orders.values().find(|order| {
            order.payment_ref.as_ref() == Some(payment_ref)
        });
        if let Some(order) = by_order {
            return Ok(Some(order.clone()));
        }

        Ok(state
            .handles
            .values()
            .find(|h| h.provider == payment_ref.provider && h.external_ref == payment_ref.external_id)
            .and_then(|h| state.orders.get(&h.order_id))
            .cloned())
    }

    async fn transition(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        change: &StatusChange,
    ) -> DbResult<Option<Order>> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(None);
        };
        if !from.contains(&order.status) {
            return Ok(None);
        }

        order.apply(change, Utc::now());
        Ok(Some(order.clone()))
    }

    async fn reserve_refund(&self, id: Uuid, amount: Money) -> DbResult<RefundReservation> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(RefundReservation::NotFound);
        };
        if !order.status.is_refundable() {
            return Ok(RefundReservation::NotRefundable(order.clone()));
        }
        let claimed = order
            .refunded
            .checked_add(order.refund_pending)
            .and_then(|c| c.checked_add(amount));
        match claimed {
            Some(claimed) if claimed <= order.total => {}
            _ => return Ok(RefundReservation::ExceedsBalance(order.clone())),
        }

        order.refund_pending = order.refund_pending.checked_add(amount).unwrap_or(order.total);
        order.updated_at = Utc::now();
        Ok(RefundReservation::Reserved(order.clone()))
    }

    async fn release_refund(&self, id: Uuid, amount: Money) -> DbResult<()> {
        let mut state = self.state.write().await;
        if let Some(order) = state.orders.get_mut(&id) {
            release_claim(order, amount);
        }
        Ok(())
    }

    async fn apply_refund(
        &self,
        id: Uuid,
        refund_id: &str,
        amount: Money,
        reserved: Money,
    ) -> DbResult<RefundApplication> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&id) else {
            return Ok(RefundApplication::NotFound);
        };
        release_claim(order, reserved);

        if order.has_refund(refund_id) {
            return Ok(RefundApplication::Duplicate(order.clone()));
        }
        if !order.status.is_refundable() {
            return Ok(RefundApplication::NotRefundable(order.clone()));
        }
        let refunded = match order.refunded.checked_add(amount) {
            Some(total) if total <= order.total => total,
            _ => return Ok(RefundApplication::ExceedsBalance(order.clone())),
        };

        order.refunded = refunded;
        order.refund_ids.push(refund_id.to_string());
        order.status = if refunded == order.total {
            OrderStatus::Refunded
        } else {
            OrderStatus::PartiallyRefunded
        };
        order.updated_at = Utc::now();
        Ok(RefundApplication::Applied(order.clone()))
    }

    async fn attach_handle(&self, handle: &PaymentHandle) -> DbResult<AttachResult> {
        let mut state = self.state.write().await;
        let Some(order) = state.orders.get_mut(&handle.order_id) else {
            return Ok(AttachResult::NotFound);
        };
        if !OrderStatus::PendingPayment.allowed_sources().contains(&order.status) {
            return Ok(AttachResult::NotAttachable(order.clone()));
        }

        order.status = OrderStatus::PendingPayment;
        order.payment_method = Some(handle.provider);
        order.updated_at = Utc::now();
        let order = order.clone();

        let superseded = state
            .handles
            .insert((handle.order_id, handle.provider), handle.clone());
        Ok(AttachResult::Attached { order, superseded })
    }

    async fn find_handle(
        &self,
        order_id: Uuid,
        provider: PaymentMethod,
    ) -> DbResult<Option<PaymentHandle>> {
        let state = self.state.read().await;
        Ok(state.handles.get(&(order_id, provider)).cloned())
    }

    async fn find_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Order>> {
        let state = self.state.read().await;
        let mut stale: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status.is_provisional() && o.updated_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by_key(|o| o.number);
        Ok(stale)
    }

    async fn find_aged_holds(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Order>> {
        let state = self.state.read().await;
        let mut held: Vec<Order> = state
            .orders
            .values()
            .filter(|o| o.status == OrderStatus::OnHold && o.updated_at < cutoff)
            .cloned()
            .collect();
        held.sort_by_key(|o| o.number);
        Ok(held)
    }
}

fn release_claim(order: &mut Order, amount: Money) {
    order.refund_pending = order
        .refund_pending
        .checked_sub(amount)
        .filter(|pending| !pending.is_negative())
        .unwrap_or(Money::ZERO);
}

#[derive(Default, Clone)]
pub struct InMemoryMandateRepository {
    mandates: Arc<RwLock<HashMap<Uuid, MandateRecord>>>,
}

impl InMemoryMandateRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl MandateRepository for InMemoryMandateRepository {
    async fn upsert(&self, record: &MandateRecord) -> DbResult<MandateRecord> {
        let mut mandates = self.mandates.write().await;
        mandates.insert(record.order_id, record.clone());
        Ok(record.clone())
    }

    async fn find_by_reference(&self, mandate_reference: &str) -> DbResult<Option<MandateRecord>> {
        let mandates = self.mandates.read().await;
        Ok(mandates
            .values()
            .find(|m| m.mandate_reference == mandate_reference)
            .cloned())
    }

    async fn update_status(
        &self,
        mandate_reference: &str,
        status: MandateStatus,
    ) -> DbResult<Option<MandateRecord>> {
        let mut mandates = self.mandates.write().await;
        Ok(mandates
            .values_mut()
            .find(|m| m.mandate_reference == mandate_reference)
            .map(|m| {
                m.status = status;
                m.updated_at = Utc::now();
                m.clone()
            }))
    }
}
