use crate::database::error::DbResult;
use crate::orders::model::{NewOrder, Order, OrderStatus, StatusChange};
use crate::payments::money::Money;
use crate::payments::types::{MandateRecord, MandateStatus, PaymentHandle, PaymentMethod, PaymentRef};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

/// Result of an atomic refund application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundApplication {
    /// Refund recorded; the order is `refunded` or `partially_refunded`
    Applied(Order),
    /// The refund id was already recorded on the order
    Duplicate(Order),
    /// The order is not in a refundable state
    NotRefundable(Order),
    /// The amount is larger than the remaining balance
    ExceedsBalance(Order),
    NotFound,
}

/// Result of claiming part of an order's balance ahead of a provider refund
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefundReservation {
    /// Amount claimed; the order carries it in `refund_pending`
    Reserved(Order),
    NotRefundable(Order),
    /// Refunded plus already claimed plus this amount exceeds the total
    ExceedsBalance(Order),
    NotFound,
}

/// Result of attaching a payment handle to an order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttachResult {
    Attached {
        order: Order,
        /// Earlier handle for the same gateway, replaced by this one
        superseded: Option<PaymentHandle>,
    },
    /// The order is no longer awaiting payment
    NotAttachable(Order),
    NotFound,
}

/// Order persistence. Every status change is a compare-and-set on the current
/// status; implementations must never read, decide and write back separately.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a new order in `created`, assigning id and sequential number
    async fn insert(&self, order: NewOrder) -> DbResult<Order>;

    async fn find_by_id(&self, id: Uuid) -> DbResult<Option<Order>>;

    /// Find the order whose payment reference, or one of whose payment handles,
    /// matches `payment_ref`
    async fn find_by_payment_ref(&self, payment_ref: &PaymentRef) -> DbResult<Option<Order>>;

    /// Apply `change` if the order's status is one of `from`.
    ///
    /// Returns the updated order, or `None` when the order does not exist or
    /// its status did not match.
    async fn transition(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        change: &StatusChange,
    ) -> DbResult<Option<Order>>;

    /// Claim `amount` of the refundable balance before money is sent back.
    /// Concurrent claims can never add up to more than the order total.
    async fn reserve_refund(&self, id: Uuid, amount: Money) -> DbResult<RefundReservation>;

    /// Give back a claim whose provider refund did not happen
    async fn release_refund(&self, id: Uuid, amount: Money) -> DbResult<()>;

    /// Record a refund once per refund id, bounded by the remaining balance.
    /// `reserved` is the claim made for it, released whatever the outcome;
    /// refunds the provider reports on its own pass `Money::ZERO`.
    async fn apply_refund(
        &self,
        id: Uuid,
        refund_id: &str,
        amount: Money,
        reserved: Money,
    ) -> DbResult<RefundApplication>;

    /// Store `handle` as the active attempt for its gateway and move the order
    /// to `pending_payment`, atomically
    async fn attach_handle(&self, handle: &PaymentHandle) -> DbResult<AttachResult>;

    async fn find_handle(
        &self,
        order_id: Uuid,
        provider: PaymentMethod,
    ) -> DbResult<Option<PaymentHandle>>;

    /// Provisional orders last updated before `cutoff`
    async fn find_stale(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Order>>;

    /// Orders on hold since before `cutoff`
    async fn find_aged_holds(&self, cutoff: DateTime<Utc>) -> DbResult<Vec<Order>>;
}

/// Direct-debit mandate persistence, one mandate per order
#[async_trait]
pub trait MandateRepository: Send + Sync {
    /// Insert or replace the order's mandate
    async fn upsert(&self, record: &MandateRecord) -> DbResult<MandateRecord>;

    async fn find_by_reference(&self, mandate_reference: &str) -> DbResult<Option<MandateRecord>>;

    async fn update_status(
        &self,
        mandate_reference: &str,
        status: MandateStatus,
    ) -> DbResult<Option<MandateRecord>>;
}
