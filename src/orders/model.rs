//! Order snapshot and status state machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::payments::money::Money;
use crate::payments::types::{PaymentMethod, PaymentRef};

/// Hold reasons starting with this need an operator; the checkout never
/// settles such an order on its own.
pub const REVIEW_HOLD_PREFIX: &str = "review: ";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Created,
    PendingPayment,
    Paid,
    OnHold,
    Failed,
    Refunded,
    PartiallyRefunded,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Created => "created",
            OrderStatus::PendingPayment => "pending_payment",
            OrderStatus::Paid => "paid",
            OrderStatus::OnHold => "on_hold",
            OrderStatus::Failed => "failed",
            OrderStatus::Refunded => "refunded",
            OrderStatus::PartiallyRefunded => "partially_refunded",
        }
    }

    /// States a transition into `self` may start from.
    ///
    /// Self-loops are listed where repeating the transition is meaningful
    /// (re-attaching a handle, a further partial refund).
    pub fn allowed_sources(&self) -> &'static [OrderStatus] {
        use OrderStatus::*;
        match self {
            Created => &[],
            PendingPayment => &[Created, PendingPayment],
            Paid => &[PendingPayment, OnHold],
            OnHold => &[PendingPayment],
            Failed => &[Created, PendingPayment, OnHold],
            Refunded => &[Paid, PartiallyRefunded],
            PartiallyRefunded => &[Paid, PartiallyRefunded],
        }
    }

    pub fn can_transition_to(&self, next: OrderStatus) -> bool {
        next.allowed_sources().contains(self)
    }

    /// No transition leaves these states.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OrderStatus::Failed | OrderStatus::Refunded
        )
    }

    /// Funds have been captured, or the order is committed awaiting settlement.
    pub fn is_committed(&self) -> bool {
        matches!(
            self,
            OrderStatus::Paid
                | OrderStatus::OnHold
                | OrderStatus::Refunded
                | OrderStatus::PartiallyRefunded
        )
    }

    /// Still waiting for the customer to pay.
    pub fn is_provisional(&self) -> bool {
        matches!(self, OrderStatus::Created | OrderStatus::PendingPayment)
    }

    pub fn is_refundable(&self) -> bool {
        matches!(self, OrderStatus::Paid | OrderStatus::PartiallyRefunded)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created" => Ok(OrderStatus::Created),
            "pending_payment" => Ok(OrderStatus::PendingPayment),
            "paid" => Ok(OrderStatus::Paid),
            "on_hold" => Ok(OrderStatus::OnHold),
            "failed" => Ok(OrderStatus::Failed),
            "refunded" => Ok(OrderStatus::Refunded),
            "partially_refunded" => Ok(OrderStatus::PartiallyRefunded),
            other => Err(format!("unknown order status '{}'", other)),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Address {
    pub name: String,
    pub line1: String,
    #[serde(default)]
    pub line2: Option<String>,
    pub city: String,
    pub postal_code: String,
    /// ISO 3166-1 alpha-2
    pub country: String,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    pub sku: String,
    pub name: String,
    pub quantity: u32,
    pub unit_price: Money,
}

impl LineItem {
    pub fn line_total(&self) -> Option<Money> {
        self.unit_price.checked_mul(self.quantity)
    }
}

/// Immutable order snapshot. Changes go through the repository, never by
/// mutating a loaded copy and saving it back.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    /// Sequential human-readable number used in references
    pub number: i64,
    pub session_id: String,
    pub lines: Vec<LineItem>,
    pub shipping_total: Money,
    pub discount: Money,
    pub total: Money,
    pub currency: String,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub coupon_code: Option<String>,
    pub payment_method: Option<PaymentMethod>,
    pub status: OrderStatus,
    pub payment_ref: Option<PaymentRef>,
    /// Provisional until the order is paid or put on hold
    pub is_temp: bool,
    pub refunded: Money,
    /// Claimed by refunds whose provider call has not returned yet
    #[serde(default)]
    pub refund_pending: Money,
    pub refund_ids: Vec<String>,
    pub failure_reason: Option<String>,
    pub hold_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub paid_at: Option<DateTime<Utc>>,
}

impl Order {
    /// Amount still refundable.
    pub fn remaining(&self) -> Money {
        self.total
            .checked_sub(self.refunded)
            .unwrap_or(Money::ZERO)
    }

    /// Amount a new refund may still claim.
    pub fn refundable_balance(&self) -> Money {
        self.remaining()
            .checked_sub(self.refund_pending)
            .filter(|balance| !balance.is_negative())
            .unwrap_or(Money::ZERO)
    }

    /// On hold for a discrepancy rather than for settlement.
    pub fn needs_review(&self) -> bool {
        self.status == OrderStatus::OnHold
            && self
                .hold_reason
                .as_deref()
                .is_some_and(|r| r.starts_with(REVIEW_HOLD_PREFIX))
    }

    pub fn has_refund(&self, refund_id: &str) -> bool {
        self.refund_ids.iter().any(|id| id == refund_id)
    }

    /// Apply a status change in place. Callers check `allowed_sources` first;
    /// the Postgres repository mirrors this in its conditional UPDATE.
    pub fn apply(&mut self, change: &StatusChange, now: DateTime<Utc>) {
        self.status = change.to;
        if let Some(payment_ref) = &change.payment_ref {
            self.payment_method = Some(payment_ref.provider);
            self.payment_ref = Some(payment_ref.clone());
        }
        match change.to {
            OrderStatus::Failed => self.failure_reason = change.reason.clone(),
            OrderStatus::OnHold => self.hold_reason = change.reason.clone(),
            OrderStatus::Paid if self.paid_at.is_none() => self.paid_at = Some(now),
            _ => {}
        }
        self.is_temp = self.is_temp && change.to.is_provisional();
        self.updated_at = now;
    }
}

/// Requested move to a new status, applied atomically by the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusChange {
    pub to: OrderStatus,
    pub payment_ref: Option<PaymentRef>,
    /// Failure or hold reason
    pub reason: Option<String>,
}

impl StatusChange {
    pub fn to(status: OrderStatus) -> Self {
        Self {
            to: status,
            payment_ref: None,
            reason: None,
        }
    }

    pub fn with_payment_ref(mut self, payment_ref: PaymentRef) -> Self {
        self.payment_ref = Some(payment_ref);
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

/// Fields a new order is inserted with; id, number and timestamps are assigned
/// by the repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    pub session_id: String,
    pub lines: Vec<LineItem>,
    pub shipping_total: Money,
    pub discount: Money,
    pub total: Money,
    pub currency: String,
    pub shipping_address: Address,
    pub billing_address: Address,
    pub coupon_code: Option<String>,
    pub payment_method: Option<PaymentMethod>,
}

impl NewOrder {
    pub fn into_order(self, id: Uuid, number: i64, now: DateTime<Utc>) -> Order {
        Order {
            id,
            number,
            session_id: self.session_id,
            lines: self.lines,
            shipping_total: self.shipping_total,
            discount: self.discount,
            total: self.total,
            currency: self.currency,
            shipping_address: self.shipping_address,
            billing_address: self.billing_address,
            coupon_code: self.coupon_code,
            payment_method: self.payment_method,
            status: OrderStatus::Created,
            payment_ref: None,
            is_temp: true,
            refunded: Money::ZERO,
            refund_pending: Money::ZERO,
            refund_ids: Vec::new(),
            failure_reason: None,
            hold_reason: None,
            created_at: now,
            updated_at: now,
            paid_at: None,
        }
    }
}
