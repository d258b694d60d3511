//! Back-office operations, guarded by the admin bearer token.

use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::extract::AdminAuth;
use crate::api::AppState;
use crate::error::AppError;
use crate::orders::{OrderStatus, Transition};
use crate::payments::money::Money;

#[derive(Debug, Serialize)]
pub struct AdminOrderResponse {
    pub order_id: Uuid,
    pub status: OrderStatus,
    pub total: i64,
    pub refunded: i64,
    pub currency: String,
    /// False when the order already reflected the request
    pub changed: bool,
}

impl AdminOrderResponse {
    fn from_transition(transition: Transition) -> Self {
        let changed = transition.is_applied();
        let order = transition.into_order();
        Self {
            order_id: order.id,
            status: order.status,
            total: order.total.minor(),
            refunded: order.refunded.minor(),
            currency: order.currency,
            changed,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct RefundRequest {
    /// Minor units; the remaining balance when omitted
    #[serde(default)]
    pub amount: Option<i64>,
}

/// POST /admin/orders/:id/refund
pub async fn refund_order(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    request: Option<Json<RefundRequest>>,
) -> Result<Json<AdminOrderResponse>, AppError> {
    let Json(request) = request.unwrap_or_default();
    let amount = request.amount.map(Money::from_minor);
    let transition = state.lifecycle.refund(order_id, amount).await?;
    Ok(Json(AdminOrderResponse::from_transition(transition)))
}

#[derive(Debug, Deserialize)]
pub struct CancelRequest {
    pub reason: String,
}

/// POST /admin/orders/:id/cancel
pub async fn cancel_order(
    _auth: AdminAuth,
    State(state): State<AppState>,
    Path(order_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> Result<Json<AdminOrderResponse>, AppError> {
    let reason = request.reason.trim();
    if reason.is_empty() {
        return Err(AppError::BadRequest("cancellation reason is required".into()));
    }
    let transition = state.lifecycle.cancel(order_id, reason).await?;
    Ok(Json(AdminOrderResponse::from_transition(transition)))
}

#[derive(Debug, Default, Deserialize)]
pub struct ExpireRequest {
    #[serde(default)]
    pub older_than_secs: Option<i64>,
    #[serde(default)]
    pub hold_older_than_secs: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct ExpireResponse {
    pub expired: Vec<Uuid>,
    /// Held past the alert window; left untouched
    pub aged_holds: Vec<Uuid>,
}

/// POST /admin/orders/expire
pub async fn expire_orders(
    _auth: AdminAuth,
    State(state): State<AppState>,
    request: Option<Json<ExpireRequest>>,
) -> Result<Json<ExpireResponse>, AppError> {
    let Json(request) = request.unwrap_or_default();
    let older_than = age_or("older_than_secs", request.older_than_secs, state.pending_order_ttl)?;
    let hold_older_than = age_or(
        "hold_older_than_secs",
        request.hold_older_than_secs,
        state.hold_alert_after,
    )?;

    let expired = state.lifecycle.expire_stale(older_than).await?;
    tracing::info!(count = expired.len(), "Expired stale pending orders");
    let aged_holds = state.lifecycle.aged_holds(hold_older_than).await?;
    Ok(Json(ExpireResponse {
        expired: expired.iter().map(|o| o.id).collect(),
        aged_holds: aged_holds.iter().map(|o| o.id).collect(),
    }))
}

fn age_or(
    field: &str,
    secs: Option<i64>,
    default: chrono::Duration,
) -> Result<chrono::Duration, AppError> {
    match secs {
        Some(secs) if secs < 0 => Err(AppError::BadRequest(format!(
            "{} must not be negative",
            field
        ))),
        Some(secs) => Ok(chrono::Duration::seconds(secs)),
        None => Ok(default),
    }
}
