//! HTTP surface

pub mod admin;
pub mod checkout;
pub mod extract;
pub mod health;
pub mod webhooks;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use tower::ServiceBuilder;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::trace::TraceLayer;

use crate::checkout::{CheckoutService, CsrfGuard};
use crate::orders::OrderLifecycleManager;
use crate::webhooks::WebhookReconciler;

/// Shared handler state. Every component is built once in `main` and cloned
/// cheaply into handlers.
#[derive(Clone)]
pub struct AppState {
    pub checkout: CheckoutService,
    pub lifecycle: OrderLifecycleManager,
    pub reconciler: Arc<WebhookReconciler>,
    pub csrf: CsrfGuard,
    /// Admin endpoints are disabled when unset
    pub admin_token: Option<Arc<str>>,
    pub pending_order_ttl: chrono::Duration,
    /// Holds older than this are listed by the expiry sweep
    pub hold_alert_after: chrono::Duration,
    pub environment: String,
    pub db: Option<PgPool>,
}

pub fn create_router(state: AppState) -> Router {
    let checkout_routes = Router::new()
        .route("/checkout/token", get(checkout::issue_token))
        .route("/checkout/prepare", post(checkout::prepare))
        .route("/checkout/payment", post(checkout::initiate_payment))
        .route("/checkout/confirm", post(checkout::confirm))
        .route("/checkout/finalize", post(checkout::finalize))
        .route("/checkout/return/:method", get(checkout::payment_return));

    let webhook_routes = Router::new().route("/webhooks/:provider", post(webhooks::handle_webhook));

    let admin_routes = Router::new()
        .route("/admin/orders/expire", post(admin::expire_orders))
        .route("/admin/orders/:id/refund", post(admin::refund_order))
        .route("/admin/orders/:id/cancel", post(admin::cancel_order));

    Router::new()
        .route("/health", get(health::health_check))
        .merge(checkout_routes)
        .merge(webhook_routes)
        .merge(admin_routes)
        .layer(DefaultBodyLimit::max(1024 * 1024))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::x_request_id()),
        )
        .with_state(state)
}
