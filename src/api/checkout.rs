//! Checkout endpoints called by the storefront.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use crate::api::extract::{ProtectedSession, SessionId};
use crate::api::AppState;
use crate::checkout::{CheckoutState, PaymentStep};
use crate::error::AppError;
use crate::orders::OrderStatus;
use crate::payments::types::{CheckoutData, ClientResult, PaymentMethod};

fn parse_method(raw: &str) -> Result<PaymentMethod, AppError> {
    raw.parse::<PaymentMethod>().map_err(AppError::BadRequest)
}

/// GET /checkout/token
pub async fn issue_token(
    State(state): State<AppState>,
    SessionId(session_id): SessionId,
) -> Json<serde_json::Value> {
    Json(json!({ "token": state.csrf.issue(&session_id) }))
}

#[derive(Debug, Serialize)]
pub struct PreparedOrder {
    pub temp_order_id: Uuid,
    pub order_number: i64,
    /// Minor units
    pub total: i64,
    pub total_display: String,
    pub currency: String,
    pub status: OrderStatus,
    pub available_methods: Vec<PaymentMethod>,
}

/// POST /checkout/prepare
pub async fn prepare(
    State(state): State<AppState>,
    ProtectedSession(session_id): ProtectedSession,
    Json(form): Json<CheckoutState>,
) -> Result<(StatusCode, Json<PreparedOrder>), AppError> {
    let order = state.checkout.prepare(&session_id, form).await?;
    Ok((
        StatusCode::CREATED,
        Json(PreparedOrder {
            temp_order_id: order.id,
            order_number: order.number,
            total: order.total.minor(),
            total_display: order.total.to_decimal_string(&order.currency),
            currency: order.currency,
            status: order.status,
            available_methods: state.checkout.available_methods(),
        }),
    ))
}

#[derive(Debug, Deserialize)]
pub struct InitiatePaymentRequest {
    pub method: String,
    pub temp_order_id: Uuid,
    #[serde(flatten)]
    pub data: CheckoutData,
}

/// POST /checkout/payment
pub async fn initiate_payment(
    State(state): State<AppState>,
    ProtectedSession(session_id): ProtectedSession,
    Json(request): Json<InitiatePaymentRequest>,
) -> Result<Json<PaymentStep>, AppError> {
    let method = parse_method(&request.method)?;
    let step = state
        .checkout
        .initiate_payment(&session_id, method, request.temp_order_id, request.data)
        .await?;
    Ok(Json(step))
}

#[derive(Debug, Deserialize)]
pub struct ConfirmRequest {
    #[serde(default)]
    pub payment_reference: Option<String>,
    pub order_reference: Uuid,
    #[serde(default)]
    pub client_result: ClientResult,
}

/// POST /checkout/confirm
pub async fn confirm(
    State(state): State<AppState>,
    ProtectedSession(session_id): ProtectedSession,
    Json(request): Json<ConfirmRequest>,
) -> Result<Json<PaymentStep>, AppError> {
    let order = state
        .checkout
        .order_for_session(request.order_reference, &session_id)
        .await?;
    let step = state
        .checkout
        .confirm(
            order.id,
            request.payment_reference.as_deref(),
            &request.client_result,
        )
        .await?;
    Ok(Json(step))
}

#[derive(Debug, Deserialize)]
pub struct FinalizeRequest {
    pub temp_order_id: Uuid,
    pub payment_ref: String,
    pub method: String,
}

/// POST /checkout/finalize
pub async fn finalize(
    State(state): State<AppState>,
    ProtectedSession(session_id): ProtectedSession,
    Json(request): Json<FinalizeRequest>,
) -> Result<Response, AppError> {
    let method = parse_method(&request.method)?;
    let step = state
        .checkout
        .finalize(&session_id, request.temp_order_id, &request.payment_ref, method)
        .await?;

    let response = match step {
        PaymentStep::Completed {
            order_id,
            order_status,
            redirect_url,
        } => (
            StatusCode::OK,
            Json(json!({
                "order_id": order_id,
                "status": order_status,
                "redirect_url": redirect_url,
            })),
        ),
        PaymentStep::Failed {
            order_id,
            reason,
            redirect_url,
        } => (
            StatusCode::PAYMENT_REQUIRED,
            Json(json!({
                "order_id": order_id,
                "status": OrderStatus::Failed,
                "error": reason,
                "redirect_url": redirect_url,
            })),
        ),
        step @ PaymentStep::Continue { .. } => (
            StatusCode::UNPROCESSABLE_ENTITY,
            Json(json!({
                "error": "payment is not complete",
                "next": step,
            })),
        ),
    };
    Ok(response.into_response())
}

/// Query parameters providers append to the return URL.
#[derive(Debug, Deserialize)]
pub struct ReturnQuery {
    pub order: Uuid,
    #[serde(default)]
    pub reference: Option<String>,
    /// Wallet order id
    #[serde(default)]
    pub token: Option<String>,
    /// Card intent id after a 3-D Secure redirect
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default, rename = "PayerID")]
    pub payer_id: Option<String>,
}

/// GET /checkout/return/:method
pub async fn payment_return(
    State(state): State<AppState>,
    Path(method): Path<String>,
    Query(query): Query<ReturnQuery>,
) -> Result<Redirect, AppError> {
    let method = parse_method(&method)?;
    let reference = query
        .reference
        .or(query.payment_intent)
        .or(query.token);
    let client = ClientResult {
        payment_method: None,
        payer_id: query.payer_id,
    };

    let url = state
        .checkout
        .handle_return(method, query.order, reference.as_deref(), &client)
        .await;
    Ok(Redirect::to(&url))
}
