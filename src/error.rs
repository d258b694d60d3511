//! Application error returned by HTTP handlers.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use crate::checkout::session::SessionError;
use crate::orders::error::LifecycleError;
use crate::payments::error::GatewayError;
use crate::webhooks::error::WebhookError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Lifecycle(#[from] LifecycleError),

    #[error(transparent)]
    Webhook(#[from] WebhookError),

    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("{0}")]
    BadRequest(String),

    #[error("anti-forgery token missing or invalid")]
    Forbidden,

    #[error("unauthorized")]
    Unauthorized,

    #[error("{0}")]
    Internal(#[from] anyhow::Error),
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        AppError::Lifecycle(LifecycleError::Gateway(err))
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    retryable: bool,
}

impl AppError {
    fn classify(&self) -> (StatusCode, &'static str) {
        match self {
            AppError::Lifecycle(e) => match e {
                LifecycleError::NotFound(_) => (StatusCode::NOT_FOUND, "not_found"),
                LifecycleError::InvalidTransition { .. } => (StatusCode::CONFLICT, "invalid_transition"),
                LifecycleError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
                LifecycleError::Gateway(g) => match g {
                    GatewayError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "validation_error"),
                    GatewayError::NotConfigured(_) | GatewayError::Unsupported { .. } => {
                        (StatusCode::BAD_REQUEST, "payment_method_unavailable")
                    }
                    GatewayError::Provider { retryable: true, .. } => {
                        (StatusCode::SERVICE_UNAVAILABLE, "provider_unavailable")
                    }
                    GatewayError::Provider { .. } => (StatusCode::BAD_GATEWAY, "provider_rejected"),
                },
                LifecycleError::Storage(db) if db.is_constraint_violation() => {
                    (StatusCode::CONFLICT, "conflict")
                }
                LifecycleError::Storage(db) if db.is_retryable() => {
                    (StatusCode::SERVICE_UNAVAILABLE, "storage_unavailable")
                }
                LifecycleError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
                LifecycleError::Session(_) => (StatusCode::SERVICE_UNAVAILABLE, "session_unavailable"),
            },
            AppError::Webhook(e) => match e {
                WebhookError::InvalidSignature(_) => (StatusCode::BAD_REQUEST, "invalid_signature"),
                WebhookError::MissingSecret(_) => (StatusCode::BAD_REQUEST, "webhook_not_configured"),
                WebhookError::Malformed(_) => (StatusCode::BAD_REQUEST, "malformed_payload"),
                WebhookError::UnknownProvider(_) => (StatusCode::NOT_FOUND, "unknown_provider"),
                WebhookError::VerificationUnavailable(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "verification_unavailable")
                }
                WebhookError::Storage(_) => (StatusCode::INTERNAL_SERVER_ERROR, "storage_error"),
            },
            AppError::Session(_) => (StatusCode::SERVICE_UNAVAILABLE, "session_unavailable"),
            AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "bad_request"),
            AppError::Forbidden => (StatusCode::FORBIDDEN, "forbidden"),
            AppError::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error"),
        }
    }

    pub fn status(&self) -> StatusCode {
        self.classify().0
    }

    fn is_retryable(&self) -> bool {
        match self {
            AppError::Lifecycle(e) => e.is_retryable(),
            AppError::Webhook(WebhookError::VerificationUnavailable(_)) => true,
            AppError::Session(_) => true,
            _ => false,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = self.classify();
        let message = if status.is_server_error() && status != StatusCode::BAD_GATEWAY {
            "Internal server error".to_string()
        } else {
            self.to_string()
        };

        if status.is_server_error() {
            tracing::error!(%status, error = %self, "Request failed");
        } else {
            tracing::warn!(%status, error = %self, "Request rejected");
        }

        let body = ErrorBody {
            error: message,
            code,
            retryable: self.is_retryable(),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::payments::types::PaymentMethod;
    use uuid::Uuid;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::from(LifecycleError::NotFound(Uuid::nil())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::from(LifecycleError::validation("bad")).status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            AppError::from(WebhookError::signature("mismatch")).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            AppError::from(WebhookError::MissingSecret("card".into())).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(AppError::Forbidden.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            AppError::from(GatewayError::provider("card", "timeout", true)).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::from(GatewayError::provider("card", "card_declined: declined", false)).status(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::from(GatewayError::NotConfigured(PaymentMethod::Wallet)).status(),
            StatusCode::BAD_REQUEST
        );
    }
}
