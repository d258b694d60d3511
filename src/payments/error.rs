//! Gateway adapter errors

use thiserror::Error;

use crate::payments::client::ApiError;
use crate::payments::types::PaymentMethod;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    /// Malformed input; reported before any provider call or state change
    #[error("validation failed: {0}")]
    Validation(String),

    #[error("{provider} error: {message}")]
    Provider {
        provider: String,
        message: String,
        retryable: bool,
    },

    #[error("payment method '{0}' is not configured")]
    NotConfigured(PaymentMethod),

    #[error("{method} does not support {operation}")]
    Unsupported {
        method: PaymentMethod,
        operation: &'static str,
    },
}

impl GatewayError {
    pub fn validation(message: impl Into<String>) -> Self {
        GatewayError::Validation(message.into())
    }

    pub fn provider(provider: impl Into<String>, message: impl Into<String>, retryable: bool) -> Self {
        GatewayError::Provider {
            provider: provider.into(),
            message: message.into(),
            retryable,
        }
    }

    /// Whether the customer may retry with the same order.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GatewayError::Provider { retryable: true, .. })
    }
}

impl From<ApiError> for GatewayError {
    fn from(err: ApiError) -> Self {
        let retryable = err.is_retryable();
        match err {
            ApiError::Transport { provider, message } => GatewayError::Provider {
                provider,
                message,
                retryable,
            },
            ApiError::Provider {
                provider,
                code,
                message,
                ..
            } => GatewayError::Provider {
                provider,
                message: format!("{}: {}", code, message),
                retryable,
            },
            ApiError::Auth { provider, message } => GatewayError::Provider {
                provider,
                message: format!("authentication failed: {}", message),
                retryable,
            },
            ApiError::UnknownProvider(provider) => GatewayError::Provider {
                message: format!("provider '{}' is not registered", provider),
                provider,
                retryable,
            },
            ApiError::InvalidResponse { provider, message } => GatewayError::Provider {
                provider,
                message: format!("invalid response: {}", message),
                retryable,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_transport_failures_are_retryable() {
        let transport: GatewayError = ApiError::Transport {
            provider: "card".to_string(),
            message: "timed out".to_string(),
        }
        .into();
        assert!(transport.is_retryable());

        let declined: GatewayError = ApiError::Provider {
            provider: "card".to_string(),
            status: 402,
            code: "card_declined".to_string(),
            message: "declined".to_string(),
        }
        .into();
        assert!(!declined.is_retryable());
        assert_eq!(declined.to_string(), "card error: card_declined: declined");

        assert!(!GatewayError::validation("missing holder name").is_retryable());
    }
}
