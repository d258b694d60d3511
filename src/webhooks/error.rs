//! Webhook processing errors
//!
//! Only structural and authenticity failures are errors. Business-level provider
//! states the reconciler does not act on are acknowledged, not raised.

use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum WebhookError {
    #[error("invalid webhook signature: {0}")]
    InvalidSignature(String),

    /// No secret or webhook id configured for the provider
    #[error("webhook verification is not configured for {0}")]
    MissingSecret(String),

    #[error("malformed webhook payload: {0}")]
    Malformed(String),

    #[error("unknown webhook provider '{0}'")]
    UnknownProvider(String),

    /// Remote verification could not be completed; the provider will redeliver
    #[error("webhook verification unavailable: {0}")]
    VerificationUnavailable(String),

    #[error("storage error while applying webhook: {0}")]
    Storage(String),
}

impl WebhookError {
    pub fn signature(message: impl Into<String>) -> Self {
        WebhookError::InvalidSignature(message.into())
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        WebhookError::Malformed(message.into())
    }

    /// Stage name for logs.
    pub fn stage(&self) -> &'static str {
        match self {
            WebhookError::InvalidSignature(_)
            | WebhookError::MissingSecret(_)
            | WebhookError::VerificationUnavailable(_) => "signature_verification",
            WebhookError::Malformed(_) | WebhookError::UnknownProvider(_) => "received",
            WebhookError::Storage(_) => "applied",
        }
    }
}
