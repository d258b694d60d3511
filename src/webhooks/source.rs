//! Per-provider webhook verification and parsing.

use async_trait::async_trait;
use serde_json::Value;

use crate::payments::types::PaymentMethod;
use crate::webhooks::error::WebhookError;
use crate::webhooks::types::{ProviderEvent, WebhookRequest};

/// Implemented by each gateway that receives asynchronous events.
#[async_trait]
pub trait WebhookSource: Send + Sync {
    fn provider(&self) -> PaymentMethod;

    /// Whether a secret (or remote verification id) is configured.
    fn is_configured(&self) -> bool;

    /// Header carrying the claimed signature, for logging.
    fn signature_header(&self) -> &'static str;

    /// Authenticate the delivery. Only called when `is_configured` is true.
    async fn verify(&self, request: &WebhookRequest) -> Result<(), WebhookError>;

    /// Normalize the provider envelope. Unrecognized event types map to
    /// `EventKind::Unknown` rather than an error.
    fn parse(&self, payload: &Value) -> Result<ProviderEvent, WebhookError>;
}
