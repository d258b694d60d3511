//! Asynchronous provider notifications
//!
//! Each gateway implements `WebhookSource` to authenticate and normalize its
//! events; the reconciler resolves the owning order and applies the event
//! through the order lifecycle manager.

pub mod error;
pub mod reconciler;
pub mod signature;
pub mod source;
pub mod types;

pub use error::WebhookError;
pub use reconciler::WebhookReconciler;
pub use source::WebhookSource;
pub use types::{EventKind, ProviderEvent, WebhookOutcome, WebhookRequest};
