use thiserror::Error;
use uuid::Uuid;

use crate::checkout::session::SessionError;
use crate::database::error::DatabaseError;
use crate::orders::model::OrderStatus;
use crate::payments::error::GatewayError;

pub type LifecycleResult<T> = Result<T, LifecycleError>;

/// Errors raised by the order lifecycle manager.
///
/// Re-finalizing an already paid order is not an error: it resolves to
/// `Transition::Unchanged`.
#[derive(Debug, Error)]
pub enum LifecycleError {
    #[error("order {0} not found")]
    NotFound(Uuid),

    #[error("order {order_id} cannot move from {from} to {to}")]
    InvalidTransition {
        order_id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    },

    #[error("validation failed: {0}")]
    Validation(String),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error("storage error: {0}")]
    Storage(#[from] DatabaseError),

    #[error("checkout session error: {0}")]
    Session(#[from] SessionError),
}

impl LifecycleError {
    pub fn validation(message: impl Into<String>) -> Self {
        LifecycleError::Validation(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            LifecycleError::Gateway(e) => e.is_retryable(),
            LifecycleError::Storage(e) => e.is_retryable(),
            _ => false,
        }
    }
}
