//! Gateway adapter trait definitions
//!
//! Defines the contract every payment method implements. Provider request and
//! response shapes stay inside the adapters; the order lifecycle only sees the
//! types below.

use async_trait::async_trait;

use crate::orders::model::Order;
use crate::payments::error::GatewayError;
use crate::payments::money::Money;
use crate::payments::types::{
    CheckoutData, ClientResult, PaymentHandle, PaymentMethod, PaymentOutcome, PaymentRef,
    RefundReceipt,
};

#[async_trait]
pub trait GatewayAdapter: Send + Sync {
    fn method(&self) -> PaymentMethod;

    /// Start a payment attempt for `order`.
    ///
    /// Returns the handle to attach to the order, with any client-side
    /// continuation (redirect, embedded challenge, transfer instructions).
    /// Validation errors are returned before any provider call.
    async fn initiate(
        &self,
        data: &CheckoutData,
        order: &Order,
    ) -> Result<PaymentHandle, GatewayError>;

    /// Re-read provider state for `handle` and report the outcome.
    ///
    /// `client` is what the browser reported; it is a hint for the next
    /// provider call, never proof of payment.
    async fn confirm(
        &self,
        handle: &PaymentHandle,
        client: &ClientResult,
    ) -> Result<PaymentOutcome, GatewayError>;

    /// Reverse `amount` of a captured payment.
    async fn refund(
        &self,
        payment_ref: &PaymentRef,
        amount: Money,
        currency: &str,
    ) -> Result<RefundReceipt, GatewayError>;

    /// Void an uncaptured attempt. Best effort; defaults to nothing to void.
    async fn cancel(&self, _handle: &PaymentHandle) -> Result<(), GatewayError> {
        Ok(())
    }
}
