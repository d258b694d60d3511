//! Checkout payment backend.
//!
//! Drives a checkout through one of several payment gateways and converges the
//! synchronous confirmation, the provider webhook and the browser redirect onto a
//! single order state machine.

pub mod api;
#[cfg(feature = "cache")]
pub mod cache;
pub mod checkout;
pub mod config;
pub mod database;
pub mod error;
pub mod orders;
pub mod payments;
pub mod webhooks;
