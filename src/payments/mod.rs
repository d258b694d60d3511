//! Payment gateway integration
//!
//! A shared outbound API client plus one adapter per payment method behind the
//! `GatewayAdapter` contract. Provider request and response shapes never leave
//! the adapter modules.

pub mod client;
pub mod error;
pub mod money;
pub mod providers;
pub mod redact;
pub mod registry;
pub mod token;
pub mod traits;
pub mod types;

pub use client::{ApiClient, ApiClientConfig, ApiError, ProviderAuth, ProviderEndpoint};
pub use error::GatewayError;
pub use money::Money;
pub use registry::GatewayRegistry;
pub use traits::GatewayAdapter;
pub use types::{PaymentHandle, PaymentMethod, PaymentOutcome, PaymentRef};
