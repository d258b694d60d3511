//! Customer-facing checkout: session state, anti-forgery tokens and the
//! prepare / pay / confirm flow.

pub mod csrf;
pub mod service;
pub mod session;
pub mod state;

pub use csrf::CsrfGuard;
pub use service::{CheckoutService, CheckoutSettings, PaymentStep};
pub use session::{CheckoutSessionStore, InMemorySessionStore, SessionError};
pub use state::CheckoutState;
