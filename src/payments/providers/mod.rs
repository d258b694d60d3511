//! Gateway adapter implementations
//!
//! One adapter per payment method. Each also implements `WebhookSource` for the
//! asynchronous events of its provider.

pub mod bank_transfer;
pub mod card;
pub mod direct_debit;
pub mod wallet;

pub use bank_transfer::{BankTransferConfig, BankTransferGateway};
pub use card::{CardConfig, CardGateway};
pub use direct_debit::{AccountValidator, DirectDebitConfig, DirectDebitGateway, ShapeValidator};
pub use wallet::{WalletConfig, WalletGateway};
