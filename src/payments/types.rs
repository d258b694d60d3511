//! Payment gateway types and data structures
//!
//! Common types shared by every gateway adapter. Provider-specific request and
//! response shapes stay private to the adapter modules.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::payments::money::Money;

/// Provider family an order is paid through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    /// Card-network processor with strong customer authentication
    Card,
    /// Redirect-based wallet (authorize off-site, capture on return)
    Wallet,
    /// Direct-debit mandate, settled out of band
    DirectDebit,
    /// Manual bank transfer, confirmed by a human or a batch import
    BankTransfer,
}

impl PaymentMethod {
    pub const ALL: [PaymentMethod; 4] = [
        PaymentMethod::Card,
        PaymentMethod::Wallet,
        PaymentMethod::DirectDebit,
        PaymentMethod::BankTransfer,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentMethod::Card => "card",
            PaymentMethod::Wallet => "wallet",
            PaymentMethod::DirectDebit => "direct_debit",
            PaymentMethod::BankTransfer => "bank_transfer",
        }
    }
}

impl fmt::Display for PaymentMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "card" => Ok(PaymentMethod::Card),
            "wallet" => Ok(PaymentMethod::Wallet),
            "direct_debit" => Ok(PaymentMethod::DirectDebit),
            "bank_transfer" => Ok(PaymentMethod::BankTransfer),
            other => Err(format!("unknown payment method '{}'", other)),
        }
    }
}

/// Provider plus the provider's id for the money movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentRef {
    pub provider: PaymentMethod,
    pub external_id: String,
}

impl PaymentRef {
    pub fn new(provider: PaymentMethod, external_id: impl Into<String>) -> Self {
        Self {
            provider,
            external_id: external_id.into(),
        }
    }
}

/// What the browser must do next to complete a payment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Continuation {
    /// Send the customer to a provider page (wallet approval, 3-D Secure challenge)
    Redirect { url: String },
    /// Complete the challenge in an embedded provider widget
    ClientSecret { client_secret: String },
    /// Show transfer instructions
    TransferInstructions {
        reference: String,
        account_holder: String,
        iban: String,
        amount: String,
        currency: String,
    },
    /// No client-side step; the gateway settles synchronously
    #[default]
    None,
}

impl Continuation {
    pub fn requires_client(&self) -> bool {
        matches!(
            self,
            Continuation::Redirect { .. } | Continuation::ClientSecret { .. }
        )
    }
}

/// Active attempt to pay an order through one gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentHandle {
    pub order_id: Uuid,
    pub provider: PaymentMethod,
    /// Payment-intent id, wallet order id, mandate reference or transfer reference
    pub external_ref: String,
    /// Opaque provider status at the time the handle was written
    pub provider_status: String,
    pub created_at: DateTime<Utc>,
    /// Client step returned by `initiate`; never persisted
    #[serde(skip)]
    pub continuation: Continuation,
}

impl PaymentHandle {
    pub fn new(
        order_id: Uuid,
        provider: PaymentMethod,
        external_ref: impl Into<String>,
        provider_status: impl Into<String>,
    ) -> Self {
        Self {
            order_id,
            provider,
            external_ref: external_ref.into(),
            provider_status: provider_status.into(),
            created_at: Utc::now(),
            continuation: Continuation::None,
        }
    }

    pub fn with_continuation(mut self, continuation: Continuation) -> Self {
        self.continuation = continuation;
        self
    }

    pub fn payment_ref(&self) -> PaymentRef {
        PaymentRef::new(self.provider, self.external_ref.clone())
    }
}

/// Customer-entered payment details submitted with `initiatePayment`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CheckoutData {
    /// Where the provider sends the browser back after an off-site step
    #[serde(default)]
    pub return_url: Option<String>,
    #[serde(default)]
    pub cancel_url: Option<String>,
    /// Tokenized card from the provider's client library
    #[serde(default)]
    pub payment_method_token: Option<String>,
    #[serde(default)]
    pub direct_debit: Option<DirectDebitDetails>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectDebitDetails {
    pub account_reference: String,
    pub holder_name: String,
}

/// What the browser reports back after a client-side step. Never trusted on its
/// own; adapters re-read provider state server-side.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ClientResult {
    #[serde(default)]
    pub payment_method: Option<String>,
    #[serde(default)]
    pub payer_id: Option<String>,
}

/// Result of `confirm`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PaymentOutcome {
    /// Funds captured; `transaction_id` becomes the order's payment reference
    Succeeded { transaction_id: String },
    /// Customer must complete a challenge before confirming again
    RequiresAction { continuation: Continuation },
    /// Accepted but not settled: authorized-not-captured, mandate issued, transfer awaited
    Pending { reason: String },
    Failed { reason: String },
}

/// Provider acknowledgement of a reversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub amount: Money,
    pub status: String,
}

/// Direct-debit mandate lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MandateStatus {
    Pending,
    Completed,
    Refunded,
    Failed,
}

impl MandateStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MandateStatus::Pending => "pending",
            MandateStatus::Completed => "completed",
            MandateStatus::Refunded => "refunded",
            MandateStatus::Failed => "failed",
        }
    }
}

impl FromStr for MandateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MandateStatus::Pending),
            "completed" => Ok(MandateStatus::Completed),
            "refunded" => Ok(MandateStatus::Refunded),
            "failed" => Ok(MandateStatus::Failed),
            other => Err(format!("unknown mandate status '{}'", other)),
        }
    }
}

/// Direct-debit mandate issued for an order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MandateRecord {
    pub order_id: Uuid,
    pub mandate_reference: String,
    /// Account reference with everything but the last four characters masked
    pub masked_account: String,
    pub holder_name: String,
    pub status: MandateStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payment_method_round_trips_through_str() {
        for method in PaymentMethod::ALL {
            assert_eq!(method.as_str().parse::<PaymentMethod>(), Ok(method));
        }
        assert_eq!("Bank-Transfer".parse::<PaymentMethod>(), Ok(PaymentMethod::BankTransfer));
        assert!("crypto".parse::<PaymentMethod>().is_err());
    }

    #[test]
    fn test_continuation_serializes_with_kind_tag() {
        let value = serde_json::to_value(Continuation::Redirect {
            url: "https://wallet.test/approve".to_string(),
        })
        .unwrap();
        assert_eq!(value["kind"], "redirect");
        assert_eq!(value["url"], "https://wallet.test/approve");
        assert!(!Continuation::None.requires_client());
    }
}
