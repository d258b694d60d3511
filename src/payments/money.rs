//! Exact money arithmetic in currency minor units.
//!
//! Every amount inside the service is an `i64` count of minor units (cents for EUR,
//! yen for JPY). Provider payloads that carry decimal strings ("49.99") are converted
//! with `rust_decimal` using the currency's exponent, never through floating point.

use regex::Regex;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::OnceLock;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum MoneyError {
    #[error("'{0}' is not a decimal amount")]
    Unparseable(String),
    #[error("'{value}' has more decimals than {currency} allows")]
    TooPrecise { value: String, currency: String },
    #[error("amount '{0}' is out of range")]
    OutOfRange(String),
}

/// Amount in minor units of the order currency.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct Money(i64);

impl Money {
    pub const ZERO: Money = Money(0);

    pub const fn from_minor(minor: i64) -> Self {
        Self(minor)
    }

    pub const fn minor(self) -> i64 {
        self.0
    }

    pub fn is_zero(self) -> bool {
        self.0 == 0
    }

    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    pub fn is_negative(self) -> bool {
        self.0 < 0
    }

    pub fn checked_add(self, other: Money) -> Option<Money> {
        self.0.checked_add(other.0).map(Money)
    }

    pub fn checked_sub(self, other: Money) -> Option<Money> {
        self.0.checked_sub(other.0).map(Money)
    }

    pub fn checked_mul(self, quantity: u32) -> Option<Money> {
        self.0.checked_mul(i64::from(quantity)).map(Money)
    }

    /// Decimal rendering for provider payloads, e.g. `4999` EUR -> `"49.99"`.
    pub fn to_decimal(self, currency: &str) -> Decimal {
        Decimal::new(self.0, minor_unit_exponent(currency))
    }

    pub fn to_decimal_string(self, currency: &str) -> String {
        self.to_decimal(currency).to_string()
    }

    /// Parse a provider decimal string into minor units of `currency`.
    ///
    /// Rejects values with more fractional digits than the currency has, so
    /// `"10.005"` EUR is an error rather than a silently rounded amount.
    pub fn parse_decimal(value: &str, currency: &str) -> Result<Money, MoneyError> {
        let decimal = Decimal::from_str(value.trim())
            .map_err(|_| MoneyError::Unparseable(value.to_string()))?;
        let scale = Decimal::from(10_i64.pow(minor_unit_exponent(currency)));
        let minor = decimal
            .checked_mul(scale)
            .ok_or_else(|| MoneyError::OutOfRange(value.to_string()))?;

        if !minor.fract().is_zero() {
            return Err(MoneyError::TooPrecise {
                value: value.to_string(),
                currency: currency.to_string(),
            });
        }

        minor
            .to_i64()
            .map(Money)
            .ok_or_else(|| MoneyError::OutOfRange(value.to_string()))
    }
}

impl fmt::Display for Money {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Number of decimals in the currency's minor unit (ISO 4217).
pub fn minor_unit_exponent(currency: &str) -> u32 {
    match currency.to_ascii_uppercase().as_str() {
        "BIF" | "CLP" | "DJF" | "GNF" | "ISK" | "JPY" | "KMF" | "KRW" | "PYG" | "RWF" | "UGX"
        | "VND" | "VUV" | "XAF" | "XOF" | "XPF" => 0,
        "BHD" | "IQD" | "JOD" | "KWD" | "LYD" | "OMR" | "TND" => 3,
        _ => 2,
    }
}

pub fn is_valid_currency(code: &str) -> bool {
    static CURRENCY: OnceLock<Regex> = OnceLock::new();
    CURRENCY
        .get_or_init(|| Regex::new(r"^[A-Z]{3}$").expect("static currency pattern"))
        .is_match(code)
}
