//! In-progress checkout form state
//!
//! Written by the form layer on every field change; the core only reads it,
//! once, when it materializes an order.

use serde::{Deserialize, Serialize};

use crate::orders::error::{LifecycleError, LifecycleResult};
use crate::orders::model::{Address, LineItem, NewOrder};
use crate::payments::money::{is_valid_currency, Money};
use crate::payments::types::PaymentMethod;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutState {
    #[serde(default)]
    pub lines: Vec<LineItem>,
    #[serde(default)]
    pub currency: String,
    #[serde(default)]
    pub shipping_total: Money,
    /// Coupon discount as resolved by the form layer
    #[serde(default)]
    pub discount: Money,
    #[serde(default)]
    pub shipping_address: Option<Address>,
    #[serde(default)]
    pub billing_address: Option<Address>,
    /// Use `billing_address` instead of the shipping address for billing
    #[serde(default)]
    pub billing_enabled: bool,
    #[serde(default)]
    pub payment_method: Option<PaymentMethod>,
    #[serde(default)]
    pub coupon_code: Option<String>,
    /// Unresolved form validation errors
    #[serde(default)]
    pub errors: Vec<String>,
}

impl CheckoutState {
    pub fn billing_snapshot(&self) -> Option<&Address> {
        if self.billing_enabled {
            self.billing_address.as_ref()
        } else {
            self.shipping_address.as_ref()
        }
    }

    pub fn subtotal(&self) -> Option<Money> {
        self.lines
            .iter()
            .try_fold(Money::ZERO, |acc, line| acc.checked_add(line.line_total()?))
    }

    /// Price and copy the state into a new order.
    ///
    /// The returned value owns its data; later edits to the session do not
    /// reach the order.
    pub fn snapshot(&self, session_id: &str) -> LifecycleResult<NewOrder> {
        if let Some(first) = self.errors.first() {
            return Err(LifecycleError::validation(format!(
                "checkout has unresolved errors: {}",
                first
            )));
        }
        if self.lines.is_empty() {
            return Err(LifecycleError::validation("cart is empty"));
        }
        for line in &self.lines {
            if line.quantity == 0 {
                return Err(LifecycleError::validation(format!(
                    "quantity for '{}' must be positive",
                    line.sku
                )));
            }
            if line.unit_price.is_negative() {
                return Err(LifecycleError::validation(format!(
                    "price for '{}' is negative",
                    line.sku
                )));
            }
        }
        let currency = self.currency.trim().to_ascii_uppercase();
        if !is_valid_currency(&currency) {
            return Err(LifecycleError::validation(format!(
                "'{}' is not an ISO 4217 currency code",
                self.currency
            )));
        }
        if self.shipping_total.is_negative() || self.discount.is_negative() {
            return Err(LifecycleError::validation(
                "shipping and discount must not be negative",
            ));
        }

        let subtotal = self
            .subtotal()
            .ok_or_else(|| LifecycleError::validation("order total out of range"))?;
        if self.discount > subtotal {
            return Err(LifecycleError::validation(
                "discount exceeds the cart subtotal",
            ));
        }
        let total = subtotal
            .checked_add(self.shipping_total)
            .and_then(|t| t.checked_sub(self.discount))
            .ok_or_else(|| LifecycleError::validation("order total out of range"))?;

        let shipping_address = self
            .shipping_address
            .clone()
            .ok_or_else(|| LifecycleError::validation("shipping address is required"))?;
        validate_address("shipping", &shipping_address)?;
        let billing_address = self
            .billing_snapshot()
            .cloned()
            .ok_or_else(|| LifecycleError::validation("billing address is required"))?;
        validate_address("billing", &billing_address)?;

        Ok(NewOrder {
            session_id: session_id.to_string(),
            lines: self.lines.clone(),
            shipping_total: self.shipping_total,
            discount: self.discount,
            total,
            currency,
            shipping_address,
            billing_address,
            coupon_code: self
                .coupon_code
                .as_deref()
                .map(str::trim)
                .filter(|c| !c.is_empty())
                .map(str::to_string),
            payment_method: self.payment_method,
        })
    }
}

fn validate_address(kind: &str, address: &Address) -> LifecycleResult<()> {
    let missing = [
        ("name", &address.name),
        ("line1", &address.line1),
        ("city", &address.city),
        ("country", &address.country),
    ]
    .into_iter()
    .find(|(_, value)| value.trim().is_empty());

    if let Some((field, _)) = missing {
        return Err(LifecycleError::validation(format!(
            "{} address is missing {}",
            kind, field
        )));
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn address(name: &str) -> Address {
        Address {
            name: name.to_string(),
            line1: "Hauptstrasse 1".to_string(),
            line2: None,
            city: "Berlin".to_string(),
            postal_code: "10115".to_string(),
            country: "DE".to_string(),
            email: Some("buyer@example.com".to_string()),
        }
    }

    pub(crate) fn state() -> CheckoutState {
        CheckoutState {
            lines: vec![
                LineItem {
                    sku: "MUG".to_string(),
                    name: "Mug".to_string(),
                    quantity: 2,
                    unit_price: Money::from_minor(1500),
                },
                LineItem {
                    sku: "TEA".to_string(),
                    name: "Tea".to_string(),
                    quantity: 1,
                    unit_price: Money::from_minor(1499),
                },
            ],
            currency: "eur".to_string(),
            shipping_total: Money::from_minor(1000),
            discount: Money::from_minor(500),
            shipping_address: Some(address("Ada Buyer")),
            payment_method: Some(PaymentMethod::Card),
            ..CheckoutState::default()
        }
    }

    #[test]
    fn test_snapshot_prices_in_minor_units() {
        let order = state().snapshot("sess-1").unwrap();
        assert_eq!(order.total, Money::from_minor(4999));
        assert_eq!(order.currency, "EUR");
        assert_eq!(order.billing_address, address("Ada Buyer"));
    }

    #[test]
    fn test_distinct_billing_only_when_enabled() {
        let mut s = state();
        s.billing_address = Some(address("Accounts Payable"));
        assert_eq!(s.snapshot("x").unwrap().billing_address.name, "Ada Buyer");

        s.billing_enabled = true;
        assert_eq!(
            s.snapshot("x").unwrap().billing_address.name,
            "Accounts Payable"
        );
    }

    #[test]
    fn test_snapshot_rejects_bad_carts() {
        let mut empty = state();
        empty.lines.clear();
        assert!(matches!(empty.snapshot("x"), Err(LifecycleError::Validation(_))));

        let mut zero_qty = state();
        zero_qty.lines[0].quantity = 0;
        assert!(zero_qty.snapshot("x").is_err());

        let mut big_discount = state();
        big_discount.discount = Money::from_minor(10_000);
        assert!(big_discount.snapshot("x").is_err());

        let mut bad_currency = state();
        bad_currency.currency = "EURO".to_string();
        assert!(bad_currency.snapshot("x").is_err());

        let mut pending_errors = state();
        pending_errors.errors.push("postal code invalid".to_string());
        assert!(pending_errors.snapshot("x").is_err());

        let mut no_city = state();
        if let Some(a) = no_city.shipping_address.as_mut() {
            a.city.clear();
        }
        assert!(no_city.snapshot("x").is_err());
    }

    #[test]
    fn test_snapshot_is_detached_from_state() {
        let mut s = state();
        let order = s.snapshot("x").unwrap();
        s.lines[0].quantity = 10;
        assert_eq!(order.lines[0].quantity, 2);
    }
}
