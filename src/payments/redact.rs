//! Redaction of credentials and card/account fields before anything is logged.

use serde_json::Value;

const REDACTED: &str = "[REDACTED]";

/// Keys whose values never reach a log sink. Matched case-insensitively.
const SENSITIVE_KEYS: &[&str] = &[
    "access_token",
    "refresh_token",
    "token",
    "client_secret",
    "secret",
    "password",
    "authorization",
    "card",
    "number",
    "cvc",
    "cvv",
    "exp_month",
    "exp_year",
    "iban",
    "bic",
    "account_number",
    "account_reference",
    "holder_name",
    "payment_method_token",
];

fn is_sensitive_key(key: &str) -> bool {
    let key = key.to_ascii_lowercase();
    SENSITIVE_KEYS.contains(&key.as_str())
}

/// Copy of `value` with every sensitive field replaced, at any depth.
pub fn redact_json(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| {
                    if is_sensitive_key(key) {
                        (key.clone(), Value::String(REDACTED.to_string()))
                    } else {
                        (key.clone(), redact_json(v))
                    }
                })
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(redact_json).collect()),
        other => other.clone(),
    }
}

/// Header pairs safe to log: auth, signature and secret headers are masked.
pub fn redact_headers<'a, I>(headers: I) -> Vec<(String, String)>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .map(|(name, value)| {
            let lowered = name.to_ascii_lowercase();
            let masked = lowered == "authorization"
                || lowered.contains("signature")
                || lowered.contains("secret")
                || lowered.ends_with("-sig")
                || lowered == "cookie";
            if masked {
                (name.to_string(), REDACTED.to_string())
            } else {
                (name.to_string(), value.to_string())
            }
        })
        .collect()
}

/// Loggable rendering of a raw response body.
pub fn redact_body(raw: &str) -> String {
    match serde_json::from_str::<Value>(raw) {
        Ok(value) => redact_json(&value).to_string(),
        Err(_) => format!("[unparsed body: {} bytes]", raw.len()),
    }
}

/// Mask all but the last four characters, e.g. an IBAN for display.
pub fn mask_account(reference: &str) -> String {
    let compact: Vec<char> = reference.chars().filter(|c| !c.is_whitespace()).collect();
    let visible = compact.len().min(4);
    let hidden = compact.len() - visible;
    let mut masked = "*".repeat(hidden);
    masked.extend(&compact[hidden..]);
    masked
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_nested_card_and_account_fields_are_redacted() {
        let body = json!({
            "amount": 4999,
            "card": {"number": "4242424242424242", "cvc": "123"},
            "mandate": {"iban": "DE89370400440532013000", "holder_name": "Ada"},
            "items": [{"sku": "A-1", "client_secret": "pi_secret"}]
        });

        let redacted = redact_json(&body);
        assert_eq!(redacted["amount"], 4999);
        assert_eq!(redacted["card"], "[REDACTED]");
        assert_eq!(redacted["mandate"]["iban"], "[REDACTED]");
        assert_eq!(redacted["mandate"]["holder_name"], "[REDACTED]");
        assert_eq!(redacted["items"][0]["sku"], "A-1");
        assert_eq!(redacted["items"][0]["client_secret"], "[REDACTED]");
    }

    #[test]
    fn test_auth_and_signature_headers_are_masked() {
        let headers = redact_headers(vec![
            ("Authorization", "Bearer sk_live_abc"),
            ("Card-Signature", "t=1,v1=ff"),
            ("wallet-transmission-sig", "abc"),
            ("Content-Type", "application/json"),
        ]);
        assert_eq!(headers[0].1, "[REDACTED]");
        assert_eq!(headers[1].1, "[REDACTED]");
        assert_eq!(headers[2].1, "[REDACTED]");
        assert_eq!(headers[3].1, "application/json");
    }

    #[test]
    fn test_unparsed_body_is_not_echoed() {
        assert_eq!(redact_body("secret=abc"), "[unparsed body: 10 bytes]");
    }

    #[test]
    fn test_mask_account_keeps_last_four() {
        assert_eq!(mask_account("DE89 3704 0044 0532 0130 00"), "******************3000");
        assert_eq!(mask_account("123"), "123");
    }
}
