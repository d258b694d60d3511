//! HMAC-SHA256 webhook signatures.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tracing::warn;

use crate::webhooks::error::WebhookError;

type HmacSha256 = Hmac<Sha256>;

/// Events older than this are rejected as replays.
pub const MAX_TIMESTAMP_AGE_SECS: i64 = 300;

/// Allowed clock skew for timestamps in the future.
pub const MAX_FUTURE_TOLERANCE_SECS: i64 = 60;

/// Hex-encoded HMAC-SHA256 of `message`.
pub fn sign_hex(secret: &str, message: &[u8]) -> String {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
    mac.update(message);
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time check of a hex signature.
pub fn verify_hex(secret: &str, message: &[u8], signature: &str) -> bool {
    let Ok(provided) = hex::decode(signature.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(message);
    mac.verify_slice(&provided).is_ok()
}

/// Parsed `t=<unix>,v1=<hex>[,v1=<hex>]` header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimestampedSignature {
    pub timestamp: i64,
    pub signatures: Vec<String>,
}

impl TimestampedSignature {
    pub fn parse(header: &str) -> Result<Self, WebhookError> {
        let mut timestamp = None;
        let mut signatures = Vec::new();

        for part in header.split(',') {
            let Some((key, value)) = part.trim().split_once('=') else {
                continue;
            };
            match key {
                "t" => {
                    timestamp = Some(value.parse::<i64>().map_err(|_| {
                        WebhookError::signature("signature timestamp is not a number")
                    })?)
                }
                "v1" => signatures.push(value.to_string()),
                _ => {}
            }
        }

        let timestamp =
            timestamp.ok_or_else(|| WebhookError::signature("signature header has no timestamp"))?;
        if signatures.is_empty() {
            return Err(WebhookError::signature("signature header has no v1 signature"));
        }

        Ok(Self {
            timestamp,
            signatures,
        })
    }

    /// Verify against `"{t}.{payload}"` and the replay window around `now`.
    pub fn verify(&self, secret: &str, payload: &[u8], now: i64) -> Result<(), WebhookError> {
        let age = now - self.timestamp;
        if age > MAX_TIMESTAMP_AGE_SECS {
            warn!(age_secs = age, "Webhook timestamp too old");
            return Err(WebhookError::signature(format!(
                "event too old ({} seconds)",
                age
            )));
        }
        if age < -MAX_FUTURE_TOLERANCE_SECS {
            warn!(age_secs = age, "Webhook timestamp in the future");
            return Err(WebhookError::signature("event timestamp in the future"));
        }

        let mut signed = format!("{}.", self.timestamp).into_bytes();
        signed.extend_from_slice(payload);

        if self
            .signatures
            .iter()
            .any(|candidate| verify_hex(secret, &signed, candidate))
        {
            Ok(())
        } else {
            Err(WebhookError::signature("signature mismatch"))
        }
    }
}
