//! Per-session anti-forgery tokens.
//!
//! The token is `base64url(HMAC-SHA256(secret, session_id))`, unpadded. It is
//! stateless: any instance holding the secret can check it.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

#[derive(Clone)]
pub struct CsrfGuard {
    secret: Vec<u8>,
}

impl CsrfGuard {
    pub fn new(secret: impl AsRef<[u8]>) -> Self {
        Self {
            secret: secret.as_ref().to_vec(),
        }
    }

    fn mac(&self, session_id: &str) -> HmacSha256 {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .unwrap_or_else(|_| unreachable!("HMAC accepts keys of any length"));
        mac.update(session_id.as_bytes());
        mac
    }

    pub fn issue(&self, session_id: &str) -> String {
        URL_SAFE_NO_PAD.encode(self.mac(session_id).finalize().into_bytes())
    }

    /// Constant-time comparison against the expected token.
    pub fn verify(&self, session_id: &str, token: &str) -> bool {
        if session_id.is_empty() {
            return false;
        }
        let Ok(provided) = URL_SAFE_NO_PAD.decode(token.trim()) else {
            return false;
        };
        self.mac(session_id).verify_slice(&provided).is_ok()
    }
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("CsrfGuard([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_token_is_bound_to_session() {
        let guard = CsrfGuard::new("0123456789abcdef0123456789abcdef");
        let token = guard.issue("sess-1");

        assert!(guard.verify("sess-1", &token));
        assert!(!guard.verify("sess-2", &token));
        assert!(!guard.verify("sess-1", "not-a-token"));
        assert!(!guard.verify("", &token));
        assert!(!token.contains('='));
    }

    #[test]
    fn test_token_depends_on_secret() {
        let a = CsrfGuard::new("secret-a-secret-a-secret-a-secret-a");
        let b = CsrfGuard::new("secret-b-secret-b-secret-b-secret-b");
        assert!(!b.verify("sess-1", &a.issue("sess-1")));
    }
}
