//! Versioned cache key builders
//!
//! Bump `VERSION` when a cached value's shape changes so old entries are
//! ignored rather than failing to deserialize.

pub const VERSION: &str = "v1";

pub mod checkout {
    use super::VERSION;

    /// Checkout form state for one browser session
    pub fn session(session_id: &str) -> String {
        format!("{}:checkout:session:{}", VERSION, session_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_key_is_versioned() {
        assert_eq!(checkout::session("abc"), "v1:checkout:session:abc");
    }
}
