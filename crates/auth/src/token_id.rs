//! Random token identifiers.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use rand::rngs::OsRng;
use uuid::Uuid;

const REFRESH_TOKEN_BYTES: usize = 32;

/// A fresh JWT id: uuid v4 (122 random bits) in simple hex form, URL-safe.
pub fn new_jti() -> String {
    Uuid::new_v4().simple().to_string()
}

/// A fresh opaque refresh token: 256 random bits, base64url without padding.
pub fn new_refresh_token() -> String {
    let mut bytes = [0u8; REFRESH_TOKEN_BYTES];
    OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn jti_is_url_safe_and_unique() {
        let ids: HashSet<String> = (0..1000).map(|_| new_jti()).collect();
        assert_eq!(ids.len(), 1000);
        assert!(ids.iter().all(|id| id.len() == 32 && id.chars().all(|c| c.is_ascii_hexdigit())));
    }

    #[test]
    fn refresh_token_shape() {
        let token = new_refresh_token();
        assert_eq!(token.len(), 43);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
        assert_ne!(token, new_refresh_token());
    }
}
