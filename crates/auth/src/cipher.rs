//! Transport cipher for secrets submitted by clients.
//!
//! Clients encrypt the secret with a 32-byte key agreed out of band and send
//! `base64(nonce ‖ ciphertext ‖ tag)` using the standard alphabet.

use aes_gcm::aead::Aead;
use aes_gcm::{Aes256Gcm, KeyInit, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use rand::RngCore;
use rand::rngs::OsRng;
use thiserror::Error;

use windcms_core::DomainError;

pub const TRANSPORT_KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CipherError {
    #[error("transport key must be 32 bytes, got {0}")]
    InvalidKey(usize),

    #[error("invalid base64 payload")]
    Decode,

    #[error("payload too short")]
    Truncated,

    #[error("decryption failed")]
    Decrypt,

    #[error("decrypted payload is not utf-8")]
    Utf8,
}

impl From<CipherError> for DomainError {
    fn from(err: CipherError) -> Self {
        DomainError::bad_request(format!("invalid encrypted credential: {err}"))
    }
}

/// AES-256-GCM transport cipher.
#[derive(Clone)]
pub struct TransportCipher {
    cipher: Aes256Gcm,
}

impl core::fmt::Debug for TransportCipher {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str("TransportCipher(..)")
    }
}

impl TransportCipher {
    pub fn new(key: &[u8]) -> Result<Self, CipherError> {
        if key.len() != TRANSPORT_KEY_LEN {
            return Err(CipherError::InvalidKey(key.len()));
        }
        let cipher = Aes256Gcm::new_from_slice(key).map_err(|_| CipherError::InvalidKey(key.len()))?;
        Ok(Self { cipher })
    }

    pub fn decrypt(&self, encoded: &str) -> Result<String, CipherError> {
        let raw = BASE64.decode(encoded.trim().as_bytes()).map_err(|_| CipherError::Decode)?;
        if raw.len() <= NONCE_LEN {
            return Err(CipherError::Truncated);
        }
        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| CipherError::Decrypt)?;
        String::from_utf8(plaintext).map_err(|_| CipherError::Utf8)
    }

    /// Client-side counterpart, used by tooling and tests.
    pub fn encrypt(&self, plaintext: &str) -> Result<String, CipherError> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), plaintext.as_bytes())
            .map_err(|_| CipherError::Decrypt)?;
        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }
}

#[cfg(test)]
mod tests {
    use windcms_core::ErrorCode;

    use super::*;

    const KEY: &[u8; 32] = b"0123456789abcdef0123456789abcdef";

    #[test]
    fn encrypt_then_decrypt() {
        let cipher = TransportCipher::new(KEY).unwrap();
        let sealed = cipher.encrypt("pw").unwrap();
        assert_eq!(cipher.decrypt(&sealed).unwrap(), "pw");
    }

    #[test]
    fn wrong_key_fails_to_decrypt() {
        let a = TransportCipher::new(KEY).unwrap();
        let b = TransportCipher::new(b"ffffffffffffffffffffffffffffffff").unwrap();
        let sealed = a.encrypt("pw").unwrap();
        assert_eq!(b.decrypt(&sealed), Err(CipherError::Decrypt));
    }

    #[test]
    fn garbage_maps_to_bad_request() {
        let cipher = TransportCipher::new(KEY).unwrap();
        let err: DomainError = cipher.decrypt("%%%not-base64").unwrap_err().into();
        assert_eq!(err.code(), ErrorCode::BadRequest);
        assert_eq!(cipher.decrypt("AAAA"), Err(CipherError::Truncated));
    }

    #[test]
    fn key_length_is_enforced() {
        assert_eq!(TransportCipher::new(b"short").unwrap_err(), CipherError::InvalidKey(5));
    }
}
