//! HS-family JWT signing/verification, one codec per audience.

use chrono::Duration;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use thiserror::Error;

use crate::{ClientType, JwtClaims};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum JwtError {
    #[error("unsupported signing method '{0}'")]
    UnsupportedAlgorithm(String),

    #[error("signing key is empty")]
    EmptyKey,

    #[error("failed to sign token: {0}")]
    Encode(String),

    #[error("token signature has expired")]
    Expired,

    #[error("invalid token: {0}")]
    Invalid(String),
}

/// Signs and verifies tokens for a single audience.
#[derive(Clone)]
pub struct JwtCodec {
    header: Header,
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
}

impl core::fmt::Debug for JwtCodec {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("JwtCodec")
            .field("algorithm", &self.header.alg)
            .finish_non_exhaustive()
    }
}

impl JwtCodec {
    /// Build a codec from a shared secret and a method name (`HS256`, `HS384`, `HS512`).
    pub fn hmac(secret: &[u8], method: &str, leeway_secs: u64) -> Result<Self, JwtError> {
        if secret.is_empty() {
            return Err(JwtError::EmptyKey);
        }
        let algorithm = parse_hmac_algorithm(method)?;

        let mut validation = Validation::new(algorithm);
        validation.leeway = leeway_secs;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp", "iat", "sub"]);

        Ok(Self {
            header: Header::new(algorithm),
            encoding: EncodingKey::from_secret(secret),
            decoding: DecodingKey::from_secret(secret),
            validation,
        })
    }

    pub fn sign(&self, claims: &JwtClaims) -> Result<String, JwtError> {
        jsonwebtoken::encode(&self.header, claims, &self.encoding)
            .map_err(|e| JwtError::Encode(e.to_string()))
    }

    /// Verify the signature and decode the claims.
    pub fn verify(&self, token: &str) -> Result<JwtClaims, JwtError> {
        jsonwebtoken::decode::<JwtClaims>(token, &self.decoding, &self.validation)
            .map(|data| data.claims)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => JwtError::Expired,
                _ => JwtError::Invalid(e.to_string()),
            })
    }
}

fn parse_hmac_algorithm(method: &str) -> Result<Algorithm, JwtError> {
    match method.to_ascii_uppercase().as_str() {
        "" | "HS256" => Ok(Algorithm::HS256),
        "HS384" => Ok(Algorithm::HS384),
        "HS512" => Ok(Algorithm::HS512),
        other => Err(JwtError::UnsupportedAlgorithm(other.to_string())),
    }
}

/// Codec plus lifetime profile for one audience.
#[derive(Debug, Clone)]
pub struct AudienceProfile {
    pub codec: JwtCodec,
    pub access_ttl: Duration,
    pub refresh_ttl: Duration,
}

/// The two independent audiences.
///
/// A token signed for one audience never verifies under the other because
/// each has its own secret.
#[derive(Debug, Clone)]
pub struct AudienceKeys {
    admin: AudienceProfile,
    app: AudienceProfile,
}

impl AudienceKeys {
    pub fn new(admin: AudienceProfile, app: AudienceProfile) -> Self {
        Self { admin, app }
    }

    pub fn profile(&self, client_type: ClientType) -> &AudienceProfile {
        match client_type {
            ClientType::Admin => &self.admin,
            ClientType::App => &self.app,
        }
    }

    pub fn access_ttl(&self, client_type: ClientType) -> Duration {
        self.profile(client_type).access_ttl
    }

    pub fn refresh_ttl(&self, client_type: ClientType) -> Duration {
        self.profile(client_type).refresh_ttl
    }
}
