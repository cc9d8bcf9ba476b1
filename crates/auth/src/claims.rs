use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use windcms_core::{TenantId, UserId};

use crate::ClientType;

/// What a caller asks to be embedded in a token.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenPayload {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub username: Option<String>,
    pub client_id: Option<String>,
    pub device_id: Option<String>,
    /// Role codes granted within the tenant context.
    pub roles: Vec<String>,
}

/// JWT claims as they appear on the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JwtClaims {
    /// Subject: the user id, rendered as a decimal string.
    #[serde(with = "subject")]
    pub sub: UserId,

    #[serde(default)]
    pub tenant_id: TenantId,

    pub jti: String,

    pub client_type: ClientType,

    /// Issued-at (unix seconds).
    pub iat: i64,

    /// Expiration (unix seconds).
    pub exp: i64,

    #[serde(default)]
    pub roles: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    #[serde(default, rename = "cid", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,

    #[serde(default, rename = "did", skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
}

impl JwtClaims {
    /// Build claims for a fresh token.
    pub fn issue(
        payload: &TokenPayload,
        client_type: ClientType,
        jti: impl Into<String>,
        now: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        Self {
            sub: payload.user_id,
            tenant_id: payload.tenant_id,
            jti: jti.into(),
            client_type,
            iat: now.timestamp(),
            exp: (now + ttl).timestamp(),
            roles: payload.roles.clone(),
            username: payload.username.clone(),
            client_id: payload.client_id.clone(),
            device_id: payload.device_id.clone(),
        }
    }

    pub fn payload(&self) -> TokenPayload {
        TokenPayload {
            user_id: self.sub,
            tenant_id: self.tenant_id,
            username: self.username.clone(),
            client_id: self.client_id.clone(),
            device_id: self.device_id.clone(),
            roles: self.roles.clone(),
        }
    }

    pub fn issued_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.iat, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        Utc.timestamp_opt(self.exp, 0).single().unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Lifetime left at `now`, clamped to zero.
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        let left = self.expires_at() - now;
        if left < Duration::zero() { Duration::zero() } else { left }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TokenValidationError {
    #[error("token has expired")]
    Expired,

    #[error("token not yet valid (iat is in the future)")]
    NotYetValid,

    #[error("invalid token time window (exp <= iat)")]
    InvalidTimeWindow,
}

/// Deterministically validate claim timestamps.
///
/// Signature verification happens in [`crate::jwt::JwtCodec`]; this only looks
/// at the time window, strictly (`exp > now`).
pub fn validate_claims(claims: &JwtClaims, now: DateTime<Utc>) -> Result<(), TokenValidationError> {
    if claims.exp <= claims.iat {
        return Err(TokenValidationError::InvalidTimeWindow);
    }
    let now = now.timestamp();
    if now < claims.iat {
        return Err(TokenValidationError::NotYetValid);
    }
    if now >= claims.exp {
        return Err(TokenValidationError::Expired);
    }
    Ok(())
}

mod subject {
    use serde::{Deserialize, Deserializer, Serializer};

    use windcms_core::UserId;

    pub fn serialize<S: Serializer>(id: &UserId, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&id.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<UserId, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<UserId>().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload() -> TokenPayload {
        TokenPayload {
            user_id: UserId::new(42),
            tenant_id: TenantId::new(1),
            username: Some("alice".into()),
            roles: vec!["admin".into()],
            ..Default::default()
        }
    }

    #[test]
    fn issue_sets_window_and_round_trips_payload() {
        let now = Utc::now();
        let claims = JwtClaims::issue(&payload(), ClientType::App, "j1", now, Duration::minutes(15));
        assert_eq!(claims.exp - claims.iat, 15 * 60);
        assert_eq!(claims.payload(), payload());
        assert!(validate_claims(&claims, now).is_ok());
    }

    #[test]
    fn expired_at_exact_exp() {
        let now = Utc::now();
        let claims = JwtClaims::issue(&payload(), ClientType::App, "j1", now, Duration::seconds(10));
        let at_exp = claims.expires_at();
        assert_eq!(validate_claims(&claims, at_exp), Err(TokenValidationError::Expired));
    }

    #[test]
    fn future_iat_is_rejected() {
        let now = Utc::now();
        let claims = JwtClaims::issue(&payload(), ClientType::App, "j1", now, Duration::minutes(1));
        let before = now - Duration::minutes(5);
        assert_eq!(validate_claims(&claims, before), Err(TokenValidationError::NotYetValid));
    }

    #[test]
    fn subject_is_a_string_on_the_wire() {
        let claims = JwtClaims::issue(&payload(), ClientType::Admin, "j1", Utc::now(), Duration::minutes(1));
        let json = serde_json::to_value(&claims).unwrap();
        assert_eq!(json["sub"], "42");
        assert_eq!(json["client_type"], "admin");
        let back: JwtClaims = serde_json::from_value(json).unwrap();
        assert_eq!(back, claims);
    }

    #[test]
    fn remaining_clamps_at_zero() {
        let now = Utc::now();
        let claims = JwtClaims::issue(&payload(), ClientType::App, "j1", now, Duration::seconds(5));
        assert_eq!(claims.remaining(now + Duration::minutes(1)), Duration::zero());
    }
}
