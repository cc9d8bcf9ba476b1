use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use windcms_auth::{ClientType, TokenCategory, TokenPayload, User};
use windcms_core::{DomainError, TenantId, UserId};
use windcms_infra::{AuthenticateRequest, Authenticated};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub client_type: ClientType,
    pub user_id: UserId,
    pub refresh_token: String,
    #[serde(default)]
    pub client_id: Option<String>,
    #[serde(default)]
    pub device_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub client_type: ClientType,
    pub token_category: TokenCategory,
    pub token: String,
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub skip_cache: bool,
    #[serde(default)]
    pub skip_blacklist: bool,
}

impl From<ValidateRequest> for AuthenticateRequest {
    fn from(r: ValidateRequest) -> Self {
        AuthenticateRequest {
            client_type: r.client_type,
            category: r.token_category,
            token: r.token,
            user_id: r.user_id,
            skip_cache: r.skip_cache,
            skip_blacklist: r.skip_blacklist,
        }
    }
}

/// One session (jti) or, without `jti`, every session of the user.
/// Without `client_type` both audiences are affected.
#[derive(Debug, Deserialize)]
pub struct RevokeRequest {
    #[serde(default)]
    pub client_type: Option<ClientType>,
    pub user_id: UserId,
    #[serde(default)]
    pub jti: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UnblockRequest {
    #[serde(default)]
    pub client_type: Option<ClientType>,
    pub user_id: UserId,
    pub jti: String,
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub is_valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<TokenPayload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl ValidateResponse {
    pub fn valid(auth: Authenticated) -> Self {
        Self {
            is_valid: auth.is_valid,
            jti: Some(auth.jti),
            payload: Some(auth.payload),
            expires_at: auth.expires_at,
            error: None,
            message: None,
        }
    }

    pub fn invalid(err: &DomainError) -> Self {
        Self {
            is_valid: false,
            jti: None,
            payload: None,
            expires_at: None,
            error: Some(err.code().as_str()),
            message: Some(err.message().to_string()),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct UserSummary {
    pub id: UserId,
    pub tenant_id: TenantId,
    pub username: String,
}

impl From<User> for UserSummary {
    fn from(u: User) -> Self {
        Self {
            id: u.id,
            tenant_id: u.tenant_id,
            username: u.username,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct TenantCreated {
    pub tenant_id: TenantId,
    pub admin_user_id: UserId,
    pub role_id: windcms_core::RoleId,
}
