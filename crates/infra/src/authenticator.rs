//! Token lifecycle: issue, authenticate, rotate, revoke and block.
//!
//! An access token is valid only while all of these hold:
//!
//! | Check | Failure message |
//! |-------|-----------------|
//! | signature verifies under the audience key | `invalid token` |
//! | `exp > now` | `access token is expired` |
//! | cache holds the token under its jti | `access token is revoked or expired` |
//! | jti is not blacklisted | `access token is blocked` |
//!
//! Every failure is `UNAUTHORIZED`; only the message differs.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, instrument, warn};

use windcms_auth::{
    AudienceKeys, ClientType, JwtClaims, JwtError, Principal, TokenCategory, TokenPayload,
    TokenValidationError, new_jti, new_refresh_token, validate_claims,
};
use windcms_core::{DomainError, DomainResult, UserId};

use crate::token_cache::{TokenCache, TokenCacheError};

/// Freshly minted access/refresh pair sharing one jti.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    pub jti: String,
    pub access_token: String,
    pub refresh_token: String,
    pub access_expires_at: DateTime<Utc>,
    pub refresh_expires_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticateRequest {
    pub client_type: ClientType,
    pub category: TokenCategory,
    pub token: String,
    /// Owner of a refresh token; ignored for access tokens.
    #[serde(default)]
    pub user_id: Option<UserId>,
    #[serde(default)]
    pub skip_cache: bool,
    #[serde(default)]
    pub skip_blacklist: bool,
}

impl AuthenticateRequest {
    pub fn access(client_type: ClientType, token: impl Into<String>) -> Self {
        Self {
            client_type,
            category: TokenCategory::Access,
            token: token.into(),
            user_id: None,
            skip_cache: false,
            skip_blacklist: false,
        }
    }

    pub fn refresh(client_type: ClientType, user_id: UserId, token: impl Into<String>) -> Self {
        Self {
            client_type,
            category: TokenCategory::Refresh,
            token: token.into(),
            user_id: Some(user_id),
            skip_cache: false,
            skip_blacklist: false,
        }
    }
}

/// Outcome of a successful [`Authenticator::authenticate`].
///
/// Refresh tokens carry no claims, so their payload only names the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Authenticated {
    pub is_valid: bool,
    pub jti: String,
    pub payload: TokenPayload,
    pub expires_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRequest {
    pub client_type: ClientType,
    pub user_id: UserId,
    /// Either the jti or the raw access token must be given.
    #[serde(default)]
    pub jti: Option<String>,
    #[serde(default)]
    pub token: Option<String>,
    /// Non-positive means the audience's access lifetime.
    #[serde(default)]
    pub duration_secs: i64,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedToken {
    pub jti: String,
    pub blocked_until: DateTime<Utc>,
}

fn unavailable(err: TokenCacheError) -> DomainError {
    DomainError::service_unavailable(err.to_string())
}

pub struct Authenticator<C: ?Sized> {
    keys: AudienceKeys,
    cache: Arc<C>,
}

impl<C: ?Sized> Clone for Authenticator<C> {
    fn clone(&self) -> Self {
        Self {
            keys: self.keys.clone(),
            cache: Arc::clone(&self.cache),
        }
    }
}

impl<C> Authenticator<C>
where
    C: TokenCache + ?Sized,
{
    pub fn new(keys: AudienceKeys, cache: Arc<C>) -> Self {
        Self { keys, cache }
    }

    pub fn keys(&self) -> &AudienceKeys {
        &self.keys
    }

    /// Sign an access token, mint a refresh token and store both under a
    /// fresh jti in one cache write.
    #[instrument(skip(self, payload), fields(user_id = %payload.user_id, client_type = %client_type), err)]
    pub async fn create_user_token(&self, client_type: ClientType, payload: &TokenPayload) -> DomainResult<TokenPair> {
        if payload.user_id.is_zero() {
            return Err(DomainError::bad_request("token payload requires a user id"));
        }
        let profile = self.keys.profile(client_type);
        let now = Utc::now();
        let jti = new_jti();

        let claims = JwtClaims::issue(payload, client_type, jti.clone(), now, profile.access_ttl);
        let access_token = profile
            .codec
            .sign(&claims)
            .map_err(|e| DomainError::internal(e.to_string()))?;
        let refresh_token = new_refresh_token();

        self.cache
            .add_token_pair(
                client_type,
                payload.user_id,
                &jti,
                &access_token,
                &refresh_token,
                profile.access_ttl,
                profile.refresh_ttl,
            )
            .await
            .map_err(|e| {
                warn!(error = %e, "storing token pair failed");
                DomainError::service_unavailable("generate token failed")
            })?;

        info!(%jti, "token pair issued");
        Ok(TokenPair {
            jti,
            access_token,
            refresh_token,
            access_expires_at: now + profile.access_ttl,
            refresh_expires_at: now + profile.refresh_ttl,
        })
    }

    #[instrument(skip(self, request), fields(client_type = %request.client_type, category = ?request.category), err)]
    pub async fn authenticate(&self, request: &AuthenticateRequest) -> DomainResult<Authenticated> {
        match request.category {
            TokenCategory::Access => self.authenticate_access(request).await,
            TokenCategory::Refresh => self.authenticate_refresh(request).await,
        }
    }

    /// Decode and time-check an access token without touching the cache.
    pub fn decode_access(&self, client_type: ClientType, token: &str) -> DomainResult<JwtClaims> {
        let claims = self
            .keys
            .profile(client_type)
            .codec
            .verify(token)
            .map_err(|e| match e {
                JwtError::Expired => DomainError::unauthorized("access token is expired"),
                _ => DomainError::unauthorized("invalid token"),
            })?;
        if claims.client_type != client_type {
            return Err(DomainError::unauthorized("invalid token"));
        }
        validate_claims(&claims, Utc::now()).map_err(|e| match e {
            TokenValidationError::Expired => DomainError::unauthorized("access token is expired"),
            _ => DomainError::unauthorized("invalid token"),
        })?;
        Ok(claims)
    }

    async fn authenticate_access(&self, request: &AuthenticateRequest) -> DomainResult<Authenticated> {
        let claims = self.decode_access(request.client_type, &request.token)?;

        if !request.skip_cache {
            let live = self
                .cache
                .is_valid_access(request.client_type, claims.sub, &claims.jti, &request.token)
                .await?;
            if !live {
                return Err(DomainError::unauthorized("access token is revoked or expired"));
            }
        }

        if !request.skip_blacklist && self.cache.is_blocked(&claims.jti).await? {
            return Err(DomainError::unauthorized("access token is blocked"));
        }

        Ok(Authenticated {
            is_valid: true,
            jti: claims.jti.clone(),
            payload: claims.payload(),
            expires_at: Some(claims.expires_at()),
        })
    }

    async fn authenticate_refresh(&self, request: &AuthenticateRequest) -> DomainResult<Authenticated> {
        let user_id = request
            .user_id
            .filter(|id| !id.is_zero())
            .ok_or_else(|| DomainError::bad_request("refresh validation requires a user id"))?;
        let jti = self
            .cache
            .find_refresh_by_token(request.client_type, user_id, &request.token)
            .await?
            .ok_or_else(|| DomainError::unauthorized("refresh token not found for user"))?;
        Ok(Authenticated {
            is_valid: true,
            jti,
            payload: TokenPayload {
                user_id,
                ..Default::default()
            },
            expires_at: None,
        })
    }

    /// Principal behind a fully validated access token.
    pub async fn principal(&self, client_type: ClientType, token: &str) -> DomainResult<Principal> {
        let Authenticated { jti, payload, .. } = self
            .authenticate(&AuthenticateRequest::access(client_type, token))
            .await?;
        Ok(Principal::from_payload(client_type, jti, payload))
    }

    /// Consume a refresh token. Both fields under `jti` are deleted before
    /// the caller mints a replacement, so a replay finds nothing.
    #[instrument(skip(self, submitted), fields(client_type = %client_type), err)]
    pub async fn verify_refresh(
        &self,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        submitted: &str,
    ) -> DomainResult<()> {
        if user_id.is_zero() {
            return Err(DomainError::bad_request("invalid user id"));
        }
        if jti.is_empty() || submitted.is_empty() {
            return Err(DomainError::bad_request("jti and refresh token are required"));
        }
        let valid = self
            .cache
            .is_valid_refresh(client_type, user_id, jti, submitted)
            .await
            .map_err(unavailable)?;
        if !valid {
            return Err(DomainError::incorrect_refresh_token("invalid refresh token"));
        }
        let removed = self
            .cache
            .revoke_by_jti(client_type, user_id, jti)
            .await
            .map_err(unavailable)?;
        if removed == 0 {
            warn!(%jti, "refresh token already consumed");
            return Err(DomainError::incorrect_refresh_token("invalid refresh token"));
        }
        info!(%jti, "refresh token consumed");
        Ok(())
    }

    /// Jti of a live refresh token of the user.
    pub async fn refresh_jti(&self, client_type: ClientType, user_id: UserId, submitted: &str) -> DomainResult<String> {
        self.cache
            .find_refresh_by_token(client_type, user_id, submitted)
            .await
            .map_err(unavailable)?
            .ok_or_else(|| DomainError::incorrect_refresh_token("invalid refresh token"))
    }

    /// Drop every session of the user in one audience.
    #[instrument(skip(self), err)]
    pub async fn revoke_user_token(&self, client_type: ClientType, user_id: UserId) -> DomainResult<()> {
        if user_id.is_zero() {
            return Err(DomainError::bad_request("user id is required"));
        }
        self.cache
            .revoke_all(client_type, user_id)
            .await
            .map_err(unavailable)?;
        info!(%user_id, %client_type, "user tokens revoked");
        Ok(())
    }

    /// Drop one session; without an audience, in both.
    #[instrument(skip(self), err)]
    pub async fn revoke_token_by_jti(
        &self,
        client_type: Option<ClientType>,
        user_id: UserId,
        jti: &str,
    ) -> DomainResult<()> {
        if jti.is_empty() {
            return Err(DomainError::bad_request("jti is required"));
        }
        let audiences = match client_type {
            Some(ct) => vec![ct],
            None => ClientType::ALL.to_vec(),
        };
        for ct in audiences {
            self.cache
                .revoke_by_jti(ct, user_id, jti)
                .await
                .map_err(unavailable)?;
        }
        Ok(())
    }

    /// Blacklist a live access token of the user.
    #[instrument(skip(self, request), fields(user_id = %request.user_id, client_type = %request.client_type), err)]
    pub async fn block_token(&self, request: &BlockRequest) -> DomainResult<BlockedToken> {
        let ct = request.client_type;
        let jti = match (request.jti.as_deref(), request.token.as_deref()) {
            (Some(jti), _) if !jti.is_empty() => {
                if !self.cache.is_exist_access_by_jti(ct, request.user_id, jti).await? {
                    return Err(DomainError::access_token_not_found("access token not found"));
                }
                jti.to_string()
            }
            (_, Some(token)) if !token.is_empty() => self
                .cache
                .find_access_by_token(ct, request.user_id, token)
                .await?
                .ok_or_else(|| DomainError::access_token_not_found("access token not found"))?,
            _ => return Err(DomainError::bad_request("jti or token is required")),
        };

        let ttl = if request.duration_secs > 0 {
            Duration::seconds(request.duration_secs)
        } else {
            self.keys.access_ttl(ct)
        };
        self.cache.add_blocked(&jti, &request.reason, ttl).await?;

        let blocked_until = Utc::now() + ttl;
        info!(%jti, %blocked_until, "access token blocked");
        Ok(BlockedToken { jti, blocked_until })
    }

    /// Lift a block and end the session it covered, so the client must
    /// authenticate again.
    #[instrument(skip(self), err)]
    pub async fn unblock_token(&self, client_type: Option<ClientType>, user_id: UserId, jti: &str) -> DomainResult<()> {
        if jti.is_empty() {
            return Err(DomainError::bad_request("jti is required"));
        }
        self.cache.remove_blocked(jti).await.map_err(unavailable)?;
        self.revoke_token_by_jti(client_type, user_id, jti).await
    }

    pub async fn is_blocked(&self, jti: &str) -> DomainResult<bool> {
        Ok(self.cache.is_blocked(jti).await?)
    }

    pub async fn list_access_tokens(&self, client_type: ClientType, user_id: UserId) -> DomainResult<Vec<String>> {
        Ok(self.cache.access_tokens(client_type, user_id).await?)
    }

    pub async fn list_refresh_tokens(&self, client_type: ClientType, user_id: UserId) -> DomainResult<Vec<String>> {
        Ok(self.cache.refresh_tokens(client_type, user_id).await?)
    }
}
