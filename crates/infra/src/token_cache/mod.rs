//! Token cache: per-user hashes of live tokens keyed by jti, plus a jti
//! blacklist.
//!
//! ## Key layout
//!
//! | Key | Type | Field | Value |
//! |-----|------|-------|-------|
//! | `gwc:at:{ct}:{uid}` | hash | jti | access JWT |
//! | `gwc:rt:{ct}:{uid}` | hash | jti | opaque refresh token |
//! | `gwc:bl:{jti}` | string | | block reason |
//!
//! Expiry is per field, never per hash key: expiring the whole hash would
//! end every session of the user at once.

pub mod in_memory;
#[cfg(feature = "redis")]
pub mod redis_cache;

use async_trait::async_trait;
use chrono::Duration;
use serde::{Deserialize, Serialize};
use subtle::ConstantTimeEq;
use thiserror::Error;

use windcms_auth::ClientType;
use windcms_core::{DomainError, UserId};

pub use in_memory::InMemoryTokenCache;
#[cfg(feature = "redis")]
pub use redis_cache::RedisTokenCache;

pub const KEY_PREFIX: &str = "gwc";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Access,
    Refresh,
}

impl TokenKind {
    fn tag(self) -> &'static str {
        match self {
            TokenKind::Access => "at",
            TokenKind::Refresh => "rt",
        }
    }
}

/// How field expiry is implemented on the backing store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FieldExpiry {
    /// `HEXPIRE` on the hash field (Redis 7.4+).
    #[default]
    Native,
    /// Companion sorted set `{hash_key}:exp` scored by expiry, pruned on read.
    SortedSet,
}

pub fn hash_key(kind: TokenKind, client_type: ClientType, user_id: UserId) -> String {
    format!("{KEY_PREFIX}:{}:{}:{}", kind.tag(), client_type.as_u8(), user_id)
}

pub fn blacklist_key(jti: &str) -> String {
    format!("{KEY_PREFIX}:bl:{jti}")
}

#[derive(Debug, Error)]
pub enum TokenCacheError {
    #[error("token cache connection error: {0}")]
    Connection(String),

    #[error("token cache command error: {0}")]
    Command(String),
}

impl From<TokenCacheError> for DomainError {
    fn from(err: TokenCacheError) -> Self {
        DomainError::internal(err.to_string())
    }
}

pub type CacheResult<T> = Result<T, TokenCacheError>;

/// Backing store for live tokens and the blacklist.
///
/// Implementors provide the primitive operations; the token-level queries
/// are provided on top of them. Expired fields must never be returned.
#[async_trait]
pub trait TokenCache: Send + Sync {
    /// Write both fields under `jti` atomically.
    async fn put_pair(
        &self,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        access: &str,
        refresh: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> CacheResult<()>;

    async fn put(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        token: &str,
        ttl: Duration,
    ) -> CacheResult<()>;

    async fn get(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
    ) -> CacheResult<Option<String>>;

    /// Live `(jti, token)` entries of one hash.
    async fn entries(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
    ) -> CacheResult<Vec<(String, String)>>;

    /// Delete the access and refresh fields under `jti` atomically. Absent
    /// fields are not an error. Returns how many refresh fields this call
    /// removed; of two racing calls at most one sees `1`.
    async fn revoke_by_jti(&self, client_type: ClientType, user_id: UserId, jti: &str) -> CacheResult<u64>;

    /// Delete both hashes of the user.
    async fn revoke_all(&self, client_type: ClientType, user_id: UserId) -> CacheResult<()>;

    async fn add_blocked(&self, jti: &str, reason: &str, ttl: Duration) -> CacheResult<()>;

    async fn blocked_reason(&self, jti: &str) -> CacheResult<Option<String>>;

    async fn remove_blocked(&self, jti: &str) -> CacheResult<()>;

    // ── provided ────────────────────────────────────────────────────────────

    async fn add_token_pair(
        &self,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        access: &str,
        refresh: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> CacheResult<()> {
        self.put_pair(client_type, user_id, jti, access, refresh, access_ttl, refresh_ttl)
            .await
    }

    async fn add_access_token(
        &self,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        token: &str,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.put(TokenKind::Access, client_type, user_id, jti, token, ttl).await
    }

    async fn add_refresh_token(
        &self,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        token: &str,
        ttl: Duration,
    ) -> CacheResult<()> {
        self.put(TokenKind::Refresh, client_type, user_id, jti, token, ttl).await
    }

    async fn access_tokens(&self, client_type: ClientType, user_id: UserId) -> CacheResult<Vec<String>> {
        let entries = self.entries(TokenKind::Access, client_type, user_id).await?;
        Ok(entries.into_iter().map(|(_, token)| token).collect())
    }

    async fn refresh_tokens(&self, client_type: ClientType, user_id: UserId) -> CacheResult<Vec<String>> {
        let entries = self.entries(TokenKind::Refresh, client_type, user_id).await?;
        Ok(entries.into_iter().map(|(_, token)| token).collect())
    }

    async fn is_valid_access(
        &self,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        submitted: &str,
    ) -> CacheResult<bool> {
        let stored = self.get(TokenKind::Access, client_type, user_id, jti).await?;
        Ok(stored.is_some_and(|s| tokens_equal(&s, submitted)))
    }

    async fn is_valid_refresh(
        &self,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        submitted: &str,
    ) -> CacheResult<bool> {
        let stored = self.get(TokenKind::Refresh, client_type, user_id, jti).await?;
        Ok(stored.is_some_and(|s| tokens_equal(&s, submitted)))
    }

    async fn is_exist_access_by_jti(
        &self,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
    ) -> CacheResult<bool> {
        Ok(self.get(TokenKind::Access, client_type, user_id, jti).await?.is_some())
    }

    /// Scan the user's access hash for `submitted`; returns its jti.
    async fn find_access_by_token(
        &self,
        client_type: ClientType,
        user_id: UserId,
        submitted: &str,
    ) -> CacheResult<Option<String>> {
        let entries = self.entries(TokenKind::Access, client_type, user_id).await?;
        Ok(find_jti(entries, submitted))
    }

    /// Scan the user's refresh hash for `submitted`; returns its jti.
    async fn find_refresh_by_token(
        &self,
        client_type: ClientType,
        user_id: UserId,
        submitted: &str,
    ) -> CacheResult<Option<String>> {
        let entries = self.entries(TokenKind::Refresh, client_type, user_id).await?;
        Ok(find_jti(entries, submitted))
    }

    async fn is_blocked(&self, jti: &str) -> CacheResult<bool> {
        Ok(self.blocked_reason(jti).await?.is_some())
    }
}

/// Constant-time token comparison.
pub fn tokens_equal(stored: &str, submitted: &str) -> bool {
    stored.as_bytes().ct_eq(submitted.as_bytes()).into()
}

fn find_jti(entries: Vec<(String, String)>, submitted: &str) -> Option<String> {
    entries
        .into_iter()
        .find(|(_, token)| tokens_equal(token, submitted))
        .map(|(jti, _)| jti)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_layout() {
        assert_eq!(
            hash_key(TokenKind::Access, ClientType::App, UserId::new(42)),
            "gwc:at:2:42"
        );
        assert_eq!(
            hash_key(TokenKind::Refresh, ClientType::Admin, UserId::new(7)),
            "gwc:rt:1:7"
        );
        assert_eq!(blacklist_key("abc"), "gwc:bl:abc");
    }

    #[test]
    fn token_comparison() {
        assert!(tokens_equal("abc", "abc"));
        assert!(!tokens_equal("abc", "abd"));
        assert!(!tokens_equal("abc", "abcd"));
    }
}
