//! In-process token cache for tests and single-node development.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use windcms_auth::ClientType;
use windcms_core::UserId;

use super::{CacheResult, TokenCache, TokenCacheError, TokenKind, blacklist_key, hash_key};

#[derive(Debug, Clone)]
struct Field {
    token: String,
    expires_at: DateTime<Utc>,
}

impl Field {
    fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }
}

#[derive(Debug, Default)]
struct State {
    hashes: HashMap<String, HashMap<String, Field>>,
    blocked: HashMap<String, Field>,
}

impl State {
    fn set(&mut self, key: String, jti: &str, token: &str, expires_at: DateTime<Utc>) {
        self.hashes.entry(key).or_default().insert(
            jti.to_string(),
            Field {
                token: token.to_string(),
                expires_at,
            },
        );
    }

    fn remove_field(&mut self, key: &str, jti: &str) -> bool {
        let Some(hash) = self.hashes.get_mut(key) else {
            return false;
        };
        let removed = hash.remove(jti).is_some();
        if hash.is_empty() {
            self.hashes.remove(key);
        }
        removed
    }
}

/// `RwLock`-guarded map with the same key layout and per-field expiry as
/// the Redis backend.
#[derive(Debug, Default)]
pub struct InMemoryTokenCache {
    state: RwLock<State>,
}

impl InMemoryTokenCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn arc() -> Arc<Self> {
        Arc::new(Self::new())
    }

    fn write(&self) -> CacheResult<std::sync::RwLockWriteGuard<'_, State>> {
        self.state
            .write()
            .map_err(|_| TokenCacheError::Command("token cache lock poisoned".into()))
    }

    fn read(&self) -> CacheResult<std::sync::RwLockReadGuard<'_, State>> {
        self.state
            .read()
            .map_err(|_| TokenCacheError::Command("token cache lock poisoned".into()))
    }
}

#[async_trait]
impl TokenCache for InMemoryTokenCache {
    async fn put_pair(
        &self,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        access: &str,
        refresh: &str,
        access_ttl: Duration,
        refresh_ttl: Duration,
    ) -> CacheResult<()> {
        let now = Utc::now();
        let mut state = self.write()?;
        state.set(hash_key(TokenKind::Access, client_type, user_id), jti, access, now + access_ttl);
        state.set(hash_key(TokenKind::Refresh, client_type, user_id), jti, refresh, now + refresh_ttl);
        Ok(())
    }

    async fn put(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        token: &str,
        ttl: Duration,
    ) -> CacheResult<()> {
        let expires_at = Utc::now() + ttl;
        self.write()?
            .set(hash_key(kind, client_type, user_id), jti, token, expires_at);
        Ok(())
    }

    async fn get(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
    ) -> CacheResult<Option<String>> {
        let now = Utc::now();
        let state = self.read()?;
        Ok(state
            .hashes
            .get(&hash_key(kind, client_type, user_id))
            .and_then(|hash| hash.get(jti))
            .filter(|field| field.is_live(now))
            .map(|field| field.token.clone()))
    }

    async fn entries(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
    ) -> CacheResult<Vec<(String, String)>> {
        let now = Utc::now();
        let key = hash_key(kind, client_type, user_id);
        let mut state = self.write()?;
        let Some(hash) = state.hashes.get_mut(&key) else {
            return Ok(Vec::new());
        };
        hash.retain(|_, field| field.is_live(now));
        let mut live: Vec<(String, String)> = hash
            .iter()
            .map(|(jti, field)| (jti.clone(), field.token.clone()))
            .collect();
        if hash.is_empty() {
            state.hashes.remove(&key);
        }
        live.sort();
        Ok(live)
    }

    async fn revoke_by_jti(&self, client_type: ClientType, user_id: UserId, jti: &str) -> CacheResult<u64> {
        let mut state = self.write()?;
        state.remove_field(&hash_key(TokenKind::Access, client_type, user_id), jti);
        let removed = state.remove_field(&hash_key(TokenKind::Refresh, client_type, user_id), jti);
        Ok(u64::from(removed))
    }

    async fn revoke_all(&self, client_type: ClientType, user_id: UserId) -> CacheResult<()> {
        let mut state = self.write()?;
        state.hashes.remove(&hash_key(TokenKind::Access, client_type, user_id));
        state.hashes.remove(&hash_key(TokenKind::Refresh, client_type, user_id));
        Ok(())
    }

    async fn add_blocked(&self, jti: &str, reason: &str, ttl: Duration) -> CacheResult<()> {
        let expires_at = Utc::now() + ttl;
        self.write()?.blocked.insert(
            blacklist_key(jti),
            Field {
                token: reason.to_string(),
                expires_at,
            },
        );
        Ok(())
    }

    async fn blocked_reason(&self, jti: &str) -> CacheResult<Option<String>> {
        let now = Utc::now();
        Ok(self
            .read()?
            .blocked
            .get(&blacklist_key(jti))
            .filter(|field| field.is_live(now))
            .map(|field| field.token.clone()))
    }

    async fn remove_blocked(&self, jti: &str) -> CacheResult<()> {
        self.write()?.blocked.remove(&blacklist_key(jti));
        Ok(())
    }
}
