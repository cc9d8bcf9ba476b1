//! Redis-backed token cache.
//!
//! Paired writes and paired deletes run as `MULTI`/`EXEC` pipelines. Field
//! expiry uses `HEXPIRE` when the server supports it; otherwise each hash has
//! a companion sorted set `{hash_key}:exp` holding `jti` scored by expiry
//! (unix seconds), and readers prune expired members before answering.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use redis::aio::MultiplexedConnection;
use tracing::instrument;

use windcms_auth::ClientType;
use windcms_core::UserId;

use super::{CacheResult, FieldExpiry, TokenCache, TokenCacheError, TokenKind, blacklist_key, hash_key};

#[derive(Clone)]
pub struct RedisTokenCache {
    conn: MultiplexedConnection,
    field_expiry: FieldExpiry,
}

impl core::fmt::Debug for RedisTokenCache {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisTokenCache")
            .field("field_expiry", &self.field_expiry)
            .finish_non_exhaustive()
    }
}

fn command_error(e: redis::RedisError) -> TokenCacheError {
    TokenCacheError::Command(e.to_string())
}

fn expiry_key(hash_key: &str) -> String {
    format!("{hash_key}:exp")
}

fn ttl_secs(ttl: Duration) -> i64 {
    ttl.num_seconds().max(0)
}

impl RedisTokenCache {
    /// Connect to `redis_url` (e.g. `redis://localhost:6379`).
    pub async fn connect(redis_url: impl AsRef<str>, field_expiry: FieldExpiry) -> CacheResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| TokenCacheError::Connection(e.to_string()))?;
        let conn = client
            .get_multiplexed_tokio_connection()
            .await
            .map_err(|e| TokenCacheError::Connection(e.to_string()))?;
        Ok(Self { conn, field_expiry })
    }

    /// Queue `HSET` plus the expiry of one field onto `pipe`.
    fn queue_set(&self, pipe: &mut redis::Pipeline, key: &str, jti: &str, token: &str, ttl: Duration) {
        pipe.cmd("HSET").arg(key).arg(jti).arg(token).ignore();
        match self.field_expiry {
            FieldExpiry::Native => {
                pipe.cmd("HEXPIRE")
                    .arg(key)
                    .arg(ttl_secs(ttl))
                    .arg("FIELDS")
                    .arg(1)
                    .arg(jti)
                    .ignore();
            }
            FieldExpiry::SortedSet => {
                let expires_at = (Utc::now() + ttl).timestamp();
                pipe.cmd("ZADD")
                    .arg(expiry_key(key))
                    .arg(expires_at)
                    .arg(jti)
                    .ignore();
            }
        }
    }

    /// Queue `HDEL` (and the companion `ZREM`). Only a counted `HDEL`
    /// contributes a reply.
    fn queue_delete_field(&self, pipe: &mut redis::Pipeline, key: &str, jti: &str, counted: bool) {
        pipe.cmd("HDEL").arg(key).arg(jti);
        if !counted {
            pipe.ignore();
        }
        if self.field_expiry == FieldExpiry::SortedSet {
            pipe.cmd("ZREM").arg(expiry_key(key)).arg(jti).ignore();
        }
    }

    /// Drop fields whose companion score is in the past. No-op in native mode.
    async fn prune(&self, key: &str) -> CacheResult<()> {
        if self.field_expiry != FieldExpiry::SortedSet {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        let exp_key = expiry_key(key);
        let now = Utc::now().timestamp();

        let expired: Vec<String> = redis::cmd("ZRANGEBYSCORE")
            .arg(&exp_key)
            .arg("-inf")
            .arg(now)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        if expired.is_empty() {
            return Ok(());
        }

        redis::pipe()
            .atomic()
            .cmd("HDEL")
            .arg(key)
            .arg(&expired)
            .ignore()
            .cmd("ZREMRANGEBYSCORE")
            .arg(&exp_key)
            .arg("-inf")
            .arg(now)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(command_error)
    }
}

#[async_trait]
impl TokenCache for RedisTokenCache {
    #[instrument(skip(self, access, refresh), fields(client_type = %client_type, user_id = %user_id), err)]
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
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_set(&mut pipe, &hash_key(TokenKind::Access, client_type, user_id), jti, access, access_ttl);
        self.queue_set(&mut pipe, &hash_key(TokenKind::Refresh, client_type, user_id), jti, refresh, refresh_ttl);

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(command_error)
    }

    #[instrument(skip(self, token), fields(client_type = %client_type, user_id = %user_id), err)]
    async fn put(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
        token: &str,
        ttl: Duration,
    ) -> CacheResult<()> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_set(&mut pipe, &hash_key(kind, client_type, user_id), jti, token, ttl);

        let mut conn = self.conn.clone();
        pipe.query_async::<_, ()>(&mut conn).await.map_err(command_error)
    }

    async fn get(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
    ) -> CacheResult<Option<String>> {
        let key = hash_key(kind, client_type, user_id);
        self.prune(&key).await?;

        let mut conn = self.conn.clone();
        redis::cmd("HGET")
            .arg(&key)
            .arg(jti)
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn entries(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
    ) -> CacheResult<Vec<(String, String)>> {
        let key = hash_key(kind, client_type, user_id);
        self.prune(&key).await?;

        let mut conn = self.conn.clone();
        let all: HashMap<String, String> = redis::cmd("HGETALL")
            .arg(&key)
            .query_async(&mut conn)
            .await
            .map_err(command_error)?;
        let mut entries: Vec<(String, String)> = all.into_iter().collect();
        entries.sort();
        Ok(entries)
    }

    #[instrument(skip(self), fields(client_type = %client_type, user_id = %user_id), err)]
    async fn revoke_by_jti(&self, client_type: ClientType, user_id: UserId, jti: &str) -> CacheResult<u64> {
        let mut pipe = redis::pipe();
        pipe.atomic();
        self.queue_delete_field(&mut pipe, &hash_key(TokenKind::Access, client_type, user_id), jti, false);
        self.queue_delete_field(&mut pipe, &hash_key(TokenKind::Refresh, client_type, user_id), jti, true);

        let mut conn = self.conn.clone();
        let (removed,): (u64,) = pipe.query_async(&mut conn).await.map_err(command_error)?;
        Ok(removed)
    }

    #[instrument(skip(self), fields(client_type = %client_type, user_id = %user_id), err)]
    async fn revoke_all(&self, client_type: ClientType, user_id: UserId) -> CacheResult<()> {
        let access = hash_key(TokenKind::Access, client_type, user_id);
        let refresh = hash_key(TokenKind::Refresh, client_type, user_id);
        let mut keys = vec![access.clone(), refresh.clone()];
        if self.field_expiry == FieldExpiry::SortedSet {
            keys.push(expiry_key(&access));
            keys.push(expiry_key(&refresh));
        }

        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(&keys)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(command_error)
    }

    #[instrument(skip(self, reason), err)]
    async fn add_blocked(&self, jti: &str, reason: &str, ttl: Duration) -> CacheResult<()> {
        let secs = ttl_secs(ttl);
        if secs == 0 {
            return Ok(());
        }
        let mut conn = self.conn.clone();
        redis::cmd("SET")
            .arg(blacklist_key(jti))
            .arg(reason)
            .arg("EX")
            .arg(secs)
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(command_error)
    }

    async fn blocked_reason(&self, jti: &str) -> CacheResult<Option<String>> {
        let mut conn = self.conn.clone();
        redis::cmd("GET")
            .arg(blacklist_key(jti))
            .query_async(&mut conn)
            .await
            .map_err(command_error)
    }

    #[instrument(skip(self), err)]
    async fn remove_blocked(&self, jti: &str) -> CacheResult<()> {
        let mut conn = self.conn.clone();
        redis::cmd("DEL")
            .arg(blacklist_key(jti))
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(command_error)
    }
}
