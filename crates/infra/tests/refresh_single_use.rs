mod common;

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Duration;
use proptest::prelude::*;

use windcms_auth::{ClientType, TokenPayload};
use windcms_core::{ErrorCode, TenantId, UserId};
use windcms_infra::token_cache::{CacheResult, InMemoryTokenCache};
use windcms_infra::{Authenticator, TokenCache, TokenKind};

fn block_on<F: std::future::Future>(fut: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
        .block_on(fut)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn only_the_first_verification_succeeds(
        uid in 1u32..1000,
        app in any::<bool>(),
        replays in 1usize..4,
    ) {
        let ct = if app { ClientType::App } else { ClientType::Admin };
        let user_id = UserId::new(uid);
        let results = block_on(async {
            let core = common::core();
            let payload = TokenPayload {
                user_id,
                tenant_id: TenantId::new(1),
                ..Default::default()
            };
            let pair = core.authenticator.create_user_token(ct, &payload).await.unwrap();
            let mut results = Vec::new();
            for _ in 0..=replays {
                results.push(
                    core.authenticator
                        .verify_refresh(ct, user_id, &pair.jti, &pair.refresh_token)
                        .await
                        .map_err(|e| e.code()),
                );
            }
            results
        });

        prop_assert_eq!(&results[0], &Ok(()));
        for replay in &results[1..] {
            prop_assert_eq!(replay, &Err(ErrorCode::IncorrectRefreshToken));
        }
    }
}

/// In-memory cache whose reads suspend once, like a network round trip, so
/// concurrent callers interleave between check and delete.
#[derive(Default)]
struct YieldingCache(InMemoryTokenCache);

#[async_trait]
impl TokenCache for YieldingCache {
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
        self.0
            .put_pair(client_type, user_id, jti, access, refresh, access_ttl, refresh_ttl)
            .await
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
        self.0.put(kind, client_type, user_id, jti, token, ttl).await
    }

    async fn get(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
        jti: &str,
    ) -> CacheResult<Option<String>> {
        let value = self.0.get(kind, client_type, user_id, jti).await;
        tokio::task::yield_now().await;
        value
    }

    async fn entries(
        &self,
        kind: TokenKind,
        client_type: ClientType,
        user_id: UserId,
    ) -> CacheResult<Vec<(String, String)>> {
        self.0.entries(kind, client_type, user_id).await
    }

    async fn revoke_by_jti(&self, client_type: ClientType, user_id: UserId, jti: &str) -> CacheResult<u64> {
        self.0.revoke_by_jti(client_type, user_id, jti).await
    }

    async fn revoke_all(&self, client_type: ClientType, user_id: UserId) -> CacheResult<()> {
        self.0.revoke_all(client_type, user_id).await
    }

    async fn add_blocked(&self, jti: &str, reason: &str, ttl: Duration) -> CacheResult<()> {
        self.0.add_blocked(jti, reason, ttl).await
    }

    async fn blocked_reason(&self, jti: &str) -> CacheResult<Option<String>> {
        self.0.blocked_reason(jti).await
    }

    async fn remove_blocked(&self, jti: &str) -> CacheResult<()> {
        self.0.remove_blocked(jti).await
    }
}

#[tokio::test]
async fn concurrent_refreshes_consume_the_token_once() {
    let keys = common::config().audience_keys().unwrap();
    let auth = Authenticator::new(keys, Arc::new(YieldingCache::default()));
    let user_id = UserId::new(42);
    let payload = TokenPayload {
        user_id,
        tenant_id: TenantId::new(1),
        ..Default::default()
    };
    let pair = auth.create_user_token(ClientType::App, &payload).await.unwrap();

    let (first, second) = tokio::join!(
        auth.verify_refresh(ClientType::App, user_id, &pair.jti, &pair.refresh_token),
        auth.verify_refresh(ClientType::App, user_id, &pair.jti, &pair.refresh_token),
    );

    let codes = [first.map_err(|e| e.code()), second.map_err(|e| e.code())];
    assert_eq!(codes.iter().filter(|r| r.is_ok()).count(), 1, "{codes:?}");
    assert!(codes.contains(&Err(ErrorCode::IncorrectRefreshToken)));
}

#[tokio::test]
async fn refresh_for_user_zero_is_rejected() {
    let core = common::core();
    let err = core
        .authenticator
        .verify_refresh(ClientType::App, UserId::new(0), "jti", "rt")
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::BadRequest);
    assert_eq!(err.message(), "invalid user id");
}
