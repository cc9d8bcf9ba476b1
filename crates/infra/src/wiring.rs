//! Assembles the identity services over one store and one token cache.
//!
//! Backends are chosen from configuration: Postgres when `database.url` is
//! set, Redis when `token_cache.redis_url` is set (requires the `redis`
//! feature), in-process otherwise.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use windcms_core::DomainResult;

use crate::audit::AuditRecorder;
use crate::authenticator::Authenticator;
use crate::config::{ConfigError, IaacConfig};
use crate::credentials::CredentialService;
use crate::deadline;
use crate::login::LoginService;
use crate::login_gate::LoginPolicyGate;
use crate::membership::MembershipGraph;
use crate::org_tree::OrgTree;
use crate::permissions::PermissionResolver;
use crate::roles::RoleRegistry;
use crate::store::postgres::PostgresIdentityStore;
use crate::store::{IdentityStore, InMemoryIdentityStore, StoreError};
use crate::token_cache::{InMemoryTokenCache, TokenCache, TokenCacheError};

#[derive(Debug, Error)]
pub enum BootError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("store: {0}")]
    Store(#[from] StoreError),

    #[error("token cache: {0}")]
    Cache(#[from] TokenCacheError),
}

pub type Store = dyn IdentityStore;
pub type Cache = dyn TokenCache;

#[derive(Clone)]
pub struct IdentityCore {
    pub store: Arc<Store>,
    pub cache: Arc<Cache>,
    pub credentials: CredentialService<Store>,
    pub authenticator: Authenticator<Cache>,
    pub roles: RoleRegistry<Store>,
    pub graph: MembershipGraph<Store>,
    pub permissions: PermissionResolver<Store>,
    pub org: OrgTree<Store>,
    pub gate: LoginPolicyGate<Store>,
    pub login: LoginService<Store, Cache>,
    pub audit: AuditRecorder,
    pub request_timeout: Duration,
}

impl IdentityCore {
    pub fn assemble(
        config: &IaacConfig,
        store: Arc<Store>,
        cache: Arc<Cache>,
        audit: AuditRecorder,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let credentials =
            CredentialService::new(Arc::clone(&store), config.credential_hasher(), config.transport_cipher()?);
        let authenticator = Authenticator::new(config.audience_keys()?, Arc::clone(&cache));
        let roles = RoleRegistry::new(Arc::clone(&store)).with_audit(audit.clone());
        let graph = MembershipGraph::new(Arc::clone(&store), config.user_tenant_relation).with_audit(audit.clone());
        let permissions = PermissionResolver::new(Arc::clone(&store), graph.clone()).with_audit(audit.clone());
        let org = OrgTree::new(Arc::clone(&store));
        let gate = LoginPolicyGate::new(Arc::clone(&store));
        let login = LoginService::new(
            Arc::clone(&store),
            credentials.clone(),
            authenticator.clone(),
            graph.clone(),
            permissions.clone(),
            roles.clone(),
            gate.clone(),
            audit.clone(),
        );

        Ok(Self {
            store,
            cache,
            credentials,
            authenticator,
            roles,
            graph,
            permissions,
            org,
            gate,
            login,
            audit,
            request_timeout: config.server.request_timeout(),
        })
    }

    /// Run `fut` under the configured per-request deadline.
    pub async fn bounded<F, T>(&self, fut: F) -> DomainResult<T>
    where
        F: Future<Output = DomainResult<T>>,
    {
        deadline::within(deadline::after(self.request_timeout), fut).await
    }

    /// In-process store and cache; audit events go to the log.
    pub fn in_memory(config: &IaacConfig) -> Result<Self, ConfigError> {
        Self::assemble(
            config,
            InMemoryIdentityStore::arc(),
            InMemoryTokenCache::arc(),
            AuditRecorder::default(),
        )
    }

    /// Connect the configured backends.
    pub async fn connect(config: &IaacConfig) -> Result<Self, BootError> {
        let store: Arc<Store> = match &config.database.url {
            Some(url) => {
                let pg = PostgresIdentityStore::connect(url, config.database.max_connections).await?;
                pg.apply_schema().await?;
                info!("postgres identity store ready");
                Arc::new(pg)
            }
            None => {
                info!("using in-memory identity store");
                InMemoryIdentityStore::arc()
            }
        };
        let cache = connect_cache(config).await?;
        Ok(Self::assemble(config, store, cache, AuditRecorder::default())?)
    }
}

#[cfg(feature = "redis")]
async fn connect_cache(config: &IaacConfig) -> Result<Arc<Cache>, BootError> {
    match &config.token_cache.redis_url {
        Some(url) => {
            let cache = crate::token_cache::RedisTokenCache::connect(url, config.token_cache.field_expiry).await?;
            info!(field_expiry = ?config.token_cache.field_expiry, "redis token cache ready");
            Ok(Arc::new(cache))
        }
        None => Ok(InMemoryTokenCache::arc()),
    }
}

#[cfg(not(feature = "redis"))]
async fn connect_cache(config: &IaacConfig) -> Result<Arc<Cache>, BootError> {
    if config.token_cache.redis_url.is_some() {
        return Err(ConfigError::Invalid("token_cache.redis_url requires the `redis` feature".into()).into());
    }
    Ok(InMemoryTokenCache::arc())
}
