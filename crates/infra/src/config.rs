//! Configuration for the identity core.
//!
//! Loaded from an optional YAML file merged with `WINDCMS_`-prefixed
//! environment variables (`__` separates nesting levels, e.g.
//! `WINDCMS_AUTHENTICATOR__APP__KEY`).

use std::path::Path;

use chrono::Duration;
use figment::{
    Figment,
    providers::{Env, Format, Yaml},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use windcms_auth::{
    AudienceKeys, AudienceProfile, CredentialHasher, JwtCodec, TRANSPORT_KEY_LEN, TransportCipher,
};
use windcms_core::UserTenantRelation;

use crate::token_cache::FieldExpiry;

const DEFAULT_ACCESS_TTL_SECS: i64 = 15 * 60;
const DEFAULT_REFRESH_TTL_SECS: i64 = 7 * 24 * 60 * 60;
const DEFAULT_LEEWAY_SECS: u64 = 60;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(String),

    #[error("failed to load configuration: {0}")]
    Load(String),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IaacConfig {
    pub authenticator: AuthenticatorConfig,
    pub user_tenant_relation: UserTenantRelation,
    /// Shared with clients; exactly 32 bytes.
    pub transport_aes_key: String,
    /// bcrypt work factor for stored passwords; library default when unset.
    pub bcrypt_cost: Option<u32>,
    pub token_cache: TokenCacheConfig,
    pub database: DatabaseConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthenticatorConfig {
    pub admin: AudienceConfig,
    pub app: AudienceConfig,
    /// Clock skew tolerated by signature verification.
    pub leeway_secs: u64,
}

impl Default for AuthenticatorConfig {
    fn default() -> Self {
        Self {
            admin: AudienceConfig::default(),
            app: AudienceConfig::default(),
            leeway_secs: DEFAULT_LEEWAY_SECS,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudienceConfig {
    pub key: String,
    pub method: String,
    pub access_ttl_secs: i64,
    pub refresh_ttl_secs: i64,
}

impl Default for AudienceConfig {
    fn default() -> Self {
        Self {
            key: String::new(),
            method: "HS256".to_string(),
            access_ttl_secs: DEFAULT_ACCESS_TTL_SECS,
            refresh_ttl_secs: DEFAULT_REFRESH_TTL_SECS,
        }
    }
}

impl AudienceConfig {
    pub fn with_key(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TokenCacheConfig {
    /// `None` selects the in-process cache.
    pub redis_url: Option<String>,
    pub field_expiry: FieldExpiry,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `None` selects the in-memory store.
    pub url: Option<String>,
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
    /// Upper bound on one request's work against the store and cache.
    pub request_timeout_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            request_timeout_secs: 10,
        }
    }
}

impl ServerConfig {
    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

impl IaacConfig {
    /// Load from an optional YAML file and the environment, then validate.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut figment = Figment::new();

        if let Some(p) = path {
            if !p.exists() {
                return Err(ConfigError::NotFound(p.display().to_string()));
            }
            figment = figment.merge(Yaml::file(p));
        }

        figment = figment.merge(Env::prefixed("WINDCMS_").split("__"));

        let config: Self = figment
            .extract()
            .map_err(|e| ConfigError::Load(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for (name, audience) in [
            ("admin", &self.authenticator.admin),
            ("app", &self.authenticator.app),
        ] {
            if audience.key.is_empty() {
                return Err(ConfigError::Invalid(format!("authenticator.{name}.key is empty")));
            }
            if audience.access_ttl_secs <= 0 || audience.refresh_ttl_secs <= 0 {
                return Err(ConfigError::Invalid(format!(
                    "authenticator.{name} token lifetimes must be positive"
                )));
            }
        }
        if self.server.request_timeout_secs == 0 {
            return Err(ConfigError::Invalid("server.request_timeout_secs must be positive".into()));
        }
        if let Some(cost) = self.bcrypt_cost.filter(|c| !(4..=31).contains(c)) {
            return Err(ConfigError::Invalid(format!("bcrypt_cost {cost} is outside 4..=31")));
        }
        if self.transport_aes_key.len() != TRANSPORT_KEY_LEN {
            return Err(ConfigError::Invalid(format!(
                "transport_aes_key must be {TRANSPORT_KEY_LEN} bytes, got {}",
                self.transport_aes_key.len()
            )));
        }
        Ok(())
    }

    /// Signing keys and lifetimes for both audiences.
    pub fn audience_keys(&self) -> Result<AudienceKeys, ConfigError> {
        let leeway = self.authenticator.leeway_secs;
        let profile = |name: &str, cfg: &AudienceConfig| -> Result<AudienceProfile, ConfigError> {
            let codec = JwtCodec::hmac(cfg.key.as_bytes(), &cfg.method, leeway)
                .map_err(|e| ConfigError::Invalid(format!("authenticator.{name}: {e}")))?;
            Ok(AudienceProfile {
                codec,
                access_ttl: Duration::seconds(cfg.access_ttl_secs),
                refresh_ttl: Duration::seconds(cfg.refresh_ttl_secs),
            })
        };
        Ok(AudienceKeys::new(
            profile("admin", &self.authenticator.admin)?,
            profile("app", &self.authenticator.app)?,
        ))
    }

    pub fn credential_hasher(&self) -> CredentialHasher {
        self.bcrypt_cost.map(CredentialHasher::with_cost).unwrap_or_default()
    }

    pub fn transport_cipher(&self) -> Result<TransportCipher, ConfigError> {
        TransportCipher::new(self.transport_aes_key.as_bytes())
            .map_err(|e| ConfigError::Invalid(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> IaacConfig {
        IaacConfig {
            authenticator: AuthenticatorConfig {
                admin: AudienceConfig::with_key("admin-secret"),
                app: AudienceConfig::with_key("app-secret"),
                ..Default::default()
            },
            transport_aes_key: "0123456789abcdef0123456789abcdef".into(),
            ..Default::default()
        }
    }

    #[test]
    fn defaults_follow_documented_lifetimes() {
        let cfg = AudienceConfig::default();
        assert_eq!(cfg.access_ttl_secs, 900);
        assert_eq!(cfg.refresh_ttl_secs, 604_800);
        assert_eq!(cfg.method, "HS256");
        assert_eq!(AuthenticatorConfig::default().leeway_secs, 60);
        assert_eq!(IaacConfig::default().user_tenant_relation, UserTenantRelation::OneToOne);
    }

    #[test]
    fn valid_config_builds_keys_and_cipher() {
        let cfg = valid();
        cfg.validate().unwrap();
        let keys = cfg.audience_keys().unwrap();
        assert_eq!(keys.access_ttl(windcms_auth::ClientType::App), Duration::minutes(15));
        assert!(cfg.transport_cipher().is_ok());
    }

    #[test]
    fn rejects_short_aes_key() {
        let mut cfg = valid();
        cfg.transport_aes_key = "short".into();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_empty_audience_key() {
        let mut cfg = valid();
        cfg.authenticator.admin.key.clear();
        assert!(matches!(cfg.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn rejects_non_positive_ttl() {
        let mut cfg = valid();
        cfg.authenticator.app.refresh_ttl_secs = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn parses_yaml() {
        let yaml = r#"
authenticator:
  admin: { key: a, access_ttl_secs: 60 }
  app: { key: b, method: HS512 }
user_tenant_relation: ONE_TO_MANY
transport_aes_key: "0123456789abcdef0123456789abcdef"
token_cache: { field_expiry: SORTED_SET }
"#;
        let cfg: IaacConfig = Figment::new()
            .merge(Yaml::string(yaml))
            .extract()
            .unwrap();
        cfg.validate().unwrap();
        assert_eq!(cfg.authenticator.admin.access_ttl_secs, 60);
        assert_eq!(cfg.authenticator.admin.refresh_ttl_secs, 604_800);
        assert_eq!(cfg.authenticator.app.method, "HS512");
        assert_eq!(cfg.user_tenant_relation, UserTenantRelation::OneToMany);
        assert_eq!(cfg.token_cache.field_expiry, FieldExpiry::SortedSet);
    }
}
