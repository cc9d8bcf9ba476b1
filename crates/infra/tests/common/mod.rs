use windcms_infra::IaacConfig;
use windcms_infra::IdentityCore;
use windcms_infra::config::{AudienceConfig, AuthenticatorConfig};

pub fn config() -> IaacConfig {
    IaacConfig {
        authenticator: AuthenticatorConfig {
            admin: AudienceConfig::with_key("admin-secret"),
            app: AudienceConfig::with_key("app-secret"),
            leeway_secs: 0,
        },
        transport_aes_key: "0123456789abcdef0123456789abcdef".into(),
        bcrypt_cost: Some(4),
        ..Default::default()
    }
}

pub fn core() -> IdentityCore {
    IdentityCore::in_memory(&config()).expect("valid test config")
}
