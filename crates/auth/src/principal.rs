use serde::{Deserialize, Serialize};

use windcms_core::{TenantId, UserId};

use crate::{ClientType, TokenPayload};

/// An authenticated caller, derived from a validated access token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: UserId,
    pub tenant_id: TenantId,
    pub client_type: ClientType,
    pub jti: String,
    pub username: Option<String>,
    /// Role codes carried in the token.
    pub roles: Vec<String>,
}

impl Principal {
    pub fn from_payload(client_type: ClientType, jti: String, payload: TokenPayload) -> Self {
        Self {
            user_id: payload.user_id,
            tenant_id: payload.tenant_id,
            client_type,
            jti,
            username: payload.username,
            roles: payload.roles,
        }
    }

    /// Platform principals are not bound to a tenant.
    pub fn is_platform(&self) -> bool {
        self.tenant_id.is_platform()
    }

    pub fn has_role(&self, code: &str) -> bool {
        self.roles.iter().any(|r| r == code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_becomes_principal() {
        let payload = TokenPayload {
            user_id: UserId::new(7),
            tenant_id: TenantId::PLATFORM,
            roles: vec!["super".into()],
            ..Default::default()
        };
        let p = Principal::from_payload(ClientType::Admin, "j1".into(), payload);
        assert!(p.is_platform());
        assert!(p.has_role("super"));
        assert!(!p.has_role("admin"));
        assert_eq!(p.jti, "j1");
    }
}
