use windcms_auth::{ClientType, Principal};
use windcms_core::{TenantId, UserId};

/// Tenant the caller's token was issued for.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct TenantContext {
    tenant_id: TenantId,
}

impl TenantContext {
    pub fn new(tenant_id: TenantId) -> Self {
        Self { tenant_id }
    }

    pub fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }
}

/// Authenticated caller, taken from a validated access token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrincipalContext {
    principal: Principal,
}

impl PrincipalContext {
    pub fn new(principal: Principal) -> Self {
        Self { principal }
    }

    pub fn user_id(&self) -> UserId {
        self.principal.user_id
    }

    pub fn client_type(&self) -> ClientType {
        self.principal.client_type
    }

    pub fn principal(&self) -> &Principal {
        &self.principal
    }
}
