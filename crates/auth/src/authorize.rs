use thiserror::Error;

use windcms_core::{DomainError, DomainResult, TenantId};

use crate::{ClientType, PermissionCode, Principal};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthzError {
    #[error("tenant mismatch")]
    TenantMismatch,

    #[error("missing permission '{0}'")]
    MissingPermission(String),

    #[error("administrative audience required")]
    AdminOnly,
}

impl From<AuthzError> for DomainError {
    fn from(err: AuthzError) -> Self {
        DomainError::forbidden(err.to_string())
    }
}

/// Admin-audience logins need [`crate::ACCESS_BACKEND`] among the
/// resolved permission codes. App logins are not gated.
///
/// - No IO
/// - No panics
pub fn ensure_backend_access(client_type: ClientType, codes: &[PermissionCode]) -> DomainResult<()> {
    if client_type != ClientType::Admin {
        return Ok(());
    }
    if codes.iter().any(|c| c.as_str() == crate::ACCESS_BACKEND) {
        Ok(())
    } else {
        Err(DomainError::forbidden("insufficient authority"))
    }
}

/// A principal may act inside its own tenant; platform principals anywhere.
pub fn authorize_tenant(principal: &Principal, tenant_id: TenantId) -> Result<(), AuthzError> {
    if principal.is_platform() || principal.tenant_id == tenant_id {
        Ok(())
    } else {
        Err(AuthzError::TenantMismatch)
    }
}

/// Gate for operations on other users' sessions (block, unblock, revoke).
pub fn authorize_token_admin(principal: &Principal, target_tenant: TenantId) -> Result<(), AuthzError> {
    if principal.client_type != ClientType::Admin {
        return Err(AuthzError::AdminOnly);
    }
    authorize_tenant(principal, target_tenant)
}

/// Require one permission code among `granted`.
pub fn require_permission(granted: &[PermissionCode], required: &PermissionCode) -> Result<(), AuthzError> {
    if granted.contains(required) {
        Ok(())
    } else {
        Err(AuthzError::MissingPermission(required.to_string()))
    }
}
