//! Guards for session administration at the HTTP boundary.

use windcms_auth::{AuthzError, ClientType, User, authorize_token_admin};
use windcms_core::{DomainError, UserId};
use windcms_infra::IdentityCore;
use windcms_infra::store::UserStore;

use crate::app::errors::ApiError;
use crate::context::PrincipalContext;

/// Callers manage their own sessions freely; other users' sessions need an
/// admin-audience token in the target's tenant (or a platform one).
pub async fn authorize_session_admin(
    core: &IdentityCore,
    principal: &PrincipalContext,
    target: UserId,
) -> Result<User, ApiError> {
    let user = core
        .store
        .get_user(target)
        .await
        .map_err(DomainError::from)?
        .ok_or_else(|| DomainError::user_not_found("user not found"))?;
    if principal.user_id() != target {
        authorize_token_admin(principal.principal(), user.tenant_id).map_err(DomainError::from)?;
    }
    Ok(user)
}

/// Tenant bootstrap is reserved for platform administrators.
pub fn require_platform_admin(principal: &PrincipalContext) -> Result<(), ApiError> {
    let p = principal.principal();
    if p.client_type != ClientType::Admin {
        return Err(DomainError::from(AuthzError::AdminOnly).into());
    }
    if !p.is_platform() {
        return Err(DomainError::forbidden("platform administrator required").into());
    }
    Ok(())
}
