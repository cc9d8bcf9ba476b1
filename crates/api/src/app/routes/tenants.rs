use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode, response::IntoResponse};

use windcms_infra::{IdentityCore, TenantWithAdmin};

use crate::app::dto::TenantCreated;
use crate::app::errors::ApiError;
use crate::authz::require_platform_admin;
use crate::context::PrincipalContext;

/// POST /tenants - tenant plus its first administrator
pub async fn create(
    Extension(core): Extension<Arc<IdentityCore>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<TenantWithAdmin>,
) -> Result<impl IntoResponse, ApiError> {
    require_platform_admin(&principal)?;
    let created = core
        .bounded(core.login.create_tenant_with_admin(body, principal.user_id()))
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(TenantCreated {
            tenant_id: created.tenant.id,
            admin_user_id: created.admin.id,
            role_id: created.role.id,
        }),
    ))
}
