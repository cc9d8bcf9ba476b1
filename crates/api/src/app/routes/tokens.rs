//! Token validation and administration.

use std::sync::Arc;

use axum::{Json, extract::Extension, http::StatusCode};

use windcms_auth::ClientType;
use windcms_infra::{AuditEvent, AuditKind, AuthenticateRequest, BlockRequest, BlockedToken, IdentityCore};

use crate::app::dto::{RevokeRequest, UnblockRequest, ValidateRequest, ValidateResponse};
use crate::app::errors::ApiError;
use crate::authz::authorize_session_admin;
use crate::context::PrincipalContext;

/// POST /auth/validate - always 200; failures are reported in the body.
pub async fn validate(
    Extension(core): Extension<Arc<IdentityCore>>,
    Json(body): Json<ValidateRequest>,
) -> Json<ValidateResponse> {
    let request = AuthenticateRequest::from(body);
    match core.authenticator.authenticate(&request).await {
        Ok(auth) => Json(ValidateResponse::valid(auth)),
        Err(e) => Json(ValidateResponse::invalid(&e)),
    }
}

/// POST /tokens/block
pub async fn block(
    Extension(core): Extension<Arc<IdentityCore>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<BlockRequest>,
) -> Result<Json<BlockedToken>, ApiError> {
    let target = authorize_session_admin(&core, &principal, body.user_id).await?;
    let blocked = core.authenticator.block_token(&body).await?;
    core.audit.record(
        AuditEvent::new(AuditKind::TokenBlocked, target.tenant_id, Some(target.id))
            .client_type(body.client_type)
            .operator(Some(principal.user_id()))
            .detail(format!("jti={} by={}", blocked.jti, principal.user_id())),
    );
    Ok(Json(blocked))
}

/// POST /tokens/unblock
pub async fn unblock(
    Extension(core): Extension<Arc<IdentityCore>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<UnblockRequest>,
) -> Result<StatusCode, ApiError> {
    let target = authorize_session_admin(&core, &principal, body.user_id).await?;
    core.authenticator
        .unblock_token(body.client_type, body.user_id, &body.jti)
        .await?;
    let mut event = AuditEvent::new(AuditKind::TokenUnblocked, target.tenant_id, Some(target.id))
        .operator(Some(principal.user_id()))
        .detail(format!("jti={} by={}", body.jti, principal.user_id()));
    if let Some(ct) = body.client_type {
        event = event.client_type(ct);
    }
    core.audit.record(event);
    Ok(StatusCode::NO_CONTENT)
}

/// POST /tokens/revoke
pub async fn revoke(
    Extension(core): Extension<Arc<IdentityCore>>,
    Extension(principal): Extension<PrincipalContext>,
    Json(body): Json<RevokeRequest>,
) -> Result<StatusCode, ApiError> {
    authorize_session_admin(&core, &principal, body.user_id).await?;
    match body.jti.as_deref() {
        Some(jti) => {
            core.authenticator
                .revoke_token_by_jti(body.client_type, body.user_id, jti)
                .await?
        }
        None => {
            let audiences = body.client_type.map(|ct| vec![ct]).unwrap_or_else(|| ClientType::ALL.to_vec());
            for ct in audiences {
                core.authenticator.revoke_user_token(ct, body.user_id).await?;
            }
        }
    }
    Ok(StatusCode::NO_CONTENT)
}
