//! Login, refresh, logout and self-registration.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Json,
    extract::{ConnectInfo, Extension},
    http::StatusCode,
    response::IntoResponse,
};
use serde_json::json;

use windcms_infra::{Grant, IdentityCore, LoginRequest, LoginResponse, RegisterRequest};

use crate::app::dto::{RefreshRequest, UserSummary};
use crate::app::errors::ApiError;
use crate::context::PrincipalContext;

/// POST /auth/login - password or refresh grant
pub async fn login(
    Extension(core): Extension<Arc<IdentityCore>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(mut body): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    body.ip = peer.map(|ConnectInfo(addr)| addr.ip());
    Ok(Json(core.bounded(core.login.login(&body)).await?))
}

/// POST /auth/refresh - rotate a token pair
pub async fn refresh(
    Extension(core): Extension<Arc<IdentityCore>>,
    peer: Option<ConnectInfo<SocketAddr>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let request = LoginRequest {
        client_type: body.client_type,
        grant: Grant::RefreshToken {
            user_id: body.user_id,
            refresh_token: body.refresh_token,
        },
        client_id: body.client_id,
        device_id: body.device_id,
        ip: peer.map(|ConnectInfo(addr)| addr.ip()),
    };
    Ok(Json(core.bounded(core.login.login(&request)).await?))
}

/// POST /auth/logout - drop every session of the caller in its audience
pub async fn logout(
    Extension(core): Extension<Arc<IdentityCore>>,
    Extension(principal): Extension<PrincipalContext>,
) -> Result<StatusCode, ApiError> {
    core.bounded(core.login.logout(principal.client_type(), principal.user_id()))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /auth/register
pub async fn register(
    Extension(core): Extension<Arc<IdentityCore>>,
    Json(body): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let user = core.bounded(core.login.register_user(body)).await?;
    Ok((StatusCode::CREATED, Json(UserSummary::from(user))))
}

/// GET /auth/whoami
pub async fn whoami(Extension(principal): Extension<PrincipalContext>) -> impl IntoResponse {
    let p = principal.principal();
    Json(json!({
        "user_id": p.user_id,
        "tenant_id": p.tenant_id,
        "client_type": p.client_type,
        "jti": p.jti,
        "username": p.username,
        "roles": p.roles,
    }))
}
