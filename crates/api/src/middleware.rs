use std::sync::Arc;

use axum::{
    extract::State,
    http::{HeaderMap, header},
    middleware::Next,
    response::Response,
};

use windcms_auth::ClientType;
use windcms_core::DomainError;
use windcms_infra::IdentityCore;

use crate::app::errors::ApiError;
use crate::context::{PrincipalContext, TenantContext};

/// Audience of the bearer token; `app` when absent.
pub const CLIENT_TYPE_HEADER: &str = "x-client-type";

#[derive(Clone)]
pub struct AuthState {
    pub core: Arc<IdentityCore>,
}

pub async fn auth_middleware(
    State(state): State<AuthState>,
    mut req: axum::http::Request<axum::body::Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let token = extract_bearer(req.headers())?.to_owned();
    let client_type = client_type(req.headers())?;

    let principal = state.core.authenticator.principal(client_type, &token).await?;

    req.extensions_mut().insert(TenantContext::new(principal.tenant_id));
    req.extensions_mut().insert(PrincipalContext::new(principal));

    Ok(next.run(req).await)
}

fn extract_bearer(headers: &HeaderMap) -> Result<&str, DomainError> {
    let missing = || DomainError::unauthorized("missing bearer token");
    let value = headers.get(header::AUTHORIZATION).ok_or_else(missing)?;
    let value = value.to_str().map_err(|_| missing())?;
    let token = value.strip_prefix("Bearer ").ok_or_else(missing)?.trim();
    if token.is_empty() {
        return Err(missing());
    }
    Ok(token)
}

fn client_type(headers: &HeaderMap) -> Result<ClientType, DomainError> {
    match headers.get(CLIENT_TYPE_HEADER) {
        None => Ok(ClientType::App),
        Some(v) => v
            .to_str()
            .map_err(|_| DomainError::bad_request("invalid client type header"))?
            .parse(),
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;

    use super::*;

    #[test]
    fn bearer_is_required() {
        let mut headers = HeaderMap::new();
        assert!(extract_bearer(&headers).is_err());
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Basic abc"));
        assert!(extract_bearer(&headers).is_err());
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer  tok "));
        assert_eq!(extract_bearer(&headers).unwrap(), "tok");
    }

    #[test]
    fn client_type_defaults_to_app() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_type(&headers).unwrap(), ClientType::App);
        headers.insert(CLIENT_TYPE_HEADER, HeaderValue::from_static("1"));
        assert_eq!(client_type(&headers).unwrap(), ClientType::Admin);
        headers.insert(CLIENT_TYPE_HEADER, HeaderValue::from_static("robot"));
        assert!(client_type(&headers).is_err());
    }
}
