use axum::{
    Router,
    routing::{get, post},
};

pub mod session;
pub mod system;
pub mod tenants;
pub mod tokens;

/// Endpoints reachable without a bearer token.
pub fn public_router() -> Router {
    Router::new()
        .route("/auth/login", post(session::login))
        .route("/auth/refresh", post(session::refresh))
        .route("/auth/register", post(session::register))
        .route("/auth/validate", post(tokens::validate))
}

/// Endpoints behind the bearer middleware.
pub fn protected_router() -> Router {
    Router::new()
        .route("/auth/whoami", get(session::whoami))
        .route("/auth/logout", post(session::logout))
        .route("/tokens/block", post(tokens::block))
        .route("/tokens/unblock", post(tokens::unblock))
        .route("/tokens/revoke", post(tokens::revoke))
        .route("/tenants", post(tenants::create))
}
