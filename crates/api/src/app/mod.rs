//! Router assembly.
//!
//! - `routes/`: handlers, one file per area
//! - `dto.rs`: wire shapes that differ from the service types
//! - `errors.rs`: `{error, message}` responses

use std::sync::Arc;

use axum::{Extension, Router, routing::get};
use tower::ServiceBuilder;

use windcms_infra::IdentityCore;

use crate::middleware;

pub mod dto;
pub mod errors;
pub mod routes;

/// Full router over an assembled identity core.
pub fn build_app(core: IdentityCore) -> Router {
    let core = Arc::new(core);
    let auth_state = middleware::AuthState { core: Arc::clone(&core) };

    let protected = routes::protected_router().layer(axum::middleware::from_fn_with_state(
        auth_state,
        middleware::auth_middleware,
    ));

    Router::new()
        .route("/health", get(routes::system::health))
        .merge(routes::public_router())
        .merge(protected)
        .layer(ServiceBuilder::new().layer(Extension(core)))
}
