use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use windcms_core::{DomainError, ErrorCode};

/// Domain error rendered as `{"error": CODE, "message": ...}`.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        Self(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let code = self.0.code();
        let status = status_for(code);
        if status.is_server_error() {
            tracing::error!(error = %self.0, "request failed");
        }
        json_error(status, code.as_str(), self.0.message())
    }
}

pub fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::BadRequest => StatusCode::BAD_REQUEST,
        ErrorCode::Unauthorized | ErrorCode::IncorrectPassword | ErrorCode::IncorrectRefreshToken => {
            StatusCode::UNAUTHORIZED
        }
        ErrorCode::UserFreeze | ErrorCode::Forbidden => StatusCode::FORBIDDEN,
        ErrorCode::AccessTokenNotFound | ErrorCode::UserNotFound | ErrorCode::NotFound => StatusCode::NOT_FOUND,
        ErrorCode::ServiceUnavailable => StatusCode::SERVICE_UNAVAILABLE,
        ErrorCode::InternalServerError => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

pub fn json_error(status: StatusCode, code: &'static str, message: impl Into<String>) -> Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
