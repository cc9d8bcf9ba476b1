//! Error model shared by every layer of the identity core.
//!
//! Each variant maps to exactly one stable wire code. The message carries the
//! specific sub-kind (e.g. "access token is blocked") while the code stays
//! coarse so callers cannot probe token state.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type used across the identity core.
pub type DomainResult<T> = Result<T, DomainError>;

/// Stable, grouped error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    BadRequest,
    Unauthorized,
    IncorrectPassword,
    IncorrectRefreshToken,
    AccessTokenNotFound,
    UserNotFound,
    UserFreeze,
    Forbidden,
    NotFound,
    ServiceUnavailable,
    InternalServerError,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::BadRequest => "BAD_REQUEST",
            ErrorCode::Unauthorized => "UNAUTHORIZED",
            ErrorCode::IncorrectPassword => "INCORRECT_PASSWORD",
            ErrorCode::IncorrectRefreshToken => "INCORRECT_REFRESH_TOKEN",
            ErrorCode::AccessTokenNotFound => "ACCESS_TOKEN_NOT_FOUND",
            ErrorCode::UserNotFound => "USER_NOT_FOUND",
            ErrorCode::UserFreeze => "USER_FREEZE",
            ErrorCode::Forbidden => "FORBIDDEN",
            ErrorCode::NotFound => "NOT_FOUND",
            ErrorCode::ServiceUnavailable => "SERVICE_UNAVAILABLE",
            ErrorCode::InternalServerError => "INTERNAL_SERVER_ERROR",
        }
    }
}

impl core::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity-core error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Input-shape failures, transport-cipher decode failures.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Any token-validation failure.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("incorrect password: {0}")]
    IncorrectPassword(String),

    #[error("incorrect refresh token: {0}")]
    IncorrectRefreshToken(String),

    #[error("access token not found: {0}")]
    AccessTokenNotFound(String),

    #[error("user not found: {0}")]
    UserNotFound(String),

    /// Credential or account is frozen/disabled.
    #[error("user frozen: {0}")]
    UserFreeze(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Transient dependency failure (token cache, deadline).
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// Persistence failures and other unexpected conditions.
    #[error("internal error: {0}")]
    Internal(String),
}

impl DomainError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn incorrect_password(msg: impl Into<String>) -> Self {
        Self::IncorrectPassword(msg.into())
    }

    pub fn incorrect_refresh_token(msg: impl Into<String>) -> Self {
        Self::IncorrectRefreshToken(msg.into())
    }

    pub fn access_token_not_found(msg: impl Into<String>) -> Self {
        Self::AccessTokenNotFound(msg.into())
    }

    pub fn user_not_found(msg: impl Into<String>) -> Self {
        Self::UserNotFound(msg.into())
    }

    pub fn user_freeze(msg: impl Into<String>) -> Self {
        Self::UserFreeze(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn service_unavailable(msg: impl Into<String>) -> Self {
        Self::ServiceUnavailable(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            DomainError::BadRequest(_) => ErrorCode::BadRequest,
            DomainError::Unauthorized(_) => ErrorCode::Unauthorized,
            DomainError::IncorrectPassword(_) => ErrorCode::IncorrectPassword,
            DomainError::IncorrectRefreshToken(_) => ErrorCode::IncorrectRefreshToken,
            DomainError::AccessTokenNotFound(_) => ErrorCode::AccessTokenNotFound,
            DomainError::UserNotFound(_) => ErrorCode::UserNotFound,
            DomainError::UserFreeze(_) => ErrorCode::UserFreeze,
            DomainError::Forbidden(_) => ErrorCode::Forbidden,
            DomainError::NotFound(_) => ErrorCode::NotFound,
            DomainError::ServiceUnavailable(_) => ErrorCode::ServiceUnavailable,
            DomainError::Internal(_) => ErrorCode::InternalServerError,
        }
    }

    /// The message without the code prefix.
    pub fn message(&self) -> &str {
        match self {
            DomainError::BadRequest(m)
            | DomainError::Unauthorized(m)
            | DomainError::IncorrectPassword(m)
            | DomainError::IncorrectRefreshToken(m)
            | DomainError::AccessTokenNotFound(m)
            | DomainError::UserNotFound(m)
            | DomainError::UserFreeze(m)
            | DomainError::Forbidden(m)
            | DomainError::NotFound(m)
            | DomainError::ServiceUnavailable(m)
            | DomainError::Internal(m) => m,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_are_stable_wire_strings() {
        assert_eq!(DomainError::bad_request("x").code().as_str(), "BAD_REQUEST");
        assert_eq!(
            DomainError::incorrect_refresh_token("x").code().as_str(),
            "INCORRECT_REFRESH_TOKEN"
        );
        assert_eq!(DomainError::internal("x").code().as_str(), "INTERNAL_SERVER_ERROR");
    }

    #[test]
    fn message_strips_code() {
        let err = DomainError::unauthorized("access token is blocked");
        assert_eq!(err.message(), "access token is blocked");
        assert_eq!(err.to_string(), "unauthorized: access token is blocked");
    }

    #[test]
    fn code_serializes_screaming_snake() {
        let json = serde_json::to_string(&ErrorCode::UserFreeze).unwrap();
        assert_eq!(json, "\"USER_FREEZE\"");
    }
}
