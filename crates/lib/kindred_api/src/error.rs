//! Application error types.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use kindred_core::auth::AuthError;
use thiserror::Error;
use tracing::error;

use crate::models::ErrorResponse;

/// Convenience alias for handler return types.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level errors with HTTP status mapping.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid credentials")]
    InvalidCredentials,

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Email not verified")]
    EmailNotVerified,

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Gone: {0}")]
    Gone(String),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("Internal server error")]
    Internal(String),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Validation(_) | AppError::InvalidCredentials => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) | AppError::EmailNotVerified => StatusCode::FORBIDDEN,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Gone(_) => StatusCode::GONE,
            AppError::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let (error, message) = match &self {
            AppError::Validation(m) => ("validation_error", m.as_str()),
            AppError::InvalidCredentials => ("invalid_credentials", "Invalid credentials"),
            AppError::NotFound(m) => ("not_found", m.as_str()),
            AppError::Unauthorized(m) => ("unauthorized", m.as_str()),
            AppError::Forbidden(m) => ("forbidden", m.as_str()),
            AppError::EmailNotVerified => ("email_not_verified", "Email not verified"),
            AppError::Conflict(m) => ("conflict", m.as_str()),
            AppError::Gone(m) => ("gone", m.as_str()),
            AppError::StoreUnavailable(_) => {
                ("store_unavailable", "Service temporarily unavailable")
            }
            AppError::Internal(_) => ("internal_error", "Internal server error"),
        };
        let body = Json(ErrorResponse {
            error: error.to_string(),
            message: message.to_string(),
        });
        (status, body).into_response()
    }
}

impl From<AuthError> for AppError {
    fn from(e: AuthError) -> Self {
        match e {
            AuthError::Unauthorized => AppError::Unauthorized("Authentication required".into()),
            AuthError::Forbidden => AppError::Forbidden("Access revoked".into()),
            AuthError::InvalidCredentials => AppError::InvalidCredentials,
            AuthError::EmailNotVerified => AppError::EmailNotVerified,
            AuthError::NotFound => AppError::NotFound("Not found".into()),
            AuthError::TokenExpired => AppError::Gone("Token expired".into()),
            AuthError::TokenConsumed => AppError::Conflict("Token already used".into()),
            AuthError::EmailAlreadyExists => AppError::Conflict("Email already exists".into()),
            AuthError::ValidationError(msg) => AppError::Validation(msg),
            AuthError::Store(e) => {
                error!(error = %e, "auth store fault");
                AppError::StoreUnavailable(e.to_string())
            }
            AuthError::Internal(msg) => {
                error!(error = %msg, "internal auth error");
                AppError::Internal(msg)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use kindred_core::store::StoreError;

    use super::*;

    #[test]
    fn auth_outcomes_map_to_distinct_statuses() {
        let cases = [
            (AuthError::Unauthorized, StatusCode::UNAUTHORIZED),
            (AuthError::Forbidden, StatusCode::FORBIDDEN),
            (AuthError::EmailNotVerified, StatusCode::FORBIDDEN),
            (AuthError::InvalidCredentials, StatusCode::BAD_REQUEST),
            (AuthError::NotFound, StatusCode::NOT_FOUND),
            (AuthError::TokenExpired, StatusCode::GONE),
            (AuthError::TokenConsumed, StatusCode::CONFLICT),
            (
                AuthError::Store(StoreError::Timeout(Duration::from_secs(1))),
                StatusCode::SERVICE_UNAVAILABLE,
            ),
        ];
        for (auth, status) in cases {
            assert_eq!(AppError::from(auth).status(), status);
        }
    }
}
