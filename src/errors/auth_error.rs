use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Errors returned by the authentication middleware
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("Missing authorization header or token")]
    MissingAuthHeader,

    #[error("Invalid authorization header format")]
    InvalidAuthHeader,

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Authentication configuration error: {0}")]
    ConfigError(String),
}

pub type AuthResult<T> = Result<T, AuthError>;

impl AuthError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::MissingAuthHeader
            | AuthError::InvalidAuthHeader
            | AuthError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AuthError::ConfigError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            AuthError::MissingAuthHeader => "missing_auth",
            AuthError::InvalidAuthHeader => "invalid_auth_header",
            AuthError::Unauthorized(_) => "unauthorized",
            AuthError::ConfigError(_) => "auth_config_error",
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Configuration problems are logged, not echoed to the client.
        let message = match &self {
            AuthError::ConfigError(detail) => {
                tracing::error!(error = %detail, "Authentication misconfigured");
                "Authentication unavailable".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.code(),
            "message": message,
        }));
        (status, body).into_response()
    }
}
