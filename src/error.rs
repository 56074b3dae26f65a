//! Error types for promptrelay.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Result type alias for promptrelay operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for promptrelay.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),

    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("Guardrail violation: {reason}")]
    Guardrail { reason: String },

    #[error("Prompt version '{id}' not found")]
    VersionNotFound { id: String },

    #[error("Output failed schema validation: {reason}")]
    Schema { reason: String },

    #[error("Rate limit exceeded for '{identifier}'")]
    RateLimited { identifier: String },

    #[error("All providers exhausted. Last error: {last}")]
    Exhausted { last: String },

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Short machine-readable code for the structured error body.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "config_error",
            Error::Validation(_) => "invalid_request",
            Error::Guardrail { .. } => "guardrail_violation",
            Error::VersionNotFound { .. } => "version_not_found",
            Error::Schema { .. } => "schema_violation",
            Error::RateLimited { .. } => "rate_limited",
            Error::Exhausted { .. } => "providers_exhausted",
            Error::Database(_) => "storage_error",
            Error::Internal(_) => "internal_error",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            Error::Config(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::Guardrail { .. } => StatusCode::BAD_REQUEST,
            Error::VersionNotFound { .. } => StatusCode::NOT_FOUND,
            Error::Schema { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            Error::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Exhausted { .. } => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let status = self.status();

        // Raw database errors never leak to callers
        let message = match &self {
            Error::Database(_) => "A storage error occurred".to_string(),
            other => other.to_string(),
        };

        let body = serde_json::json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            Error::Validation("bad".into()).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::Guardrail {
                reason: "pii".into()
            }
            .status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            Error::VersionNotFound { id: "v1".into() }.status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            Error::Schema {
                reason: "missing key".into()
            }
            .status(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
        assert_eq!(
            Error::RateLimited {
                identifier: "k".into()
            }
            .status(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::Exhausted {
                last: "HTTP 503".into()
            }
            .status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_exhausted_preserves_last_error_message() {
        let err = Error::Exhausted {
            last: "nvidia API failed after 3 attempts. HTTP 503: overloaded".into(),
        };
        let rendered = err.to_string();
        assert!(rendered.contains("HTTP 503: overloaded"));
        assert!(rendered.contains("All providers exhausted"));
    }

    #[test]
    fn test_codes_are_stable() {
        assert_eq!(Error::Validation("x".into()).code(), "invalid_request");
        assert_eq!(
            Error::Guardrail { reason: "x".into() }.code(),
            "guardrail_violation"
        );
        assert_eq!(
            Error::Schema { reason: "x".into() }.code(),
            "schema_violation"
        );
        assert_eq!(
            Error::RateLimited {
                identifier: "x".into()
            }
            .code(),
            "rate_limited"
        );
    }
}
