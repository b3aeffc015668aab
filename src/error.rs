use axum::{http::StatusCode, response::IntoResponse};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

/// Application error type covering every outcome the pipeline can produce.
///
/// Each decorator handles its own kinds and renders the HTTP response; no
/// error escapes past the outermost layer.
#[derive(Error, Debug)]
pub enum AppError {
    // ===== Credential & policy errors =====
    #[error("invalid credential")]
    InvalidCredential,

    #[error("authentication required")]
    AuthRequired,

    #[error("JWT error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),

    // ===== Traffic control errors =====
    #[error("rate limit exceeded")]
    RateLimited,

    #[error("circuit breaker open for downstream '{0}'")]
    CircuitOpen(String),

    #[error("replay protection: {reason}")]
    ReplayRejected { reason: String, malformed: bool },

    // ===== Dependency errors =====
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    // ===== Request validation =====
    #[error("validation error: {0}")]
    Validation(String),

    #[error("not found: {0}")]
    NotFound(String),

    // ===== Serialization =====
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    // ===== Internal =====
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::InvalidCredential | AppError::AuthRequired | AppError::Jwt(_) => {
                StatusCode::UNAUTHORIZED
            }
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::CircuitOpen(_) => StatusCode::SERVICE_UNAVAILABLE,
            AppError::ReplayRejected { malformed, .. } => {
                if *malformed {
                    StatusCode::BAD_REQUEST
                } else {
                    StatusCode::FORBIDDEN
                }
            }
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::DependencyUnavailable(_)
            | AppError::Redis(_)
            | AppError::Database(_)
            | AppError::Json(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable code for programmatic error handling.
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::InvalidCredential => "INVALID_CREDENTIAL",
            AppError::AuthRequired => "AUTH_REQUIRED",
            AppError::Jwt(_) => "INVALID_CREDENTIAL",
            AppError::RateLimited => "RATE_LIMITED",
            AppError::CircuitOpen(_) => "CIRCUIT_OPEN",
            AppError::ReplayRejected { .. } => "REPLAY_REJECTED",
            AppError::DependencyUnavailable(_) | AppError::Redis(_) | AppError::Database(_) => {
                "DEPENDENCY_UNAVAILABLE"
            }
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Json(_) | AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// User-facing message. Never contains credentials or internal detail.
    pub fn user_message(&self) -> String {
        match self {
            AppError::InvalidCredential | AppError::Jwt(_) => {
                "Unauthorized: invalid credential".to_string()
            }
            AppError::AuthRequired => "Unauthorized: missing credentials".to_string(),
            AppError::RateLimited => "Too Many Requests".to_string(),
            AppError::CircuitOpen(_) => "Service Unavailable (circuit open)".to_string(),
            AppError::ReplayRejected { reason, .. } => format!("Replay rejected: {}", reason),
            AppError::Validation(msg) => format!("Validation error: {}", msg),
            AppError::NotFound(what) => format!("Not found: {}", what),
            _ => "Internal server error".to_string(),
        }
    }

    /// Log with a level matched to the outcome class.
    pub fn log(&self) {
        let status = self.status_code();
        let code = self.error_code();

        if status.is_server_error() {
            tracing::error!(error = %self, error_code = %code, "server error");
        } else if status == StatusCode::UNAUTHORIZED {
            tracing::warn!(error = %self, error_code = %code, "authentication failed");
        } else {
            tracing::debug!(error = %self, error_code = %code, "request rejected");
        }
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        AppError::Internal(msg.into())
    }

    pub fn dependency(msg: impl Into<String>) -> Self {
        AppError::DependencyUnavailable(msg.into())
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        self.log();

        let status = self.status_code();
        let body = json!({
            "error": self.user_message(),
            "error_code": self.error_code(),
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_mapping_follows_error_kind() {
        assert_eq!(
            AppError::InvalidCredential.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(AppError::AuthRequired.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(
            AppError::RateLimited.status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            AppError::CircuitOpen("downstream".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            AppError::dependency("redis down").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn replay_status_distinguishes_malformed_from_skewed() {
        let missing = AppError::ReplayRejected {
            reason: "missing X-Timestamp header".into(),
            malformed: true,
        };
        let skewed = AppError::ReplayRejected {
            reason: "timestamp outside window".into(),
            malformed: false,
        };
        assert_eq!(missing.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(skewed.status_code(), StatusCode::FORBIDDEN);
    }

    #[test]
    fn user_message_never_echoes_internals() {
        let err = AppError::dependency("redis://secret-host:6379 unreachable");
        assert_eq!(err.user_message(), "Internal server error");
    }
}
