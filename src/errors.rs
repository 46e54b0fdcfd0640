use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authentication error: {0}")]
    AuthenticationError(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Insufficient funds")]
    InsufficientFunds,

    /// Responsible-gaming denial; carries the reason shown to the player.
    #[error("Limit exceeded: {0}")]
    LimitExceeded(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Too many requests")]
    RateLimited,

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("JWT error: {0}")]
    JwtError(String),

    #[error("Encryption error: {0}")]
    EncryptionError(String),

    #[error("IO error: {0}")]
    IoError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::ValidationError(_) => StatusCode::BAD_REQUEST,
            AppError::AuthenticationError(_) | AppError::JwtError(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InsufficientFunds | AppError::LimitExceeded(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            AppError::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            AppError::RateLimited => StatusCode::TOO_MANY_REQUESTS,
            AppError::NetworkError(_) => StatusCode::BAD_GATEWAY,
            AppError::DatabaseError(_)
            | AppError::InternalError(_)
            | AppError::EncryptionError(_)
            | AppError::IoError(_)
            | AppError::ConfigError(_)
            | AppError::SerializationError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to show to the player. Server-side failures collapse into
    /// one canned message so internals never leak.
    pub fn user_message(&self) -> String {
        match self {
            AppError::ValidationError(msg)
            | AppError::AuthenticationError(msg)
            | AppError::Forbidden(msg)
            | AppError::NotFound(msg)
            | AppError::Conflict(msg)
            | AppError::PayloadTooLarge(msg)
            | AppError::LimitExceeded(msg) => msg.clone(),
            AppError::JwtError(_) => "Sessão inválida ou expirada. Faça login novamente.".to_string(),
            AppError::InsufficientFunds => "Saldo insuficiente. Faça um depósito.".to_string(),
            AppError::RateLimited => "Muitas requisições. Aguarde um instante.".to_string(),
            AppError::NetworkError(_) => {
                "Serviço externo indisponível. Tente novamente.".to_string()
            }
            _ => "Ocorreu um erro inesperado. Tente novamente mais tarde.".to_string(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(action = "request_failed", status = %status, error = %self);
        }
        (status, Json(json!({ "error": self.user_message() }))).into_response()
    }
}

impl From<sqlx::Error> for AppError {
    fn from(err: sqlx::Error) -> Self {
        AppError::DatabaseError(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AppError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AppError::EncryptionError(err.to_string())
    }
}

impl From<jsonwebtoken::errors::Error> for AppError {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        AppError::JwtError(err.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        AppError::NetworkError(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::IoError(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_errors_hide_details() {
        let err = AppError::DatabaseError("no such table: users".to_string());
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!err.user_message().contains("users"));
    }

    #[test]
    fn test_client_errors_keep_message() {
        let err = AppError::AuthenticationError("Senha incorreta".to_string());
        assert_eq!(err.status_code(), StatusCode::UNAUTHORIZED);
        assert_eq!(err.user_message(), "Senha incorreta");
        assert_eq!(
            AppError::InsufficientFunds.status_code(),
            StatusCode::UNPROCESSABLE_ENTITY
        );
    }
}
