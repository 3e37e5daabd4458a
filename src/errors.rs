// src/errors.rs
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("MongoDB error: {0}")]
    MongoDB(#[from] mongodb::error::Error),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Provider rejected request: {0}")]
    ProviderRejected(String),

    #[error("Provider unreachable: {0}")]
    ProviderUnreachable(String),

    #[error("Duplicate key error")]
    DuplicateKey,

    #[error("Transaction not found")]
    NotFound,

    #[error("Unauthorized access")]
    Unauthorized,

    #[error("Invalid webhook signature: {0}")]
    InvalidSignature(String),

    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    #[error("Notification error: {0}")]
    NotificationError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, error_message) = match &self {
            AppError::MongoDB(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Database error".to_string()),
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ProviderRejected(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::ProviderUnreachable(_) => (StatusCode::BAD_GATEWAY, "Payment provider unreachable".to_string()),
            AppError::DuplicateKey => (StatusCode::CONFLICT, "Transaction already exists".to_string()),
            AppError::NotFound => (StatusCode::NOT_FOUND, "Transaction not found".to_string()),
            AppError::Unauthorized => (StatusCode::FORBIDDEN, "Unauthorized".to_string()),
            AppError::InvalidSignature(msg) => (StatusCode::BAD_REQUEST, format!("Webhook Error: {}", msg)),
            AppError::RateLimitExceeded => (StatusCode::TOO_MANY_REQUESTS, "Too many requests. Please try again later.".to_string()),
            AppError::ServiceUnavailable(msg) => (StatusCode::SERVICE_UNAVAILABLE, msg.clone()),
            AppError::ConfigurationError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Configuration error".to_string()),
            AppError::NotificationError(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Notification error".to_string()),
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }));

        (status, body).into_response()
    }
}

// Manual From implementations
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::ValidationError(format!("JSON parsing error: {}", err))
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(err: validator::ValidationErrors) -> Self {
        AppError::ValidationError(err.to_string())
    }
}

impl From<reqwest::Error> for AppError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() {
            AppError::ProviderUnreachable(err.to_string())
        } else {
            AppError::ProviderRejected(format!("HTTP request failed: {}", err))
        }
    }
}

// Helper constructors
impl AppError {
    pub fn invalid_data(msg: impl Into<String>) -> Self {
        AppError::ValidationError(msg.into())
    }

    pub fn rejected(msg: impl Into<String>) -> Self {
        AppError::ProviderRejected(msg.into())
    }

    pub fn unreachable(msg: impl Into<String>) -> Self {
        AppError::ProviderUnreachable(msg.into())
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        AppError::ConfigurationError(msg.into())
    }
}

pub type Result<T> = std::result::Result<T, AppError>;
