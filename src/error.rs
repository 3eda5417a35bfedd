// src/error.rs

//! Unified error handling for the view tracking services.

use std::fmt;

use http::StatusCode;
use thiserror::Error;

/// Result type alias for tracking operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// Missing or malformed request input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Request verb not accepted by the handler
    #[error("Method not allowed: {0}")]
    MethodNotAllowed(String),

    /// Persistence unavailable or rejected the operation
    #[error("Storage error: {0}")]
    Storage(String),

    /// Operation requires an authenticated viewer
    #[error("Authentication required")]
    Unauthorized,

    /// AWS S3 error
    #[error("S3 error: {0}")]
    S3(String),

    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput(message.into())
    }

    /// Create a method-not-allowed error for the given verb.
    pub fn method_not_allowed(method: impl fmt::Display) -> Self {
        Self::MethodNotAllowed(method.to_string())
    }

    /// Create a storage error.
    pub fn storage(message: impl fmt::Display) -> Self {
        Self::Storage(message.to_string())
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// HTTP status class this error maps to.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidInput(_) | Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::MethodNotAllowed(_) => StatusCode::METHOD_NOT_ALLOWED,
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the failure lies in the persistence layer.
    pub fn is_storage(&self) -> bool {
        matches!(self, Self::Storage(_) | Self::S3(_) | Self::Io(_))
    }
}
