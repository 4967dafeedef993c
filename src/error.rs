//! Application error types

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Application-wide error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL error: {0}")]
    Url(#[from] url::ParseError),

    #[error("Data source error: {0}")]
    Source(String),

    /// The source answered, but with a document that cannot be used.
    #[error("Invalid source data: {0}")]
    InvalidData(String),

    /// A whole discovery level could not be fetched within its retry budget.
    #[error(
        "Failed to fetch recipe level {level} after {:.1}s: {} item(s) still missing {missing_ids:?}",
        elapsed.as_secs_f64(),
        missing_ids.len()
    )]
    LevelFetch {
        level: usize,
        missing_ids: Vec<u32>,
        elapsed: Duration,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("A price refresh is already in progress")]
    RefreshInProgress,

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Whether retrying the same request later could succeed
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Http(e) => {
                if e.is_decode() {
                    return false;
                }
                match e.status() {
                    Some(s) => !s.is_client_error() || s == reqwest::StatusCode::TOO_MANY_REQUESTS,
                    None => true,
                }
            }
            AppError::Source(_) | AppError::Io(_) => true,
            _ => false,
        }
    }
}

/// Serializable error response for UI surfaces
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: String,
    pub message: String,
}

impl From<&AppError> for ErrorResponse {
    fn from(err: &AppError) -> Self {
        let code = match err {
            AppError::Database(_) => "DATABASE_ERROR",
            AppError::Serialization(_) => "SERIALIZATION_ERROR",
            AppError::Http(_) => "HTTP_ERROR",
            AppError::Url(_) => "URL_ERROR",
            AppError::Source(_) => "SOURCE_ERROR",
            AppError::InvalidData(_) => "INVALID_DATA",
            AppError::LevelFetch { .. } => "LEVEL_FETCH_FAILED",
            AppError::Cancelled => "CANCELLED",
            AppError::RefreshInProgress => "REFRESH_IN_PROGRESS",
            AppError::Validation(_) => "VALIDATION_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Config(_) => "CONFIG_ERROR",
            AppError::Io(_) => "IO_ERROR",
            AppError::Internal(_) => "INTERNAL_ERROR",
        };

        ErrorResponse {
            code: code.to_string(),
            message: err.to_string(),
        }
    }
}

impl From<AppError> for ErrorResponse {
    fn from(err: AppError) -> Self {
        ErrorResponse::from(&err)
    }
}

impl serde::Serialize for AppError {
    fn serialize<S>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: serde::ser::Serializer,
    {
        ErrorResponse::from(self).serialize(serializer)
    }
}

pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_level_fetch_message_carries_context() {
        let err = AppError::LevelFetch {
            level: 2,
            missing_ids: vec![5057, 5058],
            elapsed: Duration::from_millis(12_500),
        };
        let message = err.to_string();
        assert!(message.contains("level 2"));
        assert!(message.contains("12.5s"));
        assert!(message.contains("5057"));

        let response = ErrorResponse::from(&err);
        assert_eq!(response.code, "LEVEL_FETCH_FAILED");
    }

    #[test]
    fn test_source_errors_are_transient() {
        assert!(AppError::Source("timeout".to_string()).is_transient());
        assert!(!AppError::Validation("bad".to_string()).is_transient());
        assert!(!AppError::Cancelled.is_transient());
        assert!(!AppError::InvalidData("no item".to_string()).is_transient());
    }
}
