//! Error types for the Shelfshare engine

use thiserror::Error;

/// Stable error codes handed to callers (HTTP layer, CLI, logs)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCode {
    Success = 0,
    Failure = 1,
    NotAuthorized = 2,
    DbFailure = 3,
    NoSuchBook = 5,
    BookNotAvailable = 7,
    Duplicate = 8,
    BadValue = 18,
    NoSuchData = 20,
    InvalidTransition = 22,
    CacheFailure = 23,
    Misconfigured = 24,
}

/// Main application error type
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Authorization failed: {0}")]
    Authorization(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    /// No handler registered for a command/query kind. Deployment defect.
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Unique constraint rejected a write; handlers translate it to a domain error.
    #[error("Duplicate key: {0}")]
    Duplicate(String),

    /// Fast store failure. Swallowed by the cache layer, never returned from a command.
    #[error("Cache error: {0}")]
    Cache(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Validation(_) => ErrorCode::BadValue,
            AppError::NotFound(_) => ErrorCode::NoSuchData,
            AppError::Authorization(_) => ErrorCode::NotAuthorized,
            AppError::Conflict(_) => ErrorCode::InvalidTransition,
            AppError::Configuration(_) => ErrorCode::Misconfigured,
            AppError::Database(_) => ErrorCode::DbFailure,
            AppError::Duplicate(_) => ErrorCode::Duplicate,
            AppError::Cache(_) => ErrorCode::CacheFailure,
            AppError::Internal(_) => ErrorCode::Failure,
        }
    }

    /// Infrastructure errors are the ones a retry might fix
    pub fn is_infrastructure(&self) -> bool {
        matches!(
            self,
            AppError::Database(_) | AppError::Cache(_) | AppError::Internal(_)
        )
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(errors: validator::ValidationErrors) -> Self {
        let mut messages: Vec<String> = errors
            .field_errors()
            .into_iter()
            .flat_map(|(field, errs)| {
                errs.iter().map(move |e| match &e.message {
                    Some(msg) => msg.to_string(),
                    None => format!("{} is invalid", field),
                })
            })
            .collect();
        messages.sort();
        AppError::Validation(messages.join(", "))
    }
}

impl From<redis::RedisError> for AppError {
    fn from(e: redis::RedisError) -> Self {
        AppError::Cache(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Internal(format!("Serialization failed: {}", e))
    }
}

/// Result type alias for application operations
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use validator::Validate;

    #[derive(Validate)]
    struct Sample {
        #[validate(length(min = 1, message = "Title is required"))]
        title: String,
    }

    #[test]
    fn test_validation_errors_are_flattened() {
        let err: AppError = Sample { title: String::new() }.validate().unwrap_err().into();
        assert!(matches!(err, AppError::Validation(ref m) if m == "Title is required"));
        assert_eq!(err.code(), ErrorCode::BadValue);
    }

    #[test]
    fn test_infrastructure_classification() {
        assert!(AppError::Cache("down".into()).is_infrastructure());
        assert!(!AppError::Conflict("pending".into()).is_infrastructure());
    }
}
