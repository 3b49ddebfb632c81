//! Error types for clinsync.

use thiserror::Error;

/// Result type alias using clinsync's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for clinsync operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Database operation failed (wraps sqlx::Error)
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Patient not found
    #[error("Patient not found: {0}")]
    PatientNotFound(uuid::Uuid),

    /// Report not found
    #[error("Report not found: {0}")]
    ReportNotFound(uuid::Uuid),

    /// Notification not found
    #[error("Notification not found: {0}")]
    NotificationNotFound(uuid::Uuid),

    /// Change feed subscription or decoding failed
    #[error("Change feed error: {0}")]
    Feed(String),

    /// Report processing failed
    #[error("Processing error: {0}")]
    Processing(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// Authentication/authorization failed
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Forbidden (authenticated but not authorized)
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn test_not_found_variants_carry_the_id() {
        let id = Uuid::new_v4();
        assert_eq!(
            Error::PatientNotFound(id).to_string(),
            format!("Patient not found: {}", id)
        );
        assert_eq!(
            Error::ReportNotFound(id).to_string(),
            format!("Report not found: {}", id)
        );
        assert_eq!(
            Error::NotificationNotFound(id).to_string(),
            format!("Notification not found: {}", id)
        );
    }

    #[test]
    fn test_feed_error_display() {
        let err = Error::Feed("listen channel closed".to_string());
        assert_eq!(err.to_string(), "Change feed error: listen channel closed");
    }

    #[test]
    fn test_processing_error_display() {
        let err = Error::Processing("service timeout".to_string());
        assert_eq!(err.to_string(), "Processing error: service timeout");
    }

    #[test]
    fn test_sqlx_error_converts_to_database() {
        let err: Error = sqlx::Error::RowNotFound.into();
        assert!(matches!(err, Error::Database(_)));
        assert!(err.to_string().starts_with("Database error:"));
    }

    #[test]
    fn test_serde_json_error_converts_to_serialization() {
        let json_err = serde_json::from_str::<i32>("not a number").unwrap_err();
        let err: Error = json_err.into();
        match err {
            Error::Serialization(msg) => assert!(!msg.is_empty()),
            _ => panic!("Expected Serialization error"),
        }
    }

    #[test]
    fn test_io_error_converts_to_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "access denied");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}

        assert_send::<Error>();
        assert_sync::<Error>();
    }
}
