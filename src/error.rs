//! Error types for Helpdesk
//!
//! This module defines all error types used throughout the application,
//! using `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Main error type for Helpdesk operations
///
/// This enum encompasses the errors that can occur while loading
/// configuration, talking to the completions API, persisting local state,
/// and accepting uploads.
#[derive(Error, Debug)]
pub enum HelpdeskError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Provider-related errors (API calls, response decoding, etc.)
    #[error("Provider error: {0}")]
    Provider(String),

    /// Neither the primary nor the backup credential is usable
    #[error("Missing credentials: {0}")]
    MissingCredentials(String),

    /// Streaming response could not be obtained or read
    #[error("Stream error: {0}")]
    Stream(String),

    /// A conversation id did not match any stored conversation
    #[error("Conversation with ID {0} not found")]
    ConversationNotFound(String),

    /// Upload validation or write failures
    #[error("Upload error: {0}")]
    Upload(String),

    /// Local key-value storage errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// YAML parsing errors
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// Result type alias for Helpdesk operations
///
/// This is a convenience alias that uses `anyhow::Error` as the error type,
/// allowing for rich error context and easy error propagation.
pub type Result<T> = anyhow::Result<T>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let error = HelpdeskError::Config("invalid format".to_string());
        assert_eq!(error.to_string(), "Configuration error: invalid format");
    }

    #[test]
    fn test_provider_error_display() {
        let error = HelpdeskError::Provider("API timeout".to_string());
        assert_eq!(error.to_string(), "Provider error: API timeout");
    }

    #[test]
    fn test_missing_credentials_error_display() {
        let error = HelpdeskError::MissingCredentials("no valid API keys".to_string());
        assert_eq!(error.to_string(), "Missing credentials: no valid API keys");
    }

    #[test]
    fn test_conversation_not_found_display() {
        let error = HelpdeskError::ConversationNotFound("01HX".to_string());
        assert_eq!(error.to_string(), "Conversation with ID 01HX not found");
    }

    #[test]
    fn test_upload_error_display() {
        let error = HelpdeskError::Upload("File size exceeds 5MB limit".to_string());
        assert_eq!(error.to_string(), "Upload error: File size exceeds 5MB limit");
    }

    #[test]
    fn test_storage_error_display() {
        let error = HelpdeskError::Storage("database connection failed".to_string());
        assert_eq!(
            error.to_string(),
            "Storage error: database connection failed"
        );
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let error: HelpdeskError = io_error.into();
        assert!(matches!(error, HelpdeskError::Io(_)));
    }

    #[test]
    fn test_json_error_conversion() {
        let json_error = serde_json::from_str::<serde_json::Value>("{invalid json}").unwrap_err();
        let error: HelpdeskError = json_error.into();
        assert!(matches!(error, HelpdeskError::Serialization(_)));
    }

    #[test]
    fn test_yaml_error_conversion() {
        let yaml_error = serde_yaml::from_str::<serde_yaml::Value>("invalid: : yaml").unwrap_err();
        let error: HelpdeskError = yaml_error.into();
        assert!(matches!(error, HelpdeskError::Yaml(_)));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<HelpdeskError>();
    }
}
