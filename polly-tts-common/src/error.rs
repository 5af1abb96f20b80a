//! Error types for the common library.
//!
//! This module provides a unified error hierarchy using `thiserror` for consistent
//! error handling across the proxy, plus the mapping from errors to the JSON
//! bodies returned to HTTP callers.
//!
//! # Error Categories
//!
//! - `ConfigError`: Missing or invalid configuration
//! - `Error::Validation`: Request validation failures (400)
//! - `Error::QuotaExceeded`: Daily quota exhausted (429)
//! - `Error::Provider`: Speech provider failures (500)
//! - `Error::Timeout`: Synthesis deadline elapsed (500)

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;
use thiserror::Error;

/// Message returned to callers whenever the speech provider fails.
pub const SYNTHESIS_FAILED_MESSAGE: &str = "Failed to synthesize speech";

/// Unified error type for the proxy.
///
/// Every route handler returns this type, so the conversion to an HTTP
/// response lives in one place.
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration errors (missing env vars, invalid values)
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Input validation errors. The message is returned verbatim to the caller.
    #[error("{0}")]
    Validation(String),

    /// The caller has used up its quota for the current window.
    #[error("Rate limit exceeded. You can only make {limit} requests per day.")]
    QuotaExceeded {
        /// Configured number of requests per window
        limit: u32,
    },

    /// Speech provider errors with the provider's diagnostic message.
    #[error("Speech provider {provider} failed: {message}")]
    Provider {
        /// Name of the provider that failed
        provider: String,
        /// Diagnostic message from the provider or describing the failure
        message: String,
    },

    /// Operation timeout errors
    #[error("Operation timed out after {0} seconds")]
    Timeout(u64),
}

impl Error {
    /// Create a new validation error.
    ///
    /// # Example
    ///
    /// ```
    /// use polly_tts_common::error::Error;
    ///
    /// let err = Error::validation("Text is required");
    /// assert_eq!(err.to_string(), "Text is required");
    /// ```
    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation(message.into())
    }

    /// Create a new provider error.
    ///
    /// # Example
    ///
    /// ```
    /// use polly_tts_common::error::Error;
    ///
    /// let err = Error::provider("polly", "Voice is not available");
    /// assert!(err.to_string().contains("polly"));
    /// assert!(err.to_string().contains("Voice is not available"));
    /// ```
    pub fn provider(provider: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Provider {
            provider: provider.into(),
            message: message.into(),
        }
    }

    /// Create a new quota exceeded error.
    pub fn quota_exceeded(limit: u32) -> Self {
        Error::QuotaExceeded { limit }
    }

    /// Create a new timeout error.
    ///
    /// # Example
    ///
    /// ```
    /// use polly_tts_common::error::Error;
    ///
    /// let err = Error::timeout(60);
    /// assert!(err.to_string().contains("60 seconds"));
    /// ```
    pub fn timeout(seconds: u64) -> Self {
        Error::Timeout(seconds)
    }

    /// HTTP status code used when this error is returned to a caller.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::QuotaExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            Error::Provider { .. } | Error::Timeout(_) | Error::Config(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// JSON body returned to a caller.
    ///
    /// Provider failures carry the provider's message in `details`; internal
    /// failures are not described beyond a generic message.
    pub fn to_body(&self) -> serde_json::Value {
        match self {
            Error::Validation(_) | Error::QuotaExceeded { .. } => {
                json!({ "error": self.to_string() })
            }
            Error::Provider { message, .. } => json!({
                "error": SYNTHESIS_FAILED_MESSAGE,
                "details": message,
            }),
            Error::Timeout(_) => json!({
                "error": SYNTHESIS_FAILED_MESSAGE,
                "details": self.to_string(),
            }),
            Error::Config(_) => json!({ "error": "Internal server error" }),
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        (self.status_code(), Json(self.to_body())).into_response()
    }
}

/// Configuration errors.
///
/// These errors occur when loading or validating configuration from
/// environment variables.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A required environment variable is not set
    #[error("Required environment variable {0} is not set")]
    MissingEnvVar(String),

    /// An environment variable has an invalid value
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(String, String),
}

impl ConfigError {
    /// Create a new missing environment variable error.
    pub fn missing_env_var(name: impl Into<String>) -> Self {
        ConfigError::MissingEnvVar(name.into())
    }

    /// Create a new invalid value error.
    pub fn invalid_value(name: impl Into<String>, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue(name.into(), reason.into())
    }
}

/// Result type alias using the unified Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provider_error_includes_provider_and_message() {
        let err = Error::provider("polly", "The security token is invalid");
        let msg = err.to_string();
        assert!(msg.contains("polly"), "Should contain provider");
        assert!(msg.contains("security token"), "Should contain message");
    }

    #[test]
    fn test_config_error_includes_var_name() {
        let err = ConfigError::missing_env_var("SPEECH_PROVIDER_URL");
        let msg = err.to_string();
        assert!(msg.contains("SPEECH_PROVIDER_URL"), "Should contain variable name");
    }

    #[test]
    fn test_error_from_config_error() {
        let config_err = ConfigError::missing_env_var("TEST_VAR");
        let err: Error = config_err.into();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_timeout_error() {
        let err = Error::timeout(300);
        let msg = err.to_string();
        assert!(msg.contains("300"), "Should contain timeout duration");
        assert!(msg.contains("seconds"), "Should mention seconds");
    }

    #[test]
    fn test_quota_exceeded_mentions_limit() {
        let err = Error::quota_exceeded(12);
        assert_eq!(
            err.to_string(),
            "Rate limit exceeded. You can only make 12 requests per day."
        );
    }

    #[test]
    fn test_validation_message_is_verbatim() {
        let err = Error::validation("Text too long. Maximum 3000 characters.");
        assert_eq!(err.to_string(), "Text too long. Maximum 3000 characters.");
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(Error::validation("x").status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(
            Error::quota_exceeded(1).status_code(),
            StatusCode::TOO_MANY_REQUESTS
        );
        assert_eq!(
            Error::provider("polly", "x").status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(
            Error::timeout(1).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
