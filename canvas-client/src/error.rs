//! Error types for client operations.

use canvas_core::CanvasError;
use thiserror::Error;

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

/// Errors raised by the orchestration layer and its collaborators.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An engine error, including prompt input errors.
    #[error(transparent)]
    Canvas(#[from] CanvasError),

    /// No generation backend is configured.
    #[error("No generation backend available")]
    NoBackend,

    /// The configured base URL is invalid.
    #[error("Invalid API URL: {0}")]
    InvalidUrl(String),

    /// HTTP layer failed (connection, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// A payload could not be parsed.
    #[error("Failed to parse payload: {0}")]
    Json(#[from] serde_json::Error),

    /// The API answered with an error envelope.
    #[error("API error {code}: {message}")]
    Api {
        /// Error code from the envelope.
        code: String,
        /// Human readable message.
        message: String,
    },

    /// The service is temporarily unavailable (overloaded, 5xx, 429).
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    /// The response did not have the expected structure.
    #[error("Unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl ClientError {
    /// Returns true for transient failures worth retrying.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Http(e) => !e.is_status() || e.status().is_some_and(|s| s.is_server_error()),
            Self::Unavailable(_) => true,
            _ => false,
        }
    }

    /// Returns true for errors the user caused and should see inline.
    #[must_use]
    pub fn is_input_error(&self) -> bool {
        match self {
            Self::Canvas(e) => e.is_input_error(),
            Self::NoBackend => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_input_errors() {
        assert!(ClientError::NoBackend.is_input_error());
        assert!(ClientError::from(CanvasError::EmptyPrompt).is_input_error());
        assert!(!ClientError::from(CanvasError::ElementNotFound("k".into())).is_input_error());
        assert!(!ClientError::UnexpectedResponse("x".into()).is_input_error());
    }

    #[test]
    fn test_api_errors_are_not_retryable() {
        let err = ClientError::Api {
            code: "BAD_REQUEST".into(),
            message: "nope".into(),
        };
        assert!(!err.is_retryable());
        assert!(ClientError::Unavailable("503".into()).is_retryable());
        assert_eq!(err.to_string(), "API error BAD_REQUEST: nope");
    }
}
