//! Error types for mailguard-rs

use std::time::Duration;
use thiserror::Error;

/// Result type alias for guard operations
pub type Result<T> = std::result::Result<T, GuardError>;

/// Guard error types
#[derive(Error, Debug)]
pub enum GuardError {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP client error
    #[error("HTTP error: {0}")]
    Http(String),

    /// Backend could not be reached (connection refused, DNS, reset...)
    #[error("Backend unreachable: {0}")]
    BackendUnreachable(String),

    /// Backend did not answer in time
    #[error("Backend request timed out after {0:?}")]
    Timeout(Duration),

    /// Backend answered with a non-2xx status
    #[error("Backend returned HTTP {status}: {reason}")]
    BackendStatus { status: u16, reason: String },

    /// Backend answered 2xx with a body we cannot decode
    #[error("Malformed backend response: {0}")]
    MalformedResponse(String),

    /// Invalid CSS selector in a locator
    #[error("Invalid selector '{selector}': {reason}")]
    Selector { selector: String, reason: String },

    /// Page rewriting failed
    #[error("Render error: {0}")]
    Render(String),

    /// Template rendering failed
    #[error("Template error: {0}")]
    Template(#[from] askama::Error),

    /// Persistent store error
    #[error("Storage error: {0}")]
    Storage(String),

    /// The runtime is no longer accepting events
    #[error("Runtime stopped")]
    Shutdown,
}

impl GuardError {
    /// Whether the error means the backend is unavailable rather than broken
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            GuardError::BackendUnreachable(_) | GuardError::Timeout(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_classification() {
        assert!(GuardError::Timeout(Duration::from_secs(10)).is_unavailable());
        assert!(GuardError::BackendUnreachable("refused".to_string()).is_unavailable());
        assert!(!GuardError::BackendStatus {
            status: 500,
            reason: "Internal Server Error".to_string()
        }
        .is_unavailable());
        assert!(!GuardError::MalformedResponse("missing field".to_string()).is_unavailable());
    }

    #[test]
    fn test_status_display() {
        let err = GuardError::BackendStatus {
            status: 503,
            reason: "Service Unavailable".to_string(),
        };
        assert_eq!(err.to_string(), "Backend returned HTTP 503: Service Unavailable");
    }
}
