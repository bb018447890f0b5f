use std::time::Duration;
use thiserror::Error;

/// Error taxonomy for the pipeline.
///
/// Only `Config` and programmer errors abort a request wholesale. Provider,
/// validation, and store failures are recovered locally by the stage that
/// observes them and surfaced as structured result fields.
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (fatal at startup)
    #[error("Configuration error: {0}")]
    Config(String),

    // I/O errors (potentially transient)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors (usually permanent)
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // Network errors (transient)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Network timeout after {timeout:?}: {message}")]
    NetworkTimeout { timeout: Duration, message: String },

    #[error("Provider {provider} returned HTTP {code}: {message}")]
    ProviderStatus {
        provider: String,
        code: u16,
        message: String,
    },

    #[error("Rate limit exceeded: retry after {retry_after:?}")]
    RateLimitExceeded { retry_after: Duration },

    // Client errors (permanent)
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    // Downloaded bytes failed PDF validation
    #[error("Validation failed for {url}: {reason}")]
    Validation { url: String, reason: String },

    // Persistent store problems (disk full, permissions)
    #[error("Store error during {operation}: {reason}")]
    Store { operation: String, reason: String },

    // Request-level deadline exceeded
    #[error("Deadline of {deadline:?} exceeded")]
    Deadline { deadline: Duration },

    #[error("Cache error: {operation} failed - {reason}")]
    Cache { operation: String, reason: String },

    #[error("Index error: {0}")]
    Index(String),

    #[error("Parse error in {context}: {message}")]
    Parse { context: String, message: String },

    #[error("Service temporarily unavailable: {service} - {reason}")]
    ServiceUnavailable { service: String, reason: String },

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

/// Error categorization for retry strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors - should not retry
    Permanent,
    /// Transient errors - safe to retry
    Transient,
    /// Rate limited - retry with backoff
    RateLimited,
}

impl Error {
    /// Categorize error for retry logic
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Config(_)
            | Error::InvalidInput { .. }
            | Error::Validation { .. }
            | Error::Parse { .. }
            | Error::NotFound(_)
            | Error::Deadline { .. }
            | Error::Serde(_) => ErrorCategory::Permanent,

            Error::RateLimitExceeded { .. } => ErrorCategory::RateLimited,

            Error::ProviderStatus { code, .. } => match *code {
                429 => ErrorCategory::RateLimited,
                500..=599 => ErrorCategory::Transient,
                // Other 4xx are permanent for this URL/provider
                400..=499 => ErrorCategory::Permanent,
                _ => ErrorCategory::Transient,
            },

            Error::Http(_)
            | Error::NetworkTimeout { .. }
            | Error::ServiceUnavailable { .. }
            | Error::Store { .. }
            | Error::Cache { .. }
            | Error::Index(_)
            | Error::Provider(_)
            | Error::Io(_) => ErrorCategory::Transient,
        }
    }

    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::RateLimited
        )
    }

    /// Get suggested retry delay for rate limited errors
    #[must_use]
    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            Error::RateLimitExceeded { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// Provider error conversion
impl From<crate::client::providers::ProviderError> for Error {
    fn from(err: crate::client::providers::ProviderError) -> Self {
        use crate::client::providers::ProviderError;
        match err {
            ProviderError::Network(msg) => Error::Provider(format!("Network error: {msg}")),
            ProviderError::Parse(msg) => Error::Parse {
                context: "provider".to_string(),
                message: msg,
            },
            ProviderError::RateLimit => Error::RateLimitExceeded {
                retry_after: Duration::from_secs(60),
            },
            ProviderError::Status { code, message } => Error::ProviderStatus {
                provider: "provider".to_string(),
                code,
                message,
            },
            ProviderError::InvalidQuery(msg) => Error::InvalidInput {
                field: "query".to_string(),
                reason: msg,
            },
            ProviderError::ServiceUnavailable(msg) => Error::ServiceUnavailable {
                service: "provider".to_string(),
                reason: msg,
            },
            ProviderError::Timeout => Error::NetworkTimeout {
                timeout: Duration::from_secs(30),
                message: "provider call timed out".to_string(),
            },
            ProviderError::Disabled(msg) | ProviderError::Other(msg) => Error::Provider(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_categorize_for_retry() {
        let too_many = Error::ProviderStatus {
            provider: "unpaywall".into(),
            code: 429,
            message: String::new(),
        };
        assert_eq!(too_many.category(), ErrorCategory::RateLimited);

        let server = Error::ProviderStatus {
            provider: "crossref".into(),
            code: 503,
            message: String::new(),
        };
        assert!(server.is_retryable());

        let forbidden = Error::ProviderStatus {
            provider: "pmc".into(),
            code: 403,
            message: String::new(),
        };
        assert!(!forbidden.is_retryable());
    }

    #[test]
    fn validation_and_deadline_are_permanent() {
        let v = Error::Validation {
            url: "https://example.org/x.pdf".into(),
            reason: "missing %PDF magic".into(),
        };
        assert_eq!(v.category(), ErrorCategory::Permanent);

        let d = Error::Deadline {
            deadline: Duration::from_millis(500),
        };
        assert!(!d.is_retryable());
    }
}
