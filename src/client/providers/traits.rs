use crate::model::{ProviderTag, Publication, SourceUrl};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Identifier accepted by `lookup`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum LookupId {
    Pmid(u64),
    Doi(String),
}

impl std::fmt::Display for LookupId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LookupId::Pmid(pmid) => write!(f, "PMID:{pmid}"),
            LookupId::Doi(doi) => write!(f, "DOI:{doi}"),
        }
    }
}

/// Context for one provider call.
#[derive(Debug, Clone)]
pub struct ProviderContext {
    /// Timeout for the whole call, including retries
    pub timeout: Duration,
}

impl Default for ProviderContext {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

/// Errors that can occur during provider operations
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Rate limit exceeded")]
    RateLimit,

    #[error("HTTP {code}: {message}")]
    Status { code: u16, message: String },

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("Timeout occurred")]
    Timeout,

    #[error("Provider disabled: {0}")]
    Disabled(String),

    #[error("Provider error: {0}")]
    Other(String),
}

impl ProviderError {
    /// Retry 5xx, 429, and network-shaped failures; never other 4xx.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            ProviderError::Network(_)
            | ProviderError::RateLimit
            | ProviderError::ServiceUnavailable(_)
            | ProviderError::Timeout => true,
            ProviderError::Status { code, .. } => *code == 429 || (500..=599).contains(code),
            ProviderError::Parse(_)
            | ProviderError::InvalidQuery(_)
            | ProviderError::Disabled(_)
            | ProviderError::Other(_) => false,
        }
    }

    /// Map an HTTP status into the retryable/fatal split.
    #[must_use]
    pub fn from_status(code: u16, message: impl Into<String>) -> Self {
        match code {
            429 => ProviderError::RateLimit,
            503 => ProviderError::ServiceUnavailable(message.into()),
            _ => ProviderError::Status {
                code,
                message: message.into(),
            },
        }
    }
}

/// Trait for publication-oriented external providers.
///
/// Every operation is optional: a metadata-only provider keeps the default
/// empty `pdf_candidates`, a URL-only provider keeps the default `lookup`.
/// Absence is a value, not an error.
#[async_trait]
pub trait SourceProvider: Send + Sync {
    /// Which provider this is; carries the waterfall priority band.
    fn tag(&self) -> ProviderTag;

    /// Human-readable description of the provider
    fn description(&self) -> &str;

    /// Whether this provider can yield full-text URLs at all.
    fn serves_urls(&self) -> bool {
        false
    }

    /// Fetch metadata for a known identifier.
    async fn lookup(
        &self,
        _id: &LookupId,
        _context: &ProviderContext,
    ) -> Result<Option<Publication>, ProviderError> {
        Ok(None)
    }

    /// Free-text search.
    async fn search(
        &self,
        _query: &str,
        _limit: u32,
        _context: &ProviderContext,
    ) -> Result<Vec<Publication>, ProviderError> {
        Ok(Vec::new())
    }

    /// Candidate full-text URLs for a publication.
    async fn pdf_candidates(
        &self,
        _publication: &Publication,
        _context: &ProviderContext,
    ) -> Result<Vec<SourceUrl>, ProviderError> {
        Ok(Vec::new())
    }
}
