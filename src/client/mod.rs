pub mod providers;
pub mod rate_limiter;

pub use rate_limiter::RateLimiter;

use crate::config::ProviderSettings;
use crate::{Error, Result};
use std::time::Duration;

/// HTTP client configuration shared by provider clients.
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout duration
    pub timeout: Duration,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Maximum redirects to follow
    pub max_redirects: usize,
    /// User agent string
    pub user_agent: String,
    /// Whether to verify SSL certificates
    pub danger_accept_invalid_certs: bool,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
            user_agent: concat!("geo-corpus/", env!("CARGO_PKG_VERSION"), " (research corpus builder)")
                .to_string(),
            danger_accept_invalid_certs: false,
        }
    }
}

impl HttpClientConfig {
    /// Derive a client config from per-provider settings.
    #[must_use]
    pub fn from_settings(settings: &ProviderSettings) -> Self {
        Self {
            timeout: settings.timeout(),
            danger_accept_invalid_certs: !settings.ssl_verify,
            ..Self::default()
        }
    }
}

/// Build a `reqwest::Client` from the shared config.
pub fn build_http_client(config: &HttpClientConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(config.timeout)
        .connect_timeout(config.connect_timeout)
        .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
        .user_agent(config.user_agent.clone())
        .danger_accept_invalid_certs(config.danger_accept_invalid_certs)
        .gzip(true)
        .build()
        .map_err(Error::Http)
}

/// DOI (Digital Object Identifier) wrapper for type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Doi(String);

impl Doi {
    /// Create a new DOI from a string, validating the format
    pub fn new(doi: &str) -> Result<Self> {
        let cleaned = doi
            .trim()
            .trim_start_matches("doi:")
            .trim_start_matches("https://doi.org/")
            .trim_start_matches("http://dx.doi.org/");

        if cleaned.is_empty() {
            return Err(Error::InvalidInput {
                field: "doi".to_string(),
                reason: "DOI cannot be empty".to_string(),
            });
        }

        if !cleaned.contains('/') {
            return Err(Error::InvalidInput {
                field: "doi".to_string(),
                reason: "DOI must contain a '/' character".to_string(),
            });
        }

        Ok(Self(cleaned.to_string()))
    }

    /// Get the DOI string
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to a URL-safe format
    #[must_use]
    pub fn url_encoded(&self) -> String {
        urlencoding::encode(&self.0).to_string()
    }
}

impl std::fmt::Display for Doi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Doi {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// GEO series accession wrapper (`GSE<digits>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct GeoId(String);

impl GeoId {
    /// Create a GEO series id, validating the accession shape.
    pub fn new(raw: &str) -> Result<Self> {
        let cleaned = raw.trim().to_uppercase();
        let digits = cleaned.strip_prefix("GSE").ok_or_else(|| Error::InvalidInput {
            field: "geo_id".to_string(),
            reason: format!("'{raw}' does not start with GSE"),
        })?;
        if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::InvalidInput {
                field: "geo_id".to_string(),
                reason: format!("'{raw}' is not of the form GSE<digits>"),
            });
        }
        Ok(Self(cleaned))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The numeric part of the accession, used for E-utilities UID mapping.
    #[must_use]
    pub fn digits(&self) -> &str {
        &self.0[3..]
    }
}

impl std::fmt::Display for GeoId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for GeoId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}
