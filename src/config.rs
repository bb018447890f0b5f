//! Typed configuration for the pipeline.
//!
//! Configuration is read once at startup: an optional TOML file layered with
//! `GEOCORPUS_`-prefixed environment variables, plus a handful of well-known
//! identity variables (`NCBI_API_KEY`, `NCBI_EMAIL`, `OPENALEX_MAILTO`,
//! `CORE_API_KEY`, `EZPROXY_BASE_URL`). Components receive the resulting
//! structs by injection; nothing reads the environment after startup.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// How a provider authenticates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthMode {
    #[default]
    None,
    Email,
    ApiKey,
    Both,
}

/// Per-provider settings.
///
/// `enable` is tri-state: `Some(true)` is an explicit opt-in (missing
/// credentials then abort startup), `None` takes the provider's default and
/// degrades to disabled when credentials are missing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSettings {
    pub enable: Option<bool>,
    pub base_url: Option<String>,
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_rate_limit")]
    pub rate_limit_per_sec: f64,
    #[serde(default)]
    pub auth: AuthMode,
    #[serde(default = "default_true")]
    pub ssl_verify: bool,
}

fn default_timeout_ms() -> u64 {
    30_000
}
fn default_max_retries() -> u32 {
    3
}
fn default_rate_limit() -> f64 {
    3.0
}
fn default_true() -> bool {
    true
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            enable: None,
            base_url: None,
            timeout_ms: default_timeout_ms(),
            max_retries: default_max_retries(),
            rate_limit_per_sec: default_rate_limit(),
            auth: AuthMode::None,
            ssl_verify: true,
        }
    }
}

impl ProviderSettings {
    /// Effective enable flag given the provider's default.
    #[must_use]
    pub fn enabled_or(&self, default: bool) -> bool {
        self.enable.unwrap_or(default)
    }

    /// Whether the operator explicitly turned this provider on.
    #[must_use]
    pub fn explicitly_enabled(&self) -> bool {
        self.enable == Some(true)
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Sci-Hub mirror list and PDF extraction selectors are configuration, not
/// code: the working subset changes without notice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SciHubSettings {
    #[serde(flatten)]
    pub provider: ProviderSettings,
    #[serde(default = "default_sci_hub_mirrors")]
    pub mirrors: Vec<String>,
    #[serde(default = "default_pdf_selectors")]
    pub pdf_selectors: Vec<String>,
}

fn default_sci_hub_mirrors() -> Vec<String> {
    vec![
        "https://sci-hub.se".to_string(),
        "https://sci-hub.st".to_string(),
    ]
}

fn default_pdf_selectors() -> Vec<String> {
    vec![
        "embed#pdf".to_string(),
        "iframe#pdf".to_string(),
        "embed[type=\"application/pdf\"]".to_string(),
    ]
}

impl Default for SciHubSettings {
    fn default() -> Self {
        Self {
            provider: ProviderSettings {
                enable: Some(false),
                rate_limit_per_sec: 0.5,
                ..ProviderSettings::default()
            },
            mirrors: default_sci_hub_mirrors(),
            pdf_selectors: default_pdf_selectors(),
        }
    }
}

/// Settings for every external provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    pub geo: ProviderSettings,
    pub pubmed: ProviderSettings,
    pub pmc: ProviderSettings,
    pub openalex: ProviderSettings,
    pub unpaywall: ProviderSettings,
    pub crossref: ProviderSettings,
    pub core: ProviderSettings,
    pub europe_pmc: ProviderSettings,
    pub biorxiv: ProviderSettings,
    pub arxiv: ProviderSettings,
    pub sci_hub: SciHubSettings,
    pub libgen: ProviderSettings,
    pub proxy: ProviderSettings,
}

impl Default for ProvidersConfig {
    fn default() -> Self {
        Self {
            geo: ProviderSettings::default(),
            pubmed: ProviderSettings::default(),
            pmc: ProviderSettings::default(),
            openalex: ProviderSettings::default(),
            unpaywall: ProviderSettings {
                auth: AuthMode::Email,
                ..ProviderSettings::default()
            },
            crossref: ProviderSettings::default(),
            core: ProviderSettings {
                auth: AuthMode::ApiKey,
                ..ProviderSettings::default()
            },
            europe_pmc: ProviderSettings::default(),
            biorxiv: ProviderSettings::default(),
            arxiv: ProviderSettings::default(),
            sci_hub: SciHubSettings::default(),
            libgen: ProviderSettings::default(),
            proxy: ProviderSettings::default(),
        }
    }
}

/// Parallelism bounds for one request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    pub datasets_in_parallel: usize,
    pub pubs_per_dataset: usize,
    pub downloads_global: usize,
    /// Cap on simultaneous provider tasks inside one URL collection.
    pub collector_fanout: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            datasets_in_parallel: 5,
            pubs_per_dataset: 5,
            downloads_global: 5,
            collector_fanout: 16,
        }
    }
}

/// Enrichment toggles.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EnrichmentConfig {
    pub include_citing_papers: bool,
    pub max_citing_papers: usize,
    pub download_pdfs: bool,
    pub include_full_content: bool,
    pub enable_gray_sources: bool,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            include_citing_papers: true,
            max_citing_papers: 100,
            download_pdfs: true,
            include_full_content: false,
            enable_gray_sources: false,
        }
    }
}

/// Filesystem layout.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_root: PathBuf,
    pub index_db_path: PathBuf,
    pub cache_spill_path: Option<PathBuf>,
}

impl Default for PathsConfig {
    fn default() -> Self {
        let root = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("geo-corpus");
        Self {
            index_db_path: root.join("index.db"),
            cache_spill_path: None,
            data_root: root,
        }
    }
}

impl PathsConfig {
    #[must_use]
    pub fn pdf_root(&self) -> PathBuf {
        self.data_root.join("pdfs")
    }

    #[must_use]
    pub fn parsed_root(&self) -> PathBuf {
        self.data_root.join("parsed")
    }
}

/// Request and per-stage deadlines.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeadlineConfig {
    pub request_deadline_ms: u64,
    pub per_url_timeout_ms: u64,
    pub per_publication_budget_ms: u64,
}

impl Default for DeadlineConfig {
    fn default() -> Self {
        Self {
            request_deadline_ms: 300_000,
            per_url_timeout_ms: 30_000,
            per_publication_budget_ms: 60_000,
        }
    }
}

impl DeadlineConfig {
    #[must_use]
    pub fn request_deadline(&self) -> Duration {
        Duration::from_millis(self.request_deadline_ms)
    }

    #[must_use]
    pub fn per_url_timeout(&self) -> Duration {
        Duration::from_millis(self.per_url_timeout_ms)
    }

    #[must_use]
    pub fn per_publication_budget(&self) -> Duration {
        Duration::from_millis(self.per_publication_budget_ms)
    }
}

/// Contact identities and API keys, sourced from the environment.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    pub contact_email: Option<String>,
    pub ncbi_api_key: Option<String>,
    pub openalex_mailto: Option<String>,
    pub core_api_key: Option<String>,
    pub ezproxy_base: Option<String>,
}

/// Fingerprint cache sizing.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub positive_long_ttl_secs: u64,
    pub positive_short_ttl_secs: u64,
    pub negative_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 50_000,
            positive_long_ttl_secs: 7 * 24 * 3600,
            positive_short_ttl_secs: 6 * 3600,
            negative_ttl_secs: 15 * 60,
        }
    }
}

/// Root configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub providers: ProvidersConfig,
    pub concurrency: ConcurrencyConfig,
    pub enrichment: EnrichmentConfig,
    pub paths: PathsConfig,
    pub deadlines: DeadlineConfig,
    pub identity: IdentityConfig,
    pub cache: CacheConfig,
}

impl Config {
    /// Load configuration from an optional TOML file layered with
    /// `GEOCORPUS_`-prefixed environment variables, then pick up identity
    /// variables and validate.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("GEOCORPUS")
                .separator("__")
                .try_parsing(true),
        );

        let mut cfg: Config = builder
            .build()
            .and_then(config::Config::try_deserialize)
            .map_err(|e| Error::Config(e.to_string()))?;

        cfg.identity.apply_env();
        cfg.validate()?;
        Ok(cfg)
    }

    /// Validate invariants that must hold before any component starts.
    pub fn validate(&self) -> Result<()> {
        if self.concurrency.datasets_in_parallel == 0
            || self.concurrency.pubs_per_dataset == 0
            || self.concurrency.downloads_global == 0
        {
            return Err(Error::Config(
                "concurrency limits must be at least 1".to_string(),
            ));
        }
        if self.enrichment.max_citing_papers == 0 {
            return Err(Error::Config(
                "enrichment.max_citing_papers must be at least 1".to_string(),
            ));
        }
        if self.paths.data_root.as_os_str().is_empty() {
            return Err(Error::Config("paths.data_root is empty".to_string()));
        }

        // Explicitly enabled providers must have the credentials their auth
        // mode names. Default-enabled providers with missing credentials
        // degrade to disabled instead.
        let has_ncbi_key = self.identity.ncbi_api_key.is_some();
        let has_email = self.identity.contact_email.is_some();
        let auth_checks: [(&str, &ProviderSettings, bool, bool); 10] = [
            ("geo", &self.providers.geo, has_email, has_ncbi_key),
            ("pubmed", &self.providers.pubmed, has_email, has_ncbi_key),
            ("pmc", &self.providers.pmc, has_email, has_ncbi_key),
            (
                "openalex",
                &self.providers.openalex,
                self.identity.openalex_mailto.is_some(),
                false,
            ),
            ("unpaywall", &self.providers.unpaywall, has_email, false),
            ("crossref", &self.providers.crossref, has_email, false),
            (
                "core",
                &self.providers.core,
                has_email,
                self.identity.core_api_key.is_some(),
            ),
            ("europe_pmc", &self.providers.europe_pmc, has_email, false),
            ("biorxiv", &self.providers.biorxiv, has_email, false),
            ("arxiv", &self.providers.arxiv, has_email, false),
        ];
        for (name, settings, email_available, key_available) in auth_checks {
            if !settings.explicitly_enabled() {
                continue;
            }
            let needs_email = matches!(settings.auth, AuthMode::Email | AuthMode::Both);
            let needs_key = matches!(settings.auth, AuthMode::ApiKey | AuthMode::Both);
            if needs_email && !email_available {
                return Err(Error::Config(format!(
                    "providers.{name} enabled with auth={:?} but no contact email is set",
                    settings.auth
                )));
            }
            if needs_key && !key_available {
                return Err(Error::Config(format!(
                    "providers.{name} enabled with auth={:?} but its API key is not set",
                    settings.auth
                )));
            }
        }

        if self.providers.proxy.explicitly_enabled() && self.identity.ezproxy_base.is_none() {
            return Err(Error::Config(
                "providers.proxy enabled but EZPROXY_BASE_URL is not set".to_string(),
            ));
        }
        if self.providers.sci_hub.provider.explicitly_enabled()
            && self.providers.sci_hub.mirrors.is_empty()
        {
            return Err(Error::Config(
                "providers.sci_hub enabled but mirror list is empty".to_string(),
            ));
        }
        Ok(())
    }

    /// NCBI budget: 3/s anonymous, 10/s with an API key.
    #[must_use]
    pub fn ncbi_rate_limit(&self) -> f64 {
        if self.identity.ncbi_api_key.is_some() {
            10.0
        } else {
            3.0
        }
    }

    /// OpenAlex polite pool grants a 10x budget when a mailto is supplied.
    #[must_use]
    pub fn openalex_rate_limit(&self) -> f64 {
        if self.identity.openalex_mailto.is_some() {
            10.0
        } else {
            1.0
        }
    }
}

impl IdentityConfig {
    fn apply_env(&mut self) {
        let read = |name: &str| std::env::var(name).ok().filter(|v| !v.trim().is_empty());
        self.ncbi_api_key = self.ncbi_api_key.take().or_else(|| read("NCBI_API_KEY"));
        self.contact_email = self
            .contact_email
            .take()
            .or_else(|| read("NCBI_EMAIL"))
            .or_else(|| read("CONTACT_EMAIL"));
        self.openalex_mailto = self
            .openalex_mailto
            .take()
            .or_else(|| read("OPENALEX_MAILTO"))
            .or_else(|| self.contact_email.clone());
        self.core_api_key = self.core_api_key.take().or_else(|| read("CORE_API_KEY"));
        self.ezproxy_base = self.ezproxy_base.take().or_else(|| read("EZPROXY_BASE_URL"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = Config::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn gray_sources_default_off() {
        let config = Config::default();
        assert!(!config.enrichment.enable_gray_sources);
        assert_eq!(config.providers.sci_hub.provider.enable, Some(false));
    }

    #[test]
    fn explicit_core_without_key_fails_validation() {
        let mut config = Config::default();
        config.providers.core.enable = Some(true);
        config.identity.core_api_key = None;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn explicit_core_with_key_validates() {
        let mut config = Config::default();
        config.providers.core.enable = Some(true);
        config.identity.core_api_key = Some("k".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn ncbi_rate_depends_on_key() {
        let mut config = Config::default();
        assert!((config.ncbi_rate_limit() - 3.0).abs() < f64::EPSILON);
        config.identity.ncbi_api_key = Some("key".to_string());
        assert!((config.ncbi_rate_limit() - 10.0).abs() < f64::EPSILON);
    }

    #[test]
    fn zero_concurrency_rejected() {
        let mut config = Config::default();
        config.concurrency.downloads_global = 0;
        assert!(config.validate().is_err());
    }
}
