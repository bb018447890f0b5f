pub mod arxiv;
pub mod biorxiv;
pub mod core;
pub mod crossref;
pub mod entrez;
pub mod europepmc;
pub mod geo;
pub mod http;
pub mod libgen;
pub mod openalex;
pub mod pmc;
pub mod proxy;
pub mod pubmed;
pub mod sci_hub;
pub mod traits;
pub mod unpaywall;

pub use arxiv::ArxivProvider;
pub use biorxiv::BiorxivProvider;
pub use core::CoreProvider;
pub use crossref::CrossrefProvider;
pub use entrez::EntrezIdentity;
pub use europepmc::EuropePmcProvider;
pub use geo::GeoClient;
pub use libgen::LibGenProvider;
pub use openalex::OpenAlexProvider;
pub use pmc::PmcProvider;
pub use proxy::ProxyProvider;
pub use pubmed::PubMedProvider;
pub use sci_hub::SciHubProvider;
pub use traits::{LookupId, ProviderContext, ProviderError, SourceProvider};
pub use unpaywall::UnpaywallProvider;

use crate::config::Config;
use crate::model::ProviderTag;
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Process-wide pool of provider clients, constructed once at startup.
///
/// Providers that cannot run (missing credentials, gray sources without the
/// opt-in) are recorded with a reason instead of being built, and the
/// collector reports them as untried in every provenance map.
pub struct ProviderRegistry {
    pub geo: Arc<GeoClient>,
    pub pubmed: Arc<PubMedProvider>,
    pub openalex: Option<Arc<OpenAlexProvider>>,
    url_providers: Vec<Arc<dyn SourceProvider>>,
    disabled: BTreeMap<ProviderTag, String>,
}

impl ProviderRegistry {
    /// Build every enabled provider from configuration.
    pub fn from_config(config: &Config) -> Result<Self> {
        let identity = EntrezIdentity {
            email: config.identity.contact_email.clone(),
            api_key: config.identity.ncbi_api_key.clone(),
        };
        let ncbi_rate = config.ncbi_rate_limit();

        let geo = Arc::new(
            GeoClient::new(&config.providers.geo, identity.clone(), ncbi_rate)
                .map_err(|e| Error::Config(format!("geo client: {e}")))?,
        );
        let pubmed = Arc::new(
            PubMedProvider::new(&config.providers.pubmed, identity, ncbi_rate)
                .map_err(|e| Error::Config(format!("pubmed client: {e}")))?,
        );

        let mut registry = Self {
            geo,
            pubmed,
            openalex: None,
            url_providers: Vec::new(),
            disabled: BTreeMap::new(),
        };

        registry.build_openalex(config)?;
        registry.build_url_providers(config)?;

        info!(
            url_providers = registry.url_providers.len(),
            disabled = registry.disabled.len(),
            "provider registry initialized"
        );
        Ok(registry)
    }

    fn build_openalex(&mut self, config: &Config) -> Result<()> {
        if !config.providers.openalex.enabled_or(true) {
            self.disable(ProviderTag::OpenAlex, "disabled in configuration");
            return Ok(());
        }
        let provider = OpenAlexProvider::new(
            &config.providers.openalex,
            config.identity.openalex_mailto.clone(),
            config.openalex_rate_limit(),
        )
        .map_err(|e| Error::Config(format!("openalex client: {e}")))?;
        let provider = Arc::new(provider);
        self.openalex = Some(provider.clone());
        self.url_providers.push(provider);
        Ok(())
    }

    #[allow(clippy::too_many_lines)]
    fn build_url_providers(&mut self, config: &Config) -> Result<()> {
        let providers = &config.providers;
        let gray_allowed = config.enrichment.enable_gray_sources;

        // Institutional proxy: highest-priority band, needs a base URL.
        if providers.proxy.enabled_or(config.identity.ezproxy_base.is_some()) {
            match &config.identity.ezproxy_base {
                Some(base) => {
                    let provider = ProxyProvider::new(base.clone())
                        .map_err(|e| Error::Config(format!("proxy client: {e}")))?;
                    self.url_providers.push(Arc::new(provider));
                }
                None => self.disable(ProviderTag::Proxy, "EZPROXY_BASE_URL is not set"),
            }
        } else {
            self.disable(ProviderTag::Proxy, "disabled in configuration");
        }

        if providers.pmc.enabled_or(true) {
            let provider = PmcProvider::new(&providers.pmc, config.ncbi_rate_limit())
                .map_err(|e| Error::Config(format!("pmc client: {e}")))?;
            self.url_providers.push(Arc::new(provider));
        } else {
            self.disable(ProviderTag::Pmc, "disabled in configuration");
        }

        if providers.unpaywall.enabled_or(true) {
            match &config.identity.contact_email {
                Some(email) => {
                    let provider = UnpaywallProvider::new(
                        &providers.unpaywall,
                        email.clone(),
                        providers.unpaywall.rate_limit_per_sec,
                    )
                    .map_err(|e| Error::Config(format!("unpaywall client: {e}")))?;
                    self.url_providers.push(Arc::new(provider));
                }
                None => self.disable(
                    ProviderTag::Unpaywall,
                    "no contact email configured (NCBI_EMAIL/CONTACT_EMAIL)",
                ),
            }
        } else {
            self.disable(ProviderTag::Unpaywall, "disabled in configuration");
        }

        if providers.core.enabled_or(config.identity.core_api_key.is_some()) {
            match &config.identity.core_api_key {
                Some(key) => {
                    let provider = CoreProvider::new(
                        &providers.core,
                        key.clone(),
                        providers.core.rate_limit_per_sec,
                    )
                    .map_err(|e| Error::Config(format!("core client: {e}")))?;
                    self.url_providers.push(Arc::new(provider));
                }
                None => self.disable(ProviderTag::Core, "CORE_API_KEY is not set"),
            }
        } else {
            self.disable(ProviderTag::Core, "disabled in configuration");
        }

        if providers.crossref.enabled_or(true) {
            let provider =
                CrossrefProvider::new(&providers.crossref, providers.crossref.rate_limit_per_sec)
                    .map_err(|e| Error::Config(format!("crossref client: {e}")))?;
            self.url_providers.push(Arc::new(provider));
        } else {
            self.disable(ProviderTag::Crossref, "disabled in configuration");
        }

        if providers.europe_pmc.enabled_or(true) {
            let provider = EuropePmcProvider::new(
                &providers.europe_pmc,
                providers.europe_pmc.rate_limit_per_sec,
            )
            .map_err(|e| Error::Config(format!("europe_pmc client: {e}")))?;
            self.url_providers.push(Arc::new(provider));
        } else {
            self.disable(ProviderTag::EuropePmc, "disabled in configuration");
        }

        if providers.biorxiv.enabled_or(true) {
            let provider =
                BiorxivProvider::new(&providers.biorxiv, providers.biorxiv.rate_limit_per_sec)
                    .map_err(|e| Error::Config(format!("biorxiv client: {e}")))?;
            self.url_providers.push(Arc::new(provider));
        } else {
            self.disable(ProviderTag::Biorxiv, "disabled in configuration");
        }

        if providers.arxiv.enabled_or(true) {
            let provider = ArxivProvider::new(&providers.arxiv, providers.arxiv.rate_limit_per_sec)
                .map_err(|e| Error::Config(format!("arxiv client: {e}")))?;
            self.url_providers.push(Arc::new(provider));
        } else {
            self.disable(ProviderTag::Arxiv, "disabled in configuration");
        }

        // Gray sources: both the per-provider flag and the global opt-in
        // must be on.
        if providers.sci_hub.provider.enabled_or(false) && gray_allowed {
            let provider =
                SciHubProvider::new(&providers.sci_hub, providers.sci_hub.provider.rate_limit_per_sec)
                    .map_err(|e| Error::Config(format!("sci_hub client: {e}")))?;
            self.url_providers.push(Arc::new(provider));
        } else if providers.sci_hub.provider.enabled_or(false) {
            self.disable(ProviderTag::SciHub, "enable_gray_sources is off");
        } else {
            self.disable(ProviderTag::SciHub, "disabled in configuration");
        }

        if providers.libgen.enabled_or(false) && gray_allowed {
            let provider = LibGenProvider::new(&providers.libgen)
                .map_err(|e| Error::Config(format!("libgen client: {e}")))?;
            self.url_providers.push(Arc::new(provider));
        } else if providers.libgen.enabled_or(false) {
            self.disable(ProviderTag::LibGen, "enable_gray_sources is off");
        } else {
            self.disable(ProviderTag::LibGen, "disabled in configuration");
        }

        Ok(())
    }

    fn disable(&mut self, tag: ProviderTag, reason: &str) {
        warn!(provider = %tag, reason, "provider not available");
        self.disabled.insert(tag, reason.to_string());
    }

    /// Providers that can serve full-text URLs, in declaration order.
    #[must_use]
    pub fn url_providers(&self) -> &[Arc<dyn SourceProvider>] {
        &self.url_providers
    }

    /// Providers that were configured away, with reasons.
    #[must_use]
    pub fn disabled(&self) -> &BTreeMap<ProviderTag, String> {
        &self.disabled
    }
}
