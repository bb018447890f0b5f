//! Library Genesis scimag client. Opt-in gray-area source, disabled by
//! default.
//!
//! Emits the scimag landing page for a DOI rather than a direct file URL;
//! the download engine's landing-page extraction finds the mirror link.

use super::traits::{ProviderContext, ProviderError, SourceProvider};
use crate::config::ProviderSettings;
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "http://library.lol";

pub struct LibGenProvider {
    base_url: String,
}

impl LibGenProvider {
    pub fn new(settings: &ProviderSettings) -> Result<Self, ProviderError> {
        Ok(Self {
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn landing_url(&self, doi: &str) -> String {
        format!("{}/scimag/{doi}", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait]
impl SourceProvider for LibGenProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::LibGen
    }

    fn description(&self) -> &str {
        "Library Genesis scimag - gray-area full text, opt-in"
    }

    fn serves_urls(&self) -> bool {
        true
    }

    async fn pdf_candidates(
        &self,
        publication: &Publication,
        _context: &ProviderContext,
    ) -> Result<Vec<SourceUrl>, ProviderError> {
        let Some(doi) = &publication.doi else {
            return Ok(Vec::new());
        };
        Ok(vec![SourceUrl::new(
            self.landing_url(doi),
            ProviderTag::LibGen,
            UrlKind::Landing,
        )
        .with_confidence(0.3)])
    }
}
