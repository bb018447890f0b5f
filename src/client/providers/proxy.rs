//! Institutional proxy (EZProxy-style) URL composer.
//!
//! Pure composition: wraps the publisher's DOI resolution URL in the proxy
//! prefix. Authentication against the proxy itself is the caller's problem,
//! which is why every candidate carries `auth_required`.

use super::traits::{ProviderContext, ProviderError, SourceProvider};
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;

pub struct ProxyProvider {
    ezproxy_base: String,
}

impl ProxyProvider {
    pub fn new(ezproxy_base: String) -> Result<Self, ProviderError> {
        if ezproxy_base.trim().is_empty() {
            return Err(ProviderError::Other("empty EZProxy base URL".to_string()));
        }
        Ok(Self { ezproxy_base })
    }

    fn proxied(&self, target: &str) -> String {
        let base = self.ezproxy_base.trim_end_matches(['?', '&']);
        let separator = if base.contains('?') { "&" } else { "?" };
        format!("{base}{separator}url={}", urlencoding::encode(target))
    }
}

#[async_trait]
impl SourceProvider for ProxyProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Proxy
    }

    fn description(&self) -> &str {
        "Institutional proxy - authenticated publisher access"
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
        let target = format!("https://doi.org/{doi}");
        let mut candidate = SourceUrl::new(
            self.proxied(&target),
            ProviderTag::Proxy,
            UrlKind::Landing,
        )
        .with_confidence(0.9);
        candidate.auth_required = true;
        Ok(vec![candidate])
    }
}
