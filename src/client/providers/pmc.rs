//! PubMed Central client over the OA web service.
//!
//! Only the OA service endpoint is queried. The `/pmc/articles/{id}/pdf`
//! URLs are deliberately never emitted: they refuse bulk automation and
//! would occupy the top of the waterfall while never succeeding.

use super::http::ProviderHttp;
use super::traits::{ProviderContext, ProviderError, SourceProvider};
use crate::config::ProviderSettings;
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://www.ncbi.nlm.nih.gov/pmc/utils/oa/oa.fcgi";

pub struct PmcProvider {
    http: ProviderHttp,
    base_url: String,
}

impl PmcProvider {
    pub fn new(settings: &ProviderSettings, rate_per_sec: f64) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new("pmc", settings, rate_per_sec)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    async fn oa_links(&self, pmcid: &str) -> Result<Vec<SourceUrl>, ProviderError> {
        let url = format!("{}?id={pmcid}", self.base_url);
        let body = self.http.get_text(&url).await?;
        parse_oa_response(&body)
    }
}

/// Parse the OA service XML; "not open access" style errors are absence.
fn parse_oa_response(xml: &str) -> Result<Vec<SourceUrl>, ProviderError> {
    let doc = roxmltree::Document::parse(xml)
        .map_err(|e| ProviderError::Parse(format!("OA service XML: {e}")))?;

    if let Some(error) = doc.descendants().find(|n| n.has_tag_name("error")) {
        let code = error.attribute("code").unwrap_or("unknown");
        debug!(code, "PMC OA service reported no record");
        return Ok(Vec::new());
    }

    let mut candidates = Vec::new();
    for link in doc.descendants().filter(|n| n.has_tag_name("link")) {
        let Some(href) = link.attribute("href") else {
            continue;
        };
        if link.attribute("format") != Some("pdf") {
            continue;
        }
        // The OA service hands out ftp:// URLs; the same paths are served
        // over HTTPS.
        let https_href = href
            .replacen("ftp://ftp.ncbi.nlm.nih.gov/", "https://ftp.ncbi.nlm.nih.gov/", 1);
        candidates.push(
            SourceUrl::new(https_href, ProviderTag::Pmc, UrlKind::Pdf).with_confidence(0.9),
        );
    }
    Ok(candidates)
}

#[async_trait]
impl SourceProvider for PmcProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Pmc
    }

    fn description(&self) -> &str {
        "PubMed Central - open access subset via the OA web service"
    }

    fn serves_urls(&self) -> bool {
        true
    }

    async fn pdf_candidates(
        &self,
        publication: &Publication,
        _context: &ProviderContext,
    ) -> Result<Vec<SourceUrl>, ProviderError> {
        let Some(pmcid) = &publication.pmcid else {
            return Ok(Vec::new());
        };
        self.oa_links(pmcid).await
    }
}
