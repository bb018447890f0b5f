//! bioRxiv client: biology preprints by DOI.
//!
//! The details API answers only for bioRxiv DOIs (`10.1101/...`); anything
//! else is absence without a network call.

use super::http::ProviderHttp;
use super::traits::{LookupId, ProviderContext, ProviderError, SourceProvider};
use crate::config::ProviderSettings;
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://api.biorxiv.org";
const CONTENT_BASE: &str = "https://www.biorxiv.org/content";

pub struct BiorxivProvider {
    http: ProviderHttp,
    base_url: String,
}

impl BiorxivProvider {
    pub fn new(settings: &ProviderSettings, rate_per_sec: f64) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new("biorxiv", settings, rate_per_sec)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    async fn details(&self, doi: &str) -> Result<Option<Value>, ProviderError> {
        if !doi.starts_with("10.1101/") {
            return Ok(None);
        }
        let url = format!("{}/details/biorxiv/{doi}", self.base_url.trim_end_matches('/'));
        let body: Value = self.http.get_json(&url).await?;
        Ok(body
            .get("collection")
            .and_then(Value::as_array)
            .and_then(|collection| collection.last())
            .cloned())
    }
}

fn parse_entry(entry: &Value) -> Option<Publication> {
    let doi = entry.get("doi").and_then(Value::as_str)?;
    Some(Publication {
        pmid: None,
        doi: Some(doi.to_string()),
        pmcid: None,
        title: entry
            .get("title")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        authors: entry
            .get("authors")
            .and_then(Value::as_str)
            .map(|authors| authors.split("; ").map(ToOwned::to_owned).collect())
            .unwrap_or_default(),
        journal: Some("bioRxiv".to_string()),
        year: entry
            .get("date")
            .and_then(Value::as_str)
            .and_then(|date| date.split('-').next())
            .and_then(|year| year.parse::<u32>().ok()),
        abstract_text: entry
            .get("abstract")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        sources: vec![ProviderTag::Biorxiv],
    })
}

/// Versioned full-text PDF URL for a details entry.
fn pdf_url_for(entry: &Value) -> Option<String> {
    let doi = entry.get("doi").and_then(Value::as_str)?;
    let version = entry
        .get("version")
        .and_then(|v| match v {
            Value::String(s) => s.parse::<u32>().ok(),
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            _ => None,
        })
        .unwrap_or(1);
    Some(format!("{CONTENT_BASE}/{doi}v{version}.full.pdf"))
}

#[async_trait]
impl SourceProvider for BiorxivProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Biorxiv
    }

    fn description(&self) -> &str {
        "bioRxiv - biology preprint server"
    }

    fn serves_urls(&self) -> bool {
        true
    }

    async fn lookup(
        &self,
        id: &LookupId,
        _context: &ProviderContext,
    ) -> Result<Option<Publication>, ProviderError> {
        match id {
            LookupId::Doi(doi) => Ok(self.details(doi).await?.as_ref().and_then(parse_entry)),
            LookupId::Pmid(_) => Ok(None),
        }
    }

    async fn pdf_candidates(
        &self,
        publication: &Publication,
        _context: &ProviderContext,
    ) -> Result<Vec<SourceUrl>, ProviderError> {
        let Some(doi) = &publication.doi else {
            return Ok(Vec::new());
        };
        let Some(entry) = self.details(doi).await? else {
            return Ok(Vec::new());
        };
        Ok(pdf_url_for(&entry)
            .map(|url| {
                vec![SourceUrl::new(url, ProviderTag::Biorxiv, UrlKind::Pdf).with_confidence(0.85)]
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn versioned_pdf_url() {
        let entry = json!({"doi": "10.1101/2023.01.05.522925", "version": "2"});
        assert_eq!(
            pdf_url_for(&entry).unwrap(),
            "https://www.biorxiv.org/content/10.1101/2023.01.05.522925v2.full.pdf"
        );
    }

    #[test]
    fn version_defaults_to_one() {
        let entry = json!({"doi": "10.1101/2023.01.05.522925"});
        assert!(pdf_url_for(&entry).unwrap().ends_with("v1.full.pdf"));
    }

    #[tokio::test]
    async fn non_biorxiv_doi_is_absent_without_network() {
        let settings = ProviderSettings {
            base_url: Some("http://127.0.0.1:1".to_string()),
            ..ProviderSettings::default()
        };
        let provider = BiorxivProvider::new(&settings, 10.0).unwrap();
        let publication = Publication {
            doi: Some("10.1038/nature12373".to_string()),
            ..Publication::default()
        };
        let candidates = provider
            .pdf_candidates(&publication, &ProviderContext::default())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }
}
