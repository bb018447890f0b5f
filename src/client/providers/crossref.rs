//! Crossref client: authoritative DOI metadata plus publisher TDM links.

use super::http::ProviderHttp;
use super::traits::{LookupId, ProviderContext, ProviderError, SourceProvider};
use crate::config::ProviderSettings;
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

pub struct CrossrefProvider {
    http: ProviderHttp,
    base_url: String,
}

impl CrossrefProvider {
    pub fn new(settings: &ProviderSettings, rate_per_sec: f64) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new("crossref", settings, rate_per_sec)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    async fn work(&self, doi: &str) -> Result<Option<Value>, ProviderError> {
        let url = format!(
            "{}/works/{}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(doi)
        );
        match self.http.get_json::<Value>(&url).await {
            Ok(body) => Ok(body.get("message").cloned()),
            Err(ProviderError::Status { code: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Normalize a Crossref work message.
fn parse_message(message: &Value) -> Option<Publication> {
    let doi = message.get("DOI").and_then(Value::as_str)?;

    let title = message
        .get("title")
        .and_then(Value::as_array)
        .and_then(|titles| titles.first())
        .and_then(Value::as_str)
        .map(ToOwned::to_owned);

    let authors = message
        .get("author")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|author| {
                    let family = author.get("family").and_then(Value::as_str)?;
                    let given = author.get("given").and_then(Value::as_str);
                    Some(match given {
                        Some(given) => format!("{family} {given}"),
                        None => family.to_string(),
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    let year = message
        .pointer("/issued/date-parts/0/0")
        .and_then(Value::as_u64)
        .and_then(|y| u32::try_from(y).ok());

    Some(Publication {
        pmid: None,
        doi: Some(doi.to_string()),
        pmcid: None,
        title,
        authors,
        journal: message
            .get("container-title")
            .and_then(Value::as_array)
            .and_then(|titles| titles.first())
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        year,
        abstract_text: message
            .get("abstract")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        sources: vec![ProviderTag::Crossref],
    })
}

/// Publisher links suitable for text and data mining.
fn parse_links(message: &Value) -> Vec<SourceUrl> {
    let Some(links) = message.get("link").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for link in links {
        let Some(url) = link.get("URL").and_then(Value::as_str) else {
            continue;
        };
        let content_type = link.get("content-type").and_then(Value::as_str).unwrap_or("");
        let application = link
            .get("intended-application")
            .and_then(Value::as_str)
            .unwrap_or("");

        let (kind, confidence) = if content_type == "application/pdf" {
            (UrlKind::Pdf, 0.7)
        } else if application == "text-mining" {
            (UrlKind::Html, 0.4)
        } else {
            continue;
        };

        if candidates.iter().all(|c: &SourceUrl| c.url != url) {
            candidates.push(
                SourceUrl::new(url, ProviderTag::Crossref, kind).with_confidence(confidence),
            );
        }
    }
    candidates
}

#[async_trait]
impl SourceProvider for CrossrefProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Crossref
    }

    fn description(&self) -> &str {
        "Crossref - DOI registration agency metadata and TDM links"
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
            LookupId::Doi(doi) => Ok(self.work(doi).await?.as_ref().and_then(parse_message)),
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
        Ok(self
            .work(doi)
            .await?
            .map(|message| parse_links(&message))
            .unwrap_or_default())
    }
}
