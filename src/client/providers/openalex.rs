//! OpenAlex client.
//!
//! Drives the high-precision citation strategy (`filter=cites:W…`) and
//! contributes open-access URLs. Supplying a `mailto` routes requests
//! through the polite pool and its larger rate budget.

use super::http::ProviderHttp;
use super::traits::{LookupId, ProviderContext, ProviderError, SourceProvider};
use crate::config::ProviderSettings;
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.openalex.org";

pub struct OpenAlexProvider {
    http: ProviderHttp,
    base_url: String,
    mailto: Option<String>,
}

impl OpenAlexProvider {
    pub fn new(
        settings: &ProviderSettings,
        mailto: Option<String>,
        rate_per_sec: f64,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new("openalex", settings, rate_per_sec)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            mailto,
        })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ProviderError> {
        let mut url = Url::parse(&format!("{}/{path}", self.base_url.trim_end_matches('/')))
            .map_err(|e| ProviderError::Other(format!("invalid OpenAlex URL: {e}")))?;
        if let Some(mailto) = &self.mailto {
            url.query_pairs_mut().append_pair("mailto", mailto);
        }
        Ok(url)
    }

    /// Fetch the raw work record for a DOI; 404 maps to `Ok(None)`.
    async fn work_by_doi(&self, doi: &str) -> Result<Option<Value>, ProviderError> {
        let url = self.endpoint(&format!("works/https://doi.org/{doi}"))?;
        match self.http.get_json::<Value>(url.as_str()).await {
            Ok(work) => Ok(Some(work)),
            Err(ProviderError::Status { code: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Works citing the publication behind `doi`, in OpenAlex order.
    pub async fn citing_works(
        &self,
        doi: &str,
        limit: u32,
    ) -> Result<Vec<Publication>, ProviderError> {
        let Some(work) = self.work_by_doi(doi).await? else {
            debug!(doi, "DOI unknown to OpenAlex");
            return Ok(Vec::new());
        };
        let Some(work_id) = work
            .get("id")
            .and_then(Value::as_str)
            .and_then(|id| id.rsplit('/').next())
            .map(ToOwned::to_owned)
        else {
            return Err(ProviderError::Parse("work record has no id".to_string()));
        };

        let mut url = self.endpoint("works")?;
        url.query_pairs_mut()
            .append_pair("filter", &format!("cites:{work_id}"))
            .append_pair("per-page", &limit.clamp(1, 200).to_string());

        let body: Value = self.http.get_json(url.as_str()).await?;
        let citing: Vec<Publication> = body
            .get("results")
            .and_then(Value::as_array)
            .map(|results| results.iter().filter_map(parse_work).collect())
            .unwrap_or_default();

        info!(doi, citing = citing.len(), "OpenAlex citation query completed");
        Ok(citing)
    }
}

/// Normalize an OpenAlex work record.
fn parse_work(work: &Value) -> Option<Publication> {
    let title = work
        .get("title")
        .or_else(|| work.get("display_name"))
        .and_then(Value::as_str)?;

    let doi = work
        .get("doi")
        .and_then(Value::as_str)
        .map(|d| d.trim_start_matches("https://doi.org/").to_string());

    let pmid = work
        .pointer("/ids/pmid")
        .and_then(Value::as_str)
        .and_then(|pmid_url| pmid_url.rsplit('/').next())
        .and_then(|digits| digits.parse::<u64>().ok());

    let authors = work
        .get("authorships")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| a.pointer("/author/display_name").and_then(Value::as_str))
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    Some(Publication {
        pmid,
        doi,
        pmcid: None,
        title: Some(title.to_string()),
        authors,
        journal: work
            .pointer("/primary_location/source/display_name")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        year: work
            .get("publication_year")
            .and_then(Value::as_u64)
            .and_then(|y| u32::try_from(y).ok()),
        abstract_text: None,
        sources: vec![ProviderTag::OpenAlex],
    })
}

#[async_trait]
impl SourceProvider for OpenAlexProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::OpenAlex
    }

    fn description(&self) -> &str {
        "OpenAlex - open scholarly works graph with OA locations"
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
            LookupId::Doi(doi) => Ok(self.work_by_doi(doi).await?.as_ref().and_then(parse_work)),
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
        let Some(work) = self.work_by_doi(doi).await? else {
            return Ok(Vec::new());
        };

        let mut candidates = Vec::new();
        if let Some(pdf_url) = work
            .pointer("/best_oa_location/pdf_url")
            .and_then(Value::as_str)
        {
            candidates.push(
                SourceUrl::new(pdf_url, ProviderTag::OpenAlex, UrlKind::Pdf)
                    .with_confidence(0.8),
            );
        }
        if let Some(oa_url) = work.pointer("/open_access/oa_url").and_then(Value::as_str) {
            if candidates.iter().all(|c| c.url != oa_url) {
                let kind = if oa_url.ends_with(".pdf") {
                    UrlKind::Pdf
                } else {
                    UrlKind::Landing
                };
                candidates.push(
                    SourceUrl::new(oa_url, ProviderTag::OpenAlex, kind).with_confidence(0.6),
                );
            }
        }
        Ok(candidates)
    }
}
