//! PubMed client over the E-utilities API.
//!
//! Serves two pipeline roles: resolving original PMIDs to metadata (and
//! DOIs) for the citation strategies, and full-text accession searches of
//! the form `"GSE189158"[All Fields]` that surface dataset reuse without a
//! formal citation.

use super::entrez::{EntrezIdentity, EntrezRequest, EUTILS_BASE};
use super::http::ProviderHttp;
use super::traits::{LookupId, ProviderContext, ProviderError, SourceProvider};
use crate::config::ProviderSettings;
use crate::model::{ProviderTag, Publication};
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info};

pub struct PubMedProvider {
    http: ProviderHttp,
    base_url: String,
    identity: EntrezIdentity,
}

impl PubMedProvider {
    pub fn new(
        settings: &ProviderSettings,
        identity: EntrezIdentity,
        rate_per_sec: f64,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new("pubmed", settings, rate_per_sec)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| EUTILS_BASE.to_string()),
            identity,
        })
    }

    /// Full-text accession search, e.g. `"GSE189158"[All Fields]`.
    pub async fn search_geo_mentions(
        &self,
        geo_id: &str,
        limit: u32,
    ) -> Result<Vec<Publication>, ProviderError> {
        let term = format!("\"{geo_id}\"[All Fields]");
        self.search_term(&term, limit).await
    }

    /// Resolve a PMID to its DOI, when PubMed knows one.
    pub async fn resolve_doi(&self, pmid: u64) -> Result<Option<String>, ProviderError> {
        let publications = self.summaries(&[pmid.to_string()]).await?;
        Ok(publications.into_iter().next().and_then(|p| p.doi))
    }

    async fn search_term(&self, term: &str, limit: u32) -> Result<Vec<Publication>, ProviderError> {
        let url = EntrezRequest::esearch(&self.base_url, "pubmed", &self.identity)
            .term(term)
            .retmax(limit)
            .retmode("json")
            .build();
        debug!(%url, "PubMed esearch");

        let body: Value = self.http.get_json(&url).await?;
        let pmids: Vec<String> = body
            .pointer("/esearchresult/idlist")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        if pmids.is_empty() {
            return Ok(Vec::new());
        }
        let publications = self.summaries(&pmids).await?;
        info!(term, found = publications.len(), "PubMed search completed");
        Ok(publications)
    }

    async fn summaries(&self, pmids: &[String]) -> Result<Vec<Publication>, ProviderError> {
        let url = EntrezRequest::esummary(&self.base_url, "pubmed", &self.identity)
            .ids(pmids)
            .retmode("json")
            .build();

        let body: Value = self.http.get_json(&url).await?;
        let result = body
            .get("result")
            .ok_or_else(|| ProviderError::Parse("esummary response missing 'result'".to_string()))?;

        let mut publications = Vec::new();
        for pmid in pmids {
            if let Some(doc) = result.get(pmid) {
                if let Some(publication) = parse_summary(doc) {
                    publications.push(publication);
                }
            }
        }
        Ok(publications)
    }
}

/// Normalize one `pubmed` document summary.
fn parse_summary(doc: &Value) -> Option<Publication> {
    let pmid = doc
        .get("uid")
        .and_then(|uid| match uid {
            Value::String(s) => s.parse::<u64>().ok(),
            Value::Number(n) => n.as_u64(),
            _ => None,
        })?;

    let mut doi = None;
    let mut pmcid = None;
    if let Some(ids) = doc.get("articleids").and_then(Value::as_array) {
        for entry in ids {
            let idtype = entry.get("idtype").and_then(Value::as_str).unwrap_or("");
            let value = entry.get("value").and_then(Value::as_str).unwrap_or("");
            match idtype {
                "doi" if !value.is_empty() => doi = Some(value.to_string()),
                "pmc" | "pmcid" if value.starts_with("PMC") => pmcid = Some(value.to_string()),
                _ => {}
            }
        }
    }

    let authors = doc
        .get("authors")
        .and_then(Value::as_array)
        .map(|list| {
            list.iter()
                .filter_map(|a| a.get("name").and_then(Value::as_str))
                .map(ToOwned::to_owned)
                .collect()
        })
        .unwrap_or_default();

    let year = doc
        .get("pubdate")
        .and_then(Value::as_str)
        .and_then(|date| date.split_whitespace().next())
        .and_then(|year| year.parse::<u32>().ok());

    Some(Publication {
        pmid: Some(pmid),
        doi,
        pmcid,
        title: doc
            .get("title")
            .and_then(Value::as_str)
            .map(|t| t.trim_end_matches('.').to_string()),
        authors,
        journal: doc
            .get("fulljournalname")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        year,
        abstract_text: None,
        sources: vec![ProviderTag::PubMed],
    })
}

#[async_trait]
impl SourceProvider for PubMedProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::PubMed
    }

    fn description(&self) -> &str {
        "PubMed - biomedical literature index via NCBI E-utilities"
    }

    async fn lookup(
        &self,
        id: &LookupId,
        _context: &ProviderContext,
    ) -> Result<Option<Publication>, ProviderError> {
        match id {
            LookupId::Pmid(pmid) => {
                let publications = self.summaries(&[pmid.to_string()]).await?;
                Ok(publications.into_iter().next())
            }
            LookupId::Doi(doi) => {
                let term = format!("{doi}[DOI]");
                let publications = self.search_term(&term, 1).await?;
                Ok(publications.into_iter().next())
            }
        }
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        _context: &ProviderContext,
    ) -> Result<Vec<Publication>, ProviderError> {
        self.search_term(query, limit).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_pubmed_summary() {
        let doc = json!({
            "uid": "35042862",
            "title": "Multiomic profiling of breast tumors.",
            "pubdate": "2022 Jan 15",
            "fulljournalname": "Nature Communications",
            "authors": [{"name": "Garcia L"}, {"name": "Chen W"}],
            "articleids": [
                {"idtype": "pubmed", "value": "35042862"},
                {"idtype": "doi", "value": "10.1038/s41467-022-27903-x"},
                {"idtype": "pmc", "value": "PMC8766504"}
            ]
        });

        let publication = parse_summary(&doc).unwrap();
        assert_eq!(publication.pmid, Some(35042862));
        assert_eq!(
            publication.doi.as_deref(),
            Some("10.1038/s41467-022-27903-x")
        );
        assert_eq!(publication.pmcid.as_deref(), Some("PMC8766504"));
        assert_eq!(publication.year, Some(2022));
        assert_eq!(
            publication.title.as_deref(),
            Some("Multiomic profiling of breast tumors")
        );
        assert_eq!(publication.id().as_str(), "PMID_35042862");
    }

    #[test]
    fn summary_without_uid_is_skipped() {
        assert!(parse_summary(&json!({"title": "no uid"})).is_none());
    }
}
