//! Europe PMC client: REST search with full-text URL lists.
//!
//! Useful both as a metadata source (carries PMCIDs) and as a second
//! open-access URL source alongside NCBI's PMC.

use super::http::ProviderHttp;
use super::traits::{LookupId, ProviderContext, ProviderError, SourceProvider};
use crate::config::ProviderSettings;
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";

pub struct EuropePmcProvider {
    http: ProviderHttp,
    base_url: String,
}

impl EuropePmcProvider {
    pub fn new(settings: &ProviderSettings, rate_per_sec: f64) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new("europe_pmc", settings, rate_per_sec)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    async fn query(&self, query: &str, limit: u32) -> Result<Vec<Value>, ProviderError> {
        let url = format!(
            "{}/search?query={}&format=json&pageSize={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query),
            limit.clamp(1, 100)
        );
        let body: Value = self.http.get_json(&url).await?;
        Ok(body
            .pointer("/resultList/result")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default())
    }
}

fn parse_result(result: &Value) -> Option<Publication> {
    let title = result.get("title").and_then(Value::as_str)?;
    Some(Publication {
        pmid: result
            .get("pmid")
            .and_then(Value::as_str)
            .and_then(|pmid| pmid.parse::<u64>().ok()),
        doi: result
            .get("doi")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        pmcid: result
            .get("pmcid")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        title: Some(title.trim_end_matches('.').to_string()),
        authors: result
            .get("authorString")
            .and_then(Value::as_str)
            .map(|authors| {
                authors
                    .trim_end_matches('.')
                    .split(", ")
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default(),
        journal: result
            .pointer("/journalInfo/journal/title")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        year: result
            .get("pubYear")
            .and_then(Value::as_str)
            .and_then(|year| year.parse::<u32>().ok()),
        abstract_text: result
            .get("abstractText")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        sources: vec![ProviderTag::EuropePmc],
    })
}

/// Candidate URLs from a result's `fullTextUrlList`.
fn parse_full_text_urls(result: &Value) -> Vec<SourceUrl> {
    let Some(entries) = result
        .pointer("/fullTextUrlList/fullTextUrl")
        .and_then(Value::as_array)
    else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for entry in entries {
        let Some(url) = entry.get("url").and_then(Value::as_str) else {
            continue;
        };
        let style = entry
            .get("documentStyle")
            .and_then(Value::as_str)
            .unwrap_or("");
        let availability = entry
            .get("availabilityCode")
            .and_then(Value::as_str)
            .unwrap_or("");

        let kind = match style {
            "pdf" => UrlKind::Pdf,
            "html" => UrlKind::Html,
            _ => continue,
        };
        // OA = open access, F = free
        let confidence = if availability == "OA" || availability == "F" {
            0.8
        } else {
            0.3
        };
        if candidates.iter().all(|c: &SourceUrl| c.url != url) {
            candidates.push(
                SourceUrl::new(url, ProviderTag::EuropePmc, kind).with_confidence(confidence),
            );
        }
    }
    candidates
}

#[async_trait]
impl SourceProvider for EuropePmcProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::EuropePmc
    }

    fn description(&self) -> &str {
        "Europe PMC - European mirror of the PMC corpus with REST search"
    }

    fn serves_urls(&self) -> bool {
        true
    }

    async fn lookup(
        &self,
        id: &LookupId,
        _context: &ProviderContext,
    ) -> Result<Option<Publication>, ProviderError> {
        let query = match id {
            LookupId::Pmid(pmid) => format!("EXT_ID:{pmid} AND SRC:MED"),
            LookupId::Doi(doi) => format!("DOI:\"{doi}\""),
        };
        let results = self.query(&query, 1).await?;
        Ok(results.first().and_then(parse_result))
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        _context: &ProviderContext,
    ) -> Result<Vec<Publication>, ProviderError> {
        let results = self.query(query, limit).await?;
        Ok(results.iter().filter_map(parse_result).collect())
    }

    async fn pdf_candidates(
        &self,
        publication: &Publication,
        _context: &ProviderContext,
    ) -> Result<Vec<SourceUrl>, ProviderError> {
        let query = if let Some(pmcid) = &publication.pmcid {
            format!("PMCID:{pmcid}")
        } else if let Some(doi) = &publication.doi {
            format!("DOI:\"{doi}\"")
        } else {
            return Ok(Vec::new());
        };
        let results = self.query(&query, 1).await?;
        Ok(results
            .first()
            .map(parse_full_text_urls)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_result_metadata() {
        let result = json!({
            "pmid": "35042862",
            "pmcid": "PMC8766504",
            "doi": "10.1038/s41467-022-27903-x",
            "title": "Multiomic profiling of breast tumors.",
            "authorString": "Garcia L, Chen W.",
            "pubYear": "2022",
            "journalInfo": {"journal": {"title": "Nature communications"}}
        });

        let publication = parse_result(&result).unwrap();
        assert_eq!(publication.pmid, Some(35042862));
        assert_eq!(publication.pmcid.as_deref(), Some("PMC8766504"));
        assert_eq!(publication.authors, vec!["Garcia L", "Chen W"]);
    }

    #[test]
    fn full_text_urls_keep_open_pdf_first_class() {
        let result = json!({
            "fullTextUrlList": {"fullTextUrl": [
                {"url": "https://europepmc.org/articles/PMC8766504?pdf=render",
                 "documentStyle": "pdf", "availabilityCode": "OA"},
                {"url": "https://europepmc.org/articles/PMC8766504",
                 "documentStyle": "html", "availabilityCode": "OA"},
                {"url": "https://doi.org/10.1038/x", "documentStyle": "doi",
                 "availabilityCode": "S"}
            ]}
        });

        let candidates = parse_full_text_urls(&result);
        assert_eq!(candidates.len(), 2);
        assert_eq!(candidates[0].url_type, UrlKind::Pdf);
        assert!((candidates[0].confidence - 0.8).abs() < f32::EPSILON);
    }
}
