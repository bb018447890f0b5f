//! NCBI GEO (Gene Expression Omnibus) client over the E-utilities API.
//!
//! GEO series live in the `gds` Entrez database; series UIDs carry a
//! `200`-prefix that maps back to the `GSE` accession returned in the
//! document summary.

use super::entrez::{EntrezIdentity, EntrezRequest, EUTILS_BASE};
use super::http::ProviderHttp;
use super::traits::ProviderError;
use crate::client::GeoId;
use crate::config::ProviderSettings;
use crate::model::Dataset;
use serde_json::Value;
use tracing::{debug, info};

pub struct GeoClient {
    http: ProviderHttp,
    base_url: String,
    identity: EntrezIdentity,
}

impl GeoClient {
    pub fn new(
        settings: &ProviderSettings,
        identity: EntrezIdentity,
        rate_per_sec: f64,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new("geo", settings, rate_per_sec)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| EUTILS_BASE.to_string()),
            identity,
        })
    }

    /// Search GEO series matching an already-built Entrez term.
    pub async fn search_series(
        &self,
        term: &str,
        limit: u32,
    ) -> Result<Vec<Dataset>, ProviderError> {
        let search_term = format!("({term}) AND GSE[ETYP]");
        let url = EntrezRequest::esearch(&self.base_url, "gds", &self.identity)
            .term(&search_term)
            .retmax(limit)
            .retmode("json")
            .build();
        debug!(%url, "GEO esearch");

        let body: Value = self.http.get_json(&url).await?;
        let uids: Vec<String> = body
            .pointer("/esearchresult/idlist")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        if uids.is_empty() {
            info!(term = %search_term, "GEO search returned no series");
            return Ok(Vec::new());
        }

        let datasets = self.summaries(&uids).await?;
        info!(found = datasets.len(), "GEO search completed");
        Ok(datasets)
    }

    /// Fetch one series by accession; absence is `Ok(None)`.
    pub async fn fetch_series(&self, geo_id: &GeoId) -> Result<Option<Dataset>, ProviderError> {
        let term = format!("{}[ACCN] AND GSE[ETYP]", geo_id.as_str());
        let url = EntrezRequest::esearch(&self.base_url, "gds", &self.identity)
            .term(&term)
            .retmax(1)
            .retmode("json")
            .build();

        let body: Value = self.http.get_json(&url).await?;
        let uids: Vec<String> = body
            .pointer("/esearchresult/idlist")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(Value::as_str)
                    .map(ToOwned::to_owned)
                    .collect()
            })
            .unwrap_or_default();

        if uids.is_empty() {
            return Ok(None);
        }
        Ok(self.summaries(&uids).await?.into_iter().next())
    }

    async fn summaries(&self, uids: &[String]) -> Result<Vec<Dataset>, ProviderError> {
        let url = EntrezRequest::esummary(&self.base_url, "gds", &self.identity)
            .ids(uids)
            .retmode("json")
            .build();

        let body: Value = self.http.get_json(&url).await?;
        let result = body
            .get("result")
            .ok_or_else(|| ProviderError::Parse("esummary response missing 'result'".to_string()))?;

        let mut datasets = Vec::new();
        for uid in uids {
            if let Some(doc) = result.get(uid) {
                if let Some(dataset) = parse_series_summary(doc) {
                    datasets.push(dataset);
                }
            }
        }
        Ok(datasets)
    }
}

/// Normalize one `gds` document summary into a [`Dataset`].
/// Returns `None` for non-series entries.
fn parse_series_summary(doc: &Value) -> Option<Dataset> {
    let accession = doc.get("accession").and_then(Value::as_str)?;
    if !accession.starts_with("GSE") {
        return None;
    }

    let pmids = doc
        .get("pubmedids")
        .and_then(Value::as_array)
        .map(|ids| {
            ids.iter()
                .filter_map(|id| match id {
                    Value::Number(n) => n.as_u64(),
                    Value::String(s) => s.parse::<u64>().ok(),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default();

    Some(Dataset {
        geo_id: accession.to_string(),
        title: doc
            .get("title")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        summary: doc
            .get("summary")
            .and_then(Value::as_str)
            .unwrap_or_default()
            .to_string(),
        organism: doc
            .get("taxon")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        platform: doc
            .get("gpl")
            .and_then(Value::as_str)
            .map(|gpl| format!("GPL{gpl}")),
        sample_count: doc
            .get("n_samples")
            .and_then(Value::as_u64)
            .and_then(|n| u32::try_from(n).ok()),
        submission_date: doc
            .get("pdat")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        update_date: doc
            .get("gdsupdate")
            .and_then(Value::as_str)
            .map(ToOwned::to_owned),
        pmids,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_series_summary() {
        let doc = json!({
            "accession": "GSE189158",
            "title": "Single-cell RNA-seq of breast tumors",
            "summary": "We profiled ...",
            "taxon": "Homo sapiens",
            "gpl": "24676",
            "n_samples": 42,
            "pdat": "2022/01/05",
            "pubmedids": [35042862, "33515491"]
        });

        let dataset = parse_series_summary(&doc).unwrap();
        assert_eq!(dataset.geo_id, "GSE189158");
        assert_eq!(dataset.organism.as_deref(), Some("Homo sapiens"));
        assert_eq!(dataset.platform.as_deref(), Some("GPL24676"));
        assert_eq!(dataset.sample_count, Some(42));
        assert_eq!(dataset.pmids, vec![35042862, 33515491]);
    }

    #[test]
    fn non_series_entries_are_skipped() {
        let doc = json!({"accession": "GDS1234", "title": "a curated dataset"});
        assert!(parse_series_summary(&doc).is_none());
    }
}
