//! CORE client (core.ac.uk v3): aggregated repository full text.
//! Requires an API key; the registry disables it when none is configured.

use super::http::ProviderHttp;
use super::traits::{ProviderContext, ProviderError, SourceProvider};
use crate::config::ProviderSettings;
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;
use serde_json::Value;

const DEFAULT_BASE_URL: &str = "https://api.core.ac.uk/v3";

pub struct CoreProvider {
    http: ProviderHttp,
    base_url: String,
    api_key: String,
}

impl CoreProvider {
    pub fn new(
        settings: &ProviderSettings,
        api_key: String,
        rate_per_sec: f64,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new("core", settings, rate_per_sec)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key,
        })
    }

    async fn search_works(&self, query: &str) -> Result<Value, ProviderError> {
        let url = format!(
            "{}/search/works?q={}&limit=5",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(query)
        );
        let auth = format!("Bearer {}", self.api_key);
        let response = self.http.get(&url, &[("Authorization", &auth)]).await?;
        response
            .json::<Value>()
            .await
            .map_err(|e| ProviderError::Parse(format!("invalid JSON: {e}")))
    }
}

fn extract_download_urls(body: &Value) -> Vec<SourceUrl> {
    let Some(results) = body.get("results").and_then(Value::as_array) else {
        return Vec::new();
    };

    let mut candidates = Vec::new();
    for work in results {
        if let Some(download) = work.get("downloadUrl").and_then(Value::as_str) {
            if download.is_empty() || candidates.iter().any(|c: &SourceUrl| c.url == download) {
                continue;
            }
            let kind = if download.ends_with(".pdf") || download.contains("/download/pdf") {
                UrlKind::Pdf
            } else {
                UrlKind::Html
            };
            candidates
                .push(SourceUrl::new(download, ProviderTag::Core, kind).with_confidence(0.6));
        }
    }
    candidates
}

#[async_trait]
impl SourceProvider for CoreProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Core
    }

    fn description(&self) -> &str {
        "CORE - aggregated open access repository collection"
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
        let body = self.search_works(&format!("doi:\"{doi}\"")).await?;
        Ok(extract_download_urls(&body))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn download_urls_are_extracted_and_deduplicated() {
        let body = json!({
            "results": [
                {"downloadUrl": "https://core.ac.uk/download/pdf/12345.pdf"},
                {"downloadUrl": "https://core.ac.uk/download/pdf/12345.pdf"},
                {"downloadUrl": ""}
            ]
        });
        let candidates = extract_download_urls(&body);
        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url_type, UrlKind::Pdf);
    }

    #[test]
    fn missing_results_is_absence() {
        assert!(extract_download_urls(&json!({})).is_empty());
    }
}
