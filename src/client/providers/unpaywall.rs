//! Unpaywall client: legal open-access locations for a DOI.
//!
//! Every request must carry a contact email; the registry disables this
//! provider when none is configured.

use super::http::ProviderHttp;
use super::traits::{ProviderContext, ProviderError, SourceProvider};
use crate::config::ProviderSettings;
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;
use serde::Deserialize;
use tracing::debug;

const DEFAULT_BASE_URL: &str = "https://api.unpaywall.org/v2";

#[derive(Debug, Clone, Deserialize, Default)]
struct OaLocation {
    url: Option<String>,
    url_for_pdf: Option<String>,
    host_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
struct UnpaywallRecord {
    #[serde(default)]
    is_oa: bool,
    best_oa_location: Option<OaLocation>,
    #[serde(default)]
    oa_locations: Vec<OaLocation>,
}

pub struct UnpaywallProvider {
    http: ProviderHttp,
    base_url: String,
    email: String,
}

impl UnpaywallProvider {
    pub fn new(
        settings: &ProviderSettings,
        email: String,
        rate_per_sec: f64,
    ) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new("unpaywall", settings, rate_per_sec)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            email,
        })
    }

    async fn record(&self, doi: &str) -> Result<Option<UnpaywallRecord>, ProviderError> {
        let url = format!(
            "{}/{}?email={}",
            self.base_url.trim_end_matches('/'),
            urlencoding::encode(doi),
            urlencoding::encode(&self.email)
        );
        match self.http.get_json::<UnpaywallRecord>(&url).await {
            Ok(record) => Ok(Some(record)),
            Err(ProviderError::Status { code: 404, .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }
}

#[async_trait]
impl SourceProvider for UnpaywallProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Unpaywall
    }

    fn description(&self) -> &str {
        "Unpaywall - legal open access aggregator"
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
        let Some(record) = self.record(doi).await? else {
            debug!(doi, "DOI unknown to Unpaywall");
            return Ok(Vec::new());
        };
        if !record.is_oa {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut push = |location: &OaLocation, confidence: f32| {
            if let Some(pdf) = &location.url_for_pdf {
                if candidates.iter().all(|c: &SourceUrl| &c.url != pdf) {
                    candidates.push(
                        SourceUrl::new(pdf.clone(), ProviderTag::Unpaywall, UrlKind::Pdf)
                            .with_confidence(confidence),
                    );
                }
            } else if let Some(url) = &location.url {
                if candidates.iter().all(|c: &SourceUrl| &c.url != url) {
                    // Repository pages usually embed the PDF; publisher
                    // pages are plain landing pages.
                    let kind = if location.host_type.as_deref() == Some("repository") {
                        UrlKind::Html
                    } else {
                        UrlKind::Landing
                    };
                    candidates.push(
                        SourceUrl::new(url.clone(), ProviderTag::Unpaywall, kind)
                            .with_confidence(confidence * 0.7),
                    );
                }
            }
        };

        if let Some(best) = &record.best_oa_location {
            push(best, 0.9);
        }
        for location in &record.oa_locations {
            push(location, 0.6);
        }
        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProviderSettings;
    use wiremock::matchers::{method, path_regex, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base_url: String) -> UnpaywallProvider {
        let settings = ProviderSettings {
            base_url: Some(base_url),
            ..ProviderSettings::default()
        };
        UnpaywallProvider::new(&settings, "user@example.org".to_string(), 100.0).unwrap()
    }

    #[tokio::test]
    async fn best_location_pdf_ranks_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path_regex(r"^/10\..*"))
            .and(query_param("email", "user@example.org"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "is_oa": true,
                "best_oa_location": {
                    "url": "https://repo.example.org/page",
                    "url_for_pdf": "https://repo.example.org/file.pdf",
                    "host_type": "repository"
                },
                "oa_locations": []
            })))
            .mount(&server)
            .await;

        let publication = Publication {
            doi: Some("10.1038/nature12373".to_string()),
            ..Publication::default()
        };
        let candidates = provider(server.uri())
            .pdf_candidates(&publication, &ProviderContext::default())
            .await
            .unwrap();

        assert_eq!(candidates.len(), 1);
        assert_eq!(candidates[0].url, "https://repo.example.org/file.pdf");
        assert_eq!(candidates[0].url_type, UrlKind::Pdf);
    }

    #[tokio::test]
    async fn closed_access_yields_nothing() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"is_oa": false})),
            )
            .mount(&server)
            .await;

        let publication = Publication {
            doi: Some("10.1016/j.cell.2020.01.001".to_string()),
            ..Publication::default()
        };
        let candidates = provider(server.uri())
            .pdf_candidates(&publication, &ProviderContext::default())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }

    #[tokio::test]
    async fn publication_without_doi_is_absent() {
        let server = MockServer::start().await;
        let candidates = provider(server.uri())
            .pdf_candidates(&Publication::default(), &ProviderContext::default())
            .await
            .unwrap();
        assert!(candidates.is_empty());
    }
}
