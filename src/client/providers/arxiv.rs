//! arXiv client over the Atom query API.
//!
//! Biomedical datasets occasionally get cited from methods-heavy preprints
//! that live here rather than on bioRxiv, so the provider stays in the
//! waterfall at preprint priority.

use super::http::ProviderHttp;
use super::traits::{ProviderContext, ProviderError, SourceProvider};
use crate::config::ProviderSettings;
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;
use tracing::debug;
use url::Url;

const DEFAULT_BASE_URL: &str = "http://export.arxiv.org/api/query";

pub struct ArxivProvider {
    http: ProviderHttp,
    base_url: String,
}

impl ArxivProvider {
    pub fn new(settings: &ProviderSettings, rate_per_sec: f64) -> Result<Self, ProviderError> {
        Ok(Self {
            http: ProviderHttp::new("arxiv", settings, rate_per_sec)?,
            base_url: settings
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
        })
    }

    fn build_query_url(&self, search_query: &str, max_results: u32) -> Result<String, ProviderError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| ProviderError::Other(format!("invalid base URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("search_query", search_query)
            .append_pair("start", "0")
            .append_pair("max_results", &max_results.to_string())
            .append_pair("sortBy", "relevance")
            .append_pair("sortOrder", "descending");
        Ok(url.to_string())
    }

    /// Parse the Atom feed into publications plus their PDF links.
    fn parse_feed(&self, feed: &str) -> Result<Vec<(Publication, Option<String>)>, ProviderError> {
        let doc = roxmltree::Document::parse(feed)
            .map_err(|e| ProviderError::Parse(format!("failed to parse Atom XML: {e}")))?;

        let mut entries = Vec::new();
        for entry in doc.descendants().filter(|n| n.has_tag_name("entry")) {
            let mut publication = Publication {
                journal: Some("arXiv".to_string()),
                sources: vec![ProviderTag::Arxiv],
                ..Publication::default()
            };
            let mut pdf_url = None;

            for child in entry.children().filter(roxmltree::Node::is_element) {
                match child.tag_name().name() {
                    "title" => {
                        if let Some(title) = child.text() {
                            publication.title =
                                Some(title.trim().replace('\n', " ").replace("  ", " "));
                        }
                    }
                    "summary" => {
                        if let Some(summary) = child.text() {
                            publication.abstract_text =
                                Some(summary.trim().replace('\n', " ").replace("  ", " "));
                        }
                    }
                    "published" => {
                        if let Some(published) = child.text() {
                            publication.year = published
                                .split('-')
                                .next()
                                .and_then(|year| year.parse::<u32>().ok());
                        }
                    }
                    "author" => {
                        for name in child.descendants().filter(|n| n.has_tag_name("name")) {
                            if let Some(author) = name.text() {
                                publication.authors.push(author.trim().to_string());
                            }
                        }
                    }
                    "doi" => {
                        if let Some(doi) = child.text() {
                            publication.doi = Some(doi.trim().to_string());
                        }
                    }
                    "link" => {
                        if child.attribute("type") == Some("application/pdf") {
                            pdf_url = child.attribute("href").map(ToOwned::to_owned);
                        }
                    }
                    _ => {}
                }
            }

            if publication.title.is_some() {
                entries.push((publication, pdf_url));
            }
        }

        debug!(entries = entries.len(), "parsed arXiv feed");
        Ok(entries)
    }
}

#[async_trait]
impl SourceProvider for ArxivProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::Arxiv
    }

    fn description(&self) -> &str {
        "arXiv.org - open access e-prints"
    }

    fn serves_urls(&self) -> bool {
        true
    }

    async fn search(
        &self,
        query: &str,
        limit: u32,
        _context: &ProviderContext,
    ) -> Result<Vec<Publication>, ProviderError> {
        let url = self.build_query_url(&format!("all:\"{query}\""), limit)?;
        let feed = self.http.get_text(&url).await?;
        Ok(self
            .parse_feed(&feed)?
            .into_iter()
            .map(|(publication, _)| publication)
            .collect())
    }

    async fn pdf_candidates(
        &self,
        publication: &Publication,
        _context: &ProviderContext,
    ) -> Result<Vec<SourceUrl>, ProviderError> {
        // arXiv's API has no DOI filter worth trusting; title match is the
        // usable route and only for preprint-shaped records.
        let Some(title) = &publication.title else {
            return Ok(Vec::new());
        };
        let url = self.build_query_url(&format!("ti:\"{title}\""), 3)?;
        let feed = self.http.get_text(&url).await?;

        let normalized_title = title.trim().to_lowercase();
        let candidates = self
            .parse_feed(&feed)?
            .into_iter()
            .filter(|(entry, _)| {
                entry
                    .title
                    .as_deref()
                    .is_some_and(|t| t.trim().to_lowercase() == normalized_title)
            })
            .filter_map(|(_, pdf_url)| pdf_url)
            .map(|pdf_url| {
                SourceUrl::new(pdf_url, ProviderTag::Arxiv, UrlKind::Pdf).with_confidence(0.7)
            })
            .collect();
        Ok(candidates)
    }
}
