//! Download engine: waterfall over a publication's candidate URLs.
//!
//! URLs are attempted strictly in collection order, one at a time per
//! publication. A landing page that yields embedded PDF links pushes them
//! onto the front of the queue; the magic-byte check is authoritative over
//! any Content-Type header. Exhausting every candidate is a successful
//! completion with `success = false`, never an error.

use crate::model::{
    CandidateUrls, DownloadOutcome, ProviderTag, Publication, Relation, SourceUrl, UrlFailure,
    UrlKind,
};
use crate::resilience::{backoff_delay, RetryConfig};
use crate::storage::{ContentStore, MIN_PDF_BYTES, PDF_MAGIC};
use crate::{Error, Result};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use std::collections::{HashSet, VecDeque};
use std::time::Duration;
use tokio::time::{timeout, Instant};
use tracing::{debug, info, warn};

/// Cap on PDF links taken from a single landing page.
const MAX_EXTRACTED_LINKS: usize = 3;

/// What one URL attempt produced.
enum Sniffed {
    Pdf(Vec<u8>),
    Landing(Vec<String>),
}

struct AttemptError {
    reason: String,
    retryable: bool,
}

pub struct DownloadEngine {
    client: reqwest::Client,
    retry: RetryConfig,
    per_url_timeout: Duration,
    per_publication_budget: Duration,
}

impl DownloadEngine {
    pub fn new(per_url_timeout: Duration, per_publication_budget: Duration) -> Result<Self> {
        // Publishers fingerprint plain library user agents; a browser UA
        // keeps otherwise-working candidates alive.
        let client = reqwest::Client::builder()
            .timeout(per_url_timeout)
            .connect_timeout(Duration::from_secs(15))
            .redirect(reqwest::redirect::Policy::limited(10))
            .user_agent(
                "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
            )
            .gzip(true)
            .build()
            .map_err(Error::Http)?;

        Ok(Self {
            client,
            retry: RetryConfig::download(),
            per_url_timeout,
            per_publication_budget,
        })
    }

    /// Run the waterfall for one publication and persist the first valid
    /// PDF through the store.
    pub async fn fetch(
        &self,
        geo_id: &str,
        relation: Relation,
        publication: &Publication,
        candidates: &CandidateUrls,
        store: &ContentStore,
    ) -> DownloadOutcome {
        let pub_id = publication.id();

        // Band 0: a PDF stored by any earlier enrichment wins instantly.
        if let Ok(existing) = store.get_pdf(&pub_id).await {
            let file_size = tokio::fs::metadata(&existing).await.map(|m| m.len()).ok();
            debug!(%pub_id, "download short-circuited by stored PDF");
            return DownloadOutcome {
                pub_id,
                success: true,
                pdf_path: Some(existing),
                file_size,
                sha256: None,
                successful_source: Some(ProviderTag::Cache),
                resolved_url: None,
                errors: Vec::new(),
            };
        }

        let deadline = Instant::now() + self.per_publication_budget;
        let mut queue: VecDeque<SourceUrl> = candidates.urls.iter().cloned().collect();
        let mut attempted: HashSet<String> = HashSet::new();
        let mut errors: Vec<UrlFailure> = Vec::new();

        while let Some(candidate) = queue.pop_front() {
            if Instant::now() >= deadline {
                errors.push(UrlFailure {
                    provider: candidate.provider,
                    url: candidate.url,
                    reason: "per-publication budget exhausted".to_string(),
                });
                break;
            }
            if !attempted.insert(candidate.url.clone()) {
                continue;
            }

            match self.try_url(&candidate.url, deadline).await {
                Ok(Sniffed::Pdf(bytes)) => {
                    let relation_dir = match relation {
                        Relation::Original => "original",
                        Relation::Citing => "citing",
                    };
                    let dest = store.pdf_path_for(geo_id, relation_dir, &pub_id);
                    match store.put_pdf(&pub_id, &bytes, &dest).await {
                        Ok(path) => {
                            let digest = Sha256::digest(&bytes);
                            info!(%pub_id, url = %candidate.url, "download succeeded");
                            return DownloadOutcome {
                                pub_id,
                                success: true,
                                pdf_path: Some(path),
                                file_size: Some(bytes.len() as u64),
                                sha256: Some(format!("{digest:x}")),
                                successful_source: Some(candidate.provider),
                                resolved_url: Some(candidate.url),
                                errors,
                            };
                        }
                        Err(error) => {
                            warn!(%pub_id, %error, "store rejected downloaded bytes");
                            errors.push(UrlFailure {
                                provider: candidate.provider,
                                url: candidate.url,
                                reason: error.to_string(),
                            });
                        }
                    }
                }
                Ok(Sniffed::Landing(links)) => {
                    debug!(
                        url = %candidate.url,
                        extracted = links.len(),
                        "landing page parsed"
                    );
                    errors.push(UrlFailure {
                        provider: candidate.provider,
                        url: candidate.url.clone(),
                        reason: format!(
                            "landing page; {} embedded link(s) extracted",
                            links.len()
                        ),
                    });
                    // Freshly discovered concrete PDFs jump the queue.
                    for link in links.into_iter().rev() {
                        if !attempted.contains(&link) {
                            queue.push_front(
                                SourceUrl {
                                    url: link,
                                    provider: candidate.provider,
                                    priority: candidate.priority,
                                    url_type: UrlKind::Pdf,
                                    confidence: candidate.confidence,
                                    auth_required: candidate.auth_required,
                                },
                            );
                        }
                    }
                }
                Err(attempt_error) => {
                    errors.push(UrlFailure {
                        provider: candidate.provider,
                        url: candidate.url,
                        reason: attempt_error.reason,
                    });
                }
            }
        }

        info!(%pub_id, attempts = errors.len(), "waterfall exhausted without a PDF");
        DownloadOutcome::failure(pub_id, errors)
    }

    /// Attempt one URL with the per-URL retry budget.
    async fn try_url(&self, url: &str, deadline: Instant) -> std::result::Result<Sniffed, AttemptError> {
        let mut attempt = 1u32;
        loop {
            match self.issue(url).await {
                Ok(sniffed) => return Ok(sniffed),
                Err(error) => {
                    let out_of_budget = Instant::now() >= deadline;
                    if !error.retryable || attempt >= self.retry.max_attempts || out_of_budget {
                        return Err(error);
                    }
                    let delay = backoff_delay(attempt - 1, &self.retry, None);
                    debug!(url, attempt, delay_ms = delay.as_millis() as u64, "retrying URL");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }

    async fn issue(&self, url: &str) -> std::result::Result<Sniffed, AttemptError> {
        let response = timeout(self.per_url_timeout, self.client.get(url).send())
            .await
            .map_err(|_| AttemptError {
                reason: "timeout".to_string(),
                retryable: true,
            })?
            .map_err(|e| AttemptError {
                reason: format!("request failed: {e}"),
                retryable: e.is_timeout() || e.is_connect(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(AttemptError {
                reason: format!("HTTP {status}"),
                retryable: status.as_u16() == 429 || status.is_server_error(),
            });
        }

        let bytes = timeout(self.per_url_timeout, response.bytes())
            .await
            .map_err(|_| AttemptError {
                reason: "body read timeout".to_string(),
                retryable: true,
            })?
            .map_err(|e| AttemptError {
                reason: format!("body read failed: {e}"),
                retryable: true,
            })?;

        // Content sniffing. The magic bytes are authoritative; the header
        // is not consulted at all.
        if bytes.starts_with(PDF_MAGIC) {
            if bytes.len() < MIN_PDF_BYTES {
                return Err(AttemptError {
                    reason: format!("PDF too small ({} bytes)", bytes.len()),
                    retryable: false,
                });
            }
            return Ok(Sniffed::Pdf(bytes.to_vec()));
        }

        if looks_like_html(&bytes) {
            let html = String::from_utf8_lossy(&bytes);
            let links = extract_pdf_links(&html, url);
            return Ok(Sniffed::Landing(links));
        }

        Err(AttemptError {
            reason: "body is neither PDF nor HTML".to_string(),
            retryable: false,
        })
    }

}

fn looks_like_html(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(512)];
    let text = String::from_utf8_lossy(head).to_lowercase();
    let trimmed = text.trim_start();
    trimmed.starts_with("<!doctype") || trimmed.starts_with("<html") || text.contains("<html")
}

/// Extract embedded/linked PDF URLs from a landing page, resolved against
/// the page URL, best candidates first.
fn extract_pdf_links(html: &str, base_url: &str) -> Vec<String> {
    let document = Html::parse_document(html);
    let base = url::Url::parse(base_url).ok();

    let resolve = |raw: &str| -> Option<String> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        if trimmed.starts_with("http://") || trimmed.starts_with("https://") {
            return Some(trimmed.to_string());
        }
        base.as_ref()?.join(trimmed).ok().map(Into::into)
    };

    let mut links: Vec<String> = Vec::new();
    let mut push = |candidate: Option<String>| {
        if let Some(link) = candidate {
            if !links.contains(&link) && links.len() < MAX_EXTRACTED_LINKS {
                links.push(link);
            }
        }
    };

    // Publisher metadata first: it names the canonical PDF.
    if let Ok(selector) = Selector::parse(r#"meta[name="citation_pdf_url"]"#) {
        for element in document.select(&selector) {
            push(element.value().attr("content").and_then(&resolve));
        }
    }
    for selector_text in ["embed[src]", "iframe[src]"] {
        if let Ok(selector) = Selector::parse(selector_text) {
            for element in document.select(&selector) {
                push(element.value().attr("src").and_then(&resolve));
            }
        }
    }
    if let Ok(selector) = Selector::parse("a[href]") {
        for element in document.select(&selector) {
            if let Some(href) = element.value().attr("href") {
                let lower = href.to_lowercase();
                if lower.ends_with(".pdf") || lower.contains(".pdf?") {
                    push(resolve(href));
                }
            }
        }
    }

    links
}
