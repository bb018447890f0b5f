//! Sci-Hub client. Opt-in gray-area source, disabled by default.
//!
//! Mirror list and PDF selectors come from configuration: the working
//! subset shifts too often to hard-code. Each mirror serves an HTML page
//! with the PDF in an embed/iframe; the selectors pull that src out.

use super::http::ProviderHttp;
use super::traits::{ProviderContext, ProviderError, SourceProvider};
use crate::config::SciHubSettings;
use crate::model::{ProviderTag, Publication, SourceUrl, UrlKind};
use async_trait::async_trait;
use scraper::{Html, Selector};
use tracing::{debug, warn};

pub struct SciHubProvider {
    http: ProviderHttp,
    mirrors: Vec<String>,
    pdf_selectors: Vec<String>,
}

impl SciHubProvider {
    pub fn new(settings: &SciHubSettings, rate_per_sec: f64) -> Result<Self, ProviderError> {
        if settings.mirrors.is_empty() {
            return Err(ProviderError::Other("no Sci-Hub mirrors configured".to_string()));
        }
        Ok(Self {
            http: ProviderHttp::new("sci_hub", &settings.provider, rate_per_sec)?,
            mirrors: settings.mirrors.clone(),
            pdf_selectors: settings.pdf_selectors.clone(),
        })
    }

    /// Pull the embedded PDF URL out of a mirror's article page.
    fn extract_pdf_url(&self, html: &str, mirror: &str) -> Option<String> {
        let document = Html::parse_document(html);
        for selector_text in &self.pdf_selectors {
            let Ok(selector) = Selector::parse(selector_text) else {
                warn!(selector = %selector_text, "invalid Sci-Hub selector in config");
                continue;
            };
            for element in document.select(&selector) {
                let Some(raw) = element
                    .value()
                    .attr("src")
                    .or_else(|| element.value().attr("href"))
                else {
                    continue;
                };
                return Some(normalize_embed_url(raw, mirror));
            }
        }
        None
    }
}

/// Mirrors emit protocol-relative and path-relative embed sources.
fn normalize_embed_url(raw: &str, mirror: &str) -> String {
    let trimmed = raw.split('#').next().unwrap_or(raw);
    if trimmed.starts_with("//") {
        format!("https:{trimmed}")
    } else if trimmed.starts_with('/') {
        format!("{}{trimmed}", mirror.trim_end_matches('/'))
    } else {
        trimmed.to_string()
    }
}

#[async_trait]
impl SourceProvider for SciHubProvider {
    fn tag(&self) -> ProviderTag {
        ProviderTag::SciHub
    }

    fn description(&self) -> &str {
        "Sci-Hub - gray-area full text, opt-in"
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

        for mirror in &self.mirrors {
            let url = format!("{}/{doi}", mirror.trim_end_matches('/'));
            match self.http.get_text(&url).await {
                Ok(html) => {
                    if let Some(pdf_url) = self.extract_pdf_url(&html, mirror) {
                        debug!(mirror, "Sci-Hub mirror produced a PDF URL");
                        return Ok(vec![SourceUrl::new(
                            pdf_url,
                            ProviderTag::SciHub,
                            UrlKind::Pdf,
                        )
                        .with_confidence(0.5)]);
                    }
                    debug!(mirror, doi, "mirror page had no recognizable embed");
                }
                Err(error) => {
                    debug!(mirror, %error, "Sci-Hub mirror failed, trying next");
                }
            }
        }
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SciHubSettings;

    fn provider() -> SciHubProvider {
        SciHubProvider::new(&SciHubSettings::default(), 10.0).unwrap()
    }

    #[test]
    fn extracts_protocol_relative_embed() {
        let html = r#"<html><body>
            <embed id="pdf" src="//sci-hub.se/downloads/2022/article.pdf#view=FitH"></embed>
        </body></html>"#;
        let url = provider()
            .extract_pdf_url(html, "https://sci-hub.se")
            .unwrap();
        assert_eq!(url, "https://sci-hub.se/downloads/2022/article.pdf");
    }

    #[test]
    fn extracts_path_relative_iframe() {
        let html = r#"<iframe id="pdf" src="/downloads/2022/other.pdf"></iframe>"#;
        let url = provider()
            .extract_pdf_url(html, "https://sci-hub.st/")
            .unwrap();
        assert_eq!(url, "https://sci-hub.st/downloads/2022/other.pdf");
    }

    #[test]
    fn page_without_embed_is_absence() {
        assert!(provider()
            .extract_pdf_url("<html><body>captcha</body></html>", "https://sci-hub.se")
            .is_none());
    }

    #[test]
    fn empty_mirror_list_is_rejected() {
        let mut settings = SciHubSettings::default();
        settings.mirrors.clear();
        assert!(SciHubProvider::new(&settings, 10.0).is_err());
    }
}
