//! URL collection: parallel fan-out over every enabled provider, producing
//! a priority-sorted candidate list for one publication.
//!
//! Pure discovery. Nothing here opens a PDF stream; the download engine
//! consumes the sorted list. Latency is bounded by the slowest single
//! provider (they run concurrently), and a provider timing out is recorded
//! in provenance rather than failing the stage.

use crate::cache::{FingerprintCache, Namespace, TtlClass};
use crate::client::providers::{ProviderContext, SourceProvider};
use crate::model::{CandidateUrls, ProbeOutcome, ProviderTag, Publication, SourceUrl};
use futures::future::join_all;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio::time::timeout;
use tracing::{debug, info};

pub struct UrlCollector {
    providers: Vec<Arc<dyn SourceProvider>>,
    disabled: BTreeMap<ProviderTag, String>,
    cache: Arc<FingerprintCache>,
    fanout: Arc<Semaphore>,
    per_task_timeout: Duration,
    pmc_bulk_pattern: Regex,
}

impl UrlCollector {
    #[must_use]
    pub fn new(
        providers: Vec<Arc<dyn SourceProvider>>,
        disabled: BTreeMap<ProviderTag, String>,
        cache: Arc<FingerprintCache>,
        fanout_limit: usize,
        per_task_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            disabled,
            cache,
            fanout: Arc::new(Semaphore::new(fanout_limit.max(1))),
            per_task_timeout,
            // PMC's per-article /pdf endpoint 403s bulk automation; letting
            // it through would occupy the top of the waterfall and suppress
            // real downloads.
            pmc_bulk_pattern: Regex::new(r"ncbi\.nlm\.nih\.gov/pmc/articles/PMC\d+/pdf")
                .expect("static pattern compiles"),
        }
    }

    /// Collect and sort candidate URLs for one publication.
    pub async fn collect(&self, publication: &Publication) -> CandidateUrls {
        let pub_id = publication.id();

        if let Some(cached) = self
            .cache
            .get::<CandidateUrls>(Namespace::UrlCollect, pub_id.as_str())
            .await
        {
            debug!(pub_id = %pub_id, "URL collection cache hit");
            return cached;
        }

        let context = ProviderContext {
            timeout: self.per_task_timeout,
        };

        // One concurrent probe per provider, bounded by the fanout
        // semaphore; all complete (or time out) before assembly.
        let probes = self.providers.iter().map(|provider| {
            let provider = provider.clone();
            let publication = publication.clone();
            let context = context.clone();
            let fanout = self.fanout.clone();
            let per_task_timeout = self.per_task_timeout;
            async move {
                let _permit = fanout.acquire().await.expect("semaphore never closed");
                let outcome =
                    timeout(per_task_timeout, provider.pdf_candidates(&publication, &context))
                        .await;
                (provider.tag(), outcome)
            }
        });

        let mut urls = Vec::new();
        let mut provenance: BTreeMap<ProviderTag, ProbeOutcome> = BTreeMap::new();

        for (tag, outcome) in join_all(probes).await {
            match outcome {
                Ok(Ok(candidates)) if candidates.is_empty() => {
                    provenance.insert(tag, ProbeOutcome::Absent("no candidates".to_string()));
                }
                Ok(Ok(candidates)) => {
                    let kept = self.apply_sanity_filters(candidates, tag, &mut provenance);
                    if !kept.is_empty() {
                        provenance.insert(tag, ProbeOutcome::Found(kept.len()));
                        urls.extend(kept);
                    }
                }
                Ok(Err(error)) => {
                    provenance.insert(tag, ProbeOutcome::Failed(error.to_string()));
                }
                Err(_) => {
                    provenance.insert(tag, ProbeOutcome::Absent("timeout".to_string()));
                }
            }
        }

        for (tag, reason) in &self.disabled {
            provenance.insert(*tag, ProbeOutcome::Skipped(reason.clone()));
        }

        urls.sort_by_key(SourceUrl::sort_key);
        dedup_by_url(&mut urls);

        let result = CandidateUrls {
            pub_id: pub_id.clone(),
            urls,
            provenance,
        };

        info!(
            pub_id = %pub_id,
            candidates = result.urls.len(),
            "URL collection completed"
        );

        self.cache
            .put(
                Namespace::UrlCollect,
                pub_id.as_str(),
                &result,
                if result.urls.is_empty() {
                    TtlClass::Negative
                } else {
                    TtlClass::PositiveLong
                },
            )
            .await;
        result
    }

    /// Normalization plus known-broken-pattern filtering.
    fn apply_sanity_filters(
        &self,
        candidates: Vec<SourceUrl>,
        tag: ProviderTag,
        provenance: &mut BTreeMap<ProviderTag, ProbeOutcome>,
    ) -> Vec<SourceUrl> {
        let mut kept = Vec::new();
        let mut filtered = 0usize;

        for mut candidate in candidates {
            candidate.url = candidate.url.trim().to_string();
            if candidate.url.is_empty()
                || !(candidate.url.starts_with("http://") || candidate.url.starts_with("https://"))
            {
                filtered += 1;
                continue;
            }
            if self.pmc_bulk_pattern.is_match(&candidate.url) {
                debug!(url = %candidate.url, "dropping PMC bulk-PDF URL");
                filtered += 1;
                continue;
            }
            kept.push(candidate);
        }

        if kept.is_empty() && filtered > 0 {
            provenance.insert(
                tag,
                ProbeOutcome::Filtered(format!("{filtered} URL(s) dropped by sanity filters")),
            );
        }
        kept
    }
}

/// Keep the first (best-sorted) occurrence of each URL.
fn dedup_by_url(urls: &mut Vec<SourceUrl>) {
    let mut seen = std::collections::HashSet::new();
    urls.retain(|candidate| seen.insert(candidate.url.clone()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::FingerprintCache;
    use crate::client::providers::{ProviderError, SourceProvider};
    use crate::config::CacheConfig;
    use crate::model::UrlKind;
    use async_trait::async_trait;

    /// Scripted provider for collector tests.
    struct FakeProvider {
        tag: ProviderTag,
        urls: Vec<SourceUrl>,
        fail: bool,
        delay: Duration,
    }

    #[async_trait]
    impl SourceProvider for FakeProvider {
        fn tag(&self) -> ProviderTag {
            self.tag
        }
        fn description(&self) -> &str {
            "fake"
        }
        fn serves_urls(&self) -> bool {
            true
        }
        async fn pdf_candidates(
            &self,
            _publication: &Publication,
            _context: &ProviderContext,
        ) -> Result<Vec<SourceUrl>, ProviderError> {
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ProviderError::from_status(500, "boom"));
            }
            Ok(self.urls.clone())
        }
    }

    fn collector(providers: Vec<Arc<dyn SourceProvider>>) -> UrlCollector {
        UrlCollector::new(
            providers,
            BTreeMap::new(),
            Arc::new(FingerprintCache::new(CacheConfig::default())),
            16,
            Duration::from_millis(200),
        )
    }

    fn publication() -> Publication {
        Publication {
            pmid: Some(1),
            doi: Some("10.1/x".to_string()),
            ..Publication::default()
        }
    }

    #[tokio::test]
    async fn candidates_are_sorted_and_failures_recorded() {
        let providers: Vec<Arc<dyn SourceProvider>> = vec![
            Arc::new(FakeProvider {
                tag: ProviderTag::SciHub,
                urls: vec![SourceUrl::new("https://a/x.pdf", ProviderTag::SciHub, UrlKind::Pdf)],
                fail: false,
                delay: Duration::ZERO,
            }),
            Arc::new(FakeProvider {
                tag: ProviderTag::Unpaywall,
                urls: vec![SourceUrl::new(
                    "https://b/y.pdf",
                    ProviderTag::Unpaywall,
                    UrlKind::Pdf,
                )],
                fail: false,
                delay: Duration::ZERO,
            }),
            Arc::new(FakeProvider {
                tag: ProviderTag::Crossref,
                urls: vec![],
                fail: true,
                delay: Duration::ZERO,
            }),
        ];

        let result = collector(providers).collect(&publication()).await;

        // Unpaywall's band beats Sci-Hub's.
        assert_eq!(result.urls[0].provider, ProviderTag::Unpaywall);
        assert_eq!(result.urls[1].provider, ProviderTag::SciHub);
        assert!(matches!(
            result.provenance.get(&ProviderTag::Crossref),
            Some(ProbeOutcome::Failed(_))
        ));
    }

    #[tokio::test]
    async fn timeouts_do_not_block_other_providers() {
        let providers: Vec<Arc<dyn SourceProvider>> = vec![
            Arc::new(FakeProvider {
                tag: ProviderTag::Pmc,
                urls: vec![SourceUrl::new("https://p/x.pdf", ProviderTag::Pmc, UrlKind::Pdf)],
                fail: false,
                delay: Duration::ZERO,
            }),
            Arc::new(FakeProvider {
                tag: ProviderTag::Core,
                urls: vec![],
                fail: false,
                delay: Duration::from_secs(5),
            }),
        ];

        let started = std::time::Instant::now();
        let result = collector(providers).collect(&publication()).await;
        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(result.urls.len(), 1);
        assert_eq!(
            result.provenance.get(&ProviderTag::Core),
            Some(&ProbeOutcome::Absent("timeout".to_string()))
        );
    }

    #[tokio::test]
    async fn pmc_bulk_urls_are_filtered_and_flagged() {
        let providers: Vec<Arc<dyn SourceProvider>> = vec![Arc::new(FakeProvider {
            tag: ProviderTag::EuropePmc,
            urls: vec![SourceUrl::new(
                "https://www.ncbi.nlm.nih.gov/pmc/articles/PMC123456/pdf/main.pdf",
                ProviderTag::EuropePmc,
                UrlKind::Pdf,
            )],
            fail: false,
            delay: Duration::ZERO,
        })];

        let result = collector(providers).collect(&publication()).await;
        assert!(result.urls.is_empty());
        assert!(matches!(
            result.provenance.get(&ProviderTag::EuropePmc),
            Some(ProbeOutcome::Filtered(_))
        ));
    }

    #[tokio::test]
    async fn collection_result_is_cached() {
        let cache = Arc::new(FingerprintCache::new(CacheConfig::default()));
        let providers: Vec<Arc<dyn SourceProvider>> = vec![Arc::new(FakeProvider {
            tag: ProviderTag::Unpaywall,
            urls: vec![SourceUrl::new("https://b/y.pdf", ProviderTag::Unpaywall, UrlKind::Pdf)],
            fail: false,
            delay: Duration::ZERO,
        })];
        let collector = UrlCollector::new(
            providers,
            BTreeMap::new(),
            cache.clone(),
            16,
            Duration::from_millis(200),
        );

        let publication = publication();
        let first = collector.collect(&publication).await;
        let second = collector.collect(&publication).await;
        assert_eq!(first.urls.len(), second.urls.len());
        assert!(cache.stats().await.hits >= 1);
    }
}
