//! Search and enrichment orchestration.
//!
//! Composes the pipeline: GEO search → ranking → per-dataset enrichment
//! (citation discovery → URL collection → download → parsed store), with
//! three layers of backpressure (datasets in parallel, publications per
//! dataset, downloads globally) and a request deadline that converts
//! unfinished work into partial results instead of failures.

use crate::cache::{FingerprintCache, Namespace, TtlClass};
use crate::citations::CitationDiscovery;
use crate::client::providers::{LookupId, ProviderContext, ProviderRegistry, SourceProvider};
use crate::client::GeoId;
use crate::collector::UrlCollector;
use crate::config::Config;
use crate::download::DownloadEngine;
use crate::index::DatasetIndex;
use crate::model::{
    Dataset, DiscoveredBy, DownloadOutcome, ParsedContent, ProviderTag, PubId, Publication,
    Relation,
};
use crate::query::build_geo_query;
use crate::ranking::{quality_score, rank_datasets, ScoreBreakdown};
use crate::resilience::TimeoutExt;
use crate::storage::ContentStore;
use crate::{Error, Result};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Search filters forwarded to GEO (or applied client-side).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchFilters {
    pub organism: Option<String>,
    pub platform: Option<String>,
    pub date_from: Option<String>,
    pub date_to: Option<String>,
    pub min_samples: Option<u32>,
}

/// Per-request enrichment switches; unset fields fall back to config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentOptions {
    pub include_citing_papers: Option<bool>,
    pub download_pdfs: Option<bool>,
    pub include_full_content: Option<bool>,
}

#[derive(Debug, Clone)]
struct EffectiveOptions {
    include_citing_papers: bool,
    download_pdfs: bool,
    include_full_content: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    #[serde(default)]
    pub filters: SearchFilters,
    pub max_results: usize,
    #[serde(default)]
    pub enrichment: EnrichmentOptions,
}

/// Download summary carried in a publication view.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadView {
    pub success: bool,
    pub pdf_path: Option<std::path::PathBuf>,
    pub file_size: Option<u64>,
    pub successful_source: Option<ProviderTag>,
    pub errors: Vec<String>,
}

impl From<&DownloadOutcome> for DownloadView {
    fn from(outcome: &DownloadOutcome) -> Self {
        Self {
            success: outcome.success,
            pdf_path: outcome.pdf_path.clone(),
            file_size: outcome.file_size,
            successful_source: outcome.successful_source,
            errors: outcome
                .errors
                .iter()
                .map(|e| format!("{}: {}", e.provider, e.reason))
                .collect(),
        }
    }
}

/// Presence flags and lengths for parsed content, without the bodies.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedMeta {
    pub has_abstract: bool,
    pub has_methods: bool,
    pub has_results: bool,
    pub has_discussion: bool,
    pub content_length: usize,
}

impl From<&ParsedContent> for ParsedMeta {
    fn from(parsed: &ParsedContent) -> Self {
        Self {
            has_abstract: parsed.abstract_text.is_some(),
            has_methods: parsed.methods.is_some(),
            has_results: parsed.results.is_some(),
            has_discussion: parsed.discussion.is_some(),
            content_length: parsed.content_length,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationView {
    pub pub_id: PubId,
    pub publication: Publication,
    pub relation: Relation,
    pub discovered_by: Option<DiscoveredBy>,
    pub download: Option<DownloadView>,
    pub parsed_meta: Option<ParsedMeta>,
    /// Section bodies, inlined only when `include_full_content` is set.
    pub full_content: Option<ParsedContent>,
}

/// Per-dataset enrichment accounting, user-visible.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EnrichmentStatus {
    pub completed: bool,
    pub papers_discovered: usize,
    pub urls_found: usize,
    pub pdfs_downloaded: usize,
    pub pdfs_parsed: usize,
    pub untried: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatasetView {
    pub dataset: Dataset,
    pub relevance: f64,
    pub quality: f64,
    pub match_reasons: Vec<String>,
    pub publications: Vec<PublicationView>,
    pub enrichment_status: EnrichmentStatus,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub datasets: Vec<DatasetView>,
    pub total_found: usize,
    pub elapsed_ms: u64,
    /// True when the deadline cut enrichment short somewhere.
    pub partial: bool,
}

pub struct Orchestrator {
    config: Arc<Config>,
    registry: Arc<ProviderRegistry>,
    cache: Arc<FingerprintCache>,
    index: Arc<DatasetIndex>,
    store: Arc<ContentStore>,
    citations: CitationDiscovery,
    collector: UrlCollector,
    engine: DownloadEngine,
    dataset_slots: Arc<Semaphore>,
    download_slots: Arc<Semaphore>,
}

impl Orchestrator {
    /// Construct the full pipeline from configuration. Fails only on
    /// configuration and store-initialization errors.
    pub async fn new(config: Config) -> Result<Self> {
        config.validate()?;
        let config = Arc::new(config);

        let registry = Arc::new(ProviderRegistry::from_config(&config)?);

        let mut cache = FingerprintCache::new(config.cache.clone());
        if let Some(spill) = &config.paths.cache_spill_path {
            cache = cache.with_spill(spill);
        }
        let cache = Arc::new(cache);

        let index = Arc::new(DatasetIndex::open(&config.paths.index_db_path)?);
        let store = Arc::new(
            ContentStore::open(config.paths.pdf_root(), config.paths.parsed_root()).await?,
        );
        store.sweep_partial_files().await?;

        let citations = CitationDiscovery::new(
            registry.pubmed.clone(),
            registry.openalex.clone(),
            cache.clone(),
            config.enrichment.max_citing_papers,
        );
        let collector = UrlCollector::new(
            registry.url_providers().to_vec(),
            registry.disabled().clone(),
            cache.clone(),
            config.concurrency.collector_fanout,
            config.deadlines.per_url_timeout(),
        );
        let engine = DownloadEngine::new(
            config.deadlines.per_url_timeout(),
            config.deadlines.per_publication_budget(),
        )?;

        Ok(Self {
            dataset_slots: Arc::new(Semaphore::new(config.concurrency.datasets_in_parallel)),
            download_slots: Arc::new(Semaphore::new(config.concurrency.downloads_global)),
            citations,
            collector,
            engine,
            registry,
            cache,
            index,
            store,
            config,
        })
    }

    /// The content store, for analysis-layer consumers.
    #[must_use]
    pub fn store(&self) -> Arc<ContentStore> {
        self.store.clone()
    }

    /// The durable index, for analysis-layer consumers.
    #[must_use]
    pub fn index(&self) -> Arc<DatasetIndex> {
        self.index.clone()
    }

    fn effective_options(&self, options: &EnrichmentOptions) -> EffectiveOptions {
        let defaults = &self.config.enrichment;
        EffectiveOptions {
            include_citing_papers: options
                .include_citing_papers
                .unwrap_or(defaults.include_citing_papers),
            download_pdfs: options.download_pdfs.unwrap_or(defaults.download_pdfs),
            include_full_content: options
                .include_full_content
                .unwrap_or(defaults.include_full_content),
        }
    }

    /// Top-level search: GEO query → rank → (optional) parallel enrichment.
    pub async fn search(&self, request: SearchRequest) -> Result<SearchResponse> {
        let started = Instant::now();
        let deadline = started + self.config.deadlines.request_deadline();

        if request.query.trim().is_empty() {
            return Err(Error::InvalidInput {
                field: "query".to_string(),
                reason: "query must not be empty".to_string(),
            });
        }
        let max_results = request.max_results.clamp(1, 100);

        let geo_query = build_geo_query(&request.query);
        let term = apply_filters(&geo_query.term, &request.filters);
        debug!(%term, "GEO search term built");

        let datasets = self.search_geo(&term, max_results, &request.filters).await?;
        let total_found = datasets.len();

        let terms: Vec<String> = if geo_query.phrases.is_empty() {
            request
                .query
                .split_whitespace()
                .map(ToOwned::to_owned)
                .collect()
        } else {
            geo_query.phrases.clone()
        };
        let ranked = rank_datasets(datasets, &terms, None);
        let selected: Vec<(Dataset, ScoreBreakdown)> =
            ranked.into_iter().take(max_results).collect();

        for (dataset, _) in &selected {
            self.index.upsert_dataset(dataset)?;
        }

        let options = self.effective_options(&request.enrichment);
        let enrich = options.include_citing_papers || options.download_pdfs;

        let views = if enrich {
            self.enrich_all(selected, &options, deadline).await
        } else {
            selected
                .into_iter()
                .map(|(dataset, breakdown)| self.skeleton_view(dataset, &breakdown, true))
                .collect()
        };

        let partial = views.iter().any(|view| !view.enrichment_status.completed);
        if partial {
            // The deadline aborted some enrichment mid-flight; drop any
            // half-written temp files before answering.
            let _ = self.store.sweep_partial_files().await;
        }

        Ok(SearchResponse {
            datasets: views,
            total_found,
            elapsed_ms: started.elapsed().as_millis() as u64,
            partial,
        })
    }

    /// Run the enrichment pipeline for a single known dataset.
    pub async fn enrich_dataset(
        &self,
        geo_id: &GeoId,
        options: &EnrichmentOptions,
    ) -> Result<DatasetView> {
        let deadline = Instant::now() + self.config.deadlines.request_deadline();

        let dataset = match self.index.get_dataset(geo_id.as_str())? {
            Some(stored) => stored.dataset,
            None => {
                let fetched = self
                    .registry
                    .geo
                    .fetch_series(geo_id)
                    .await
                    .map_err(Error::from)?
                    .ok_or_else(|| Error::NotFound(format!("GEO series {geo_id}")))?;
                self.index.upsert_dataset(&fetched)?;
                fetched
            }
        };

        let breakdown = ScoreBreakdown {
            score: 0.0,
            match_reasons: Vec::new(),
        };
        let options = self.effective_options(options);
        let remaining = deadline.saturating_duration_since(Instant::now());
        match self
            .enrich_one(dataset.clone(), &options)
            .with_timeout_duration(remaining)
            .await
        {
            Ok(view) => Ok(view),
            Err(_) => {
                let _ = self.store.sweep_partial_files().await;
                Ok(self.skeleton_view(dataset, &breakdown, false))
            }
        }
    }

    async fn search_geo(
        &self,
        term: &str,
        limit: usize,
        filters: &SearchFilters,
    ) -> Result<Vec<Dataset>> {
        let cache_key = format!("{term}\u{1}{limit}");
        if let Some(cached) = self
            .cache
            .get::<Vec<Dataset>>(Namespace::GeoSearch, &cache_key)
            .await
        {
            debug!(term, "GEO search cache hit");
            return Ok(apply_min_samples(cached, filters));
        }

        // Over-fetch so ranking has something to choose from.
        let fetch_limit = (limit * 3).clamp(limit, 60) as u32;
        let datasets = self
            .registry
            .geo
            .search_series(term, fetch_limit)
            .await
            .map_err(Error::from)?;

        self.cache
            .put(
                Namespace::GeoSearch,
                &cache_key,
                &datasets,
                if datasets.is_empty() {
                    TtlClass::Negative
                } else {
                    TtlClass::PositiveShort
                },
            )
            .await;
        Ok(apply_min_samples(datasets, filters))
    }

    async fn enrich_all(
        &self,
        selected: Vec<(Dataset, ScoreBreakdown)>,
        options: &EffectiveOptions,
        deadline: Instant,
    ) -> Vec<DatasetView> {
        let tasks = selected.into_iter().map(|(dataset, breakdown)| {
            let options = options.clone();
            async move {
                let _slot = self
                    .dataset_slots
                    .acquire()
                    .await
                    .expect("semaphore never closed");
                let remaining = deadline.saturating_duration_since(Instant::now());
                if remaining.is_zero() {
                    return self.skeleton_view(dataset, &breakdown, false);
                }
                match self
                    .enrich_one(dataset.clone(), &options)
                    .with_timeout_duration(remaining)
                    .await
                {
                    Ok(mut view) => {
                        view.relevance = breakdown.score;
                        view.match_reasons = breakdown.match_reasons.clone();
                        view
                    }
                    Err(_) => {
                        warn!(geo_id = %dataset.geo_id, "enrichment hit the request deadline");
                        self.skeleton_view(dataset, &breakdown, false)
                    }
                }
            }
        });

        // join_all preserves ranked order regardless of completion order.
        join_all(tasks).await
    }

    fn skeleton_view(
        &self,
        dataset: Dataset,
        breakdown: &ScoreBreakdown,
        completed: bool,
    ) -> DatasetView {
        DatasetView {
            quality: quality_score(&dataset),
            relevance: breakdown.score,
            match_reasons: breakdown.match_reasons.clone(),
            publications: Vec::new(),
            enrichment_status: EnrichmentStatus {
                completed,
                ..EnrichmentStatus::default()
            },
            dataset,
        }
    }

    /// Enrich one dataset: originals + citing papers, URL collection,
    /// downloads, and parsed views, bounded by the per-dataset and global
    /// semaphores.
    async fn enrich_one(&self, dataset: Dataset, options: &EffectiveOptions) -> DatasetView {
        let mut status = EnrichmentStatus {
            completed: true,
            ..EnrichmentStatus::default()
        };

        // Original publications from GEO metadata.
        let context = ProviderContext {
            timeout: self.config.deadlines.per_url_timeout(),
        };
        let mut ordered: Vec<(Publication, Relation, Option<DiscoveredBy>)> = Vec::new();
        for pmid in &dataset.pmids {
            let publication = match self
                .registry
                .pubmed
                .lookup(&LookupId::Pmid(*pmid), &context)
                .await
            {
                Ok(Some(publication)) => publication,
                Ok(None) => Publication {
                    pmid: Some(*pmid),
                    ..Publication::default()
                },
                Err(error) => {
                    warn!(pmid, %error, "original PMID lookup failed");
                    status
                        .untried
                        .insert(format!("pubmed:PMID_{pmid}"), error.to_string());
                    Publication {
                        pmid: Some(*pmid),
                        ..Publication::default()
                    }
                }
            };
            ordered.push((publication, Relation::Original, None));
        }

        // Citing papers via the two discovery strategies.
        if options.include_citing_papers {
            let discovery = self.citations.discover(&dataset).await;
            status.untried.extend(discovery.untried.clone());
            for citing in discovery.citing {
                ordered.push((
                    citing.publication,
                    Relation::Citing,
                    Some(citing.discovered_by),
                ));
            }
        }
        status.papers_discovered = ordered.len();

        // Record identities and associations before any download so the
        // join table never lags the filesystem.
        for (publication, relation, discovered_by) in &ordered {
            if let Err(error) = self.index.upsert_publication(publication) {
                warn!(%error, "publication upsert failed");
            }
            let discovered = discovered_by.unwrap_or(DiscoveredBy::PmidCitation);
            if let Err(error) = self.index.record_association(
                &dataset.geo_id,
                &publication.id(),
                *relation,
                discovered,
            ) {
                warn!(%error, "association upsert failed");
            }
        }

        // Per-publication pipeline, bounded per dataset.
        let pub_slots = Arc::new(Semaphore::new(self.config.concurrency.pubs_per_dataset));
        let geo_id = dataset.geo_id.clone();
        let tasks = ordered.into_iter().map(|(publication, relation, discovered_by)| {
            let pub_slots = pub_slots.clone();
            let geo_id = geo_id.clone();
            let options = options.clone();
            async move {
                let _slot = pub_slots.acquire().await.expect("semaphore never closed");
                self.enrich_publication(&geo_id, publication, relation, discovered_by, &options)
                    .await
            }
        });

        let views = join_all(tasks).await;
        for view in &views {
            if let Some(download) = &view.view.download {
                if download.success {
                    status.pdfs_downloaded += 1;
                }
            }
            if view.view.parsed_meta.is_some() || view.view.full_content.is_some() {
                status.pdfs_parsed += 1;
            }
            status.urls_found += usize::from(view.had_candidates());
        }

        info!(
            geo_id = %dataset.geo_id,
            papers = status.papers_discovered,
            downloaded = status.pdfs_downloaded,
            parsed = status.pdfs_parsed,
            "dataset enrichment completed"
        );

        DatasetView {
            quality: quality_score(&dataset),
            relevance: 0.0,
            match_reasons: Vec::new(),
            publications: views.into_iter().map(|v| v.view).collect(),
            enrichment_status: status,
            dataset,
        }
    }

    async fn enrich_publication(
        &self,
        geo_id: &str,
        publication: Publication,
        relation: Relation,
        discovered_by: Option<DiscoveredBy>,
        options: &EffectiveOptions,
    ) -> EnrichedPublication {
        let pub_id = publication.id();
        let candidates = self.collector.collect(&publication).await;
        let had_candidates = !candidates.urls.is_empty();

        let mut download_view = None;
        if options.download_pdfs {
            let _download_slot = self
                .download_slots
                .acquire()
                .await
                .expect("semaphore never closed");
            let outcome = self
                .engine
                .fetch(geo_id, relation, &publication, &candidates, &self.store)
                .await;
            if outcome.success {
                if let Err(error) = self.index.record_download(&outcome) {
                    warn!(%error, "download record upsert failed");
                }
            }
            download_view = Some(DownloadView::from(&outcome));
        }

        // Parsed view: inline bodies only on request; otherwise surface
        // metadata when an extraction is already cached.
        let mut parsed_meta = None;
        let mut full_content = None;
        if self.store.has_pdf(&pub_id).await {
            if options.include_full_content {
                match self.store.get_parsed(&pub_id).await {
                    Ok(parsed) => {
                        parsed_meta = Some(ParsedMeta::from(&parsed));
                        full_content = Some(parsed);
                    }
                    Err(error) => {
                        debug!(%pub_id, %error, "section extraction failed");
                    }
                }
            } else if let Some(parsed) = self.store.peek_parsed(&pub_id).await {
                parsed_meta = Some(ParsedMeta::from(&parsed));
            }
        }

        EnrichedPublication {
            had_candidates,
            view: PublicationView {
                pub_id,
                publication,
                relation,
                discovered_by,
                download: download_view,
                parsed_meta,
                full_content,
            },
        }
    }
}

struct EnrichedPublication {
    had_candidates: bool,
    view: PublicationView,
}

impl EnrichedPublication {
    fn had_candidates(&self) -> bool {
        self.had_candidates
    }
}

fn apply_filters(term: &str, filters: &SearchFilters) -> String {
    let mut parts = vec![format!("({term})")];
    if let Some(organism) = &filters.organism {
        parts.push(format!("\"{organism}\"[Organism]"));
    }
    if let Some(platform) = &filters.platform {
        parts.push(format!("{platform}[ACCN]"));
    }
    match (&filters.date_from, &filters.date_to) {
        (Some(from), Some(to)) => parts.push(format!("(\"{from}\"[PDAT] : \"{to}\"[PDAT])")),
        (Some(from), None) => parts.push(format!("(\"{from}\"[PDAT] : \"3000\"[PDAT])")),
        (None, Some(to)) => parts.push(format!("(\"1900\"[PDAT] : \"{to}\"[PDAT])")),
        (None, None) => {}
    }
    parts.join(" AND ")
}

fn apply_min_samples(datasets: Vec<Dataset>, filters: &SearchFilters) -> Vec<Dataset> {
    match filters.min_samples {
        Some(min) => datasets
            .into_iter()
            .filter(|dataset| dataset.sample_count.is_some_and(|n| n >= min))
            .collect(),
        None => datasets,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filters_compose_into_the_term() {
        let filters = SearchFilters {
            organism: Some("Homo sapiens".to_string()),
            platform: Some("GPL24676".to_string()),
            date_from: Some("2020".to_string()),
            date_to: None,
            min_samples: None,
        };
        let term = apply_filters("breast AND cancer", &filters);
        assert_eq!(
            term,
            "(breast AND cancer) AND \"Homo sapiens\"[Organism] AND GPL24676[ACCN] AND (\"2020\"[PDAT] : \"3000\"[PDAT])"
        );
    }

    #[test]
    fn min_samples_filters_client_side() {
        let make = |geo_id: &str, samples: Option<u32>| Dataset {
            geo_id: geo_id.to_string(),
            title: String::new(),
            summary: String::new(),
            organism: None,
            platform: None,
            sample_count: samples,
            submission_date: None,
            update_date: None,
            pmids: Vec::new(),
        };
        let filters = SearchFilters {
            min_samples: Some(10),
            ..SearchFilters::default()
        };
        let kept = apply_min_samples(
            vec![make("GSE1", Some(5)), make("GSE2", Some(20)), make("GSE3", None)],
            &filters,
        );
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].geo_id, "GSE2");
    }
}
