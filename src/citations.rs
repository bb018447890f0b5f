//! Citation discovery: find the papers that cite or reuse a dataset.
//!
//! Two strategies run concurrently. Strategy A resolves each original PMID
//! to a DOI and asks OpenAlex for works citing it (formal citations,
//! high precision). Strategy B searches PubMed full text for the accession
//! itself (reuse without citation). The merge preserves strategy A's order,
//! then appends strategy B's additions, deduplicated by publication
//! identity; a link found by both strategies is marked `Both`.

use crate::cache::{FingerprintCache, Namespace, TtlClass};
use crate::client::providers::{OpenAlexProvider, PubMedProvider};
use crate::model::{Dataset, DiscoveredBy, PubId, Publication};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// One citing paper with the strategy that found it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CitingPublication {
    pub publication: Publication,
    pub discovered_by: DiscoveredBy,
}

/// Per-strategy id lists, before the merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StrategyBreakdown {
    pub pmid_citation: Vec<PubId>,
    pub geoid_mention: Vec<PubId>,
}

/// Result of citation discovery. Empty output with populated `untried`
/// reasons is success, not failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CitationDiscoveryResult {
    pub citing: Vec<CitingPublication>,
    pub breakdown: StrategyBreakdown,
    pub untried: BTreeMap<String, String>,
}

pub struct CitationDiscovery {
    pubmed: Arc<PubMedProvider>,
    openalex: Option<Arc<OpenAlexProvider>>,
    cache: Arc<FingerprintCache>,
    max_citing_papers: usize,
}

impl CitationDiscovery {
    #[must_use]
    pub fn new(
        pubmed: Arc<PubMedProvider>,
        openalex: Option<Arc<OpenAlexProvider>>,
        cache: Arc<FingerprintCache>,
        max_citing_papers: usize,
    ) -> Self {
        Self {
            pubmed,
            openalex,
            cache,
            max_citing_papers,
        }
    }

    /// Discover citing publications for a dataset.
    pub async fn discover(&self, dataset: &Dataset) -> CitationDiscoveryResult {
        if let Some(cached) = self
            .cache
            .get::<CitationDiscoveryResult>(Namespace::Citations, &dataset.geo_id)
            .await
        {
            debug!(geo_id = %dataset.geo_id, "citation discovery cache hit");
            return cached;
        }

        let (formal, mentions) = tokio::join!(
            self.pmid_citation_strategy(dataset),
            self.geoid_mention_strategy(dataset),
        );

        let result = self.merge(dataset, formal, mentions);
        info!(
            geo_id = %dataset.geo_id,
            citing = result.citing.len(),
            formal = result.breakdown.pmid_citation.len(),
            mentions = result.breakdown.geoid_mention.len(),
            "citation discovery completed"
        );

        self.cache
            .put(
                Namespace::Citations,
                &dataset.geo_id,
                &result,
                if result.citing.is_empty() {
                    TtlClass::Negative
                } else {
                    TtlClass::PositiveShort
                },
            )
            .await;
        result
    }

    /// Strategy A: original PMIDs → DOIs → OpenAlex `cites:` queries.
    async fn pmid_citation_strategy(
        &self,
        dataset: &Dataset,
    ) -> (Vec<Publication>, BTreeMap<String, String>) {
        let mut untried = BTreeMap::new();

        if dataset.pmids.is_empty() {
            untried.insert(
                "pmid_citation".to_string(),
                "dataset has no original PMIDs".to_string(),
            );
            return (Vec::new(), untried);
        }
        let Some(openalex) = &self.openalex else {
            untried.insert(
                "pmid_citation".to_string(),
                "openalex provider is disabled".to_string(),
            );
            return (Vec::new(), untried);
        };

        let mut citing = Vec::new();
        for pmid in &dataset.pmids {
            let doi = match self.pubmed.resolve_doi(*pmid).await {
                Ok(Some(doi)) => doi,
                Ok(None) => {
                    debug!(pmid, "original PMID has no DOI; skipping citation lookup");
                    continue;
                }
                Err(error) => {
                    warn!(pmid, %error, "PMID to DOI resolution failed");
                    untried.insert(format!("pubmed:PMID_{pmid}"), error.to_string());
                    continue;
                }
            };

            match openalex
                .citing_works(&doi, self.max_citing_papers as u32)
                .await
            {
                Ok(works) => citing.extend(works),
                Err(error) => {
                    warn!(pmid, %error, "OpenAlex citation query failed");
                    untried.insert(format!("openalex:PMID_{pmid}"), error.to_string());
                }
            }
        }
        (citing, untried)
    }

    /// Strategy B: PubMed full-text search for the accession.
    async fn geoid_mention_strategy(
        &self,
        dataset: &Dataset,
    ) -> (Vec<Publication>, BTreeMap<String, String>) {
        let mut untried = BTreeMap::new();
        match self
            .pubmed
            .search_geo_mentions(&dataset.geo_id, self.max_citing_papers as u32)
            .await
        {
            Ok(publications) => (publications, untried),
            Err(error) => {
                warn!(geo_id = %dataset.geo_id, %error, "GEO mention search failed");
                untried.insert("geoid_mention".to_string(), error.to_string());
                (Vec::new(), untried)
            }
        }
    }

    /// Order-preserving merge with identity dedup and original filtering.
    fn merge(
        &self,
        dataset: &Dataset,
        (formal, formal_untried): (Vec<Publication>, BTreeMap<String, String>),
        (mentions, mention_untried): (Vec<Publication>, BTreeMap<String, String>),
    ) -> CitationDiscoveryResult {
        let original_ids: Vec<PubId> =
            dataset.pmids.iter().map(|pmid| PubId::from_pmid(*pmid)).collect();

        let mut breakdown = StrategyBreakdown::default();
        let mut merged: Vec<(PubId, CitingPublication)> = Vec::new();

        for publication in formal {
            let id = publication.id();
            breakdown.pmid_citation.push(id.clone());
            if original_ids.contains(&id) {
                continue;
            }
            match merged.iter().position(|(mid, _)| *mid == id) {
                Some(i) => merged[i].1.publication.absorb(&publication),
                None => merged.push((
                    id,
                    CitingPublication {
                        publication,
                        discovered_by: DiscoveredBy::PmidCitation,
                    },
                )),
            }
        }

        for publication in mentions {
            let id = publication.id();
            breakdown.geoid_mention.push(id.clone());
            if original_ids.contains(&id) {
                continue;
            }
            match merged.iter().position(|(mid, _)| *mid == id) {
                Some(i) => {
                    merged[i].1.publication.absorb(&publication);
                    merged[i].1.discovered_by =
                        merged[i].1.discovered_by.merge(DiscoveredBy::GeoidMention);
                }
                None => merged.push((
                    id,
                    CitingPublication {
                        publication,
                        discovered_by: DiscoveredBy::GeoidMention,
                    },
                )),
            }
        }

        let mut untried = formal_untried;
        untried.extend(mention_untried);

        CitationDiscoveryResult {
            citing: merged
                .into_iter()
                .map(|(_, citing)| citing)
                .take(self.max_citing_papers)
                .collect(),
            breakdown,
            untried,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CacheConfig, ProviderSettings};
    use crate::model::ProviderTag;

    fn discovery(max: usize) -> CitationDiscovery {
        let settings = ProviderSettings::default();
        let pubmed = Arc::new(
            PubMedProvider::new(&settings, crate::client::providers::EntrezIdentity::default(), 10.0)
                .unwrap(),
        );
        CitationDiscovery::new(
            pubmed,
            None,
            Arc::new(FingerprintCache::new(CacheConfig::default())),
            max,
        )
    }

    fn publication(pmid: u64, title: &str) -> Publication {
        Publication {
            pmid: Some(pmid),
            title: Some(title.to_string()),
            sources: vec![ProviderTag::PubMed],
            ..Publication::default()
        }
    }

    fn dataset_with_pmids(pmids: Vec<u64>) -> Dataset {
        Dataset {
            geo_id: "GSE570".to_string(),
            title: "test".to_string(),
            summary: String::new(),
            organism: None,
            platform: None,
            sample_count: None,
            submission_date: None,
            update_date: None,
            pmids,
        }
    }

    #[test]
    fn merge_preserves_strategy_a_order_then_b_additions() {
        let d = discovery(100);
        let dataset = dataset_with_pmids(vec![]);

        let formal = vec![publication(10, "a"), publication(11, "b")];
        let mentions = vec![publication(11, "b"), publication(12, "c")];

        let result = d.merge(
            &dataset,
            (formal, BTreeMap::new()),
            (mentions, BTreeMap::new()),
        );

        let ids: Vec<&str> = result
            .citing
            .iter()
            .map(|c| c.publication.id())
            .map(|id| match id.as_str() {
                "PMID_10" => "PMID_10",
                "PMID_11" => "PMID_11",
                "PMID_12" => "PMID_12",
                _ => "other",
            })
            .collect();
        assert_eq!(ids, vec!["PMID_10", "PMID_11", "PMID_12"]);
        assert_eq!(result.citing[1].discovered_by, DiscoveredBy::Both);
        assert_eq!(result.citing[0].discovered_by, DiscoveredBy::PmidCitation);
        assert_eq!(result.citing[2].discovered_by, DiscoveredBy::GeoidMention);
    }

    #[test]
    fn originals_are_filtered_out() {
        let d = discovery(100);
        let dataset = dataset_with_pmids(vec![10]);

        let mentions = vec![publication(10, "the original"), publication(12, "citing")];
        let result = d.merge(
            &dataset,
            (Vec::new(), BTreeMap::new()),
            (mentions, BTreeMap::new()),
        );

        assert_eq!(result.citing.len(), 1);
        assert_eq!(result.citing[0].publication.pmid, Some(12));
        // The breakdown still records what the strategy saw.
        assert_eq!(result.breakdown.geoid_mention.len(), 2);
    }

    #[test]
    fn output_is_capped() {
        let d = discovery(2);
        let dataset = dataset_with_pmids(vec![]);
        let mentions = (0..10).map(|i| publication(i, "x")).collect();
        let result = d.merge(
            &dataset,
            (Vec::new(), BTreeMap::new()),
            (mentions, BTreeMap::new()),
        );
        assert_eq!(result.citing.len(), 2);
    }
}
