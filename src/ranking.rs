//! Dataset ranking. Pure functions over normalized metadata: no I/O, no
//! clocks, deterministic tie-breaking by accession.

use crate::model::Dataset;
use std::collections::HashMap;

/// Score with its explanation.
#[derive(Debug, Clone)]
pub struct ScoreBreakdown {
    /// Relevance in [0, 1]
    pub score: f64,
    pub match_reasons: Vec<String>,
}

/// Field weights: a title hit is worth more than a summary hit.
const TITLE_WEIGHT: f64 = 1.0;
const SUMMARY_WEIGHT: f64 = 0.6;
const FIELD_WEIGHT: f64 = 0.4;

/// Keyword relevance of one dataset against the query terms.
///
/// Monotonic: every additional matched term adds a non-negative
/// contribution, normalized by the fixed term count.
#[must_use]
pub fn score_dataset(dataset: &Dataset, terms: &[String]) -> ScoreBreakdown {
    if terms.is_empty() {
        return ScoreBreakdown {
            score: 0.0,
            match_reasons: Vec::new(),
        };
    }

    let title = dataset.title.to_lowercase();
    let summary = dataset.summary.to_lowercase();
    let organism = dataset.organism.as_deref().unwrap_or("").to_lowercase();
    let platform = dataset.platform.as_deref().unwrap_or("").to_lowercase();

    let mut matched_weight = 0.0;
    let mut match_reasons = Vec::new();

    for term in terms {
        let needle = term.to_lowercase();
        if needle.is_empty() {
            continue;
        }
        if title.contains(&needle) {
            matched_weight += TITLE_WEIGHT;
            match_reasons.push(format!("title contains '{term}'"));
        } else if summary.contains(&needle) {
            matched_weight += SUMMARY_WEIGHT;
            match_reasons.push(format!("summary contains '{term}'"));
        } else if organism.contains(&needle) || platform.contains(&needle) {
            matched_weight += FIELD_WEIGHT;
            match_reasons.push(format!("metadata contains '{term}'"));
        }
    }

    ScoreBreakdown {
        score: (matched_weight / (terms.len() as f64 * TITLE_WEIGHT)).clamp(0.0, 1.0),
        match_reasons,
    }
}

/// Quality of a dataset independent of any query.
///
/// Monotonic in metadata completeness, sample count, and the presence of a
/// linked publication.
#[must_use]
pub fn quality_score(dataset: &Dataset) -> f64 {
    let fields = [
        !dataset.title.is_empty(),
        !dataset.summary.is_empty(),
        dataset.organism.is_some(),
        dataset.platform.is_some(),
        dataset.submission_date.is_some(),
    ];
    let completeness =
        fields.iter().filter(|&&present| present).count() as f64 / fields.len() as f64;

    let sample_factor = dataset
        .sample_count
        .map_or(0.0, |n| (f64::from(n) / 100.0).min(1.0));

    let has_publication = if dataset.pmids.is_empty() { 0.0 } else { 1.0 };

    0.4 * completeness + 0.4 * sample_factor + 0.2 * has_publication
}

/// Rank datasets by combined score, descending; ties break by keyword
/// relevance, then by accession for determinism.
#[must_use]
pub fn rank_datasets(
    datasets: Vec<Dataset>,
    terms: &[String],
    semantic_scores: Option<&HashMap<String, f64>>,
) -> Vec<(Dataset, ScoreBreakdown)> {
    let mut scored: Vec<(Dataset, ScoreBreakdown, f64)> = datasets
        .into_iter()
        .map(|dataset| {
            let keyword = score_dataset(&dataset, terms);
            let combined = match semantic_scores.and_then(|scores| scores.get(&dataset.geo_id)) {
                Some(semantic) => 0.7 * keyword.score + 0.3 * semantic.clamp(0.0, 1.0),
                None => keyword.score,
            };
            (dataset, keyword, combined)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| {
                b.1.score
                    .partial_cmp(&a.1.score)
                    .unwrap_or(std::cmp::Ordering::Equal)
            })
            .then_with(|| a.0.geo_id.cmp(&b.0.geo_id))
    });

    scored
        .into_iter()
        .map(|(dataset, mut breakdown, combined)| {
            breakdown.score = combined;
            (dataset, breakdown)
        })
        .collect()
}
