//! Analysis context assembly: turns the stored corpus for one dataset into
//! an LLM-ready context block. The LLM itself is an external collaborator;
//! this module only gathers and formats what the index and the content
//! store already hold.

use crate::index::DatasetIndex;
use crate::model::{Dataset, PubId, Relation};
use crate::storage::ContentStore;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Cap on section text inlined per paper.
const SECTION_CHAR_LIMIT: usize = 4_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaperContext {
    pub pub_id: PubId,
    pub title: Option<String>,
    pub relation: Relation,
    pub abstract_text: Option<String>,
    pub methods: Option<String>,
    pub results: Option<String>,
    pub discussion: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisContext {
    pub geo_id: String,
    pub question: Option<String>,
    pub dataset: Dataset,
    pub papers: Vec<PaperContext>,
    /// Publications associated but without parseable full text.
    pub missing_full_text: Vec<PubId>,
}

fn clip(text: Option<String>) -> Option<String> {
    text.map(|t| t.chars().take(SECTION_CHAR_LIMIT).collect())
}

/// Assemble the analysis context for one dataset from the index and store.
pub async fn build_context(
    index: &DatasetIndex,
    store: &ContentStore,
    geo_id: &str,
    question: Option<String>,
) -> Result<AnalysisContext> {
    let dataset = index
        .get_dataset(geo_id)?
        .ok_or_else(|| Error::NotFound(format!("dataset {geo_id} is not in the index")))?
        .dataset;

    let mut papers = Vec::new();
    let mut missing = Vec::new();

    for association in index.associations_for(geo_id)? {
        let pub_id = association.pub_id.clone();
        if !store.has_pdf(&pub_id).await {
            missing.push(pub_id);
            continue;
        }
        match store.get_parsed(&pub_id).await {
            Ok(parsed) => {
                let title = index
                    .get_publication(&pub_id)?
                    .and_then(|stored| stored.publication.title);
                papers.push(PaperContext {
                    pub_id,
                    title,
                    relation: association.relation,
                    abstract_text: clip(parsed.abstract_text),
                    methods: clip(parsed.methods),
                    results: clip(parsed.results),
                    discussion: clip(parsed.discussion),
                });
            }
            Err(error) => {
                debug!(%pub_id, %error, "skipping paper without parseable text");
                missing.push(pub_id);
            }
        }
    }

    Ok(AnalysisContext {
        geo_id: geo_id.to_string(),
        question,
        dataset,
        papers,
        missing_full_text: missing,
    })
}

impl AnalysisContext {
    /// Render the context as a prompt block for the external LLM layer.
    #[must_use]
    pub fn to_prompt(&self) -> String {
        let mut out = String::new();
        out.push_str(&format!(
            "Dataset {}: {}\nOrganism: {}\nSamples: {}\n\nSummary:\n{}\n",
            self.geo_id,
            self.dataset.title,
            self.dataset.organism.as_deref().unwrap_or("unknown"),
            self.dataset
                .sample_count
                .map_or("unknown".to_string(), |n| n.to_string()),
            self.dataset.summary,
        ));

        if let Some(question) = &self.question {
            out.push_str(&format!("\nQuestion: {question}\n"));
        }

        for paper in &self.papers {
            out.push_str(&format!(
                "\n--- {} ({:?}) ---\n",
                paper.title.as_deref().unwrap_or(paper.pub_id.as_str()),
                paper.relation,
            ));
            for (name, section) in [
                ("Abstract", &paper.abstract_text),
                ("Methods", &paper.methods),
                ("Results", &paper.results),
                ("Discussion", &paper.discussion),
            ] {
                if let Some(text) = section {
                    out.push_str(&format!("{name}:\n{text}\n"));
                }
            }
        }

        if !self.missing_full_text.is_empty() {
            out.push_str(&format!(
                "\n({} associated publication(s) lack full text)\n",
                self.missing_full_text.len()
            ));
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{DiscoveredBy, Publication};

    #[tokio::test]
    async fn context_reports_missing_full_text() {
        let dir = tempfile::tempdir().unwrap();
        let index = DatasetIndex::open(&dir.path().join("index.db")).unwrap();
        let store = ContentStore::open(dir.path().join("pdfs"), dir.path().join("parsed"))
            .await
            .unwrap();

        let dataset = Dataset {
            geo_id: "GSE1".to_string(),
            title: "test series".to_string(),
            summary: "a summary".to_string(),
            organism: Some("Homo sapiens".to_string()),
            platform: None,
            sample_count: Some(3),
            submission_date: None,
            update_date: None,
            pmids: vec![11],
        };
        index.upsert_dataset(&dataset).unwrap();
        index
            .upsert_publication(&Publication {
                pmid: Some(11),
                title: Some("the original".to_string()),
                ..Publication::default()
            })
            .unwrap();
        index
            .record_association(
                "GSE1",
                &PubId::from_pmid(11),
                Relation::Original,
                DiscoveredBy::PmidCitation,
            )
            .unwrap();

        let context = build_context(&index, &store, "GSE1", Some("what changed?".to_string()))
            .await
            .unwrap();

        assert!(context.papers.is_empty());
        assert_eq!(context.missing_full_text, vec![PubId::from_pmid(11)]);

        let prompt = context.to_prompt();
        assert!(prompt.contains("Dataset GSE1"));
        assert!(prompt.contains("Question: what changed?"));
        assert!(prompt.contains("lack full text"));
    }

    #[tokio::test]
    async fn unknown_dataset_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let index = DatasetIndex::open(&dir.path().join("index.db")).unwrap();
        let store = ContentStore::open(dir.path().join("pdfs"), dir.path().join("parsed"))
            .await
            .unwrap();
        let error = build_context(&index, &store, "GSE404", None).await.unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }
}
