//! Core value objects shared across pipeline stages.
//!
//! Everything here is identity-by-field: a [`Publication`] is keyed by PMID,
//! then DOI, then a stable title hash, and that key never changes once the
//! record enters a request. Stores key every write by [`PubId`] so that
//! download order and analysis order can interleave freely.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Closed set of external providers.
///
/// The ordinal doubles as the final tie-breaker when sorting candidate URLs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProviderTag {
    Cache,
    Proxy,
    Pmc,
    EuropePmc,
    Unpaywall,
    Core,
    OpenAlex,
    Crossref,
    Biorxiv,
    Arxiv,
    SciHub,
    LibGen,
    Geo,
    PubMed,
}

impl ProviderTag {
    /// Waterfall priority band; lower wins.
    #[must_use]
    pub fn priority_band(self) -> u8 {
        match self {
            ProviderTag::Cache => 0,
            ProviderTag::Proxy => 1,
            ProviderTag::Pmc | ProviderTag::EuropePmc => 2,
            ProviderTag::Unpaywall => 3,
            ProviderTag::Core => 4,
            ProviderTag::OpenAlex => 5,
            ProviderTag::Crossref => 6,
            ProviderTag::Biorxiv | ProviderTag::Arxiv => 7,
            ProviderTag::SciHub => 8,
            ProviderTag::LibGen => 9,
            // Metadata-only providers never emit candidate URLs
            ProviderTag::Geo | ProviderTag::PubMed => 10,
        }
    }

    /// Stable ordinal for deterministic tie-breaking.
    #[must_use]
    pub fn ordinal(self) -> u8 {
        self as u8
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            ProviderTag::Cache => "cache",
            ProviderTag::Proxy => "proxy",
            ProviderTag::Pmc => "pmc",
            ProviderTag::EuropePmc => "europe_pmc",
            ProviderTag::Unpaywall => "unpaywall",
            ProviderTag::Core => "core",
            ProviderTag::OpenAlex => "openalex",
            ProviderTag::Crossref => "crossref",
            ProviderTag::Biorxiv => "biorxiv",
            ProviderTag::Arxiv => "arxiv",
            ProviderTag::SciHub => "sci_hub",
            ProviderTag::LibGen => "libgen",
            ProviderTag::Geo => "geo",
            ProviderTag::PubMed => "pubmed",
        }
    }
}

impl fmt::Display for ProviderTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stable publication identity: PMID, else DOI, else a title hash.
///
/// The string form is also the on-disk filename stem
/// (`PMID_123`, `DOI_10.1038_nature12373`, `hash_a1b2c3d4e5f6`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PubId(String);

impl PubId {
    #[must_use]
    pub fn from_pmid(pmid: u64) -> Self {
        Self(format!("PMID_{pmid}"))
    }

    #[must_use]
    pub fn from_doi(doi: &str) -> Self {
        Self(format!("DOI_{}", escape_for_path(doi)))
    }

    /// Hash fallback over title, first author, and year.
    #[must_use]
    pub fn from_title(title: &str, first_author: Option<&str>, year: Option<u32>) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(title.trim().to_lowercase().as_bytes());
        hasher.update(b"\0");
        if let Some(author) = first_author {
            hasher.update(author.trim().to_lowercase().as_bytes());
        }
        hasher.update(b"\0");
        if let Some(year) = year {
            hasher.update(year.to_string().as_bytes());
        }
        let digest = hasher.finalize();
        let hex: String = digest.iter().take(6).map(|b| format!("{b:02x}")).collect();
        Self(format!("hash_{hex}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PubId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Replace path-hostile characters so a DOI can be used as a filename stem.
#[must_use]
pub fn escape_for_path(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '.' || c == '-' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// A GEO series dataset, as normalized from esearch/esummary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub geo_id: String,
    pub title: String,
    pub summary: String,
    pub organism: Option<String>,
    pub platform: Option<String>,
    pub sample_count: Option<u32>,
    pub submission_date: Option<String>,
    pub update_date: Option<String>,
    /// PMIDs of the original publications linked in GEO metadata.
    pub pmids: Vec<u64>,
}

/// A publication, original or citing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Publication {
    pub pmid: Option<u64>,
    pub doi: Option<String>,
    pub pmcid: Option<String>,
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub year: Option<u32>,
    pub abstract_text: Option<String>,
    /// Providers that contributed metadata to this record.
    pub sources: Vec<ProviderTag>,
}

impl Publication {
    /// Identity key: PMID wins, then DOI, then the title hash.
    #[must_use]
    pub fn id(&self) -> PubId {
        if let Some(pmid) = self.pmid {
            PubId::from_pmid(pmid)
        } else if let Some(doi) = &self.doi {
            PubId::from_doi(doi)
        } else {
            PubId::from_title(
                self.title.as_deref().unwrap_or(""),
                self.authors.first().map(String::as_str),
                self.year,
            )
        }
    }

    /// True when this record has at least one usable identifier.
    #[must_use]
    pub fn is_identifiable(&self) -> bool {
        self.pmid.is_some() || self.doi.is_some() || self.title.is_some()
    }

    /// Merge metadata from another record of the same publication.
    /// Existing fields win; absent fields are filled in.
    pub fn absorb(&mut self, other: &Publication) {
        if self.pmid.is_none() {
            self.pmid = other.pmid;
        }
        if self.doi.is_none() {
            self.doi = other.doi.clone();
        }
        if self.pmcid.is_none() {
            self.pmcid = other.pmcid.clone();
        }
        if self.title.is_none() {
            self.title = other.title.clone();
        }
        if self.authors.is_empty() {
            self.authors = other.authors.clone();
        }
        if self.journal.is_none() {
            self.journal = other.journal.clone();
        }
        if self.year.is_none() {
            self.year = other.year;
        }
        if self.abstract_text.is_none() {
            self.abstract_text = other.abstract_text.clone();
        }
        for tag in &other.sources {
            if !self.sources.contains(tag) {
                self.sources.push(*tag);
            }
        }
    }
}

/// Kind of resource a candidate URL points at. Order matters: PDFs first.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum UrlKind {
    Pdf,
    Html,
    Landing,
}

/// One candidate URL for a publication's full text.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceUrl {
    pub url: String,
    pub provider: ProviderTag,
    pub priority: u8,
    pub url_type: UrlKind,
    pub confidence: f32,
    #[serde(default)]
    pub auth_required: bool,
}

impl SourceUrl {
    #[must_use]
    pub fn new(url: impl Into<String>, provider: ProviderTag, url_type: UrlKind) -> Self {
        Self {
            url: url.into(),
            provider,
            priority: provider.priority_band(),
            url_type,
            confidence: 0.5,
            auth_required: false,
        }
    }

    #[must_use]
    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence.clamp(0.0, 1.0);
        self
    }

    /// Sort key: `(url_type, priority, -confidence, provider ordinal)`.
    #[must_use]
    pub fn sort_key(&self) -> (UrlKind, u8, u16, u8) {
        let inverted_confidence = 1000 - (self.confidence.clamp(0.0, 1.0) * 1000.0) as u16;
        (
            self.url_type,
            self.priority,
            inverted_confidence,
            self.provider.ordinal(),
        )
    }
}

/// Outcome of probing one provider during URL collection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProbeOutcome {
    /// Provider returned this many candidate URLs.
    Found(usize),
    /// Provider answered but had nothing (includes timeouts, with reason).
    Absent(String),
    /// Provider call failed.
    Failed(String),
    /// Provider was not queried (disabled, unsupported identifier).
    Skipped(String),
    /// URL was dropped by a sanity filter.
    Filtered(String),
}

/// Candidate URLs for one publication, sorted, with provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateUrls {
    pub pub_id: PubId,
    pub urls: Vec<SourceUrl>,
    pub provenance: BTreeMap<ProviderTag, ProbeOutcome>,
}

/// One failed URL attempt inside the download waterfall.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UrlFailure {
    pub provider: ProviderTag,
    pub url: String,
    pub reason: String,
}

/// Terminal result of the download waterfall for one publication.
///
/// Exhausting every candidate is a successful completion with
/// `success = false`, never an error.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOutcome {
    pub pub_id: PubId,
    pub success: bool,
    pub pdf_path: Option<PathBuf>,
    pub file_size: Option<u64>,
    pub sha256: Option<String>,
    pub successful_source: Option<ProviderTag>,
    /// The URL that actually produced the PDF (may differ from the candidate
    /// when it was extracted from a landing page).
    pub resolved_url: Option<String>,
    pub errors: Vec<UrlFailure>,
}

impl DownloadOutcome {
    #[must_use]
    pub fn failure(pub_id: PubId, errors: Vec<UrlFailure>) -> Self {
        Self {
            pub_id,
            success: false,
            pdf_path: None,
            file_size: None,
            sha256: None,
            successful_source: None,
            resolved_url: None,
            errors,
        }
    }
}

/// Section-extracted view of a stored PDF.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParsedContent {
    pub pub_id: PubId,
    pub abstract_text: Option<String>,
    pub methods: Option<String>,
    pub results: Option<String>,
    pub discussion: Option<String>,
    pub content_length: usize,
    pub source_pdf_path: PathBuf,
    pub extraction_timestamp: DateTime<Utc>,
}

/// How a dataset↔publication link relates the two.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relation {
    Original,
    Citing,
}

/// Which discovery strategy produced a citing link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveredBy {
    PmidCitation,
    GeoidMention,
    Both,
}

impl DiscoveredBy {
    /// Merge-up: a link seen by both strategies becomes `Both`.
    #[must_use]
    pub fn merge(self, other: DiscoveredBy) -> DiscoveredBy {
        if self == other {
            self
        } else {
            DiscoveredBy::Both
        }
    }
}

/// The dataset↔publication join record, stored in the index.
/// Associations are appended and merged up, never rewritten.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoAssociation {
    pub geo_id: String,
    pub pub_id: PubId,
    pub relation: Relation,
    pub discovered_by: DiscoveredBy,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_prefers_pmid_then_doi_then_hash() {
        let mut publication = Publication {
            pmid: Some(31978945),
            doi: Some("10.1038/s41586-020-1969-6".to_string()),
            title: Some("A reference".to_string()),
            ..Publication::default()
        };
        assert_eq!(publication.id().as_str(), "PMID_31978945");

        publication.pmid = None;
        assert_eq!(
            publication.id().as_str(),
            "DOI_10.1038_s41586-020-1969-6"
        );

        publication.doi = None;
        assert!(publication.id().as_str().starts_with("hash_"));
        assert_eq!(publication.id(), publication.id());
    }

    #[test]
    fn doi_escaping_is_path_safe() {
        let id = PubId::from_doi("10.1093/nar/gkz1001<weird>");
        assert!(!id.as_str().contains('/'));
        assert!(!id.as_str().contains('<'));
    }

    #[test]
    fn sort_key_orders_pdf_before_landing() {
        let pdf = SourceUrl::new("https://a/x.pdf", ProviderTag::SciHub, UrlKind::Pdf);
        let landing = SourceUrl::new("https://b/page", ProviderTag::Proxy, UrlKind::Landing);
        // A PDF from the worst band still beats a landing page from the best.
        assert!(pdf.sort_key() < landing.sort_key());
    }

    #[test]
    fn sort_key_breaks_band_ties_by_confidence() {
        let high = SourceUrl::new("https://a", ProviderTag::Unpaywall, UrlKind::Pdf)
            .with_confidence(0.9);
        let low = SourceUrl::new("https://b", ProviderTag::Unpaywall, UrlKind::Pdf)
            .with_confidence(0.2);
        assert!(high.sort_key() < low.sort_key());
    }

    #[test]
    fn discovered_by_merges_up() {
        assert_eq!(
            DiscoveredBy::PmidCitation.merge(DiscoveredBy::GeoidMention),
            DiscoveredBy::Both
        );
        assert_eq!(
            DiscoveredBy::GeoidMention.merge(DiscoveredBy::GeoidMention),
            DiscoveredBy::GeoidMention
        );
    }

    #[test]
    fn absorb_fills_gaps_without_overwriting() {
        let mut target = Publication {
            pmid: Some(1),
            title: Some("kept".to_string()),
            sources: vec![ProviderTag::PubMed],
            ..Publication::default()
        };
        let other = Publication {
            pmid: Some(2),
            doi: Some("10.1/x".to_string()),
            title: Some("ignored".to_string()),
            sources: vec![ProviderTag::OpenAlex],
            ..Publication::default()
        };
        target.absorb(&other);
        assert_eq!(target.pmid, Some(1));
        assert_eq!(target.doi.as_deref(), Some("10.1/x"));
        assert_eq!(target.title.as_deref(), Some("kept"));
        assert_eq!(target.sources, vec![ProviderTag::PubMed, ProviderTag::OpenAlex]);
    }
}
