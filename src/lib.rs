//! geo-corpus - GEO dataset discovery and full-text corpus building
//!
//! This crate finds NCBI GEO series for a query, discovers the publications
//! that cite or reuse each dataset, collects candidate full-text URLs from
//! a dozen providers in parallel, downloads and validates the PDFs through
//! a priority waterfall, and stores both the files and their
//! section-extracted text keyed by publication identity.

pub mod analysis;
pub mod cache;
pub mod citations;
pub mod client;
pub mod collector;
pub mod config;
pub mod download;
pub mod error;
pub mod index;
pub mod model;
pub mod orchestrator;
pub mod query;
pub mod ranking;
pub mod resilience;
pub mod storage;

pub use cache::{FingerprintCache, Namespace, TtlClass};
pub use citations::{CitationDiscovery, CitationDiscoveryResult};
pub use client::providers::ProviderRegistry;
pub use client::{Doi, GeoId};
pub use collector::UrlCollector;
pub use config::Config;
pub use download::DownloadEngine;
pub use error::{Error, Result};
pub use index::DatasetIndex;
pub use model::{
    CandidateUrls, Dataset, DiscoveredBy, DownloadOutcome, GeoAssociation, ParsedContent,
    ProviderTag, PubId, Publication, Relation, SourceUrl, UrlKind,
};
pub use orchestrator::{
    DatasetView, EnrichmentOptions, Orchestrator, SearchRequest, SearchResponse,
};
pub use storage::ContentStore;
