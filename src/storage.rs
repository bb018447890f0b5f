//! Parsed-content store: PDFs and their section-extracted views, keyed by
//! publication id.
//!
//! The store is what decouples download order from analysis order. Every
//! write goes through a per-id lock and a tmp-then-rename commit; a catalog
//! entry maps the publication id to wherever the PDF physically lives, so
//! two datasets sharing a citing paper reference one file. Section
//! extraction is single-flight per id and cached on disk.

use crate::model::{ParsedContent, PubId};
use crate::{Error, Result};
use chrono::Utc;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Magic bytes every stored PDF must start with.
pub const PDF_MAGIC: &[u8] = b"%PDF-";

/// Bodies smaller than this are error pages, not papers.
pub const MIN_PDF_BYTES: usize = 10 * 1024;

#[derive(Debug, Serialize, Deserialize)]
struct CatalogEntry {
    pdf_path: PathBuf,
}

pub struct ContentStore {
    pdf_root: PathBuf,
    parsed_root: PathBuf,
    catalog_root: PathBuf,
    /// Per-publication locks serializing writes and collapsing concurrent
    /// extractions.
    locks: Mutex<HashMap<PubId, Arc<Mutex<()>>>>,
}

impl ContentStore {
    /// Open the store, creating its directory skeleton.
    pub async fn open(pdf_root: PathBuf, parsed_root: PathBuf) -> Result<Self> {
        let catalog_root = pdf_root.join(".catalog");
        for dir in [&pdf_root, &parsed_root, &catalog_root] {
            tokio::fs::create_dir_all(dir).await.map_err(|e| Error::Store {
                operation: format!("create {}", dir.display()),
                reason: e.to_string(),
            })?;
        }
        Ok(Self {
            pdf_root,
            parsed_root,
            catalog_root,
            locks: Mutex::new(HashMap::new()),
        })
    }

    async fn lock_for(&self, id: &PubId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id.clone()).or_default().clone()
    }

    fn catalog_path(&self, id: &PubId) -> PathBuf {
        self.catalog_root.join(format!("{id}.json"))
    }

    fn parsed_path(&self, id: &PubId) -> PathBuf {
        self.parsed_root.join(format!("{id}.json"))
    }

    /// Default location for a publication downloaded for one dataset.
    #[must_use]
    pub fn pdf_path_for(&self, geo_id: &str, relation_dir: &str, id: &PubId) -> PathBuf {
        self.pdf_root
            .join(geo_id)
            .join(relation_dir)
            .join(format!("{id}.pdf"))
    }

    /// Store PDF bytes under `dest`, atomically, and catalog the location.
    ///
    /// If this publication already has a PDF, the existing path wins and no
    /// second file is written (idempotence across datasets).
    pub async fn put_pdf(&self, id: &PubId, bytes: &[u8], dest: &Path) -> Result<PathBuf> {
        if !bytes.starts_with(PDF_MAGIC) {
            return Err(Error::Validation {
                url: dest.display().to_string(),
                reason: "missing %PDF magic bytes".to_string(),
            });
        }

        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        if let Some(existing) = self.cataloged_path(id).await {
            debug!(%id, path = %existing.display(), "PDF already stored; keeping existing file");
            return Ok(existing);
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| Error::Store {
                operation: format!("create {}", parent.display()),
                reason: e.to_string(),
            })?;
        }

        let tmp = dest.with_extension("tmp");
        tokio::fs::write(&tmp, bytes).await.map_err(|e| Error::Store {
            operation: format!("write {}", tmp.display()),
            reason: e.to_string(),
        })?;
        if let Err(e) = tokio::fs::rename(&tmp, dest).await {
            let _ = tokio::fs::remove_file(&tmp).await;
            return Err(Error::Store {
                operation: format!("rename to {}", dest.display()),
                reason: e.to_string(),
            });
        }

        let entry = CatalogEntry {
            pdf_path: dest.to_path_buf(),
        };
        let catalog_tmp = self.catalog_path(id).with_extension("tmp");
        let catalog_bytes = serde_json::to_vec(&entry)?;
        tokio::fs::write(&catalog_tmp, catalog_bytes)
            .await
            .map_err(|e| Error::Store {
                operation: "write catalog entry".to_string(),
                reason: e.to_string(),
            })?;
        tokio::fs::rename(&catalog_tmp, self.catalog_path(id))
            .await
            .map_err(|e| Error::Store {
                operation: "commit catalog entry".to_string(),
                reason: e.to_string(),
            })?;

        info!(%id, path = %dest.display(), size = bytes.len(), "PDF stored");
        Ok(dest.to_path_buf())
    }

    async fn cataloged_path(&self, id: &PubId) -> Option<PathBuf> {
        let bytes = tokio::fs::read(self.catalog_path(id)).await.ok()?;
        let entry: CatalogEntry = serde_json::from_slice(&bytes).ok()?;
        if tokio::fs::try_exists(&entry.pdf_path).await.unwrap_or(false) {
            Some(entry.pdf_path)
        } else {
            None
        }
    }

    /// Whether a PDF exists for this publication.
    pub async fn has_pdf(&self, id: &PubId) -> bool {
        self.cataloged_path(id).await.is_some()
    }

    /// Path of the stored PDF, if any.
    pub async fn get_pdf(&self, id: &PubId) -> Result<PathBuf> {
        self.cataloged_path(id)
            .await
            .ok_or_else(|| Error::NotFound(format!("no PDF stored for {id}")))
    }

    /// Section-extracted view; materialized on first request and cached.
    ///
    /// Single-flight per id: concurrent callers serialize on the per-id
    /// lock, and every caller after the first reads the cached result.
    pub async fn get_parsed(&self, id: &PubId) -> Result<ParsedContent> {
        if let Some(cached) = self.read_parsed_cache(id).await {
            return Ok(cached);
        }

        let lock = self.lock_for(id).await;
        let _guard = lock.lock().await;

        // Re-check under the lock: another caller may have extracted while
        // this one waited.
        if let Some(cached) = self.read_parsed_cache(id).await {
            return Ok(cached);
        }

        let pdf_path = self.get_pdf(id).await?;
        let text = extract_pdf_text(&pdf_path).await?;
        let parsed = segment_sections(id.clone(), &pdf_path, &text);

        let cache_tmp = self.parsed_path(id).with_extension("tmp");
        tokio::fs::write(&cache_tmp, serde_json::to_vec(&parsed)?)
            .await
            .map_err(|e| Error::Store {
                operation: "write parsed cache".to_string(),
                reason: e.to_string(),
            })?;
        tokio::fs::rename(&cache_tmp, self.parsed_path(id))
            .await
            .map_err(|e| Error::Store {
                operation: "commit parsed cache".to_string(),
                reason: e.to_string(),
            })?;

        debug!(%id, length = parsed.content_length, "sections extracted and cached");
        Ok(parsed)
    }

    /// Already-extracted sections, if any; never triggers extraction.
    pub async fn peek_parsed(&self, id: &PubId) -> Option<ParsedContent> {
        self.read_parsed_cache(id).await
    }

    async fn read_parsed_cache(&self, id: &PubId) -> Option<ParsedContent> {
        let bytes = tokio::fs::read(self.parsed_path(id)).await.ok()?;
        let parsed: ParsedContent = serde_json::from_slice(&bytes).ok()?;
        // A parsed record without its PDF is stale.
        if tokio::fs::try_exists(&parsed.source_pdf_path)
            .await
            .unwrap_or(false)
        {
            Some(parsed)
        } else {
            None
        }
    }

    /// Remove leftover `.tmp` files from aborted writes.
    pub async fn sweep_partial_files(&self) -> Result<usize> {
        let mut removed = 0usize;
        let mut pending = vec![self.pdf_root.clone(), self.parsed_root.clone()];
        while let Some(dir) = pending.pop() {
            let Ok(mut entries) = tokio::fs::read_dir(&dir).await else {
                continue;
            };
            while let Ok(Some(entry)) = entries.next_entry().await {
                let path = entry.path();
                if path.is_dir() {
                    pending.push(path);
                } else if path.extension().is_some_and(|ext| ext == "tmp") {
                    if tokio::fs::remove_file(&path).await.is_ok() {
                        warn!(path = %path.display(), "removed stale partial file");
                        removed += 1;
                    }
                }
            }
        }
        Ok(removed)
    }
}

/// Pull text out of a PDF; CPU-bound, so it runs on the blocking pool.
async fn extract_pdf_text(path: &Path) -> Result<String> {
    let path = path.to_path_buf();
    tokio::task::spawn_blocking(move || {
        let document = lopdf::Document::load(&path).map_err(|e| Error::Parse {
            context: format!("pdf {}", path.display()),
            message: e.to_string(),
        })?;
        let pages: Vec<u32> = document.get_pages().keys().copied().collect();
        document.extract_text(&pages).map_err(|e| Error::Parse {
            context: format!("pdf {}", path.display()),
            message: e.to_string(),
        })
    })
    .await
    .map_err(|e| Error::Store {
        operation: "pdf extraction task".to_string(),
        reason: e.to_string(),
    })?
}

/// Deterministic heading-based segmentation of extracted text.
fn segment_sections(id: PubId, pdf_path: &Path, text: &str) -> ParsedContent {
    let headings = [
        ("abstract", Regex::new(r"(?im)^\s*abstract\b").expect("static pattern")),
        (
            "methods",
            Regex::new(r"(?im)^\s*(materials\s+and\s+)?methods\b").expect("static pattern"),
        ),
        ("results", Regex::new(r"(?im)^\s*results\b").expect("static pattern")),
        (
            "discussion",
            Regex::new(r"(?im)^\s*discussion\b").expect("static pattern"),
        ),
    ];

    // Find the first occurrence of each heading, then slice between
    // consecutive headings in document order.
    let mut marks: Vec<(&str, usize)> = headings
        .iter()
        .filter_map(|(name, pattern)| pattern.find(text).map(|m| (*name, m.start())))
        .collect();
    marks.sort_by_key(|(_, start)| *start);

    let mut sections: HashMap<&str, String> = HashMap::new();
    for (i, (name, start)) in marks.iter().enumerate() {
        let end = marks
            .get(i + 1)
            .map_or(text.len(), |(_, next_start)| *next_start);
        let body = text[*start..end].trim();
        // Cap each section; downstream consumers want context, not the
        // whole reference list.
        let clipped: String = body.chars().take(20_000).collect();
        sections.insert(*name, clipped);
    }

    ParsedContent {
        pub_id: id,
        abstract_text: sections.remove("abstract"),
        methods: sections.remove("methods"),
        results: sections.remove("results"),
        discussion: sections.remove("discussion"),
        content_length: text.len(),
        source_pdf_path: pdf_path.to_path_buf(),
        extraction_timestamp: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_store() -> (tempfile::TempDir, ContentStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path().join("pdfs"), dir.path().join("parsed"))
            .await
            .unwrap();
        (dir, store)
    }

    fn pdf_bytes() -> Vec<u8> {
        let mut bytes = b"%PDF-1.4\n".to_vec();
        bytes.resize(MIN_PDF_BYTES + 1, b' ');
        bytes
    }

    #[tokio::test]
    async fn put_then_get_round_trips() {
        let (_dir, store) = open_store().await;
        let id = PubId::from_pmid(42);
        let dest = store.pdf_path_for("GSE1", "citing", &id);

        let stored = store.put_pdf(&id, &pdf_bytes(), &dest).await.unwrap();
        assert_eq!(stored, dest);
        assert!(store.has_pdf(&id).await);
        assert_eq!(store.get_pdf(&id).await.unwrap(), dest);
        assert_eq!(tokio::fs::read(&dest).await.unwrap(), pdf_bytes());
    }

    #[tokio::test]
    async fn second_dataset_reuses_existing_file() {
        let (_dir, store) = open_store().await;
        let id = PubId::from_pmid(42);

        let first_dest = store.pdf_path_for("GSE1", "citing", &id);
        let second_dest = store.pdf_path_for("GSE2", "citing", &id);

        let first = store.put_pdf(&id, &pdf_bytes(), &first_dest).await.unwrap();
        let second = store.put_pdf(&id, &pdf_bytes(), &second_dest).await.unwrap();

        // One file, both callers see the same path.
        assert_eq!(first, second);
        assert!(!second_dest.exists());
    }

    #[tokio::test]
    async fn rejects_non_pdf_bytes() {
        let (_dir, store) = open_store().await;
        let id = PubId::from_pmid(1);
        let dest = store.pdf_path_for("GSE1", "original", &id);
        let error = store
            .put_pdf(&id, b"<html>error page</html>", &dest)
            .await
            .unwrap_err();
        assert!(matches!(error, Error::Validation { .. }));
        assert!(!store.has_pdf(&id).await);
    }

    #[tokio::test]
    async fn no_tmp_files_after_commit() {
        let (dir, store) = open_store().await;
        let id = PubId::from_pmid(7);
        let dest = store.pdf_path_for("GSE1", "citing", &id);
        store.put_pdf(&id, &pdf_bytes(), &dest).await.unwrap();

        assert_eq!(store.sweep_partial_files().await.unwrap(), 0);
        drop(dir);
    }

    #[tokio::test]
    async fn sweep_removes_stale_tmp() {
        let (_dir, store) = open_store().await;
        let stale = store.pdf_root.join("GSE9").join("citing");
        tokio::fs::create_dir_all(&stale).await.unwrap();
        tokio::fs::write(stale.join("PMID_1.tmp"), b"partial")
            .await
            .unwrap();
        assert_eq!(store.sweep_partial_files().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn get_parsed_requires_pdf() {
        let (_dir, store) = open_store().await;
        let error = store.get_parsed(&PubId::from_pmid(404)).await.unwrap_err();
        assert!(matches!(error, Error::NotFound(_)));
    }

    #[test]
    fn segmentation_slices_between_headings() {
        let text = "Title page\nAbstract\nWe studied things.\nMethods\nWe used a sequencer.\nResults\nIt worked.\nDiscussion\nImplications abound.\nReferences\n";
        let parsed = segment_sections(
            PubId::from_pmid(1),
            Path::new("/tmp/x.pdf"),
            text,
        );
        assert!(parsed.abstract_text.unwrap().contains("We studied things"));
        assert!(parsed.methods.unwrap().contains("sequencer"));
        assert!(parsed.results.unwrap().contains("It worked"));
        // The discussion slice runs to the end of text (References included)
        // since no later heading bounds it.
        assert!(parsed.discussion.unwrap().contains("Implications"));
        assert_eq!(parsed.content_length, text.len());
    }

    #[test]
    fn segmentation_handles_missing_sections() {
        let parsed = segment_sections(
            PubId::from_pmid(2),
            Path::new("/tmp/y.pdf"),
            "No recognizable structure here.",
        );
        assert!(parsed.abstract_text.is_none());
        assert!(parsed.methods.is_none());
    }
}
