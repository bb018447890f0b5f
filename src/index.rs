//! Durable dataset index: datasets, publications, associations, downloads.
//!
//! Backed by sled trees with bincode values. Every mutation is an
//! idempotent upsert; the association table only ever grows, and
//! `discovered_by` merges upward to `Both` when both strategies find the
//! same link.

use crate::model::{
    Dataset, DiscoveredBy, DownloadOutcome, GeoAssociation, PubId, Publication, ProviderTag,
    Relation,
};
use crate::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredDataset {
    pub dataset: Dataset,
    pub last_seen: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredPublication {
    pub publication: Publication,
    pub last_seen: DateTime<Utc>,
}

/// Download bookkeeping kept alongside the PDFs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadRecord {
    pub pub_id: PubId,
    pub path: PathBuf,
    pub size: u64,
    pub sha256: Option<String>,
    pub source: Option<ProviderTag>,
    pub downloaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IndexStats {
    pub datasets: usize,
    pub publications: usize,
    pub associations: usize,
    pub downloads: usize,
}

pub struct DatasetIndex {
    datasets: sled::Tree,
    publications: sled::Tree,
    associations: sled::Tree,
    downloads: sled::Tree,
}

fn index_err(e: impl std::fmt::Display) -> Error {
    Error::Index(e.to_string())
}

impl DatasetIndex {
    /// Open (or create) the index at `path`.
    pub fn open(path: &Path) -> Result<Self> {
        let db = sled::open(path).map_err(index_err)?;
        Ok(Self {
            datasets: db.open_tree("datasets").map_err(index_err)?,
            publications: db.open_tree("publications").map_err(index_err)?,
            associations: db.open_tree("associations").map_err(index_err)?,
            downloads: db.open_tree("downloads").map_err(index_err)?,
        })
    }

    pub fn upsert_dataset(&self, dataset: &Dataset) -> Result<()> {
        let record = StoredDataset {
            dataset: dataset.clone(),
            last_seen: Utc::now(),
        };
        let bytes = bincode::serialize(&record).map_err(index_err)?;
        self.datasets
            .insert(dataset.geo_id.as_bytes(), bytes)
            .map_err(index_err)?;
        Ok(())
    }

    pub fn get_dataset(&self, geo_id: &str) -> Result<Option<StoredDataset>> {
        let Some(bytes) = self.datasets.get(geo_id.as_bytes()).map_err(index_err)? else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&bytes).map_err(index_err)?))
    }

    pub fn upsert_publication(&self, publication: &Publication) -> Result<()> {
        let id = publication.id();
        // Merge into any existing record instead of overwriting: identity
        // is stable, metadata accretes.
        let merged = match self.get_publication(&id)? {
            Some(mut stored) => {
                stored.publication.absorb(publication);
                stored.publication
            }
            None => publication.clone(),
        };
        let record = StoredPublication {
            publication: merged,
            last_seen: Utc::now(),
        };
        let bytes = bincode::serialize(&record).map_err(index_err)?;
        self.publications
            .insert(id.as_str().as_bytes(), bytes)
            .map_err(index_err)?;
        Ok(())
    }

    pub fn get_publication(&self, id: &PubId) -> Result<Option<StoredPublication>> {
        let Some(bytes) = self
            .publications
            .get(id.as_str().as_bytes())
            .map_err(index_err)?
        else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&bytes).map_err(index_err)?))
    }

    fn association_key(geo_id: &str, pub_id: &PubId) -> Vec<u8> {
        let mut key = geo_id.as_bytes().to_vec();
        key.push(0);
        key.extend_from_slice(pub_id.as_str().as_bytes());
        key
    }

    /// Record (or merge) one dataset↔publication link. Returns the stored
    /// association after the merge.
    pub fn record_association(
        &self,
        geo_id: &str,
        pub_id: &PubId,
        relation: Relation,
        discovered_by: DiscoveredBy,
    ) -> Result<GeoAssociation> {
        let key = Self::association_key(geo_id, pub_id);
        let now = Utc::now();

        let association = match self.associations.get(&key).map_err(index_err)? {
            Some(bytes) => {
                let mut existing: GeoAssociation =
                    bincode::deserialize(&bytes).map_err(index_err)?;
                existing.discovered_by = existing.discovered_by.merge(discovered_by);
                existing.last_seen = now;
                existing
            }
            None => GeoAssociation {
                geo_id: geo_id.to_string(),
                pub_id: pub_id.clone(),
                relation,
                discovered_by,
                first_seen: now,
                last_seen: now,
            },
        };

        let bytes = bincode::serialize(&association).map_err(index_err)?;
        self.associations.insert(key, bytes).map_err(index_err)?;
        debug!(geo_id, pub_id = %association.pub_id, "association recorded");
        Ok(association)
    }

    /// All associations for one dataset, in key order.
    pub fn associations_for(&self, geo_id: &str) -> Result<Vec<GeoAssociation>> {
        let mut prefix = geo_id.as_bytes().to_vec();
        prefix.push(0);

        let mut associations = Vec::new();
        for item in self.associations.scan_prefix(&prefix) {
            let (_, bytes) = item.map_err(index_err)?;
            associations.push(bincode::deserialize(&bytes).map_err(index_err)?);
        }
        Ok(associations)
    }

    /// Record a successful download; failures are not persisted.
    pub fn record_download(&self, outcome: &DownloadOutcome) -> Result<()> {
        let (Some(path), Some(size)) = (&outcome.pdf_path, outcome.file_size) else {
            return Ok(());
        };
        let record = DownloadRecord {
            pub_id: outcome.pub_id.clone(),
            path: path.clone(),
            size,
            sha256: outcome.sha256.clone(),
            source: outcome.successful_source,
            downloaded_at: Utc::now(),
        };
        let bytes = bincode::serialize(&record).map_err(index_err)?;
        self.downloads
            .insert(outcome.pub_id.as_str().as_bytes(), bytes)
            .map_err(index_err)?;
        Ok(())
    }

    pub fn get_download(&self, id: &PubId) -> Result<Option<DownloadRecord>> {
        let Some(bytes) = self
            .downloads
            .get(id.as_str().as_bytes())
            .map_err(index_err)?
        else {
            return Ok(None);
        };
        Ok(Some(bincode::deserialize(&bytes).map_err(index_err)?))
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            datasets: self.datasets.len(),
            publications: self.publications.len(),
            associations: self.associations.len(),
            downloads: self.downloads.len(),
        }
    }

    /// Flush all trees to disk.
    pub fn flush(&self) -> Result<()> {
        self.datasets.flush().map_err(index_err)?;
        self.publications.flush().map_err(index_err)?;
        self.associations.flush().map_err(index_err)?;
        self.downloads.flush().map_err(index_err)?;
        Ok(())
    }
}
