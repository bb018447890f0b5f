//! Fingerprint cache: `(namespace, key)` → serialized value with TTL
//! classes and LRU eviction.
//!
//! Backs every provider client and pipeline stage. Negative results are
//! cached too, on a short TTL, so a burst of enrichments does not hammer a
//! provider that just said "not found".

use crate::config::CacheConfig;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::RwLock;
use tracing::{debug, warn};

/// Cache namespaces, one per cached operation kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Namespace {
    ProviderLookup,
    UrlCollect,
    Citations,
    GeoSearch,
}

impl Namespace {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Namespace::ProviderLookup => "provider_lookup",
            Namespace::UrlCollect => "url_collect",
            Namespace::Citations => "citations",
            Namespace::GeoSearch => "geo_search",
        }
    }
}

/// TTL class assigned at insert time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TtlClass {
    /// Successful lookups of stable facts
    PositiveLong,
    /// Content likely to change (search results, citation lists)
    PositiveShort,
    /// 404s and empty results
    Negative,
}

#[derive(Debug, Clone)]
struct Entry {
    value: Vec<u8>,
    expires_at: u64,
    last_accessed: u64,
}

/// Hit/miss counters for the `status` surface.
#[derive(Debug, Clone, Copy, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
}

impl CacheStats {
    #[must_use]
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

pub struct FingerprintCache {
    entries: RwLock<HashMap<(Namespace, String), Entry>>,
    stats: RwLock<CacheStats>,
    access_clock: AtomicU64,
    config: CacheConfig,
    spill: Option<sled::Db>,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

impl FingerprintCache {
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            stats: RwLock::new(CacheStats::default()),
            access_clock: AtomicU64::new(0),
            config,
            spill: None,
        }
    }

    /// Attach an on-disk spill so warm state survives restarts.
    pub fn with_spill(mut self, path: &std::path::Path) -> Self {
        match sled::open(path) {
            Ok(db) => self.spill = Some(db),
            Err(e) => warn!(%e, "cache spill unavailable, running in-memory only"),
        }
        self
    }

    fn ttl_for(&self, class: TtlClass) -> Duration {
        match class {
            TtlClass::PositiveLong => Duration::from_secs(self.config.positive_long_ttl_secs),
            TtlClass::PositiveShort => Duration::from_secs(self.config.positive_short_ttl_secs),
            TtlClass::Negative => Duration::from_secs(self.config.negative_ttl_secs),
        }
    }

    /// Fetch and deserialize a cached value; expired entries are misses.
    pub async fn get<T: DeserializeOwned>(&self, namespace: Namespace, key: &str) -> Option<T> {
        let stamp = self.access_clock.fetch_add(1, Ordering::Relaxed);
        let now = now_unix();

        {
            let mut entries = self.entries.write().await;
            let cache_key = (namespace, key.to_string());
            let mut expired = false;
            if let Some(entry) = entries.get_mut(&cache_key) {
                if entry.expires_at > now {
                    entry.last_accessed = stamp;
                    let value = bincode::deserialize(&entry.value).ok();
                    let mut stats = self.stats.write().await;
                    if value.is_some() {
                        stats.hits += 1;
                    } else {
                        stats.misses += 1;
                    }
                    return value;
                }
                expired = true;
            }
            if expired {
                entries.remove(&cache_key);
                self.stats.write().await.expirations += 1;
            }
        }

        // Memory miss: consult the spill.
        if let Some(value) = self.get_spilled(namespace, key, now).await {
            self.stats.write().await.hits += 1;
            return bincode::deserialize(&value).ok();
        }

        self.stats.write().await.misses += 1;
        None
    }

    /// Insert a value under a TTL class.
    pub async fn put<T: Serialize>(
        &self,
        namespace: Namespace,
        key: &str,
        value: &T,
        class: TtlClass,
    ) {
        let Ok(bytes) = bincode::serialize(value) else {
            warn!(namespace = namespace.as_str(), key, "failed to serialize cache value");
            return;
        };
        let expires_at = now_unix() + self.ttl_for(class).as_secs();
        let stamp = self.access_clock.fetch_add(1, Ordering::Relaxed);

        {
            let mut entries = self.entries.write().await;
            entries.insert(
                (namespace, key.to_string()),
                Entry {
                    value: bytes.clone(),
                    expires_at,
                    last_accessed: stamp,
                },
            );
            if entries.len() > self.config.max_entries {
                Self::evict_lru(&mut entries, self.config.max_entries, &self.stats).await;
            }
        }

        if let Some(spill) = &self.spill {
            let tree_key = format!("{}\0{key}", namespace.as_str());
            let mut record = expires_at.to_be_bytes().to_vec();
            record.extend_from_slice(&bytes);
            if let Err(e) = spill.insert(tree_key.as_bytes(), record) {
                warn!(%e, "cache spill write failed");
            }
        }
    }

    async fn get_spilled(&self, namespace: Namespace, key: &str, now: u64) -> Option<Vec<u8>> {
        let spill = self.spill.as_ref()?;
        let tree_key = format!("{}\0{key}", namespace.as_str());
        let record = spill.get(tree_key.as_bytes()).ok()??;
        if record.len() < 8 {
            return None;
        }
        let expires_at = u64::from_be_bytes(record[..8].try_into().ok()?);
        if expires_at <= now {
            let _ = spill.remove(tree_key.as_bytes());
            return None;
        }
        Some(record[8..].to_vec())
    }

    /// Drop the oldest-accessed entries until 90% of the ceiling remains.
    async fn evict_lru(
        entries: &mut HashMap<(Namespace, String), Entry>,
        max_entries: usize,
        stats: &RwLock<CacheStats>,
    ) {
        let target = max_entries * 9 / 10;
        let excess = entries.len().saturating_sub(target);
        if excess == 0 {
            return;
        }

        let mut by_recency: Vec<((Namespace, String), u64)> = entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.last_accessed))
            .collect();
        by_recency.sort_by_key(|(_, accessed)| *accessed);

        for (key, _) in by_recency.into_iter().take(excess) {
            entries.remove(&key);
        }
        stats.write().await.evictions += excess as u64;
        debug!(evicted = excess, "cache LRU eviction");
    }

    /// Remove every expired entry; returns how many were dropped.
    pub async fn sweep(&self) -> usize {
        let now = now_unix();
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            self.stats.write().await.expirations += removed as u64;
        }
        removed
    }

    pub async fn stats(&self) -> CacheStats {
        *self.stats.read().await
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_cache(max_entries: usize) -> FingerprintCache {
        FingerprintCache::new(CacheConfig {
            max_entries,
            positive_long_ttl_secs: 3600,
            positive_short_ttl_secs: 60,
            negative_ttl_secs: 1,
        })
    }

    #[tokio::test]
    async fn round_trips_typed_values() {
        let cache = small_cache(100);
        cache
            .put(Namespace::UrlCollect, "PMID_1", &vec![1u32, 2, 3], TtlClass::PositiveLong)
            .await;
        let value: Option<Vec<u32>> = cache.get(Namespace::UrlCollect, "PMID_1").await;
        assert_eq!(value, Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn namespaces_do_not_collide() {
        let cache = small_cache(100);
        cache
            .put(Namespace::UrlCollect, "k", &1u8, TtlClass::PositiveLong)
            .await;
        let other: Option<u8> = cache.get(Namespace::Citations, "k").await;
        assert!(other.is_none());
    }

    #[tokio::test]
    async fn lru_eviction_respects_ceiling() {
        let cache = small_cache(10);
        for i in 0..20 {
            cache
                .put(
                    Namespace::GeoSearch,
                    &format!("query-{i}"),
                    &i,
                    TtlClass::PositiveShort,
                )
                .await;
        }
        assert!(cache.len().await <= 10);
        let stats = cache.stats().await;
        assert!(stats.evictions > 0);
    }

    #[tokio::test]
    async fn negative_entries_expire() {
        let cache = small_cache(100);
        cache
            .put(Namespace::ProviderLookup, "DOI_x", &Option::<u32>::None, TtlClass::Negative)
            .await;
        tokio::time::sleep(Duration::from_millis(1100)).await;
        assert_eq!(cache.sweep().await, 1);
        let value: Option<Option<u32>> = cache.get(Namespace::ProviderLookup, "DOI_x").await;
        assert!(value.is_none());
    }

    #[tokio::test]
    async fn spill_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let cache = small_cache(100).with_spill(&dir.path().join("spill"));
            cache
                .put(Namespace::UrlCollect, "persisted", &7u64, TtlClass::PositiveLong)
                .await;
        }
        let cache = small_cache(100).with_spill(&dir.path().join("spill"));
        let value: Option<u64> = cache.get(Namespace::UrlCollect, "persisted").await;
        assert_eq!(value, Some(7));
    }
}
