// src/cache.rs
//! Route candidate cache.
//!
//! Memoizes the ranked candidate paths for a request shape so repeated
//! quotes skip the K-shortest search. Entries are tagged with the snapshot
//! version they were computed on; a newer snapshot or an expired TTL is a
//! miss. Amounts are bucketed to their top significant bits, so nearby
//! amounts share an entry.

use dashmap::DashMap;
use log::{debug, info};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::CacheConfig;
use crate::search::Path;
use crate::types::{Amount, AssetId, VenueId};

/// Keeps the top `bits` significant bits of `amount`.
pub fn amount_bucket(amount: Amount, bits: u32) -> Amount {
    if amount == 0 || bits == 0 {
        return 0;
    }
    let width = Amount::BITS - amount.leading_zeros();
    if width <= bits {
        return amount;
    }
    let shift = width - bits;
    (amount >> shift) << shift
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RouteCacheKey {
    pub source: AssetId,
    pub dest: AssetId,
    pub amount_bucket: Amount,
    pub max_hops: usize,
    /// Sorted
    pub excluded_venues: Vec<VenueId>,
}

impl RouteCacheKey {
    pub fn new(
        source: &AssetId,
        dest: &AssetId,
        amount: Amount,
        max_hops: usize,
        excluded_venues: &[VenueId],
        bucket_bits: u32,
    ) -> Self {
        let mut excluded_venues = excluded_venues.to_vec();
        excluded_venues.sort();
        excluded_venues.dedup();
        Self {
            source: source.clone(),
            dest: dest.clone(),
            amount_bucket: amount_bucket(amount, bucket_bits),
            max_hops,
            excluded_venues,
        }
    }
}

impl fmt::Display for RouteCacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}→{}:{}/{}h",
            self.source, self.dest, self.amount_bucket, self.max_hops
        )?;
        if !self.excluded_venues.is_empty() {
            write!(f, " -{}", self.excluded_venues.len())?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    paths: Vec<Path>,
    snapshot_version: u64,
    cached_at: Instant,
}

impl CacheEntry {
    fn is_valid(&self, ttl: Duration, version: u64) -> bool {
        self.snapshot_version == version && self.cached_at.elapsed() < ttl
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct CacheMetrics {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub entries: usize,
}

impl CacheMetrics {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Shared candidate cache. The host owns the handle and passes it to every
/// engine that should share it.
pub struct RouteCache {
    config: CacheConfig,
    entries: DashMap<RouteCacheKey, CacheEntry>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
}

impl RouteCache {
    pub fn new(config: CacheConfig) -> Self {
        info!(
            "Route cache ready (TTL: {}ms, max entries: {}, bucket bits: {})",
            config.ttl_ms, config.max_entries, config.amount_bucket_bits
        );
        Self {
            config,
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
        }
    }

    pub fn key(
        &self,
        source: &AssetId,
        dest: &AssetId,
        amount: Amount,
        max_hops: usize,
        excluded_venues: &[VenueId],
    ) -> RouteCacheKey {
        RouteCacheKey::new(
            source,
            dest,
            amount,
            max_hops,
            excluded_venues,
            self.config.amount_bucket_bits,
        )
    }

    /// Candidate paths for `key` computed on snapshot `version`, if fresh.
    pub fn get(&self, key: &RouteCacheKey, version: u64) -> Option<Vec<Path>> {
        let ttl = self.config.ttl();
        let found = self
            .entries
            .get(key)
            .filter(|entry| entry.is_valid(ttl, version))
            .map(|entry| entry.paths.clone());

        match found {
            Some(paths) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                debug!("Cache hit for {}", key);
                Some(paths)
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                // Drop the outdated entry, if any; a concurrent insert wins.
                self.entries
                    .remove_if(key, |_, entry| !entry.is_valid(ttl, version));
                None
            }
        }
    }

    pub fn insert(&self, key: RouteCacheKey, version: u64, paths: Vec<Path>) {
        if self.config.max_entries == 0 {
            return;
        }
        if self.entries.len() >= self.config.max_entries && !self.entries.contains_key(&key) {
            self.evict();
        }
        self.entries.insert(
            key,
            CacheEntry {
                paths,
                snapshot_version: version,
                cached_at: Instant::now(),
            },
        );
    }

    /// Drops expired entries, then the oldest until there is room.
    fn evict(&self) {
        let ttl = self.config.ttl();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.cached_at.elapsed() < ttl);

        while self.entries.len() >= self.config.max_entries {
            let oldest = self
                .entries
                .iter()
                .min_by_key(|entry| entry.cached_at)
                .map(|entry| entry.key().clone());
            match oldest {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }

        let evicted = before.saturating_sub(self.entries.len()) as u64;
        self.evictions.fetch_add(evicted, Ordering::Relaxed);
        debug!("Evicted {} cache entries", evicted);
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn metrics(&self) -> CacheMetrics {
        CacheMetrics {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            entries: self.entries.len(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::search::{Dijkstra, Exclusions, PathSearch};
    use crate::testing::test_snapshot;
    use pretty_assertions::assert_eq;

    fn sample_paths() -> Vec<Path> {
        let snapshot = test_snapshot(&[("xy", "X", "Y", 0.1)]);
        let x = snapshot.node_index(&AssetId::new("X")).unwrap();
        let y = snapshot.node_index(&AssetId::new("Y")).unwrap();
        vec![Dijkstra
            .find_path(&snapshot, x, y, 2, &Exclusions::new())
            .unwrap()]
    }

    #[test]
    fn test_amount_bucket() {
        assert_eq!(amount_bucket(0, 4), 0);
        assert_eq!(amount_bucket(13, 4), 13);
        assert_eq!(amount_bucket(0b1011_0111, 4), 0b1011_0000);
        assert_eq!(amount_bucket(1_000_000, 4), amount_bucket(1_010_000, 4));
        assert!(amount_bucket(1_000_000, 4) != amount_bucket(2_000_000, 4));
    }

    #[test]
    fn test_key_sorts_exclusions() {
        let cache = RouteCache::new(CacheConfig::default());
        let a = cache.key(
            &AssetId::new("X"),
            &AssetId::new("Y"),
            1_000,
            3,
            &[VenueId::new("v2"), VenueId::new("v1")],
        );
        let b = cache.key(
            &AssetId::new("X"),
            &AssetId::new("Y"),
            1_000,
            3,
            &[VenueId::new("v1"), VenueId::new("v2")],
        );
        assert_eq!(a, b);
    }

    #[test]
    fn test_hit_miss_and_version_invalidation() {
        let cache = RouteCache::new(CacheConfig::default());
        let key = cache.key(&AssetId::new("X"), &AssetId::new("Y"), 1_000, 3, &[]);
        assert!(cache.get(&key, 1).is_none());

        cache.insert(key.clone(), 1, sample_paths());
        assert_eq!(cache.get(&key, 1), Some(sample_paths()));
        // A newer snapshot invalidates the entry.
        assert!(cache.get(&key, 2).is_none());
        assert!(cache.is_empty());

        let metrics = cache.metrics();
        assert_eq!(metrics.hits, 1);
        assert_eq!(metrics.misses, 2);
        assert!((metrics.hit_rate() - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_ttl_expiry() {
        let cache = RouteCache::new(CacheConfig {
            ttl_ms: 0,
            ..Default::default()
        });
        let key = cache.key(&AssetId::new("X"), &AssetId::new("Y"), 1_000, 3, &[]);
        cache.insert(key.clone(), 1, sample_paths());
        assert!(cache.get(&key, 1).is_none());
    }

    #[test]
    fn test_eviction_bounds_size() {
        let cache = RouteCache::new(CacheConfig {
            max_entries: 3,
            ..Default::default()
        });
        for i in 0..10u128 {
            let key = cache.key(&AssetId::new("X"), &AssetId::new("Y"), 1 << i, 3, &[]);
            cache.insert(key, 1, sample_paths());
        }
        assert_eq!(cache.len(), 3);
        assert_eq!(cache.metrics().evictions, 7);
        // The newest entry survives.
        let newest = cache.key(&AssetId::new("X"), &AssetId::new("Y"), 1 << 9, 3, &[]);
        assert!(cache.get(&newest, 1).is_some());
    }
}
