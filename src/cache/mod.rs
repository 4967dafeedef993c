//! Market data cache
//!
//! Maps (item, region) to a snapshot of per-world listings with an
//! explicit fresh / stale / missing classification. Storage is pluggable
//! through [`MarketCacheStore`]: [`MemoryCacheStore`] for embedded use and
//! the SQLite database for persistence.

mod market_cache;

pub use market_cache::{CacheStats, MarketCache};

use crate::error::Result;
use crate::sources::types::MarketListings;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

// ============================================================================
// Clock
// ============================================================================

/// Source of "now" as UNIX epoch seconds
pub trait Clock: Send + Sync {
    fn now(&self) -> i64;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> i64 {
        chrono::Utc::now().timestamp()
    }
}

/// Manually advanced clock
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    pub fn new(now: i64) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: i64) {
        self.now.store(now, Ordering::SeqCst);
    }

    pub fn advance(&self, by: Duration) {
        self.now.fetch_add(by.as_secs() as i64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> i64 {
        self.now.load(Ordering::SeqCst)
    }
}

// ============================================================================
// Cache Entries
// ============================================================================

/// Cache key: one item in one data center or world
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CacheKey {
    pub item_id: u32,
    pub region: String,
}

impl CacheKey {
    pub fn new(item_id: u32, region: impl Into<String>) -> Self {
        Self {
            item_id,
            region: region.into(),
        }
    }
}

/// One listing inside a cached snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedListing {
    pub price: u32,
    pub quantity: u32,
    pub retainer: String,
    pub hq: bool,
}

/// Cached listing snapshot for one (item, region)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedMarketData {
    pub item_id: u32,
    pub region: String,
    /// UNIX epoch seconds
    pub fetched_at: i64,
    /// World name -> listings, cheapest first
    pub worlds: BTreeMap<String, Vec<CachedListing>>,
    pub average_price_nq: f64,
    pub average_price_hq: f64,
}

impl CachedMarketData {
    /// Build a snapshot from fetched listings
    pub fn from_listings(listings: MarketListings, fetched_at: i64) -> Self {
        let mut worlds: BTreeMap<String, Vec<CachedListing>> = BTreeMap::new();
        for listing in listings.listings {
            worlds.entry(listing.world_name).or_default().push(CachedListing {
                price: listing.price_per_unit,
                quantity: listing.quantity,
                retainer: listing.retainer_name,
                hq: listing.hq,
            });
        }
        for entries in worlds.values_mut() {
            entries.sort_by_key(|l| l.price);
        }

        let mut data = Self {
            item_id: listings.item_id,
            region: listings.region,
            fetched_at,
            worlds,
            average_price_nq: listings.average_price_nq,
            average_price_hq: listings.average_price_hq,
        };
        if data.average_price_nq <= 0.0 {
            data.average_price_nq = data.weighted_average(false);
        }
        if data.average_price_hq <= 0.0 {
            data.average_price_hq = data.weighted_average(true);
        }
        data
    }

    pub fn key(&self) -> CacheKey {
        CacheKey::new(self.item_id, self.region.clone())
    }

    pub fn age_secs(&self, now: i64) -> i64 {
        now - self.fetched_at
    }

    /// Fresh while `age <= max_age`; a zero `max_age` is never fresh
    pub fn is_fresh(&self, now: i64, max_age: Duration) -> bool {
        !max_age.is_zero() && self.age_secs(now) <= max_age.as_secs() as i64
    }

    pub fn listing_count(&self) -> usize {
        self.worlds.values().map(Vec::len).sum()
    }

    /// Lowest unit price; HQ looks only at HQ listings
    pub fn lowest_price(&self, hq_only: bool) -> Option<u32> {
        self.worlds
            .values()
            .flatten()
            .filter(|l| !hq_only || l.hq)
            .map(|l| l.price)
            .min()
    }

    /// World holding the lowest listing
    pub fn cheapest_world(&self, hq_only: bool) -> Option<&str> {
        self.worlds
            .iter()
            .flat_map(|(world, listings)| listings.iter().map(move |l| (world, l)))
            .filter(|(_, l)| !hq_only || l.hq)
            .min_by_key(|(_, l)| l.price)
            .map(|(world, _)| world.as_str())
    }

    fn weighted_average(&self, hq: bool) -> f64 {
        let (value, qty) = self
            .worlds
            .values()
            .flatten()
            .filter(|l| l.hq == hq)
            .fold((0u64, 0u64), |(v, q), l| {
                (v + l.price as u64 * l.quantity as u64, q + l.quantity as u64)
            });
        if qty == 0 {
            0.0
        } else {
            value as f64 / qty as f64
        }
    }

    /// Approximate serialized size used for the byte ceiling
    pub fn estimated_size(&self) -> usize {
        let listings: usize = self
            .worlds
            .iter()
            .map(|(world, ls)| {
                world.len() + ls.iter().map(|l| 24 + l.retainer.len()).sum::<usize>()
            })
            .sum();
        64 + self.region.len() + listings
    }
}

/// Per-entry bookkeeping used for eviction
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntryStat {
    pub key: CacheKey,
    pub fetched_at: i64,
    pub size_bytes: usize,
}

// ============================================================================
// Storage
// ============================================================================

/// Storage backend for cached market data.
///
/// Implementations must tolerate concurrent reads and concurrent writes
/// to independent keys. `put` replaces any existing entry wholesale.
pub trait MarketCacheStore: Send + Sync {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedMarketData>>;

    fn put(&self, data: &CachedMarketData) -> Result<()>;

    /// Remove entries, returning how many existed
    fn remove(&self, keys: &[CacheKey]) -> Result<usize>;

    fn entry_stats(&self) -> Result<Vec<CacheEntryStat>>;

    fn clear(&self) -> Result<()>;
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryCacheStore {
    entries: DashMap<CacheKey, (CachedMarketData, usize)>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl MarketCacheStore for MemoryCacheStore {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedMarketData>> {
        Ok(self.entries.get(key).map(|e| e.value().0.clone()))
    }

    fn put(&self, data: &CachedMarketData) -> Result<()> {
        let size = data.estimated_size();
        self.entries.insert(data.key(), (data.clone(), size));
        Ok(())
    }

    fn remove(&self, keys: &[CacheKey]) -> Result<usize> {
        Ok(keys
            .iter()
            .filter(|k| self.entries.remove(*k).is_some())
            .count())
    }

    fn entry_stats(&self) -> Result<Vec<CacheEntryStat>> {
        Ok(self
            .entries
            .iter()
            .map(|e| CacheEntryStat {
                key: e.key().clone(),
                fetched_at: e.value().0.fetched_at,
                size_bytes: e.value().1,
            })
            .collect())
    }

    fn clear(&self) -> Result<()> {
        self.entries.clear();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::sources::types::MarketListing;

    pub(crate) fn listing(world: &str, price: u32, quantity: u32, hq: bool) -> MarketListing {
        MarketListing {
            world_name: world.to_string(),
            price_per_unit: price,
            quantity,
            retainer_name: format!("{}-retainer", world),
            hq,
        }
    }

    pub(crate) fn listings(item_id: u32, region: &str, entries: Vec<MarketListing>) -> MarketListings {
        MarketListings {
            item_id,
            region: region.to_string(),
            listings: entries,
            average_price_nq: 0.0,
            average_price_hq: 0.0,
            last_upload_time: 0,
        }
    }

    #[test]
    fn test_snapshot_groups_worlds_cheapest_first() {
        let data = CachedMarketData::from_listings(
            listings(
                5057,
                "Aether",
                vec![
                    listing("Gilgamesh", 150, 5, false),
                    listing("Jenova", 90, 2, true),
                    listing("Gilgamesh", 100, 10, false),
                ],
            ),
            1_000,
        );

        assert_eq!(data.worlds.len(), 2);
        assert_eq!(data.worlds["Gilgamesh"][0].price, 100);
        assert_eq!(data.listing_count(), 3);
        assert_eq!(data.lowest_price(false), Some(90));
        assert_eq!(data.lowest_price(true), Some(90));
        assert_eq!(data.cheapest_world(false), Some("Jenova"));
        // (150*5 + 100*10) / 15
        assert!((data.average_price_nq - 116.666).abs() < 0.01);
        assert_eq!(data.average_price_hq, 90.0);
    }

    #[test]
    fn test_freshness_boundary() {
        let data = CachedMarketData::from_listings(listings(1, "Aether", vec![]), 0);
        let max_age = Duration::from_secs(3 * 3600);

        assert!(data.is_fresh(2 * 3600 + 59 * 60, max_age));
        assert!(data.is_fresh(3 * 3600, max_age));
        assert!(!data.is_fresh(3 * 3600 + 1, max_age));
        assert!(!data.is_fresh(0, Duration::ZERO));
    }

    #[test]
    fn test_memory_store_overwrites_wholesale() {
        let store = MemoryCacheStore::new();
        let first = CachedMarketData::from_listings(
            listings(1, "Aether", vec![listing("Gilgamesh", 10, 1, false)]),
            100,
        );
        let second = CachedMarketData::from_listings(
            listings(1, "Aether", vec![listing("Jenova", 20, 1, false)]),
            200,
        );

        store.put(&first).unwrap();
        store.put(&second).unwrap();

        assert_eq!(store.len(), 1);
        let stored = store.get(&CacheKey::new(1, "Aether")).unwrap().unwrap();
        assert_eq!(stored.fetched_at, 200);
        assert!(!stored.worlds.contains_key("Gilgamesh"));

        assert_eq!(store.remove(&[CacheKey::new(1, "Aether"), CacheKey::new(2, "Aether")]).unwrap(), 1);
        assert!(store.is_empty());
    }
}
