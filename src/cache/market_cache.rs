use super::{CacheEntryStat, CacheKey, CachedMarketData, Clock, MarketCacheStore};
use crate::cancel::CancelToken;
use crate::config::CacheLimits;
use crate::error::{AppError, Result};
use crate::progress::{ProgressReporter, ProgressStage, ProgressUpdate};
use crate::sources::types::MarketListings;
use crate::sources::MarketSource;
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Cache size summary
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub entries: usize,
    pub bytes: usize,
    pub fresh: usize,
    pub stale: usize,
    pub oldest_fetched_at: Option<i64>,
}

/// Time-boxed market data cache backed by a [`MarketCacheStore`]
pub struct MarketCache {
    store: Arc<dyn MarketCacheStore>,
    source: Arc<dyn MarketSource>,
    clock: Arc<dyn Clock>,
    limits: Option<CacheLimits>,
    region_concurrency: usize,
}

impl MarketCache {
    pub fn new(
        store: Arc<dyn MarketCacheStore>,
        source: Arc<dyn MarketSource>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            source,
            clock,
            limits: None,
            region_concurrency: 4,
        }
    }

    /// Enforce size ceilings after every population
    pub fn with_limits(mut self, limits: CacheLimits) -> Self {
        self.limits = Some(limits);
        self
    }

    pub fn with_region_concurrency(mut self, concurrency: usize) -> Self {
        self.region_concurrency = concurrency.max(1);
        self
    }

    pub fn now(&self) -> i64 {
        self.clock.now()
    }

    pub fn get(&self, item_id: u32, region: &str) -> Result<Option<CachedMarketData>> {
        self.store.get(&CacheKey::new(item_id, region))
    }

    /// Lookup with freshness: `(None, _)` never fetched, `(Some, true)` stale
    pub fn get_with_stale(
        &self,
        item_id: u32,
        region: &str,
        max_age: Duration,
    ) -> Result<(Option<CachedMarketData>, bool)> {
        let data = self.get(item_id, region)?;
        let now = self.clock.now();
        let is_stale = data.as_ref().map(|d| !d.is_fresh(now, max_age)).unwrap_or(false);
        Ok((data, is_stale))
    }

    /// Requests not present-and-fresh, deduplicated in request order
    pub fn get_missing(&self, requests: &[CacheKey], max_age: Duration) -> Result<Vec<CacheKey>> {
        let now = self.clock.now();
        let mut seen = HashSet::new();
        let mut missing = Vec::new();

        for key in requests {
            if !seen.insert(key) {
                continue;
            }
            let fresh = match self.store.get(key)? {
                Some(data) => data.is_fresh(now, max_age),
                None => false,
            };
            if !fresh {
                missing.push(key.clone());
            }
        }
        Ok(missing)
    }

    /// Fetch every missing request from the market source.
    ///
    /// Requests are grouped by region and fetched one bulk call per region.
    /// A failed region is logged and skipped. Returns the number of entries
    /// stored; entries stored before a cancellation are kept.
    pub async fn ensure_populated(
        &self,
        requests: &[CacheKey],
        max_age: Duration,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<usize> {
        cancel.check()?;
        let missing = self.get_missing(requests, max_age)?;
        if missing.is_empty() {
            tracing::debug!("MarketCache::ensure_populated - {} requests all fresh", requests.len());
            return Ok(0);
        }

        let mut groups: BTreeMap<String, Vec<u32>> = BTreeMap::new();
        for key in missing {
            groups.entry(key.region).or_default().push(key.item_id);
        }

        let total = groups.len();
        let completed = AtomicUsize::new(0);
        tracing::info!(
            "MarketCache::ensure_populated - fetching {} region group(s) for {} requests",
            total,
            requests.len()
        );

        let outcomes: Vec<Result<usize>> = stream::iter(groups)
            .map(|(region, ids)| {
                let completed = &completed;
                async move {
                    let fetched = cancel
                        .run(self.source.get_market_data_bulk(&region, &ids))
                        .await;

                    let stored = match fetched {
                        Ok(results) => self.store_results(results.into_values()),
                        Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                        Err(e) => {
                            tracing::warn!(
                                "MarketCache::ensure_populated - region {} failed ({} items): {}",
                                region,
                                ids.len(),
                                e
                            );
                            0
                        }
                    };

                    let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                    progress.report(ProgressUpdate::new(
                        ProgressStage::MarketFetch,
                        done,
                        total,
                        format!("Fetched {} of {} items for {}", stored, ids.len(), region),
                    ));
                    Ok(stored)
                }
            })
            .buffer_unordered(self.region_concurrency)
            .collect()
            .await;

        let mut stored = 0;
        let mut cancelled = false;
        for outcome in outcomes {
            match outcome {
                Ok(n) => stored += n,
                Err(_) => cancelled = true,
            }
        }

        if let Some(limits) = &self.limits {
            if let Err(e) = self.enforce_limits(limits) {
                tracing::warn!("MarketCache::ensure_populated - eviction failed: {}", e);
            }
        }

        if cancelled {
            tracing::info!("MarketCache::ensure_populated - cancelled after storing {}", stored);
            return Err(AppError::Cancelled);
        }
        tracing::info!("MarketCache::ensure_populated - stored {} entries", stored);
        Ok(stored)
    }

    fn store_results(&self, results: impl Iterator<Item = MarketListings>) -> usize {
        let now = self.clock.now();
        let mut stored = 0;
        for listings in results {
            let data = CachedMarketData::from_listings(listings, now);
            match self.store.put(&data) {
                Ok(()) => stored += 1,
                Err(e) => tracing::warn!(
                    "MarketCache - failed to store {}@{}: {}",
                    data.item_id,
                    data.region,
                    e
                ),
            }
        }
        stored
    }

    /// Store one snapshot directly
    pub fn put(&self, data: &CachedMarketData) -> Result<()> {
        self.store.put(data)
    }

    /// Apply the size ceilings.
    ///
    /// When either ceiling is breached, entries older than the recent window
    /// go first; if still over, the oldest half by fetch time is evicted.
    pub fn enforce_limits(&self, limits: &CacheLimits) -> Result<usize> {
        let mut entries = self.store.entry_stats()?;
        let over = |entries: &[CacheEntryStat]| {
            let bytes: usize = entries.iter().map(|e| e.size_bytes).sum();
            entries.len() > limits.max_entries || bytes > limits.max_bytes
        };
        if !over(&entries[..]) {
            return Ok(0);
        }

        let cutoff = self.clock.now() - limits.recent_window.as_secs() as i64;
        let (old, recent): (Vec<_>, Vec<_>) = entries.into_iter().partition(|e| e.fetched_at < cutoff);
        let old_keys: Vec<CacheKey> = old.into_iter().map(|e| e.key).collect();
        let mut evicted = self.store.remove(&old_keys)?;
        entries = recent;

        if over(&entries[..]) {
            entries.sort_by_key(|e| e.fetched_at);
            let half = (entries.len() / 2).max(1);
            let keys: Vec<CacheKey> = entries.into_iter().take(half).map(|e| e.key).collect();
            evicted += self.store.remove(&keys)?;
        }

        tracing::info!("MarketCache::enforce_limits - evicted {} entries", evicted);
        Ok(evicted)
    }

    /// Remove entries older than `older_than`
    pub fn clear_stale(&self, older_than: Duration) -> Result<usize> {
        let now = self.clock.now();
        let keys: Vec<CacheKey> = self
            .store
            .entry_stats()?
            .into_iter()
            .filter(|e| now - e.fetched_at > older_than.as_secs() as i64)
            .map(|e| e.key)
            .collect();
        let removed = self.store.remove(&keys)?;
        tracing::debug!("MarketCache::clear_stale - removed {} entries", removed);
        Ok(removed)
    }

    pub fn clear(&self) -> Result<()> {
        self.store.clear()
    }

    /// Entry counts relative to `max_age`
    pub fn stats(&self, max_age: Duration) -> Result<CacheStats> {
        let now = self.clock.now();
        let entries = self.store.entry_stats()?;
        let fresh = entries
            .iter()
            .filter(|e| !max_age.is_zero() && now - e.fetched_at <= max_age.as_secs() as i64)
            .count();

        Ok(CacheStats {
            entries: entries.len(),
            bytes: entries.iter().map(|e| e.size_bytes).sum(),
            fresh,
            stale: entries.len() - fresh,
            oldest_fetched_at: entries.iter().map(|e| e.fetched_at).min(),
        })
    }
}
