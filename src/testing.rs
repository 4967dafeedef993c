//! Scripted source fakes shared by unit tests

use crate::error::{AppError, Result};
use crate::models::VendorInfo;
use crate::sources::types::*;
use crate::sources::{ItemSource, MarketSource};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

// ============================================================================
// Item records
// ============================================================================

pub(crate) fn item(id: u32, name: &str) -> ItemRecord {
    ItemRecord::new(id, name)
}

pub(crate) fn crafted(id: u32, name: &str, level: u32, yield_count: u32, ingredients: &[(u32, u32)]) -> ItemRecord {
    let mut record = ItemRecord::new(id, name);
    record.recipes.push(RecipeRecord {
        recipe_id: id + 100_000,
        job: "Blacksmith".to_string(),
        recipe_level: level,
        yield_count,
        ingredients: ingredients
            .iter()
            .map(|&(item_id, amount)| Ingredient { item_id, amount })
            .collect(),
    });
    record
}

pub(crate) fn with_vendor(mut record: ItemRecord, price: u32) -> ItemRecord {
    record
        .vendors
        .push(VendorInfo::gil(format!("Merchant {}", record.vendors.len() + 1), "Limsa Lominsa", price));
    record
}

// ============================================================================
// Item source
// ============================================================================

/// Item source answering from a fixed table.
///
/// Ids in `flaky` are omitted from the first N batches that request them;
/// ids in `unavailable` are always omitted. Unknown ids are reported as
/// definitively not found.
#[derive(Default)]
pub(crate) struct FakeItemSource {
    items: HashMap<u32, ItemRecord>,
    flaky: Mutex<HashMap<u32, u32>>,
    unavailable: HashSet<u32>,
    delay: Option<Duration>,
    requests: Mutex<Vec<Vec<u32>>>,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

impl FakeItemSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_item(mut self, record: ItemRecord) -> Self {
        self.items.insert(record.id, record);
        self
    }

    pub(crate) fn flaky(self, id: u32, failures: u32) -> Self {
        self.flaky.lock().insert(id, failures);
        self
    }

    pub(crate) fn unavailable(mut self, id: u32) -> Self {
        self.unavailable.insert(id);
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Every id list passed to `get_items`, in call order
    pub(crate) fn requests(&self) -> Vec<Vec<u32>> {
        self.requests.lock().clone()
    }

    /// Most `get_items` calls that were running at the same time
    pub(crate) fn peak_in_flight(&self) -> usize {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    pub(crate) fn request_count(&self, id: u32) -> usize {
        self.requests.lock().iter().flatten().filter(|i| **i == id).count()
    }

    fn lookup(&self, id: u32) -> Option<Option<ItemRecord>> {
        if self.unavailable.contains(&id) {
            return None;
        }
        {
            let mut flaky = self.flaky.lock();
            if let Some(remaining) = flaky.get_mut(&id) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return None;
                }
            }
        }
        Some(self.items.get(&id).cloned())
    }
}

#[async_trait]
impl ItemSource for FakeItemSource {
    fn id(&self) -> &'static str {
        "fake-items"
    }

    async fn get_item(&self, item_id: u32) -> Result<Option<ItemRecord>> {
        let batch = self.get_items(&[item_id], false).await?;
        if let Some(record) = batch.items.get(&item_id) {
            return Ok(Some(record.clone()));
        }
        if batch.not_found.contains(&item_id) {
            return Ok(None);
        }
        Err(AppError::Source(format!("item {} unavailable", item_id)))
    }

    async fn get_items(&self, ids: &[u32], _use_parallel: bool) -> Result<ItemBatch> {
        self.requests.lock().push(ids.to_vec());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut batch = ItemBatch::default();
        for &id in ids {
            match self.lookup(id) {
                Some(Some(record)) => {
                    batch.items.insert(id, record);
                }
                Some(None) => batch.not_found.push(id),
                None => {}
            }
        }
        Ok(batch)
    }
}

// ============================================================================
// Market source
// ============================================================================

/// Market source answering from a fixed (region, item) table
#[derive(Default)]
pub(crate) struct FakeMarketSource {
    listings: Mutex<HashMap<(String, u32), MarketListings>>,
    failing_regions: HashSet<String>,
    delay: Option<Duration>,
    bulk_calls: Mutex<Vec<(String, Vec<u32>)>>,
}

impl FakeMarketSource {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn with_listings(self, listings: MarketListings) -> Self {
        self.set_listings(listings);
        self
    }

    pub(crate) fn failing_region(mut self, region: &str) -> Self {
        self.failing_regions.insert(region.to_string());
        self
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn set_listings(&self, listings: MarketListings) {
        self.listings
            .lock()
            .insert((listings.region.clone(), listings.item_id), listings);
    }

    /// Every bulk request as (region, ids)
    pub(crate) fn bulk_calls(&self) -> Vec<(String, Vec<u32>)> {
        self.bulk_calls.lock().clone()
    }
}

#[async_trait]
impl MarketSource for FakeMarketSource {
    fn id(&self) -> &'static str {
        "fake-market"
    }

    async fn get_market_data(
        &self,
        region: &str,
        item_id: u32,
        _hq_only: bool,
        _entries: usize,
    ) -> Result<MarketListings> {
        let mut bulk = self.get_market_data_bulk(region, &[item_id]).await?;
        bulk.remove(&item_id)
            .ok_or_else(|| AppError::NotFound(format!("no listings for {}", item_id)))
    }

    async fn get_market_data_bulk(
        &self,
        region: &str,
        item_ids: &[u32],
    ) -> Result<HashMap<u32, MarketListings>> {
        self.bulk_calls
            .lock()
            .push((region.to_string(), item_ids.to_vec()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.failing_regions.contains(region) {
            return Err(AppError::Source(format!("{} is unreachable", region)));
        }

        let listings = self.listings.lock();
        Ok(item_ids
            .iter()
            .filter_map(|id| {
                listings
                    .get(&(region.to_string(), *id))
                    .map(|l| (*id, l.clone()))
            })
            .collect())
    }
}
