//! Market Price Service
//!
//! Bulk unit-price lookup on top of the market cache. Used by the price
//! refresh orchestrator and available to callers that only need prices.

use crate::cache::{CacheKey, CachedMarketData};
use crate::cancel::CancelToken;
use crate::error::{AppError, Result};
use crate::models::PriceSource;
use crate::progress::ProgressReporter;
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{info, warn};

/// One item to price
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRequest {
    pub item_id: u32,
    pub name: String,
    pub quantity: u32,
    /// Gil price when the plan buys this item from a vendor
    pub vendor_price: Option<u32>,
}

impl PriceRequest {
    pub fn market(item_id: u32, name: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id,
            name: name.into(),
            quantity,
            vendor_price: None,
        }
    }
}

/// Unit prices for one item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceInfo {
    pub item_id: u32,
    pub nq_price: f64,
    pub hq_price: f64,
    pub source: PriceSource,
    /// World with the cheapest listing, or the region for averages
    pub world: Option<String>,
    /// Data is older than the cache TTL (a refetch failed)
    pub is_stale: bool,
}

impl PriceInfo {
    pub fn unknown(item_id: u32) -> Self {
        Self {
            item_id,
            nq_price: 0.0,
            hq_price: 0.0,
            source: PriceSource::Unknown,
            world: None,
            is_stale: false,
        }
    }

    pub fn has_price(&self) -> bool {
        self.source != PriceSource::Unknown && self.nq_price > 0.0
    }

    /// Prices from a cached snapshot: cheapest listing, else region average
    pub fn from_market_data(data: &CachedMarketData, source: PriceSource, is_stale: bool) -> Self {
        let nq_price = data
            .lowest_price(false)
            .map(f64::from)
            .unwrap_or(data.average_price_nq);
        let hq_price = data
            .lowest_price(true)
            .map(f64::from)
            .unwrap_or(data.average_price_hq);
        let world = data
            .cheapest_world(false)
            .map(str::to_string)
            .or_else(|| (nq_price > 0.0).then(|| data.region.clone()));

        let source = if nq_price > 0.0 || hq_price > 0.0 {
            source
        } else {
            PriceSource::Unknown
        };

        Self {
            item_id: data.item_id,
            nq_price,
            hq_price,
            source,
            world,
            is_stale,
        }
    }
}

/// Market price service
pub struct MarketPriceService;

impl MarketPriceService {
    /// Prices for `items` in one region
    pub async fn get_prices(
        state: &AppState,
        items: &[PriceRequest],
        region: &str,
        force: bool,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<HashMap<u32, PriceInfo>> {
        Self::get_prices_in_regions(state, items, &[region.to_string()], force, progress, cancel).await
    }

    /// Prices for `items` across several regions, cheapest region winning
    pub async fn get_prices_in_regions(
        state: &AppState,
        items: &[PriceRequest],
        regions: &[String],
        force: bool,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<HashMap<u32, PriceInfo>> {
        info!(
            "MarketPriceService::get_prices - {} item(s) in {} region(s), force={}",
            items.len(),
            regions.len(),
            force
        );

        let ttl = state.config.read().cache_ttl;
        let max_age = if force { Duration::ZERO } else { ttl };

        let mut prices: HashMap<u32, PriceInfo> = HashMap::with_capacity(items.len());
        let mut market_items = Vec::new();
        for item in items {
            match item.vendor_price.filter(|p| *p > 0) {
                Some(price) => {
                    prices.insert(
                        item.item_id,
                        PriceInfo {
                            item_id: item.item_id,
                            nq_price: price as f64,
                            hq_price: 0.0,
                            source: PriceSource::Vendor,
                            world: None,
                            is_stale: false,
                        },
                    );
                }
                None => market_items.push(item.item_id),
            }
        }
        if market_items.is_empty() {
            return Ok(prices);
        }

        let keys: Vec<CacheKey> = regions
            .iter()
            .flat_map(|region| market_items.iter().map(move |id| CacheKey::new(*id, region.clone())))
            .collect();

        let fetch_started = state.market_cache.now();
        match state
            .market_cache
            .ensure_populated(&keys, max_age, progress, cancel)
            .await
        {
            Ok(_) => {}
            Err(AppError::Cancelled) => return Err(AppError::Cancelled),
            Err(e) => warn!("MarketPriceService::get_prices - cache population failed: {}", e),
        }

        for id in market_items {
            let mut best = PriceInfo::unknown(id);
            for region in regions {
                let candidate = Self::price_from_cache(state, id, region, ttl, fetch_started)?;
                best = cheapest(best, candidate);
            }
            prices.insert(id, best);
        }

        Ok(prices)
    }

    fn price_from_cache(
        state: &AppState,
        item_id: u32,
        region: &str,
        ttl: Duration,
        fetch_started: i64,
    ) -> Result<PriceInfo> {
        let (data, is_stale) = state.market_cache.get_with_stale(item_id, region, ttl)?;
        Ok(match data {
            Some(data) => {
                let source = if data.fetched_at >= fetch_started {
                    PriceSource::Market
                } else {
                    PriceSource::Cached
                };
                PriceInfo::from_market_data(&data, source, is_stale)
            }
            None => PriceInfo::unknown(item_id),
        })
    }
}

/// Cheapest-wins merge; an unknown price never beats a known one
fn cheapest(current: PriceInfo, candidate: PriceInfo) -> PriceInfo {
    match (current.has_price(), candidate.has_price()) {
        (false, true) => candidate,
        (true, true) if candidate.nq_price < current.nq_price => candidate,
        _ => current,
    }
}
