//! External data source adapters
//!
//! The planner talks to two remote collaborators through the traits in
//! this module: an item/recipe database and a marketplace API. Concrete
//! adapters live in submodules; tests use scripted fakes.

pub mod types;
pub mod rate_limiter;
pub mod garland;
pub mod universalis;

use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::{self, StreamExt};
use std::collections::HashMap;
use types::*;

/// Parallel single-item lookups used by the default `get_items`
const DEFAULT_ITEM_PARALLELISM: usize = 4;

/// Item/recipe database keyed by item id
#[async_trait]
pub trait ItemSource: Send + Sync {
    /// Source ID (e.g., "garland")
    fn id(&self) -> &'static str;

    /// Fetch one item; `Ok(None)` when the source does not know the id
    async fn get_item(&self, item_id: u32) -> Result<Option<ItemRecord>>;

    /// Fetch several items.
    ///
    /// Ids missing from both `items` and `not_found` failed transiently
    /// and may be retried by the caller. Permanent failures such as a
    /// malformed document are reported as not found.
    async fn get_items(&self, ids: &[u32], use_parallel: bool) -> Result<ItemBatch> {
        let parallelism = if use_parallel { DEFAULT_ITEM_PARALLELISM } else { 1 };

        let results: Vec<(u32, Result<Option<ItemRecord>>)> = stream::iter(ids.iter().copied())
            .map(|id| async move { (id, self.get_item(id).await) })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        let mut batch = ItemBatch::default();
        for (id, result) in results {
            match result {
                Ok(Some(item)) => {
                    batch.items.insert(id, item);
                }
                Ok(None) => batch.not_found.push(id),
                Err(e) if e.is_transient() => tracing::debug!("{}: item {} failed: {}", self.id(), id, e),
                Err(e) => {
                    tracing::warn!("{}: item {} unusable: {}", self.id(), id, e);
                    batch.not_found.push(id);
                }
            }
        }
        Ok(batch)
    }
}

/// Marketplace API keyed by (item id, region)
#[async_trait]
pub trait MarketSource: Send + Sync {
    /// Source ID (e.g., "universalis")
    fn id(&self) -> &'static str;

    /// Listings for one item
    async fn get_market_data(
        &self,
        region: &str,
        item_id: u32,
        hq_only: bool,
        entries: usize,
    ) -> Result<MarketListings>;

    /// Listings for many items; chunked internally when the API caps batch size
    async fn get_market_data_bulk(
        &self,
        region: &str,
        item_ids: &[u32],
    ) -> Result<HashMap<u32, MarketListings>>;
}
