//! Price Refresh Service
//!
//! Prices every item a plan actually has to acquire and writes the prices
//! back onto the tree. Manual refreshes and the auto-refresh scheduler go
//! through the same entry points and share the one-refresh-at-a-time guard.

use crate::cancel::CancelToken;
use crate::error::{AppError, Result};
use crate::models::{AcquisitionSource, CraftingPlan, PlanNode, PriceSource};
use crate::progress::{ProgressReporter, ProgressStage, ProgressUpdate};
use crate::services::market_price_service::{MarketPriceService, PriceInfo, PriceRequest};
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

/// Outcome of a long-running planner operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationStatus {
    Success,
    PartialSuccess,
    Failed,
    Cancelled,
    NoPlan,
}

impl OperationStatus {
    /// Status from per-item counts: no failures is success, any success is partial
    pub fn from_counts(succeeded: usize, failed: usize) -> Self {
        if failed == 0 {
            OperationStatus::Success
        } else if succeeded > 0 {
            OperationStatus::PartialSuccess
        } else {
            OperationStatus::Failed
        }
    }
}

/// Result of a price refresh
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PriceRefreshResult {
    pub status: OperationStatus,
    pub prices: HashMap<u32, PriceInfo>,
    pub success_count: usize,
    pub failed_count: usize,
    pub cached_count: usize,
    pub total_count: usize,
    pub message: String,
}

impl PriceRefreshResult {
    fn empty(status: OperationStatus, total_count: usize, message: impl Into<String>) -> Self {
        Self {
            status,
            prices: HashMap::new(),
            success_count: 0,
            failed_count: 0,
            cached_count: 0,
            total_count,
            message: message.into(),
        }
    }
}

/// Price refresh service
pub struct PriceRefreshService;

impl PriceRefreshService {
    /// Refresh prices for every item the plan acquires.
    ///
    /// Fails fast with [`AppError::RefreshInProgress`] when another refresh
    /// holds the guard. Previously written prices are kept on any failure.
    pub async fn refresh_plan(
        state: &AppState,
        plan: &mut CraftingPlan,
        region: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<PriceRefreshResult> {
        info!("PriceRefreshService::refresh_plan - '{}' in {}", plan.name, region);
        if plan.is_empty() {
            return Ok(PriceRefreshResult::empty(OperationStatus::NoPlan, 0, "Plan has no items"));
        }

        let _guard = state.try_begin_refresh()?;
        let requests = Self::price_requests(plan, state.config.read().warm_cache_for_crafted_items);
        let outcome = Self::fetch(state, &requests, region, false, progress, cancel).await;
        Ok(Self::finish(plan, requests.len(), outcome, progress))
    }

    /// Refresh a plan shared with readers such as the optimizer.
    ///
    /// The plan is only read-locked while collecting items and write-locked
    /// while prices are applied, so readers never see half-written prices.
    pub async fn refresh_shared_plan(
        state: &AppState,
        plan: &RwLock<CraftingPlan>,
        region: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<PriceRefreshResult> {
        let warm = state.config.read().warm_cache_for_crafted_items;
        let requests = {
            let plan = plan.read().await;
            if plan.is_empty() {
                return Ok(PriceRefreshResult::empty(OperationStatus::NoPlan, 0, "Plan has no items"));
            }
            Self::price_requests(&plan, warm)
        };

        let _guard = state.try_begin_refresh()?;
        info!("PriceRefreshService::refresh_shared_plan - {} item(s) in {}", requests.len(), region);
        let outcome = Self::fetch(state, &requests, region, false, progress, cancel).await;

        let mut plan = plan.write().await;
        Ok(Self::finish(&mut plan, requests.len(), outcome, progress))
    }

    /// Force-refresh a single item, bypassing the cache TTL
    pub async fn refresh_item(
        state: &AppState,
        plan: &mut CraftingPlan,
        item_id: u32,
        region: &str,
        cancel: &CancelToken,
    ) -> Result<PriceRefreshResult> {
        let mut request = None;
        plan.visit(&mut |node| {
            if request.is_none() && node.item_id == item_id {
                request = Some(price_request(node));
            }
        });
        let request = request.ok_or_else(|| {
            AppError::NotFound(format!("Item {} is not part of plan '{}'", item_id, plan.name))
        })?;

        let _guard = state.try_begin_refresh()?;
        info!("PriceRefreshService::refresh_item - {} ({})", request.name, item_id);
        let requests = vec![request];
        let outcome = Self::fetch(state, &requests, region, true, &(), cancel).await;
        Ok(Self::finish(plan, 1, outcome, &()))
    }

    /// Deduplicated items to price.
    ///
    /// Descent stops below nodes that are not crafted. Crafted nodes are
    /// priced too when `include_crafted` is set, for craft-vs-buy display.
    pub fn price_requests(plan: &CraftingPlan, include_crafted: bool) -> Vec<PriceRequest> {
        let mut requests: Vec<PriceRequest> = Vec::new();
        let mut index: HashMap<u32, usize> = HashMap::new();

        fn collect(
            node: &PlanNode,
            include_crafted: bool,
            requests: &mut Vec<PriceRequest>,
            index: &mut HashMap<u32, usize>,
        ) {
            let crafted = node.consumes_children();
            if !crafted || include_crafted {
                match index.get(&node.item_id) {
                    Some(&i) => requests[i].quantity += node.quantity,
                    None => {
                        index.insert(node.item_id, requests.len());
                        requests.push(price_request(node));
                    }
                }
            }
            if crafted {
                for child in &node.children {
                    collect(child, include_crafted, requests, index);
                }
            }
        }

        for root in &plan.root_items {
            collect(root, include_crafted, &mut requests, &mut index);
        }
        requests
    }

    // ========================================================================
    // Private Helper Methods
    // ========================================================================

    async fn fetch(
        state: &AppState,
        requests: &[PriceRequest],
        region: &str,
        force: bool,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<HashMap<u32, PriceInfo>> {
        let config = state.config();
        let mut regions = vec![region.to_string()];
        if config.search_all_regions {
            regions.extend(config.all_regions.iter().filter(|r| r.as_str() != region).cloned());
        }
        MarketPriceService::get_prices_in_regions(state, requests, &regions, force, progress, cancel).await
    }

    /// Write fetched prices onto the plan and tally the outcome
    fn finish(
        plan: &mut CraftingPlan,
        total: usize,
        outcome: Result<HashMap<u32, PriceInfo>>,
        progress: &dyn ProgressReporter,
    ) -> PriceRefreshResult {
        let prices = match outcome {
            Ok(prices) => prices,
            Err(AppError::Cancelled) => {
                info!("PriceRefreshService - cancelled, existing prices kept");
                return PriceRefreshResult::empty(OperationStatus::Cancelled, total, "Price refresh cancelled");
            }
            Err(e) => {
                warn!("PriceRefreshService - refresh failed, existing prices kept: {}", e);
                let mut result = PriceRefreshResult::empty(
                    OperationStatus::Failed,
                    total,
                    format!("Price refresh failed: {}", e),
                );
                result.failed_count = total;
                return result;
            }
        };

        let (mut success, mut failed, mut cached) = (0, 0, 0);
        for info in prices.values() {
            match info.source {
                PriceSource::Unknown => {
                    failed += 1;
                    continue;
                }
                PriceSource::Vendor | PriceSource::Market => success += 1,
                PriceSource::Cached => cached += 1,
            }

            plan.update_item(info.item_id, |node| match info.source {
                PriceSource::Vendor => node.price_source = PriceSource::Vendor,
                source => node.set_market_prices(
                    info.nq_price,
                    (info.hq_price > 0.0).then_some(info.hq_price),
                    source,
                ),
            });
        }

        progress.report(ProgressUpdate::new(
            ProgressStage::PriceRefresh,
            success + cached,
            total,
            "Prices applied",
        ));

        let status = OperationStatus::from_counts(success + cached, failed);
        let message = match status {
            OperationStatus::Success => format!("Updated {} price(s) ({} from cache)", success + cached, cached),
            OperationStatus::PartialSuccess => format!(
                "Updated {} of {} price(s); {} unavailable",
                success + cached,
                total,
                failed
            ),
            _ => format!("No prices available for {} item(s)", failed),
        };
        info!("PriceRefreshService - {}", message);

        PriceRefreshResult {
            status,
            prices,
            success_count: success,
            failed_count: failed,
            cached_count: cached,
            total_count: total,
            message,
        }
    }
}

fn price_request(node: &PlanNode) -> PriceRequest {
    let vendor_price = match node.source {
        AcquisitionSource::VendorBuy => node
            .selected_vendor()
            .filter(|v| v.is_gil_vendor())
            .map(|v| v.price)
            .or(Some(node.vendor_price)),
        _ => None,
    };
    PriceRequest {
        item_id: node.item_id,
        name: node.name.clone(),
        quantity: node.quantity,
        vendor_price,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::tests::{listing, listings};
    use crate::cache::{ManualClock, MemoryCacheStore};
    use crate::config::PlannerConfig;
    use crate::models::VendorInfo;
    use crate::testing::{FakeItemSource, FakeMarketSource};
    use std::sync::Arc;
    use std::time::Duration;

    fn state_with(market: FakeMarketSource) -> (AppState, Arc<FakeMarketSource>) {
        let market = Arc::new(market);
        let state = AppState::with_parts(
            Arc::new(FakeItemSource::new()),
            market.clone(),
            Arc::new(MemoryCacheStore::new()),
            Arc::new(ManualClock::new(1_000_000)),
            PlannerConfig::default(),
        );
        (state, market)
    }

    fn node(item_id: u32, name: &str, quantity: u32, source: AcquisitionSource) -> PlanNode {
        let mut node = PlanNode::new(item_id, name, quantity);
        node.source = source;
        node
    }

    /// Sword (craft) <- Ingot (craft) <- Ore; Grip (vendor); second Ore under Sword
    fn sword_plan() -> CraftingPlan {
        let mut ingot = node(2, "Ingot", 2, AcquisitionSource::Craft);
        ingot.can_craft = true;
        ingot.children.push(node(4, "Ore", 6, AcquisitionSource::MarketBuyNq));

        let mut grip = node(3, "Grip", 1, AcquisitionSource::VendorBuy);
        grip.vendor_options = vec![VendorInfo::gil("Merchant", "Limsa", 18)];
        grip.vendor_price = 18;

        let mut sword = node(1, "Sword", 1, AcquisitionSource::Craft);
        sword.can_craft = true;
        sword.children = vec![ingot, grip, node(4, "Ore", 1, AcquisitionSource::MarketBuyNq)];

        let mut plan = CraftingPlan::new("Sword", "Aether", None);
        plan.root_items.push(sword);
        plan
    }

    #[tokio::test]
    async fn test_empty_plan_is_no_plan_without_network() {
        let (state, market) = state_with(FakeMarketSource::new());
        let mut plan = CraftingPlan::new("Empty", "Aether", None);

        let result = PriceRefreshService::refresh_plan(&state, &mut plan, "Aether", &(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, OperationStatus::NoPlan);
        assert_eq!(result.success_count, 0);
        assert_eq!(result.total_count, 0);
        assert!(market.bulk_calls().is_empty());
    }

    #[test]
    fn test_requests_stop_below_bought_nodes() {
        let mut plan = sword_plan();
        plan.set_acquisition_source(&[0, 0], AcquisitionSource::MarketBuyNq).unwrap();

        let ids: Vec<u32> = PriceRefreshService::price_requests(&plan, false)
            .iter()
            .map(|r| r.item_id)
            .collect();
        // Ingot is bought, so only the Ore directly under Sword remains
        assert_eq!(ids, vec![2, 3, 4]);

        let requests = PriceRefreshService::price_requests(&sword_plan(), true);
        let ore = requests.iter().find(|r| r.item_id == 4).unwrap();
        assert_eq!(ore.quantity, 7);
        assert_eq!(requests.len(), 4);
        assert_eq!(requests.iter().find(|r| r.item_id == 3).unwrap().vendor_price, Some(18));
    }

    #[tokio::test]
    async fn test_writes_price_to_every_matching_node() {
        let market = FakeMarketSource::new()
            .with_listings(listings(4, "Aether", vec![listing("Gilgamesh", 25, 99, false)]))
            .with_listings(listings(2, "Aether", vec![listing("Gilgamesh", 200, 3, false)]));
        let (state, market) = state_with(market);
        let mut plan = sword_plan();

        let result = PriceRefreshService::refresh_plan(&state, &mut plan, "Aether", &(), &CancelToken::new())
            .await
            .unwrap();

        // Sword has no listings
        assert_eq!(result.status, OperationStatus::PartialSuccess);
        assert_eq!(result.total_count, 4);
        assert_eq!(result.success_count, 3);
        assert_eq!(result.failed_count, 1);

        let mut ore_prices = Vec::new();
        plan.visit(&mut |n| {
            if n.item_id == 4 {
                ore_prices.push((n.market_price, n.price_source));
            }
        });
        assert_eq!(ore_prices, vec![(25.0, PriceSource::Market), (25.0, PriceSource::Market)]);
        assert_eq!(plan.root_items[0].children[1].price_source, PriceSource::Vendor);

        let calls = market.bulk_calls();
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].1.contains(&3));
    }

    #[tokio::test]
    async fn test_failure_keeps_previous_prices() {
        let (state, _) = state_with(FakeMarketSource::new().failing_region("Aether"));
        let mut plan = sword_plan();
        plan.update_item(4, |n| n.set_market_prices(30.0, None, PriceSource::Market));

        let result = PriceRefreshService::refresh_plan(&state, &mut plan, "Aether", &(), &CancelToken::new())
            .await
            .unwrap();

        assert_eq!(result.status, OperationStatus::PartialSuccess);
        assert_eq!(result.success_count, 1);
        plan.visit(&mut |n| {
            if n.item_id == 4 {
                assert_eq!(n.market_price, 30.0);
            }
        });
    }

    #[tokio::test]
    async fn test_second_refresh_fails_fast() {
        let (state, _) = state_with(FakeMarketSource::new());
        let mut plan = sword_plan();
        let _held = state.try_begin_refresh().unwrap();

        let result = PriceRefreshService::refresh_plan(&state, &mut plan, "Aether", &(), &CancelToken::new()).await;
        assert!(matches!(result, Err(AppError::RefreshInProgress)));
    }

    #[tokio::test]
    async fn test_cancelled_refresh_reports_cancelled() {
        let market = FakeMarketSource::new()
            .with_listings(listings(4, "Aether", vec![listing("Gilgamesh", 25, 99, false)]))
            .with_delay(Duration::from_millis(200));
        let (state, _) = state_with(market);
        let plan = RwLock::new(sword_plan());
        let cancel = CancelToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = PriceRefreshService::refresh_shared_plan(&state, &plan, "Aether", &(), &cancel)
            .await
            .unwrap();
        assert_eq!(result.status, OperationStatus::Cancelled);
        assert!(!state.is_refreshing());
        assert_eq!(plan.read().await.root_items[0].children[2].market_price, 0.0);
    }

    #[tokio::test]
    async fn test_refresh_item_bypasses_ttl() {
        let market = FakeMarketSource::new()
            .with_listings(listings(4, "Aether", vec![listing("Gilgamesh", 25, 99, false)]));
        let (state, market) = state_with(market);
        let mut plan = sword_plan();
        let cancel = CancelToken::new();

        PriceRefreshService::refresh_item(&state, &mut plan, 4, "Aether", &cancel).await.unwrap();
        let result = PriceRefreshService::refresh_item(&state, &mut plan, 4, "Aether", &cancel)
            .await
            .unwrap();

        assert_eq!(result.status, OperationStatus::Success);
        assert_eq!(result.total_count, 1);
        assert_eq!(market.bulk_calls().len(), 2);

        let missing = PriceRefreshService::refresh_item(&state, &mut plan, 999, "Aether", &cancel).await;
        assert!(matches!(missing, Err(AppError::NotFound(_))));
    }

    #[test]
    fn test_status_from_counts() {
        assert_eq!(OperationStatus::from_counts(3, 0), OperationStatus::Success);
        assert_eq!(OperationStatus::from_counts(0, 0), OperationStatus::Success);
        assert_eq!(OperationStatus::from_counts(2, 1), OperationStatus::PartialSuccess);
        assert_eq!(OperationStatus::from_counts(0, 4), OperationStatus::Failed);
    }
}
