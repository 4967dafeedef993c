//! Shopping Service
//!
//! Turns a plan's market-bought materials into per-world purchase
//! recommendations, then overlays the vendor purchases the plan asks for.

use crate::cache::{CacheKey, CachedListing};
use crate::cancel::CancelToken;
use crate::error::{AppError, Result};
use crate::models::{AcquisitionSource, CraftingPlan, MaterialAggregate, PlanNode};
use crate::progress::{ProgressReporter, ProgressStage, ProgressUpdate};
use crate::services::price_refresh_service::OperationStatus;
use crate::state::AppState;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, HashSet};
use tracing::{debug, info, warn};

/// World name used for vendor purchases
pub const VENDOR_WORLD: &str = "Vendor";

/// Objective used to pick a recommended world
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizationMode {
    #[default]
    MinimizeTotalCost,
    /// Fewest listings from a single sufficient world, cost as tie-break
    MinimizeWorlds,
    /// Home world when it has enough stock, otherwise cheapest
    PreferHomeWorld,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShoppingOptions {
    /// Recommend buying across several worlds when that is cheaper
    pub allow_split: bool,
    pub home_world: Option<String>,
}

impl Default for ShoppingOptions {
    fn default() -> Self {
        Self {
            allow_split: true,
            home_world: None,
        }
    }
}

/// Buying an item's full quantity on one world
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldOption {
    pub world_name: String,
    pub total_cost: u64,
    pub quantity_available: u32,
    pub quantity_purchased: u32,
    /// Units bought beyond the need because stacks are bought whole
    pub excess_quantity: u32,
    pub has_sufficient_stock: bool,
    pub average_unit_price: f64,
    pub listings_used: usize,
    /// Set for vendor purchases
    pub vendor_name: Option<String>,
    pub is_home_world: bool,
}

/// One world's share of a split purchase
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldSplit {
    pub world_name: String,
    pub quantity: u32,
    pub cost: u64,
}

/// Purchase recommendation for one material
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetailedShoppingPlan {
    pub item_id: u32,
    pub name: String,
    pub quantity: u32,
    pub hq_required: bool,
    /// How the plan acquires these units; an item can have one row per source
    pub source: AcquisitionSource,
    pub recommended_world: Option<WorldOption>,
    /// Every world with stock, best first
    pub world_options: Vec<WorldOption>,
    pub split: Option<Vec<WorldSplit>>,
    pub has_options: bool,
}

impl DetailedShoppingPlan {
    fn empty(item_id: u32, name: &str, quantity: u32, hq_required: bool, source: AcquisitionSource) -> Self {
        Self {
            item_id,
            name: name.to_string(),
            quantity,
            hq_required,
            source,
            recommended_world: None,
            world_options: Vec::new(),
            split: None,
            has_options: false,
        }
    }

    /// Cost of the recommended purchase (the split when one is recommended)
    pub fn planned_cost(&self) -> u64 {
        match (&self.split, &self.recommended_world) {
            (Some(split), _) => split.iter().map(|s| s.cost).sum(),
            (None, Some(world)) => world.total_cost,
            (None, None) => 0,
        }
    }
}

/// Result of a shopping optimization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShoppingResult {
    pub status: OperationStatus,
    pub plans: Vec<DetailedShoppingPlan>,
    pub total_cost: u64,
    pub items_with_options: usize,
    pub items_without_options: usize,
    pub message: String,
}

impl ShoppingResult {
    fn empty(status: OperationStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            plans: Vec::new(),
            total_cost: 0,
            items_with_options: 0,
            items_without_options: 0,
            message: message.into(),
        }
    }
}

/// Shopping service
pub struct ShoppingService;

impl ShoppingService {
    /// Recommend where to buy every market-bought material of `plan`
    #[allow(clippy::too_many_arguments)]
    pub async fn optimize(
        state: &AppState,
        plan: &CraftingPlan,
        mode: OptimizationMode,
        region: &str,
        search_all_regions: bool,
        options: &ShoppingOptions,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<ShoppingResult> {
        info!("ShoppingService::optimize - '{}' mode={:?} region={}", plan.name, mode, region);
        if plan.is_empty() {
            return Ok(ShoppingResult::empty(OperationStatus::NoPlan, "Plan has no items"));
        }

        let materials: Vec<MaterialAggregate> = plan
            .aggregated_materials()
            .into_iter()
            .filter(|m| m.source.is_market() && m.tradeable)
            .collect();

        let config = state.config();
        let mut regions = vec![region.to_string()];
        if search_all_regions {
            regions.extend(config.all_regions.iter().filter(|r| r.as_str() != region).cloned());
        }

        if !materials.is_empty() {
            let keys: Vec<CacheKey> = regions
                .iter()
                .flat_map(|r| materials.iter().map(move |m| CacheKey::new(m.item_id, r.clone())))
                .collect();
            match state
                .market_cache
                .ensure_populated(&keys, config.cache_ttl, progress, cancel)
                .await
            {
                Ok(_) => {}
                Err(AppError::Cancelled) => {
                    return Ok(ShoppingResult::empty(OperationStatus::Cancelled, "Optimization cancelled"));
                }
                Err(e) => warn!("ShoppingService::optimize - market fetch failed: {}", e),
            }
        }

        let mut plans = Vec::with_capacity(materials.len());
        for (i, material) in materials.iter().enumerate() {
            if cancel.is_cancelled() {
                return Ok(ShoppingResult::empty(OperationStatus::Cancelled, "Optimization cancelled"));
            }

            let worlds = Self::world_listings(state, material.item_id, &regions, config.cache_ttl)?;
            plans.push(Self::plan_material(material, &worlds, mode, options));

            progress.report(ProgressUpdate::new(
                ProgressStage::Optimization,
                i + 1,
                materials.len(),
                format!("Optimized {}", material.name),
            ));
        }

        Self::apply_vendor_purchase_overrides(&mut plans, plan);
        Ok(Self::summarize(plans))
    }

    /// Replace recommendations of vendor-bought items with a vendor purchase.
    ///
    /// Uses the node's selected vendor, or the cheapest gil vendor when none
    /// is selected. Vendor purchases are never split. Items without a market
    /// plan get one.
    pub fn apply_vendor_purchase_overrides(plans: &mut Vec<DetailedShoppingPlan>, plan: &CraftingPlan) {
        let mut purchases: Vec<(&PlanNode, u32)> = Vec::new();
        let mut index: HashMap<u32, usize> = HashMap::new();
        let mut market_bought: HashSet<u32> = HashSet::new();

        fn collect<'a>(
            node: &'a PlanNode,
            purchases: &mut Vec<(&'a PlanNode, u32)>,
            index: &mut HashMap<u32, usize>,
            market_bought: &mut HashSet<u32>,
        ) {
            if node.consumes_children() {
                for child in &node.children {
                    collect(child, purchases, index, market_bought);
                }
                return;
            }
            if node.source.is_market() {
                market_bought.insert(node.item_id);
            }
            if node.source != AcquisitionSource::VendorBuy {
                return;
            }
            match index.get(&node.item_id) {
                Some(&i) => purchases[i].1 += node.quantity,
                None => {
                    index.insert(node.item_id, purchases.len());
                    purchases.push((node, node.quantity));
                }
            }
        }

        for root in &plan.root_items {
            collect(root, &mut purchases, &mut index, &mut market_bought);
        }

        for (node, quantity) in purchases {
            let Some(vendor) = node.selected_vendor().filter(|v| v.is_gil_vendor() && v.price > 0) else {
                debug!("No gil vendor for {} ({}), keeping market plan", node.name, node.item_id);
                continue;
            };

            let option = WorldOption {
                world_name: VENDOR_WORLD.to_string(),
                total_cost: vendor.price as u64 * quantity as u64,
                quantity_available: quantity,
                quantity_purchased: quantity,
                excess_quantity: 0,
                has_sufficient_stock: true,
                average_unit_price: vendor.price as f64,
                listings_used: 0,
                vendor_name: Some(vendor.name.clone()),
                is_home_world: false,
            };

            // A market row for the same item belongs to other nodes unless
            // no node still buys the item on the market
            let keeps_market_row = market_bought.contains(&node.item_id);
            let existing = plans.iter().position(|p| {
                p.item_id == node.item_id && (p.source == AcquisitionSource::VendorBuy || !keeps_market_row)
            });
            let target = match existing {
                Some(i) => &mut plans[i],
                None => {
                    plans.push(DetailedShoppingPlan::empty(
                        node.item_id,
                        &node.name,
                        quantity,
                        node.hq_required,
                        AcquisitionSource::VendorBuy,
                    ));
                    let last = plans.len() - 1;
                    &mut plans[last]
                }
            };
            target.source = AcquisitionSource::VendorBuy;
            target.quantity = quantity;
            target.world_options.retain(|w| w.world_name != VENDOR_WORLD);
            target.world_options.insert(0, option.clone());
            target.recommended_world = Some(option);
            target.split = None;
            target.has_options = true;
        }
    }

    // ========================================================================
    // Private Helper Methods
    // ========================================================================

    /// Listings per world across `regions`, cheapest first
    fn world_listings(
        state: &AppState,
        item_id: u32,
        regions: &[String],
        ttl: std::time::Duration,
    ) -> Result<BTreeMap<String, Vec<CachedListing>>> {
        let mut worlds: BTreeMap<String, Vec<CachedListing>> = BTreeMap::new();
        for region in regions {
            let (data, is_stale) = state.market_cache.get_with_stale(item_id, region, ttl)?;
            let Some(data) = data else { continue };
            if is_stale {
                debug!("Using stale listings for {} in {}", item_id, region);
            }
            for (world, listings) in data.worlds {
                worlds.entry(world).or_default().extend(listings);
            }
        }
        for listings in worlds.values_mut() {
            listings.sort_by_key(|l| l.price);
        }
        Ok(worlds)
    }

    fn plan_material(
        material: &MaterialAggregate,
        worlds: &BTreeMap<String, Vec<CachedListing>>,
        mode: OptimizationMode,
        options: &ShoppingOptions,
    ) -> DetailedShoppingPlan {
        let needed = material.total_quantity;
        let hq_only = material.hq_required;
        let mut plan = DetailedShoppingPlan::empty(material.item_id, &material.name, needed, hq_only, material.source);

        let mut world_options: Vec<WorldOption> = worlds
            .iter()
            .filter_map(|(world, listings)| {
                let home = options.home_world.as_deref() == Some(world.as_str());
                world_option(world, listings, needed, hq_only, home)
            })
            .collect();
        if world_options.is_empty() {
            return plan;
        }
        world_options.sort_by(|a, b| {
            b.has_sufficient_stock
                .cmp(&a.has_sufficient_stock)
                .then(a.total_cost.cmp(&b.total_cost))
                .then(a.world_name.cmp(&b.world_name))
        });

        let recommended = select_world(&world_options, mode, needed);
        let split = if options.allow_split {
            split_purchase(worlds, needed, hq_only).filter(|split| {
                let cost: u64 = split.iter().map(|s| s.cost).sum();
                match &recommended {
                    Some(r) if r.has_sufficient_stock => {
                        mode == OptimizationMode::MinimizeTotalCost && cost < r.total_cost
                    }
                    _ => true,
                }
            })
        } else {
            None
        };

        plan.recommended_world = recommended;
        plan.world_options = world_options;
        plan.split = split;
        plan.has_options = true;
        plan
    }

    fn summarize(plans: Vec<DetailedShoppingPlan>) -> ShoppingResult {
        if plans.is_empty() {
            return ShoppingResult::empty(OperationStatus::NoPlan, "No market materials to buy");
        }

        let with_options = plans.iter().filter(|p| p.has_options).count();
        let without_options = plans.len() - with_options;
        let total_cost = plans.iter().map(DetailedShoppingPlan::planned_cost).sum();
        let status = OperationStatus::from_counts(with_options, without_options);
        let message = match status {
            OperationStatus::Success => format!("Found purchase options for {} item(s)", with_options),
            OperationStatus::PartialSuccess => format!(
                "Found purchase options for {} of {} item(s)",
                with_options,
                plans.len()
            ),
            _ => "No listings found for any item".to_string(),
        };
        info!("ShoppingService - {} (total {} gil)", message, total_cost);

        ShoppingResult {
            status,
            plans,
            total_cost,
            items_with_options: with_options,
            items_without_options: without_options,
            message,
        }
    }
}

/// Whole-stack purchase on one world, cheapest listings first
fn world_option(world: &str, listings: &[CachedListing], needed: u32, hq_only: bool, home: bool) -> Option<WorldOption> {
    let usable: Vec<&CachedListing> = listings.iter().filter(|l| !hq_only || l.hq).collect();
    if usable.is_empty() {
        return None;
    }

    let available: u32 = usable.iter().map(|l| l.quantity).sum();
    let (mut purchased, mut cost, mut used) = (0u32, 0u64, 0usize);
    for listing in usable {
        if purchased >= needed {
            break;
        }
        purchased += listing.quantity;
        cost += listing.price as u64 * listing.quantity as u64;
        used += 1;
    }

    Some(WorldOption {
        world_name: world.to_string(),
        total_cost: cost,
        quantity_available: available,
        quantity_purchased: purchased,
        excess_quantity: purchased.saturating_sub(needed),
        has_sufficient_stock: available >= needed,
        average_unit_price: if purchased > 0 { cost as f64 / purchased as f64 } else { 0.0 },
        listings_used: used,
        vendor_name: None,
        is_home_world: home,
    })
}

/// `options` must be sorted sufficient-first, then by cost
fn select_world(options: &[WorldOption], mode: OptimizationMode, needed: u32) -> Option<WorldOption> {
    let sufficient = || options.iter().filter(|o| o.has_sufficient_stock);
    let chosen = match mode {
        OptimizationMode::MinimizeTotalCost => sufficient().next(),
        OptimizationMode::MinimizeWorlds => sufficient().min_by_key(|o| (o.listings_used, o.total_cost)),
        OptimizationMode::PreferHomeWorld => sufficient()
            .find(|o| o.is_home_world)
            .or_else(|| sufficient().next()),
    };

    // Nowhere has enough: the world covering the most of the need
    chosen
        .or_else(|| {
            options
                .iter()
                .max_by_key(|o| (o.quantity_available.min(needed), std::cmp::Reverse(o.total_cost)))
        })
        .cloned()
}

/// Cheapest stacks across every world until the need is covered
fn split_purchase(
    worlds: &BTreeMap<String, Vec<CachedListing>>,
    needed: u32,
    hq_only: bool,
) -> Option<Vec<WorldSplit>> {
    let mut all: Vec<(&str, &CachedListing)> = worlds
        .iter()
        .flat_map(|(world, listings)| listings.iter().map(move |l| (world.as_str(), l)))
        .filter(|(_, l)| !hq_only || l.hq)
        .collect();
    all.sort_by(|a, b| a.1.price.cmp(&b.1.price).then(a.0.cmp(b.0)));

    let mut split: Vec<WorldSplit> = Vec::new();
    let mut purchased = 0u32;
    for (world, listing) in all {
        if purchased >= needed {
            break;
        }
        purchased += listing.quantity;
        let cost = listing.price as u64 * listing.quantity as u64;
        match split.iter_mut().find(|s| s.world_name == world) {
            Some(share) => {
                share.quantity += listing.quantity;
                share.cost += cost;
            }
            None => split.push(WorldSplit {
                world_name: world.to_string(),
                quantity: listing.quantity,
                cost,
            }),
        }
    }

    (split.len() > 1).then_some(split)
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

    fn plan_of(nodes: Vec<PlanNode>) -> CraftingPlan {
        let mut plan = CraftingPlan::new("Shopping", "Aether", None);
        plan.root_items = nodes;
        plan
    }

    fn vendor_node(item_id: u32, quantity: u32, prices: &[u32], selected: Option<usize>) -> PlanNode {
        let mut node = PlanNode::new(item_id, "Thread", quantity);
        node.source = AcquisitionSource::VendorBuy;
        node.vendor_options = prices
            .iter()
            .enumerate()
            .map(|(i, p)| VendorInfo::gil(format!("Merchant {}", i), "Limsa Lominsa", *p))
            .collect();
        node.selected_vendor_index = selected;
        node
    }

    fn ore_market() -> FakeMarketSource {
        FakeMarketSource::new().with_listings(listings(
            5,
            "Aether",
            vec![
                listing("Gilgamesh", 10, 5, false),
                listing("Gilgamesh", 12, 5, false),
                listing("Jenova", 8, 4, false),
                listing("Jenova", 30, 10, false),
                listing("Sargatanas", 9, 3, true),
            ],
        ))
    }

    async fn optimize(
        state: &AppState,
        plan: &CraftingPlan,
        mode: OptimizationMode,
        options: &ShoppingOptions,
    ) -> ShoppingResult {
        ShoppingService::optimize(state, plan, mode, "Aether", false, options, &(), &CancelToken::new())
            .await
            .unwrap()
    }

    #[test]
    fn test_vendor_override_uses_selected_vendor() {
        let plan = plan_of(vec![vendor_node(3, 20, &[25, 18], Some(1))]);
        let mut plans = vec![DetailedShoppingPlan {
            split: Some(vec![]),
            has_options: true,
            ..DetailedShoppingPlan::empty(3, "Thread", 20, false, AcquisitionSource::MarketBuyNq)
        }];

        ShoppingService::apply_vendor_purchase_overrides(&mut plans, &plan);

        assert_eq!(plans.len(), 1);
        let world = plans[0].recommended_world.as_ref().unwrap();
        assert_eq!(world.world_name, "Vendor");
        assert_eq!(plans[0].source, AcquisitionSource::VendorBuy);
        assert_eq!(world.total_cost, 360);
        assert_eq!(world.vendor_name.as_deref(), Some("Merchant 1"));
        assert!(plans[0].split.is_none());
    }

    #[test]
    fn test_vendor_override_falls_back_to_cheapest_gil_vendor() {
        let plan = plan_of(vec![vendor_node(3, 20, &[25, 12], None)]);
        let mut plans = Vec::new();

        ShoppingService::apply_vendor_purchase_overrides(&mut plans, &plan);

        let world = plans[0].recommended_world.as_ref().unwrap();
        assert_eq!(world.average_unit_price, 12.0);
        assert_eq!(world.total_cost, 240);
        assert!(plans[0].has_options);
    }

    #[tokio::test]
    async fn test_vendor_and_market_units_of_one_item_stay_separate() {
        let (state, _) = state_with(ore_market());
        let mut vendor = vendor_node(5, 4, &[7], None);
        vendor.name = "Ore".to_string();
        let plan = plan_of(vec![PlanNode::new(5, "Ore", 10), vendor]);

        let result = optimize(&state, &plan, OptimizationMode::MinimizeTotalCost, &ShoppingOptions::default()).await;

        assert_eq!(result.plans.len(), 2);
        let market = result.plans.iter().find(|p| p.source.is_market()).unwrap();
        assert_eq!(market.quantity, 10);
        assert_ne!(market.recommended_world.as_ref().unwrap().world_name, VENDOR_WORLD);

        let vendor = result.plans.iter().find(|p| p.source == AcquisitionSource::VendorBuy).unwrap();
        assert_eq!(vendor.quantity, 4);
        assert_eq!(vendor.planned_cost(), 28);
    }

    #[tokio::test]
    async fn test_minimize_cost_picks_cheapest_sufficient_world() {
        let (state, _) = state_with(ore_market());
        let plan = plan_of(vec![PlanNode::new(5, "Ore", 10)]);
        let no_split = ShoppingOptions {
            allow_split: false,
            home_world: None,
        };

        let result = optimize(&state, &plan, OptimizationMode::MinimizeTotalCost, &no_split).await;

        assert_eq!(result.status, OperationStatus::Success);
        let item = &result.plans[0];
        let world = item.recommended_world.as_ref().unwrap();
        assert_eq!(world.world_name, "Gilgamesh");
        assert_eq!(world.total_cost, 110);
        assert_eq!(world.listings_used, 2);
        assert!(item.split.is_none());
        assert_eq!(item.world_options.len(), 3);
        assert!(!item.world_options[2].has_sufficient_stock);
        assert_eq!(result.total_cost, 110);
    }

    #[tokio::test]
    async fn test_split_recommended_when_cheaper() {
        let (state, _) = state_with(ore_market());
        let plan = plan_of(vec![PlanNode::new(5, "Ore", 10)]);

        let result = optimize(&state, &plan, OptimizationMode::MinimizeTotalCost, &ShoppingOptions::default()).await;

        // 4 @ 8 on Jenova, 3 @ 9 on Sargatanas, 5 @ 10 on Gilgamesh
        let split = result.plans[0].split.as_ref().unwrap();
        let worlds: Vec<&str> = split.iter().map(|s| s.world_name.as_str()).collect();
        assert_eq!(worlds, vec!["Jenova", "Sargatanas", "Gilgamesh"]);
        assert_eq!(result.total_cost, 109);
    }

    #[tokio::test]
    async fn test_prefer_home_world_and_hq_filter() {
        let (state, _) = state_with(ore_market());
        let options = ShoppingOptions {
            allow_split: false,
            home_world: Some("Jenova".to_string()),
        };
        let plan = plan_of(vec![PlanNode::new(5, "Ore", 10)]);
        let result = optimize(&state, &plan, OptimizationMode::PreferHomeWorld, &options).await;
        let world = result.plans[0].recommended_world.as_ref().unwrap();
        assert_eq!(world.world_name, "Jenova");
        assert_eq!(world.total_cost, 332);
        assert!(world.is_home_world);

        let mut hq = PlanNode::new(5, "Ore", 2);
        hq.hq_required = true;
        let result = optimize(&state, &plan_of(vec![hq]), OptimizationMode::MinimizeTotalCost, &options).await;
        let item = &result.plans[0];
        assert_eq!(item.world_options.len(), 1);
        assert_eq!(item.recommended_world.as_ref().unwrap().world_name, "Sargatanas");
        assert_eq!(item.recommended_world.as_ref().unwrap().excess_quantity, 1);
    }

    #[tokio::test]
    async fn test_insufficient_stock_everywhere() {
        let (state, _) = state_with(ore_market());
        let plan = plan_of(vec![PlanNode::new(5, "Ore", 50)]);
        let options = ShoppingOptions {
            allow_split: false,
            home_world: None,
        };

        let result = optimize(&state, &plan, OptimizationMode::MinimizeTotalCost, &options).await;

        let world = result.plans[0].recommended_world.as_ref().unwrap();
        assert!(!world.has_sufficient_stock);
        assert_eq!(world.world_name, "Jenova");
        assert_eq!(world.quantity_available, 14);
        assert_eq!(result.status, OperationStatus::Success);
    }

    #[tokio::test]
    async fn test_statuses_and_skipped_materials() {
        let (state, market) = state_with(ore_market());
        let options = ShoppingOptions::default();

        let empty = optimize(&state, &plan_of(vec![]), OptimizationMode::MinimizeTotalCost, &options).await;
        assert_eq!(empty.status, OperationStatus::NoPlan);
        assert!(market.bulk_calls().is_empty());

        let mut untradeable = PlanNode::new(7, "Bound Shard", 3);
        untradeable.tradeable = false;
        let plan = plan_of(vec![
            PlanNode::new(5, "Ore", 2),
            PlanNode::new(6, "Unlisted Sand", 1),
            untradeable,
            vendor_node(3, 4, &[10], None),
        ]);

        let result = optimize(&state, &plan, OptimizationMode::MinimizeTotalCost, &options).await;
        assert_eq!(result.status, OperationStatus::PartialSuccess);
        assert_eq!(result.items_with_options, 2);
        assert_eq!(result.items_without_options, 1);
        assert_eq!(market.bulk_calls(), vec![("Aether".to_string(), vec![5, 6])]);

        let none = optimize(
            &state,
            &plan_of(vec![PlanNode::new(6, "Unlisted Sand", 1)]),
            OptimizationMode::MinimizeTotalCost,
            &options,
        )
        .await;
        assert_eq!(none.status, OperationStatus::Failed);
    }

    #[tokio::test]
    async fn test_cancelled_before_fetch() {
        let (state, market) = state_with(ore_market());
        let cancel = CancelToken::new();
        cancel.cancel();

        let result = ShoppingService::optimize(
            &state,
            &plan_of(vec![PlanNode::new(5, "Ore", 2)]),
            OptimizationMode::MinimizeTotalCost,
            "Aether",
            false,
            &ShoppingOptions::default(),
            &(),
            &cancel,
        )
        .await
        .unwrap();

        assert_eq!(result.status, OperationStatus::Cancelled);
        assert!(market.bulk_calls().is_empty());
    }
}
