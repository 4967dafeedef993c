//! Recipe Tree Service
//!
//! Resolves target items into a full ingredient tree in three phases:
//!
//! 1. Discovery walks the recipe graph breadth-first, one level at a time,
//!    deduplicating item ids globally.
//! 2. Each level is fetched in small batches with bounded concurrency. A
//!    batch retries only the ids it is still missing, with exponential
//!    backoff, inside a wall-clock budget. A level that cannot complete
//!    fails the whole build.
//! 3. Assembly materializes [`PlanNode`]s depth-first from the fetched
//!    data without touching the network.

use crate::cancel::CancelToken;
use crate::config::{PlannerConfig, RetryPolicy, SourceHeuristics};
use crate::error::{AppError, Result};
use crate::models::{craft_count, AcquisitionSource, CraftingPlan, PlanNode, RecipeInfo};
use crate::progress::{ProgressReporter, ProgressStage, ProgressUpdate};
use crate::sources::types::{Ingredient, ItemBatch, ItemRecord};
use crate::sources::ItemSource;
use crate::state::AppState;
use futures_util::stream::{self, StreamExt};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

const COMPANY_WORKSHOP_JOB: &str = "Company Workshop";

/// One requested output of a build
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildTarget {
    pub item_id: u32,
    pub name: String,
    pub quantity: u32,
    #[serde(default)]
    pub hq_required: bool,
}

impl BuildTarget {
    pub fn new(item_id: u32, name: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id,
            name: name.into(),
            quantity,
            hq_required: false,
        }
    }
}

/// Item data fetched for a single build
#[derive(Debug, Clone, Default)]
pub struct ItemCache {
    items: HashMap<u32, ItemRecord>,
    not_found: HashSet<u32>,
}

impl ItemCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, record: ItemRecord) {
        self.not_found.remove(&record.id);
        self.items.insert(record.id, record);
    }

    pub fn mark_not_found(&mut self, item_id: u32) {
        if !self.items.contains_key(&item_id) {
            self.not_found.insert(item_id);
        }
    }

    pub fn get(&self, item_id: u32) -> Option<&ItemRecord> {
        self.items.get(&item_id)
    }

    pub fn contains(&self, item_id: u32) -> bool {
        self.items.contains_key(&item_id) || self.not_found.contains(&item_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    fn absorb(&mut self, batch: ItemBatch) {
        for id in batch.not_found {
            self.mark_not_found(id);
        }
        for (_, record) in batch.items {
            self.insert(record);
        }
    }
}

/// Ids a batch could not obtain within its retry budget
struct BatchOutcome {
    batch: ItemBatch,
    missing: Vec<u32>,
}

/// Recipe tree service
pub struct RecipeTreeService;

impl RecipeTreeService {
    /// Build a crafting plan for `targets` in `region`.
    ///
    /// Items that cannot be resolved become degraded buy nodes; only a
    /// discovery level that exhausts its retry budget fails the build.
    pub async fn build_plan(
        state: &AppState,
        targets: Vec<BuildTarget>,
        region: &str,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<CraftingPlan> {
        info!(
            "RecipeTreeService::build_plan - {} target(s) in {}",
            targets.len(),
            region
        );
        if let Some(t) = targets.iter().find(|t| t.quantity == 0) {
            return Err(AppError::Validation(format!(
                "Quantity for {} must be at least 1",
                t.name
            )));
        }

        let config = state.config();
        let started = Instant::now();

        let cache = Self::discover(state.item_source.as_ref(), &targets, &config, progress, cancel).await?;
        cancel.check()?;

        let roots = Self::assemble(&cache, &targets, &config);
        progress.report(ProgressUpdate::new(
            ProgressStage::Assembly,
            roots.len(),
            targets.len(),
            "Tree assembled",
        ));

        let name = match targets.as_slice() {
            [only] => only.name.clone(),
            many => format!("{} items", many.len()),
        };
        let mut plan = CraftingPlan::new(name, region, config.home_world.clone());
        plan.root_items = roots;

        info!(
            "RecipeTreeService::build_plan - {} nodes from {} items in {:.1}s",
            plan.node_count(),
            cache.len(),
            started.elapsed().as_secs_f64()
        );
        Ok(plan)
    }

    /// Rebuild a plan's tree from the item source, keeping its identity
    pub async fn rebuild_plan(
        state: &AppState,
        plan: &CraftingPlan,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<CraftingPlan> {
        let targets = plan
            .root_items
            .iter()
            .map(|root| BuildTarget {
                item_id: root.item_id,
                name: root.name.clone(),
                quantity: root.quantity,
                hq_required: root.hq_required,
            })
            .collect();

        let mut rebuilt = Self::build_plan(state, targets, &plan.data_center, progress, cancel).await?;
        rebuilt.id = plan.id.clone();
        rebuilt.name = plan.name.clone();
        rebuilt.created_at = plan.created_at;
        rebuilt.world = plan.world.clone();
        Ok(rebuilt)
    }

    // ========================================================================
    // Discovery
    // ========================================================================

    /// Breadth-first discovery of every item reachable from `targets`
    pub async fn discover(
        source: &dyn ItemSource,
        targets: &[BuildTarget],
        config: &PlannerConfig,
        progress: &dyn ProgressReporter,
        cancel: &CancelToken,
    ) -> Result<ItemCache> {
        let mut cache = ItemCache::new();
        // Aggregated demand per item; first occurrence fixes the level
        let mut demand: HashMap<u32, u64> = HashMap::new();
        let mut frontier: Vec<u32> = Vec::new();

        for target in targets {
            match demand.entry(target.item_id) {
                Entry::Occupied(mut e) => *e.get_mut() += target.quantity as u64,
                Entry::Vacant(e) => {
                    e.insert(target.quantity as u64);
                    frontier.push(target.item_id);
                }
            }
        }

        let mut depth = 0;
        while !frontier.is_empty() {
            cancel.check()?;
            debug!(
                "RecipeTreeService::discover - level {}: {} item(s)",
                depth,
                frontier.len()
            );

            let batch = Self::fetch_level(source, &frontier, depth, &config.retry, cancel).await?;
            cache.absorb(batch);

            let mut next = Vec::new();
            if depth < config.max_depth {
                for id in &frontier {
                    let Some(record) = cache.get(*id) else {
                        continue;
                    };
                    let needed = demand.get(id).copied().unwrap_or(0).min(u32::MAX as u64) as u32;
                    let executions = recipe_executions(record, needed);

                    for line in ingredient_lines(record) {
                        let amount = line.amount as u64 * executions as u64;
                        match demand.entry(line.item_id) {
                            Entry::Occupied(mut e) => *e.get_mut() += amount,
                            Entry::Vacant(e) => {
                                e.insert(amount);
                                next.push(line.item_id);
                            }
                        }
                    }
                }
            }

            progress.report(ProgressUpdate::new(
                ProgressStage::Discovery,
                cache.len(),
                cache.len() + next.len(),
                format!("Level {}: {} item(s) fetched", depth, frontier.len()),
            ));

            frontier = next;
            depth += 1;
        }

        info!(
            "RecipeTreeService::discover - {} item(s) over {} level(s), {} not found",
            cache.len(),
            depth,
            cache.not_found.len()
        );
        Ok(cache)
    }

    /// Fetch one discovery level in bounded-concurrency batches
    async fn fetch_level(
        source: &dyn ItemSource,
        ids: &[u32],
        level: usize,
        policy: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<ItemBatch> {
        let started = Instant::now();

        let outcomes: Vec<Result<BatchOutcome>> = stream::iter(ids.chunks(policy.batch_size.max(1)))
            .map(|chunk| Self::fetch_batch(source, chunk.to_vec(), policy, cancel))
            .buffer_unordered(policy.concurrency.max(1))
            .collect()
            .await;

        let mut merged = ItemBatch::default();
        let mut missing = Vec::new();
        for outcome in outcomes {
            let outcome = outcome?;
            merged.items.extend(outcome.batch.items);
            merged.not_found.extend(outcome.batch.not_found);
            missing.extend(outcome.missing);
        }

        if !missing.is_empty() {
            missing.sort_unstable();
            let elapsed = started.elapsed();
            error!(
                "RecipeTreeService::fetch_level - level {} incomplete after {:.1}s, missing {:?}",
                level,
                elapsed.as_secs_f64(),
                missing
            );
            return Err(AppError::LevelFetch {
                level,
                missing_ids: missing,
                elapsed,
            });
        }

        Ok(merged)
    }

    /// Fetch one batch, retrying only ids that are still missing
    async fn fetch_batch(
        source: &dyn ItemSource,
        ids: Vec<u32>,
        policy: &RetryPolicy,
        cancel: &CancelToken,
    ) -> Result<BatchOutcome> {
        let mut pending = ids;
        let mut collected = ItemBatch::default();
        let max_attempts = policy.max_attempts.max(1);

        let attempts = async {
            for attempt in 1..=max_attempts {
                match cancel.run(source.get_items(&pending, true)).await {
                    Ok(batch) => {
                        collected.items.extend(batch.items);
                        collected.not_found.extend(batch.not_found);
                    }
                    Err(AppError::Cancelled) => return Err(AppError::Cancelled),
                    Err(e) => warn!(
                        "RecipeTreeService::fetch_batch - attempt {} for {:?} failed: {}",
                        attempt, pending, e
                    ),
                }

                pending.retain(|id| {
                    !collected.items.contains_key(id) && !collected.not_found.contains(id)
                });
                if pending.is_empty() || attempt == max_attempts {
                    break;
                }

                let delay = with_jitter(policy.delay_for(attempt));
                debug!(
                    "RecipeTreeService::fetch_batch - retrying {:?} in {:?}",
                    pending, delay
                );
                cancel
                    .run(async {
                        tokio::time::sleep(delay).await;
                        Ok(())
                    })
                    .await?;
            }
            Ok::<(), AppError>(())
        };

        match tokio::time::timeout(policy.batch_timeout, attempts).await {
            Ok(result) => result?,
            Err(_) => warn!(
                "RecipeTreeService::fetch_batch - timed out after {:?} with {:?} missing",
                policy.batch_timeout, pending
            ),
        }

        Ok(BatchOutcome {
            batch: collected,
            missing: pending,
        })
    }

    // ========================================================================
    // Assembly
    // ========================================================================

    /// Materialize root nodes from fetched item data (no network)
    pub fn assemble(cache: &ItemCache, targets: &[BuildTarget], config: &PlannerConfig) -> Vec<PlanNode> {
        let mut assembler = Assembler {
            cache,
            heuristics: &config.heuristics,
            max_depth: config.max_depth,
            templates: HashMap::new(),
            ancestors: HashSet::new(),
        };

        targets
            .iter()
            .map(|t| assembler.build(t.item_id, &t.name, t.quantity, 1, t.hq_required, 0))
            .collect()
    }
}

/// Depth-first node builder over an [`ItemCache`]
struct Assembler<'a> {
    cache: &'a ItemCache,
    heuristics: &'a SourceHeuristics,
    max_depth: usize,
    /// Recipe-derived fields per item, shared by every occurrence
    templates: HashMap<u32, PlanNode>,
    /// Item ids on the path from the current root
    ancestors: HashSet<u32>,
}

impl Assembler<'_> {
    fn build(
        &mut self,
        item_id: u32,
        name_hint: &str,
        quantity: u32,
        amount_per_craft: u32,
        hq_required: bool,
        depth: usize,
    ) -> PlanNode {
        let mut node = self.template(item_id, name_hint).clone();
        node.quantity = quantity;
        node.amount_per_craft = amount_per_craft;
        node.hq_required = hq_required;

        let cache = self.cache;
        let Some(record) = cache.get(item_id) else {
            return node;
        };

        if self.ancestors.contains(&item_id) {
            debug!("Circular reference to {} ({})", record.name, item_id);
            node.is_circular = true;
            node.can_craft = false;
            node.source = leaf_source(record, hq_required);
            return node;
        }
        if depth >= self.max_depth || !record.is_craftable() {
            node.source = leaf_source(record, hq_required);
            return node;
        }

        node.source = if depth == 0 {
            AcquisitionSource::Craft
        } else {
            intermediate_source(record, self.heuristics)
        };

        let executions = recipe_executions(record, quantity);
        self.ancestors.insert(item_id);
        node.children = ingredient_lines(record)
            .into_iter()
            .map(|line| {
                self.build(
                    line.item_id,
                    "",
                    line.amount.saturating_mul(executions),
                    line.amount,
                    false,
                    depth + 1,
                )
            })
            .collect();
        self.ancestors.remove(&item_id);

        node
    }

    fn template(&mut self, item_id: u32, name_hint: &str) -> &PlanNode {
        let cache = self.cache;
        self.templates.entry(item_id).or_insert_with(|| match cache.get(item_id) {
            Some(record) => node_template(record),
            None => degraded_template(item_id, name_hint),
        })
    }
}

/// Node with every recipe-derived field set and no branch-specific state
fn node_template(record: &ItemRecord) -> PlanNode {
    let mut node = PlanNode::new(record.id, record.name.clone(), 0);
    node.icon_id = record.icon_id;
    node.tradeable = record.tradeable;
    node.can_be_hq = record.can_be_hq;
    node.can_craft = record.is_craftable();
    node.recipe = if record.is_company_craft() {
        Some(RecipeInfo {
            recipe_id: 0,
            job: COMPANY_WORKSHOP_JOB.to_string(),
            recipe_level: 0,
            yield_count: 1,
            is_company_craft: true,
        })
    } else {
        record.primary_recipe().map(|r| RecipeInfo {
            recipe_id: r.recipe_id,
            job: r.job.clone(),
            recipe_level: r.recipe_level,
            yield_count: r.yield_count.max(1),
            is_company_craft: false,
        })
    };
    node.vendor_options = record.vendors.clone();
    node.vendor_price = record.gil_vendor_price().unwrap_or(0);
    node.source = leaf_source(record, false);
    node
}

/// Buy-only node for an item the source could not resolve
fn degraded_template(item_id: u32, name_hint: &str) -> PlanNode {
    let name = if name_hint.is_empty() {
        format!("Item #{}", item_id)
    } else {
        name_hint.to_string()
    };
    let mut node = PlanNode::new(item_id, name, 0);
    node.can_craft = false;
    node.source = AcquisitionSource::MarketBuyNq;
    node.error = Some("item data unavailable".to_string());
    node
}

/// Default source for an item that will not be crafted
fn leaf_source(record: &ItemRecord, hq_required: bool) -> AcquisitionSource {
    if record.gil_vendor_price().is_some() {
        AcquisitionSource::VendorBuy
    } else if !record.vendors.is_empty() {
        AcquisitionSource::VendorSpecialCurrency
    } else if hq_required && record.can_be_hq {
        AcquisitionSource::MarketBuyHq
    } else {
        AcquisitionSource::MarketBuyNq
    }
}

/// Default source for a craftable non-root item
fn intermediate_source(record: &ItemRecord, heuristics: &SourceHeuristics) -> AcquisitionSource {
    if record.gil_vendor_price().is_some() {
        return AcquisitionSource::VendorBuy;
    }
    if let Some(recipe) = record.primary_recipe().filter(|_| !record.is_company_craft()) {
        if recipe.recipe_level < heuristics.low_level_threshold
            && recipe.ingredients.len() > heuristics.many_ingredient_threshold
        {
            return AcquisitionSource::MarketBuyNq;
        }
    }
    AcquisitionSource::Craft
}

/// Recipe executions for `quantity` units; company crafts always yield 1
fn recipe_executions(record: &ItemRecord, quantity: u32) -> u32 {
    if record.is_company_craft() {
        quantity
    } else {
        let yield_count = record.primary_recipe().map(|r| r.yield_count).unwrap_or(1);
        craft_count(quantity, yield_count)
    }
}

/// Ingredient lines of the planned recipe; company phases are flattened
/// and repeated items merged in first-seen order
fn ingredient_lines(record: &ItemRecord) -> Vec<Ingredient> {
    if !record.is_company_craft() {
        return record
            .primary_recipe()
            .map(|r| r.ingredients.clone())
            .unwrap_or_default();
    }

    let mut lines: Vec<Ingredient> = Vec::new();
    for item in record.company_craft_phases.iter().flat_map(|p| p.items.iter()) {
        match lines.iter_mut().find(|l| l.item_id == item.item_id) {
            Some(line) => line.amount += item.amount,
            None => lines.push(*item),
        }
    }
    lines
}

fn with_jitter(delay: Duration) -> Duration {
    let max_jitter = (delay.as_millis() as u64 / 4).max(1);
    delay + Duration::from_millis(rand::thread_rng().gen_range(0..=max_jitter))
}
