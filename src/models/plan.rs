//! Crafting plan tree
//!
//! A [`CraftingPlan`] owns its root [`PlanNode`]s and every node owns its
//! children. There are no parent back-references: code that needs to find
//! its way back up walks from a root using a [`NodePath`] (child indices).

use crate::error::{AppError, Result};
use crate::models::vendor::{cheapest_gil_vendor, VendorInfo};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Index path from a root: `[root_index, child_index, ...]`
pub type NodePath = [usize];

/// How an item in the plan is obtained
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AcquisitionSource {
    Craft,
    MarketBuyNq,
    MarketBuyHq,
    VendorBuy,
    VendorSpecialCurrency,
}

impl AcquisitionSource {
    pub fn is_craft(self) -> bool {
        self == AcquisitionSource::Craft
    }

    pub fn is_market(self) -> bool {
        matches!(self, AcquisitionSource::MarketBuyNq | AcquisitionSource::MarketBuyHq)
    }

    pub fn is_vendor(self) -> bool {
        matches!(
            self,
            AcquisitionSource::VendorBuy | AcquisitionSource::VendorSpecialCurrency
        )
    }
}

/// Where a node's market price came from
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceSource {
    #[default]
    Unknown,
    Vendor,
    Market,
    Cached,
}

/// Recipe-derived metadata of a craftable node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeInfo {
    pub recipe_id: u32,
    pub job: String,
    pub recipe_level: u32,
    pub yield_count: u32,
    /// Company workshop craft (phases flattened into children, always yields 1)
    #[serde(default)]
    pub is_company_craft: bool,
}

/// One node of the ingredient tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanNode {
    pub item_id: u32,
    pub name: String,
    pub icon_id: u32,
    /// Units needed for this branch
    pub quantity: u32,
    /// Units consumed by one execution of the parent recipe (roots: 1)
    pub amount_per_craft: u32,
    pub source: AcquisitionSource,
    pub can_craft: bool,
    pub can_be_hq: bool,
    pub hq_required: bool,
    pub tradeable: bool,
    pub recipe: Option<RecipeInfo>,
    pub market_price: f64,
    pub hq_market_price: f64,
    pub price_source: PriceSource,
    /// Cheapest gil vendor price, 0 when not sold for gil
    pub vendor_price: u32,
    pub vendor_options: Vec<VendorInfo>,
    /// Explicit vendor choice; `None` means cheapest gil vendor
    pub selected_vendor_index: Option<usize>,
    /// Item already appears among its own ancestors
    pub is_circular: bool,
    /// Resolution problem shown next to the item name
    pub error: Option<String>,
    pub children: Vec<PlanNode>,
}

impl PlanNode {
    /// Bare node with no recipe, vendor or price data
    pub fn new(item_id: u32, name: impl Into<String>, quantity: u32) -> Self {
        Self {
            item_id,
            name: name.into(),
            icon_id: 0,
            quantity,
            amount_per_craft: 1,
            source: AcquisitionSource::MarketBuyNq,
            can_craft: false,
            can_be_hq: false,
            hq_required: false,
            tradeable: true,
            recipe: None,
            market_price: 0.0,
            hq_market_price: 0.0,
            price_source: PriceSource::Unknown,
            vendor_price: 0,
            vendor_options: Vec::new(),
            selected_vendor_index: None,
            is_circular: false,
            error: None,
            children: Vec::new(),
        }
    }

    /// Units produced per recipe execution
    pub fn yield_count(&self) -> u32 {
        match &self.recipe {
            Some(r) if !r.is_company_craft => r.yield_count.max(1),
            _ => 1,
        }
    }

    /// Recipe executions needed: `ceil(quantity / yield)`
    pub fn craft_count(&self) -> u32 {
        craft_count(self.quantity, self.yield_count())
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }

    /// Whether the children are part of this node's cost
    pub fn consumes_children(&self) -> bool {
        self.source.is_craft() && !self.children.is_empty()
    }

    pub fn display_name(&self) -> String {
        match &self.error {
            Some(err) => format!("{} [{}]", self.name, err),
            None => self.name.clone(),
        }
    }

    /// Vendor that would be used for a vendor purchase
    pub fn selected_vendor(&self) -> Option<&VendorInfo> {
        self.selected_vendor_index
            .and_then(|i| self.vendor_options.get(i))
            .or_else(|| cheapest_gil_vendor(&self.vendor_options).map(|(_, v)| v))
    }

    /// Write market prices; the HQ price only lands on HQ-eligible nodes
    pub fn set_market_prices(&mut self, nq_price: f64, hq_price: Option<f64>, source: PriceSource) {
        self.market_price = nq_price;
        if self.can_be_hq {
            if let Some(hq) = hq_price {
                self.hq_market_price = hq;
            }
        }
        self.price_source = source;
    }

    /// Per-unit cost of this node under its current acquisition source
    pub fn unit_cost(&self) -> f64 {
        match self.source {
            AcquisitionSource::Craft if self.children.is_empty() => self.market_price,
            AcquisitionSource::Craft => calculate_node_craft_cost(self),
            AcquisitionSource::MarketBuyNq => self.market_price,
            AcquisitionSource::MarketBuyHq => {
                if self.hq_market_price > 0.0 {
                    self.hq_market_price
                } else {
                    self.market_price
                }
            }
            AcquisitionSource::VendorBuy => self
                .selected_vendor()
                .filter(|v| v.is_gil_vendor())
                .map(|v| v.price as f64)
                .unwrap_or(self.vendor_price as f64),
            AcquisitionSource::VendorSpecialCurrency => 0.0,
        }
    }

    /// Total gil spent on this node's quantity under its current source.
    ///
    /// Crafted nodes pay for whole recipe executions, so leftover units
    /// from a yield above one are included.
    pub fn cost_by_source(&self) -> f64 {
        if self.consumes_children() {
            calculate_node_craft_cost(self) * self.craft_count() as f64 * self.yield_count() as f64
        } else {
            self.unit_cost() * self.quantity as f64
        }
    }

    /// Recompute descendant quantities after this node's quantity changed
    pub fn rescale(&mut self, quantity: u32) {
        self.quantity = quantity;
        let executions = match &self.recipe {
            Some(r) if r.is_company_craft => quantity,
            _ => self.craft_count(),
        };
        for child in &mut self.children {
            child.rescale(child.amount_per_craft.saturating_mul(executions));
        }
    }

    /// Depth-first visit of this node and all descendants
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a PlanNode)) {
        f(self);
        for child in &self.children {
            child.visit(f);
        }
    }

    /// Depth-first mutable visit of this node and all descendants
    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut PlanNode)) {
        f(self);
        for child in &mut self.children {
            child.visit_mut(f);
        }
    }

    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(PlanNode::node_count).sum::<usize>()
    }
}

/// `ceil(quantity / yield)`, with a zero yield treated as one
pub fn craft_count(quantity: u32, yield_count: u32) -> u32 {
    quantity.div_ceil(yield_count.max(1))
}

/// Cost per produced unit of a crafted node.
///
/// Sums each child's per-craft cost by source (market price for buy nodes,
/// vendor price for vendor nodes, recursive rollup for craft nodes) and
/// divides by the recipe yield so multi-unit recipes amortize ingredients.
pub fn calculate_node_craft_cost(node: &PlanNode) -> f64 {
    let per_craft: f64 = node
        .children
        .iter()
        .map(|child| child.unit_cost() * child.amount_per_craft as f64)
        .sum();
    per_craft / node.yield_count() as f64
}

/// One row of the flattened shopping list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaterialAggregate {
    pub item_id: u32,
    pub name: String,
    pub icon_id: u32,
    pub total_quantity: u32,
    pub unit_price: f64,
    pub total_cost: f64,
    pub source: AcquisitionSource,
    pub hq_required: bool,
    pub tradeable: bool,
}

/// Craft step summary (all crafted occurrences of one item)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CraftAggregate {
    pub item_id: u32,
    pub name: String,
    pub job: String,
    pub recipe_level: u32,
    pub total_quantity: u32,
    pub craft_count: u32,
}

/// A crafting plan: root items plus identity and region context
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CraftingPlan {
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub data_center: String,
    pub world: Option<String>,
    pub root_items: Vec<PlanNode>,
}

impl CraftingPlan {
    pub fn new(name: impl Into<String>, data_center: impl Into<String>, world: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            name: name.into(),
            created_at: now,
            modified_at: now,
            data_center: data_center.into(),
            world,
            root_items: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root_items.is_empty()
    }

    pub fn touch(&mut self) {
        self.modified_at = Utc::now();
    }

    pub fn node_count(&self) -> usize {
        self.root_items.iter().map(PlanNode::node_count).sum()
    }

    pub fn node(&self, path: &NodePath) -> Option<&PlanNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.root_items.get(*first)?;
        for &i in rest {
            node = node.children.get(i)?;
        }
        Some(node)
    }

    pub fn node_mut(&mut self, path: &NodePath) -> Option<&mut PlanNode> {
        let (first, rest) = path.split_first()?;
        let mut node = self.root_items.get_mut(*first)?;
        for &i in rest {
            node = node.children.get_mut(i)?;
        }
        Some(node)
    }

    /// Every node in depth-first order
    pub fn visit<'a>(&'a self, f: &mut impl FnMut(&'a PlanNode)) {
        for root in &self.root_items {
            root.visit(f);
        }
    }

    pub fn visit_mut(&mut self, f: &mut impl FnMut(&mut PlanNode)) {
        for root in &mut self.root_items {
            root.visit_mut(f);
        }
    }

    /// Apply `f` to every node for `item_id`, returning how many matched
    pub fn update_item(&mut self, item_id: u32, mut f: impl FnMut(&mut PlanNode)) -> usize {
        let mut touched = 0;
        self.visit_mut(&mut |node| {
            if node.item_id == item_id {
                f(node);
                touched += 1;
            }
        });
        touched
    }

    /// Flattened shopping list.
    ///
    /// Walks depth-first, stopping at nodes that are not crafted; every
    /// such node contributes its quantity to the row for its item id and
    /// acquisition source.
    pub fn aggregated_materials(&self) -> Vec<MaterialAggregate> {
        let mut rows: Vec<MaterialAggregate> = Vec::new();
        let mut index: HashMap<(u32, AcquisitionSource), usize> = HashMap::new();

        fn collect(
            node: &PlanNode,
            rows: &mut Vec<MaterialAggregate>,
            index: &mut HashMap<(u32, AcquisitionSource), usize>,
        ) {
            if node.consumes_children() {
                for child in &node.children {
                    collect(child, rows, index);
                }
                return;
            }

            match index.get(&(node.item_id, node.source)) {
                Some(&i) => {
                    let row = &mut rows[i];
                    row.total_quantity = row.total_quantity.saturating_add(node.quantity);
                    row.hq_required |= node.hq_required;
                    row.total_cost = row.unit_price * row.total_quantity as f64;
                }
                None => {
                    let unit_price = node.unit_cost();
                    index.insert((node.item_id, node.source), rows.len());
                    rows.push(MaterialAggregate {
                        item_id: node.item_id,
                        name: node.name.clone(),
                        icon_id: node.icon_id,
                        total_quantity: node.quantity,
                        unit_price,
                        total_cost: unit_price * node.quantity as f64,
                        source: node.source,
                        hq_required: node.hq_required,
                        tradeable: node.tradeable,
                    });
                }
            }
        }

        for root in &self.root_items {
            collect(root, &mut rows, &mut index);
        }
        rows
    }

    /// Crafted items grouped by id, in first-seen order
    pub fn craft_items(&self) -> Vec<CraftAggregate> {
        let mut rows: Vec<CraftAggregate> = Vec::new();
        let mut index: HashMap<u32, usize> = HashMap::new();

        fn collect(node: &PlanNode, rows: &mut Vec<CraftAggregate>, index: &mut HashMap<u32, usize>) {
            if !node.consumes_children() {
                return;
            }
            let (job, level) = node
                .recipe
                .as_ref()
                .map(|r| (r.job.clone(), r.recipe_level))
                .unwrap_or_default();
            match index.get(&node.item_id) {
                Some(&i) => {
                    rows[i].total_quantity += node.quantity;
                    rows[i].craft_count += node.craft_count();
                }
                None => {
                    index.insert(node.item_id, rows.len());
                    rows.push(CraftAggregate {
                        item_id: node.item_id,
                        name: node.name.clone(),
                        job,
                        recipe_level: level,
                        total_quantity: node.quantity,
                        craft_count: node.craft_count(),
                    });
                }
            }
            for child in &node.children {
                collect(child, rows, index);
            }
        }

        for root in &self.root_items {
            collect(root, &mut rows, &mut index);
        }
        rows
    }

    /// Gil cost of the whole plan under the current sources
    pub fn total_cost(&self) -> f64 {
        self.root_items.iter().map(PlanNode::cost_by_source).sum()
    }

    /// Change how a node is obtained
    pub fn set_acquisition_source(&mut self, path: &NodePath, source: AcquisitionSource) -> Result<()> {
        let node = self
            .node_mut(path)
            .ok_or_else(|| AppError::NotFound(format!("No plan node at {:?}", path)))?;

        if source.is_craft() && (!node.can_craft || node.children.is_empty()) {
            return Err(AppError::Validation(format!(
                "{} has no expanded recipe and cannot be crafted",
                node.name
            )));
        }
        if source.is_vendor() && node.vendor_options.is_empty() {
            return Err(AppError::Validation(format!("{} is not sold by any vendor", node.name)));
        }

        tracing::debug!("Source for {} ({}) -> {:?}", node.name, node.item_id, source);
        node.source = source;
        if source == AcquisitionSource::MarketBuyHq {
            node.hq_required = true;
        }
        self.touch();
        Ok(())
    }

    /// Pick a specific vendor (`None` = cheapest gil vendor)
    pub fn set_selected_vendor(&mut self, path: &NodePath, index: Option<usize>) -> Result<()> {
        let node = self
            .node_mut(path)
            .ok_or_else(|| AppError::NotFound(format!("No plan node at {:?}", path)))?;

        if let Some(i) = index {
            if i >= node.vendor_options.len() {
                return Err(AppError::Validation(format!(
                    "Vendor index {} out of range for {} ({} vendors)",
                    i,
                    node.name,
                    node.vendor_options.len()
                )));
            }
        }
        node.selected_vendor_index = index;
        self.touch();
        Ok(())
    }

    /// Change a root item's quantity, rescaling its subtree
    pub fn set_root_quantity(&mut self, root_index: usize, quantity: u32) -> Result<()> {
        if quantity == 0 {
            return Err(AppError::Validation("Quantity must be at least 1".to_string()));
        }
        let root = self
            .root_items
            .get_mut(root_index)
            .ok_or_else(|| AppError::NotFound(format!("No root item at index {}", root_index)))?;
        root.rescale(quantity);
        self.touch();
        Ok(())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn recipe(yield_count: u32) -> RecipeInfo {
        RecipeInfo {
            recipe_id: 1,
            job: "Blacksmith".to_string(),
            recipe_level: 50,
            yield_count,
            is_company_craft: false,
        }
    }

    fn leaf(item_id: u32, name: &str, amount: u32, qty: u32, price: f64) -> PlanNode {
        let mut node = PlanNode::new(item_id, name, qty);
        node.amount_per_craft = amount;
        node.market_price = price;
        node
    }

    fn crafted(item_id: u32, name: &str, qty: u32, yield_count: u32, children: Vec<PlanNode>) -> PlanNode {
        let mut node = PlanNode::new(item_id, name, qty);
        node.source = AcquisitionSource::Craft;
        node.can_craft = true;
        node.recipe = Some(recipe(yield_count));
        node.children = children;
        node
    }

    #[test]
    fn test_craft_count_rounds_up() {
        assert_eq!(craft_count(7, 3), 3);
        assert_eq!(craft_count(6, 3), 2);
        assert_eq!(craft_count(1, 3), 1);
        assert_eq!(craft_count(5, 0), 5);
    }

    #[test]
    fn test_craft_cost_amortizes_yield() {
        // 3 units per craft from 2x ore at 30 and 1x flux at 60 -> 120 per craft
        let node = crafted(
            10,
            "Ingot",
            3,
            3,
            vec![leaf(1, "Ore", 2, 2, 30.0), leaf(2, "Flux", 1, 1, 60.0)],
        );
        assert!((calculate_node_craft_cost(&node) - 40.0).abs() < 1e-9);
        assert!((node.cost_by_source() - 120.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregation_merges_shared_materials() {
        let mut plan = CraftingPlan::new("test", "Aether", None);
        plan.root_items.push(crafted(
            100,
            "Sword",
            1,
            1,
            vec![
                crafted(10, "Ingot", 2, 1, vec![leaf(1, "Ore", 3, 6, 10.0)]),
                leaf(1, "Ore", 4, 4, 10.0),
            ],
        ));

        let materials = plan.aggregated_materials();
        assert_eq!(materials.len(), 1);
        assert_eq!(materials[0].item_id, 1);
        assert_eq!(materials[0].total_quantity, 10);
        assert!((materials[0].total_cost - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_aggregation_stops_at_bought_nodes() {
        let mut plan = CraftingPlan::new("test", "Aether", None);
        plan.root_items.push(crafted(
            100,
            "Sword",
            1,
            1,
            vec![crafted(10, "Ingot", 2, 1, vec![leaf(1, "Ore", 3, 6, 10.0)])],
        ));

        plan.set_acquisition_source(&[0, 0], AcquisitionSource::MarketBuyNq)
            .unwrap();
        let materials = plan.aggregated_materials();
        assert_eq!(materials.len(), 1);
        assert_eq!(materials[0].item_id, 10);
        assert_eq!(materials[0].total_quantity, 2);

        // Children are kept structurally and can be crafted again
        plan.set_acquisition_source(&[0, 0], AcquisitionSource::Craft).unwrap();
        assert_eq!(plan.aggregated_materials()[0].item_id, 1);
    }

    #[test]
    fn test_aggregation_keeps_sources_apart() {
        let mut vendor_ore = leaf(1, "Ore", 4, 4, 10.0);
        vendor_ore.source = AcquisitionSource::VendorBuy;
        vendor_ore.vendor_options = vec![VendorInfo::gil("A", "Limsa", 3)];
        let mut plan = CraftingPlan::new("test", "Aether", None);
        plan.root_items.push(crafted(
            100,
            "Sword",
            1,
            1,
            vec![
                crafted(10, "Ingot", 2, 1, vec![leaf(1, "Ore", 3, 6, 10.0)]),
                vendor_ore,
            ],
        ));

        let materials = plan.aggregated_materials();
        assert_eq!(materials.len(), 2);
        let market = materials.iter().find(|m| m.source == AcquisitionSource::MarketBuyNq).unwrap();
        assert_eq!(market.total_quantity, 6);
        assert!((market.total_cost - 60.0).abs() < 1e-9);
        let vendor = materials.iter().find(|m| m.source == AcquisitionSource::VendorBuy).unwrap();
        assert_eq!(vendor.total_quantity, 4);
        assert!((vendor.total_cost - 12.0).abs() < 1e-9);
    }

    #[test]
    fn test_cannot_craft_leaf_or_vendor_without_vendors() {
        let mut plan = CraftingPlan::new("test", "Aether", None);
        plan.root_items.push(leaf(1, "Ore", 1, 1, 10.0));
        assert!(plan.set_acquisition_source(&[0], AcquisitionSource::Craft).is_err());
        assert!(plan.set_acquisition_source(&[0], AcquisitionSource::VendorBuy).is_err());
        assert!(plan.set_acquisition_source(&[3], AcquisitionSource::MarketBuyNq).is_err());
    }

    #[test]
    fn test_root_quantity_rescales_subtree() {
        let mut ingot = crafted(10, "Ingot", 2, 1, vec![leaf(1, "Ore", 4, 8, 10.0)]);
        ingot.amount_per_craft = 2;
        let mut plan = CraftingPlan::new("test", "Aether", None);
        plan.root_items.push(crafted(100, "Rivets", 3, 3, vec![ingot]));

        plan.set_root_quantity(0, 7).unwrap();
        let root = &plan.root_items[0];
        assert_eq!(root.craft_count(), 3);
        assert_eq!(root.children[0].quantity, 6);
        assert_eq!(root.children[0].children[0].quantity, 24);
        assert!(plan.set_root_quantity(0, 0).is_err());
    }

    #[test]
    fn test_rescale_saturates_huge_quantities() {
        let mut ingot = crafted(10, "Ingot", 1, 1, vec![leaf(1, "Ore", 1000, 1000, 10.0)]);
        ingot.amount_per_craft = 1000;
        let mut root = crafted(100, "Rivets", 1, 1, vec![ingot]);

        root.rescale(u32::MAX / 2);
        assert_eq!(root.children[0].quantity, u32::MAX);
        assert_eq!(root.children[0].children[0].quantity, u32::MAX);
    }

    #[test]
    fn test_hq_price_only_written_to_hq_eligible_nodes() {
        let mut node = PlanNode::new(1, "Ore", 1);
        node.set_market_prices(10.0, Some(25.0), PriceSource::Market);
        assert_eq!(node.hq_market_price, 0.0);

        node.can_be_hq = true;
        node.set_market_prices(11.0, Some(25.0), PriceSource::Market);
        assert_eq!(node.market_price, 11.0);
        assert_eq!(node.hq_market_price, 25.0);
    }

    #[test]
    fn test_craft_items_group_by_id() {
        let mut plan = CraftingPlan::new("test", "Aether", None);
        plan.root_items.push(crafted(
            100,
            "Sword",
            1,
            1,
            vec![crafted(10, "Ingot", 2, 1, vec![leaf(1, "Ore", 3, 6, 10.0)])],
        ));
        plan.root_items.push(crafted(10, "Ingot", 3, 1, vec![leaf(1, "Ore", 3, 9, 10.0)]));

        let crafts = plan.craft_items();
        assert_eq!(crafts.len(), 2);
        assert_eq!(crafts[1].item_id, 10);
        assert_eq!(crafts[1].total_quantity, 5);
        assert_eq!(crafts[1].craft_count, 5);
        assert_eq!(crafts[1].job, "Blacksmith");
    }

    #[test]
    fn test_selected_vendor_must_exist() {
        let mut node = PlanNode::new(1, "Thread", 5);
        node.vendor_options = vec![VendorInfo::gil("A", "Limsa", 25)];
        let mut plan = CraftingPlan::new("test", "Aether", None);
        plan.root_items.push(node);

        assert!(plan.set_selected_vendor(&[0], Some(1)).is_err());
        plan.set_selected_vendor(&[0], Some(0)).unwrap();
        assert_eq!(plan.root_items[0].selected_vendor_index, Some(0));
        plan.set_selected_vendor(&[0], None).unwrap();
        assert!(plan.root_items[0].selected_vendor_index.is_none());
    }

    #[test]
    fn test_vendor_unit_cost_uses_selection() {
        let mut node = PlanNode::new(1, "Thread", 5);
        node.source = AcquisitionSource::VendorBuy;
        node.vendor_options = vec![
            VendorInfo::gil("A", "Limsa", 25),
            VendorInfo::gil("B", "Gridania", 12),
        ];
        node.vendor_price = 12;
        assert_eq!(node.unit_cost(), 12.0);
        node.selected_vendor_index = Some(0);
        assert_eq!(node.unit_cost(), 25.0);
    }
}
