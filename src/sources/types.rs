//! Common data source types
//!
//! Typed records handed to the core by item and market adapters. Raw
//! API shapes never leave the adapter modules.

use crate::models::vendor::{cheapest_gil_vendor, VendorInfo};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// One ingredient line of a recipe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingredient {
    pub item_id: u32,
    pub amount: u32,
}

/// A crafting recipe producing an item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecipeRecord {
    pub recipe_id: u32,
    pub job: String,
    pub recipe_level: u32,
    pub yield_count: u32,
    pub ingredients: Vec<Ingredient>,
}

/// One phase of a company workshop craft
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompanyCraftPhase {
    pub phase: u32,
    pub items: Vec<Ingredient>,
}

/// Item data from the item/recipe source
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub id: u32,
    pub name: String,
    pub icon_id: u32,
    pub tradeable: bool,
    pub can_be_hq: bool,
    pub recipes: Vec<RecipeRecord>,
    /// Gil and special-currency vendors, deduplicated by name
    pub vendors: Vec<VendorInfo>,
    /// Company workshop phases; empty for ordinary items
    pub company_craft_phases: Vec<CompanyCraftPhase>,
}

impl ItemRecord {
    pub fn new(id: u32, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            icon_id: 0,
            tradeable: true,
            can_be_hq: false,
            recipes: Vec::new(),
            vendors: Vec::new(),
            company_craft_phases: Vec::new(),
        }
    }

    /// Lowest-level recipe; earlier recipes win ties
    pub fn primary_recipe(&self) -> Option<&RecipeRecord> {
        self.recipes
            .iter()
            .enumerate()
            .min_by_key(|(i, r)| (r.recipe_level, *i))
            .map(|(_, r)| r)
    }

    pub fn is_company_craft(&self) -> bool {
        !self.company_craft_phases.is_empty()
    }

    pub fn is_craftable(&self) -> bool {
        self.primary_recipe().is_some() || self.is_company_craft()
    }

    /// Cheapest gil vendor price, if sold for gil
    pub fn gil_vendor_price(&self) -> Option<u32> {
        cheapest_gil_vendor(&self.vendors).map(|(_, v)| v.price)
    }

    /// Ingredient ids referenced by the recipe used for planning
    pub fn ingredient_ids(&self) -> Vec<u32> {
        if self.is_company_craft() {
            self.company_craft_phases
                .iter()
                .flat_map(|p| p.items.iter().map(|i| i.item_id))
                .collect()
        } else {
            self.primary_recipe()
                .map(|r| r.ingredients.iter().map(|i| i.item_id).collect())
                .unwrap_or_default()
        }
    }
}

/// Result of a multi-item lookup
#[derive(Debug, Clone, Default)]
pub struct ItemBatch {
    pub items: HashMap<u32, ItemRecord>,
    /// Ids the source definitively does not know (not retried)
    pub not_found: Vec<u32>,
}

/// A single marketboard listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListing {
    pub world_name: String,
    pub price_per_unit: u32,
    pub quantity: u32,
    pub retainer_name: String,
    pub hq: bool,
}

/// Listings for one item in one region
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListings {
    pub item_id: u32,
    pub region: String,
    pub listings: Vec<MarketListing>,
    pub average_price_nq: f64,
    pub average_price_hq: f64,
    /// Milliseconds since epoch of the newest upload, 0 when unknown
    pub last_upload_time: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recipe(id: u32, level: u32) -> RecipeRecord {
        RecipeRecord {
            recipe_id: id,
            job: "Armorer".to_string(),
            recipe_level: level,
            yield_count: 1,
            ingredients: vec![Ingredient { item_id: id * 10, amount: 1 }],
        }
    }

    #[test]
    fn test_primary_recipe_prefers_lowest_level_then_order() {
        let mut item = ItemRecord::new(1, "Bronze Rivets");
        item.recipes = vec![recipe(1, 20), recipe(2, 5), recipe(3, 5)];
        assert_eq!(item.primary_recipe().unwrap().recipe_id, 2);
        assert_eq!(item.ingredient_ids(), vec![20]);
    }

    #[test]
    fn test_company_craft_ingredients_flattened() {
        let mut item = ItemRecord::new(1, "Bronze Hull");
        item.company_craft_phases = vec![
            CompanyCraftPhase {
                phase: 0,
                items: vec![Ingredient { item_id: 7, amount: 2 }],
            },
            CompanyCraftPhase {
                phase: 1,
                items: vec![Ingredient { item_id: 8, amount: 3 }],
            },
        ];
        assert!(item.is_craftable());
        assert_eq!(item.ingredient_ids(), vec![7, 8]);
    }
}
