//! Services Layer
//!
//! Planner operations shared by the command-line front end and the
//! auto-refresh scheduler. Services are stateless and work on `AppState`.
//!
//! # Services
//!
//! - `RecipeTreeService` - Discover recipes and assemble crafting plans
//! - `MarketPriceService` - Bulk unit prices on top of the market cache
//! - `PriceRefreshService` - Write current prices onto a plan
//! - `ShoppingService` - Per-world purchase recommendations

pub mod market_price_service;
pub mod price_refresh_service;
pub mod recipe_tree_service;
pub mod shopping_service;

pub use market_price_service::{MarketPriceService, PriceInfo, PriceRequest};
pub use price_refresh_service::{OperationStatus, PriceRefreshResult, PriceRefreshService};
pub use recipe_tree_service::{BuildTarget, ItemCache, RecipeTreeService};
pub use shopping_service::{
    DetailedShoppingPlan, OptimizationMode, ShoppingOptions, ShoppingResult, ShoppingService, WorldOption,
    WorldSplit,
};
