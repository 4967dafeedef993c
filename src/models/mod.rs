//! Plan data model

pub mod plan;
pub mod snapshot;
pub mod vendor;

pub use plan::{
    calculate_node_craft_cost, craft_count, AcquisitionSource, CraftAggregate, CraftingPlan,
    MaterialAggregate, NodePath, PlanNode, PriceSource, RecipeInfo,
};
pub use snapshot::{NodeSnapshot, PlanSnapshot};
pub use vendor::{cheapest_gil_vendor, dedupe_vendor_locations, VendorInfo};
