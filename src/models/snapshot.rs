//! Persisted plan format
//!
//! A flat node list with integer ids and parent/child id references, so
//! the serialized form never nests or cycles. Market prices are not part
//! of the snapshot; they are re-fetched after loading.

use crate::error::{AppError, Result};
use crate::models::plan::{AcquisitionSource, CraftingPlan, PlanNode, PriceSource, RecipeInfo};
use crate::models::vendor::VendorInfo;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

pub const SNAPSHOT_VERSION: u32 = 1;

/// One node of a persisted plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeSnapshot {
    pub node_id: usize,
    pub parent_id: Option<usize>,
    pub child_ids: Vec<usize>,
    pub item_id: u32,
    pub name: String,
    pub icon_id: u32,
    pub quantity: u32,
    pub amount_per_craft: u32,
    pub source: AcquisitionSource,
    pub can_craft: bool,
    pub can_be_hq: bool,
    pub hq_required: bool,
    pub tradeable: bool,
    pub recipe: Option<RecipeInfo>,
    pub vendor_price: u32,
    #[serde(default)]
    pub vendor_options: Vec<VendorInfo>,
    pub selected_vendor_index: Option<usize>,
    #[serde(default)]
    pub is_circular: bool,
    pub error: Option<String>,
}

/// Serializable snapshot of a [`CraftingPlan`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanSnapshot {
    pub version: u32,
    pub id: String,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
    pub data_center: String,
    pub world: Option<String>,
    pub root_ids: Vec<usize>,
    pub nodes: Vec<NodeSnapshot>,
}

impl CraftingPlan {
    /// Flatten into a snapshot (prices dropped)
    pub fn to_snapshot(&self) -> PlanSnapshot {
        let mut nodes = Vec::with_capacity(self.node_count());
        let root_ids = self
            .root_items
            .iter()
            .map(|root| flatten(root, None, &mut nodes))
            .collect();

        PlanSnapshot {
            version: SNAPSHOT_VERSION,
            id: self.id.clone(),
            name: self.name.clone(),
            created_at: self.created_at,
            modified_at: self.modified_at,
            data_center: self.data_center.clone(),
            world: self.world.clone(),
            root_ids,
            nodes,
        }
    }

    /// Rebuild a plan from a snapshot; every price starts out unknown
    pub fn from_snapshot(snapshot: &PlanSnapshot) -> Result<Self> {
        if snapshot.version > SNAPSHOT_VERSION {
            return Err(AppError::Validation(format!(
                "Unsupported plan snapshot version {}",
                snapshot.version
            )));
        }

        let by_id: HashMap<usize, &NodeSnapshot> =
            snapshot.nodes.iter().map(|n| (n.node_id, n)).collect();
        if by_id.len() != snapshot.nodes.len() {
            return Err(AppError::Validation("Duplicate node ids in plan snapshot".to_string()));
        }

        let mut visited = HashSet::new();
        let root_items = snapshot
            .root_ids
            .iter()
            .map(|id| rebuild(*id, &by_id, &mut visited))
            .collect::<Result<Vec<_>>>()?;

        Ok(CraftingPlan {
            id: snapshot.id.clone(),
            name: snapshot.name.clone(),
            created_at: snapshot.created_at,
            modified_at: snapshot.modified_at,
            data_center: snapshot.data_center.clone(),
            world: snapshot.world.clone(),
            root_items,
        })
    }
}

fn flatten(node: &PlanNode, parent_id: Option<usize>, out: &mut Vec<NodeSnapshot>) -> usize {
    let node_id = out.len();
    out.push(NodeSnapshot {
        node_id,
        parent_id,
        child_ids: Vec::new(),
        item_id: node.item_id,
        name: node.name.clone(),
        icon_id: node.icon_id,
        quantity: node.quantity,
        amount_per_craft: node.amount_per_craft,
        source: node.source,
        can_craft: node.can_craft,
        can_be_hq: node.can_be_hq,
        hq_required: node.hq_required,
        tradeable: node.tradeable,
        recipe: node.recipe.clone(),
        vendor_price: node.vendor_price,
        vendor_options: node.vendor_options.clone(),
        selected_vendor_index: node.selected_vendor_index,
        is_circular: node.is_circular,
        error: node.error.clone(),
    });

    let child_ids: Vec<usize> = node
        .children
        .iter()
        .map(|child| flatten(child, Some(node_id), out))
        .collect();
    out[node_id].child_ids = child_ids;
    node_id
}

fn rebuild(
    node_id: usize,
    by_id: &HashMap<usize, &NodeSnapshot>,
    visited: &mut HashSet<usize>,
) -> Result<PlanNode> {
    if !visited.insert(node_id) {
        return Err(AppError::Validation(format!(
            "Plan snapshot node {} is referenced more than once",
            node_id
        )));
    }
    let snap = by_id
        .get(&node_id)
        .ok_or_else(|| AppError::Validation(format!("Plan snapshot is missing node {}", node_id)))?;

    let children = snap
        .child_ids
        .iter()
        .map(|id| rebuild(*id, by_id, visited))
        .collect::<Result<Vec<_>>>()?;

    Ok(PlanNode {
        item_id: snap.item_id,
        name: snap.name.clone(),
        icon_id: snap.icon_id,
        quantity: snap.quantity,
        amount_per_craft: snap.amount_per_craft,
        source: snap.source,
        can_craft: snap.can_craft,
        can_be_hq: snap.can_be_hq,
        hq_required: snap.hq_required,
        tradeable: snap.tradeable,
        recipe: snap.recipe.clone(),
        market_price: 0.0,
        hq_market_price: 0.0,
        price_source: PriceSource::Unknown,
        vendor_price: snap.vendor_price,
        vendor_options: snap.vendor_options.clone(),
        selected_vendor_index: snap.selected_vendor_index,
        is_circular: snap.is_circular,
        error: snap.error.clone(),
        children,
    })
}
