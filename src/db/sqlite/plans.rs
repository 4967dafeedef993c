//! Saved crafting plans

use crate::error::{AppError, Result};
use crate::models::{CraftingPlan, PlanSnapshot};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

/// Listing row for a saved plan
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanSummary {
    pub id: String,
    pub name: String,
    pub data_center: String,
    pub world: Option<String>,
    pub root_count: usize,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

/// Insert or replace a plan
pub fn save_plan(conn: &Connection, plan: &CraftingPlan) -> Result<()> {
    let snapshot = serde_json::to_string(&plan.to_snapshot())?;
    conn.execute(
        "INSERT OR REPLACE INTO plans
            (id, name, data_center, world, root_count, created_at, modified_at, snapshot)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            plan.id,
            plan.name,
            plan.data_center,
            plan.world,
            plan.root_items.len() as i64,
            plan.created_at.to_rfc3339(),
            plan.modified_at.to_rfc3339(),
            snapshot,
        ],
    )?;
    Ok(())
}

/// Load a plan by id; prices start out unknown
pub fn load_plan(conn: &Connection, id: &str) -> Result<Option<CraftingPlan>> {
    let raw: Option<String> = conn
        .query_row("SELECT snapshot FROM plans WHERE id = ?", [id], |row| row.get(0))
        .optional()?;

    match raw {
        Some(text) => {
            let snapshot: PlanSnapshot = serde_json::from_str(&text)?;
            Ok(Some(CraftingPlan::from_snapshot(&snapshot)?))
        }
        None => Ok(None),
    }
}

/// All saved plans, most recently modified first
pub fn list_plans(conn: &Connection) -> Result<Vec<PlanSummary>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, data_center, world, root_count, created_at, modified_at
         FROM plans ORDER BY modified_at DESC",
    )?;

    let rows = stmt
        .query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
                row.get::<_, i64>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
            ))
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, name, data_center, world, roots, created, modified)| {
            Ok(PlanSummary {
                id,
                name,
                data_center,
                world,
                root_count: roots as usize,
                created_at: parse_timestamp(&created)?,
                modified_at: parse_timestamp(&modified)?,
            })
        })
        .collect()
}

/// Delete a plan, returning whether it existed
pub fn delete_plan(conn: &Connection, id: &str) -> Result<bool> {
    let deleted = conn.execute("DELETE FROM plans WHERE id = ?", [id])?;
    Ok(deleted > 0)
}

fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| AppError::Internal(format!("Bad timestamp '{}' in plans table: {}", value, e)))
}
