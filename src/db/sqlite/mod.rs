//! SQLite database module

mod migrations;
mod market_cache;
mod plans;
mod settings;

pub use plans::PlanSummary;

use crate::cache::{CacheEntryStat, CacheKey, CachedMarketData, MarketCacheStore};
use crate::config::SettingsProvider;
use crate::error::Result;
use crate::models::CraftingPlan;
use parking_lot::Mutex;
use rusqlite::Connection;
use serde_json::Value;
use std::path::Path;

/// SQLite database wrapper
pub struct SqliteDb {
    conn: Mutex<Connection>,
}

impl SqliteDb {
    /// Open (or create) the database file
    pub fn new(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)?;

        // WAL lets cache reads proceed while a refresh is writing
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;

        Self::with_connection(conn)
    }

    /// Private in-memory database
    pub fn open_in_memory() -> Result<Self> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self> {
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.run_migrations()?;
        Ok(db)
    }

    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn.lock();
        migrations::run_migrations(&conn)
    }

    // ========== Plan Methods ==========

    /// Save a plan snapshot, replacing any previous version
    pub fn save_plan(&self, plan: &CraftingPlan) -> Result<()> {
        let conn = self.conn.lock();
        plans::save_plan(&conn, plan)
    }

    /// Load a saved plan
    pub fn load_plan(&self, id: &str) -> Result<Option<CraftingPlan>> {
        let conn = self.conn.lock();
        plans::load_plan(&conn, id)
    }

    /// List saved plans, newest first
    pub fn list_plans(&self) -> Result<Vec<PlanSummary>> {
        let conn = self.conn.lock();
        plans::list_plans(&conn)
    }

    /// Delete a saved plan
    pub fn delete_plan(&self, id: &str) -> Result<bool> {
        let conn = self.conn.lock();
        plans::delete_plan(&conn, id)
    }

    // ========== Settings Methods ==========

    pub fn setting_keys(&self) -> Result<Vec<String>> {
        let conn = self.conn.lock();
        settings::list_keys(&conn)
    }
}

impl SettingsProvider for SqliteDb {
    fn get_value(&self, key: &str) -> Result<Option<Value>> {
        let conn = self.conn.lock();
        settings::get_value(&conn, key)
    }

    fn set_value(&self, key: &str, value: Value) -> Result<()> {
        let conn = self.conn.lock();
        settings::set_value(&conn, key, &value)
    }
}

impl MarketCacheStore for SqliteDb {
    fn get(&self, key: &CacheKey) -> Result<Option<CachedMarketData>> {
        let conn = self.conn.lock();
        market_cache::get_entry(&conn, key)
    }

    fn put(&self, data: &CachedMarketData) -> Result<()> {
        let conn = self.conn.lock();
        market_cache::put_entry(&conn, data)
    }

    fn remove(&self, keys: &[CacheKey]) -> Result<usize> {
        let mut conn = self.conn.lock();
        market_cache::remove_entries(&mut conn, keys)
    }

    fn entry_stats(&self) -> Result<Vec<CacheEntryStat>> {
        let conn = self.conn.lock();
        market_cache::entry_stats(&conn)
    }

    fn clear(&self) -> Result<()> {
        let conn = self.conn.lock();
        market_cache::clear(&conn)
    }
}
