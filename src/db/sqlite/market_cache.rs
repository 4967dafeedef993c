//! Persisted market cache entries

use crate::cache::{CacheEntryStat, CacheKey, CachedMarketData};
use crate::error::Result;
use rusqlite::{params, Connection, OptionalExtension};

/// Get one cache entry
pub fn get_entry(conn: &Connection, key: &CacheKey) -> Result<Option<CachedMarketData>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT data FROM market_cache WHERE item_id = ?1 AND region = ?2",
            params![key.item_id, key.region],
            |row| row.get(0),
        )
        .optional()?;

    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

/// Insert or replace a cache entry
pub fn put_entry(conn: &Connection, data: &CachedMarketData) -> Result<()> {
    let json = serde_json::to_string(data)?;
    conn.execute(
        "INSERT OR REPLACE INTO market_cache (item_id, region, fetched_at, size_bytes, data)
         VALUES (?1, ?2, ?3, ?4, ?5)",
        params![data.item_id, data.region, data.fetched_at, json.len() as i64, json],
    )?;
    Ok(())
}

/// Delete entries, returning how many rows were removed
pub fn remove_entries(conn: &mut Connection, keys: &[CacheKey]) -> Result<usize> {
    let tx = conn.transaction()?;
    let mut removed = 0;
    {
        let mut stmt = tx.prepare("DELETE FROM market_cache WHERE item_id = ?1 AND region = ?2")?;
        for key in keys {
            removed += stmt.execute(params![key.item_id, key.region])?;
        }
    }
    tx.commit()?;
    Ok(removed)
}

/// Per-entry size and age
pub fn entry_stats(conn: &Connection) -> Result<Vec<CacheEntryStat>> {
    let mut stmt = conn.prepare("SELECT item_id, region, fetched_at, size_bytes FROM market_cache")?;
    let stats = stmt
        .query_map([], |row| {
            Ok(CacheEntryStat {
                key: CacheKey {
                    item_id: row.get(0)?,
                    region: row.get(1)?,
                },
                fetched_at: row.get(2)?,
                size_bytes: row.get::<_, i64>(3)? as usize,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(stats)
}

/// Delete every entry
pub fn clear(conn: &Connection) -> Result<()> {
    conn.execute("DELETE FROM market_cache", [])?;
    Ok(())
}
