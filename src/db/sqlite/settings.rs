//! Key/value settings

use crate::error::Result;
use rusqlite::{Connection, OptionalExtension};
use serde_json::Value;

/// Get a setting value
pub fn get_value(conn: &Connection, key: &str) -> Result<Option<Value>> {
    let raw: Option<String> = conn
        .query_row("SELECT value FROM settings_kv WHERE key = ?", [key], |row| {
            row.get(0)
        })
        .optional()?;

    match raw {
        Some(text) => Ok(Some(serde_json::from_str(&text)?)),
        None => Ok(None),
    }
}

/// Insert or replace a setting value
pub fn set_value(conn: &Connection, key: &str, value: &Value) -> Result<()> {
    conn.execute(
        "INSERT INTO settings_kv (key, value, updated_at) VALUES (?1, ?2, datetime('now'))
         ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
        rusqlite::params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

/// All keys, sorted
pub fn list_keys(conn: &Connection) -> Result<Vec<String>> {
    let mut stmt = conn.prepare("SELECT key FROM settings_kv ORDER BY key")?;
    let keys = stmt
        .query_map([], |row| row.get(0))?
        .collect::<std::result::Result<Vec<String>, _>>()?;
    Ok(keys)
}
