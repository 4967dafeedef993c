//! SQLite database migrations

use crate::error::Result;
use rusqlite::Connection;

/// Run all database migrations
pub fn run_migrations(conn: &Connection) -> Result<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS migrations (
            id INTEGER PRIMARY KEY,
            name TEXT NOT NULL UNIQUE,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    run_migration(conn, "001_settings_kv", CREATE_SETTINGS_KV_TABLE)?;
    run_migration(conn, "002_market_cache", CREATE_MARKET_CACHE_TABLE)?;
    run_migration(conn, "003_plans", CREATE_PLANS_TABLE)?;

    tracing::info!("Database migrations completed");
    Ok(())
}

fn run_migration(conn: &Connection, name: &str, sql: &str) -> Result<()> {
    let exists: bool = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM migrations WHERE name = ?)",
        [name],
        |row| row.get(0),
    )?;

    if !exists {
        tracing::info!("Running migration: {}", name);
        conn.execute_batch(sql)?;
        conn.execute("INSERT INTO migrations (name) VALUES (?)", [name])?;
    }

    Ok(())
}

const CREATE_SETTINGS_KV_TABLE: &str = r#"
CREATE TABLE settings_kv (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL,
    updated_at TEXT NOT NULL DEFAULT (datetime('now'))
);
"#;

// fetched_at is UNIX epoch seconds
const CREATE_MARKET_CACHE_TABLE: &str = r#"
CREATE TABLE market_cache (
    item_id INTEGER NOT NULL,
    region TEXT NOT NULL,
    fetched_at INTEGER NOT NULL,
    size_bytes INTEGER NOT NULL,
    data TEXT NOT NULL,
    PRIMARY KEY (item_id, region)
);

CREATE INDEX idx_market_cache_fetched_at ON market_cache(fetched_at);
"#;

const CREATE_PLANS_TABLE: &str = r#"
CREATE TABLE plans (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    data_center TEXT NOT NULL,
    world TEXT,
    root_count INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    modified_at TEXT NOT NULL,
    snapshot TEXT NOT NULL
);

CREATE INDEX idx_plans_modified_at ON plans(modified_at);
"#;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let applied: i64 = conn
            .query_row("SELECT COUNT(*) FROM migrations", [], |row| row.get(0))
            .unwrap();
        assert_eq!(applied, 3);
    }
}
