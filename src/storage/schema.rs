//! Database schema and migrations.

use anyhow::{Context, Result};
use rusqlite::Connection;

/// Ordered migrations. A version is recorded in `schema_version` once applied.
const MIGRATIONS: &[(i64, &str)] = &[
    (
        1,
        "CREATE TABLE datapoints (
            id INTEGER PRIMARY KEY,
            ts TEXT NOT NULL,
            invocations REAL NOT NULL DEFAULT 0,
            errors REAL NOT NULL DEFAULT 0,
            input_tokens REAL NOT NULL DEFAULT 0,
            output_tokens REAL NOT NULL DEFAULT 0,
            duration_ms REAL NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now'))
        );
        CREATE INDEX idx_datapoints_ts ON datapoints(ts);",
    ),
    (
        2,
        "ALTER TABLE datapoints ADD COLUMN model_id TEXT;
         ALTER TABLE datapoints ADD COLUMN user_id TEXT;
         CREATE INDEX idx_datapoints_model ON datapoints(model_id, ts);",
    ),
];

/// Run all pending migrations.
pub fn migrate(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current = current_version(conn)?;
    for (version, sql) in MIGRATIONS.iter().filter(|(v, _)| *v > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(sql)
            .with_context(|| format!("schema migration {} failed", version))?;
        tx.execute("INSERT INTO schema_version (version) VALUES (?1)", [version])?;
        tx.commit()?;
        tracing::info!(version, "Applied schema migration");
    }

    Ok(())
}

/// Highest applied migration, 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<i64> {
    let v = conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| {
        row.get(0)
    })?;
    Ok(v)
}
