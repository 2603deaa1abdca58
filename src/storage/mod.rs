//! SQLite storage layer -- schema, datapoint ingest and window aggregation.

pub mod schema;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use std::collections::BTreeMap;
use r2d2::Pool as R2D2Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::params;

use crate::metrics::{Datapoint, WindowMetrics, UNATTRIBUTED_MODEL};

/// Connection Pool type
pub type Pool = R2D2Pool<SqliteConnectionManager>;

/// Open (or create) the SQLite database and return a connection pool.
pub fn open_pool(path: &str) -> Result<Pool> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create database directory {}", parent.display()))?;
        }
    }

    let manager = SqliteConnectionManager::file(path).with_init(|c| {
        c.execute_batch(
            "PRAGMA journal_mode = WAL;
                 PRAGMA synchronous = NORMAL;
                 PRAGMA temp_store = MEMORY;
                 PRAGMA busy_timeout = 5000;",
        )
    });

    let pool = R2D2Pool::new(manager)?;

    // Run migrations on a single connection
    let conn = pool.get()?;
    schema::migrate(&conn)?;

    Ok(pool)
}

/// Fixed-width UTC text so that string comparison orders by time.
pub(crate) fn ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Save one datapoint to the database.
pub fn record_datapoint(pool: &Pool, p: &Datapoint) -> Result<()> {
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO datapoints
             (ts, invocations, errors, input_tokens, output_tokens, duration_ms, model_id, user_id)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        params![
            ts(p.timestamp),
            p.invocations,
            p.errors,
            p.input_tokens,
            p.output_tokens,
            p.duration_ms,
            p.model_id,
            p.user_id
        ],
    )
    .context("Failed to insert datapoint")?;
    Ok(())
}

const AGGREGATE_COLUMNS: &str = "COALESCE(SUM(invocations), 0),
                COALESCE(SUM(errors), 0),
                COALESCE(SUM(input_tokens), 0),
                COALESCE(SUM(output_tokens), 0),
                COALESCE(AVG(duration_ms), 0),
                COUNT(DISTINCT NULLIF(user_id, ''))";

fn window_row(row: &rusqlite::Row<'_>, offset: usize) -> rusqlite::Result<WindowMetrics> {
    let unique_users: i64 = row.get(offset + 5)?;
    Ok(WindowMetrics {
        invocations: row.get(offset)?,
        errors: row.get(offset + 1)?,
        input_tokens: row.get(offset + 2)?,
        output_tokens: row.get(offset + 3)?,
        avg_duration_ms: row.get(offset + 4)?,
        unique_users: unique_users.max(0) as u64,
    })
}

/// Aggregate all datapoints with `start <= ts < end`.
pub fn aggregate_window(pool: &Pool, start: DateTime<Utc>, end: DateTime<Utc>) -> Result<WindowMetrics> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT {} FROM datapoints WHERE ts >= ?1 AND ts < ?2",
        AGGREGATE_COLUMNS
    );
    let m = conn.query_row(&sql, params![ts(start), ts(end)], |row| window_row(row, 0))?;
    Ok(m)
}

/// Same aggregation as [`aggregate_window`], grouped by model id.
pub fn aggregate_by_model(
    pool: &Pool,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
) -> Result<BTreeMap<String, WindowMetrics>> {
    let conn = pool.get()?;
    let sql = format!(
        "SELECT COALESCE(model_id, ?3) AS model, {}
         FROM datapoints
         WHERE ts >= ?1 AND ts < ?2
         GROUP BY model",
        AGGREGATE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt.query_map(params![ts(start), ts(end), UNATTRIBUTED_MODEL], |row| {
        Ok((row.get::<_, String>(0)?, window_row(row, 1)?))
    })?;

    let mut models = BTreeMap::new();
    for row in rows {
        let (model, metrics) = row?;
        models.insert(model, metrics);
    }
    Ok(models)
}

/// Delete datapoints older than `days` days before `now`. Returns rows removed.
pub fn prune_older_than(pool: &Pool, days: u32, now: DateTime<Utc>) -> Result<usize> {
    let Some(cutoff) = now.checked_sub_signed(chrono::Duration::days(i64::from(days))) else {
        return Ok(0);
    };
    let conn = pool.get()?;
    let removed = conn.execute("DELETE FROM datapoints WHERE ts < ?1", params![ts(cutoff)])?;
    Ok(removed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_pool() -> (tempfile::TempDir, Pool) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("store.db");
        let pool = open_pool(path.to_str().unwrap()).unwrap();
        (dir, pool)
    }

    fn at(hour: u32, minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, hour, minute, 0).unwrap()
    }

    fn dp(t: DateTime<Utc>, invocations: f64, errors: f64, duration_ms: f64) -> Datapoint {
        Datapoint {
            timestamp: t,
            invocations,
            errors,
            input_tokens: 10.0,
            output_tokens: 5.0,
            duration_ms,
            model_id: None,
            user_id: None,
        }
    }

    fn attributed(t: DateTime<Utc>, model: Option<&str>, user: Option<&str>, invocations: f64) -> Datapoint {
        Datapoint {
            model_id: model.map(String::from),
            user_id: user.map(String::from),
            ..dp(t, invocations, 0.0, 100.0)
        }
    }

    #[test]
    fn test_aggregate_window_is_half_open() -> Result<()> {
        let (_dir, pool) = temp_pool();
        record_datapoint(&pool, &dp(at(10, 0), 10.0, 1.0, 100.0))?;
        record_datapoint(&pool, &dp(at(10, 55), 20.0, 1.0, 300.0))?;
        // Belongs to the next hour
        record_datapoint(&pool, &dp(at(11, 0), 500.0, 0.0, 900.0))?;

        let m = aggregate_window(&pool, at(10, 0), at(11, 0))?;
        assert_eq!(m.invocations, 30.0);
        assert_eq!(m.errors, 2.0);
        assert_eq!(m.input_tokens, 20.0);
        assert_eq!(m.avg_duration_ms, 200.0);
        Ok(())
    }

    #[test]
    fn test_empty_window_is_zero() -> Result<()> {
        let (_dir, pool) = temp_pool();
        let m = aggregate_window(&pool, at(1, 0), at(2, 0))?;
        assert_eq!(m, WindowMetrics::default());
        Ok(())
    }

    #[test]
    fn test_prune_older_than() -> Result<()> {
        let (_dir, pool) = temp_pool();
        let now = at(12, 0);
        record_datapoint(&pool, &dp(now - chrono::Duration::days(40), 1.0, 0.0, 1.0))?;
        record_datapoint(&pool, &dp(now - chrono::Duration::days(2), 1.0, 0.0, 1.0))?;

        assert_eq!(prune_older_than(&pool, 30, now)?, 1);
        let m = aggregate_window(&pool, now - chrono::Duration::days(60), now)?;
        assert_eq!(m.invocations, 1.0);
        Ok(())
    }

    #[test]
    fn test_aggregate_by_model() -> Result<()> {
        let (_dir, pool) = temp_pool();
        record_datapoint(&pool, &attributed(at(10, 5), Some("anthropic.claude-v2"), Some("alice"), 7.0))?;
        record_datapoint(&pool, &attributed(at(10, 15), Some("anthropic.claude-v2"), Some("bob"), 3.0))?;
        record_datapoint(&pool, &attributed(at(10, 25), Some("amazon.titan-text-express-v1"), Some("alice"), 4.0))?;
        record_datapoint(&pool, &attributed(at(10, 35), None, None, 1.0))?;
        record_datapoint(&pool, &attributed(at(11, 0), Some("ai21.j2-ultra-v1"), None, 9.0))?;

        let models = aggregate_by_model(&pool, at(10, 0), at(11, 0))?;
        assert_eq!(models.len(), 3);
        assert_eq!(models["anthropic.claude-v2"].invocations, 10.0);
        assert_eq!(models["anthropic.claude-v2"].input_tokens, 20.0);
        assert_eq!(models["anthropic.claude-v2"].unique_users, 2);
        assert_eq!(models["amazon.titan-text-express-v1"].invocations, 4.0);
        assert_eq!(models[UNATTRIBUTED_MODEL].invocations, 1.0);

        let total = aggregate_window(&pool, at(10, 0), at(11, 0))?;
        assert_eq!(total.invocations, 15.0);
        assert_eq!(total.unique_users, 2);
        Ok(())
    }

    #[test]
    fn test_prune_with_huge_retention_keeps_everything() -> Result<()> {
        let (_dir, pool) = temp_pool();
        let now = at(12, 0);
        record_datapoint(&pool, &dp(now - chrono::Duration::days(400), 1.0, 0.0, 1.0))?;
        assert_eq!(prune_older_than(&pool, u32::MAX, now)?, 0);
        Ok(())
    }
}
