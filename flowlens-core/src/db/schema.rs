//! Database schema and migrations
//!
//! Uses SQLite with embedded migrations managed via PRAGMA user_version.
//!
//! Layout contract: flows are keyed by id with a time-ordered index;
//! annotations and search documents live in their own tables so that
//! annotation writes and index maintenance never rewrite the flow body.

use rusqlite::Connection;

/// Current schema version
pub const SCHEMA_VERSION: i32 = 1;

/// SQL migrations, indexed by version number
const MIGRATIONS: &[&str] = &[
    // Version 1: Initial schema
    r#"
    -- ============================================
    -- Flow bodies (immutable once terminal)
    -- ============================================

    CREATE TABLE IF NOT EXISTS flows (
        id              TEXT PRIMARY KEY,
        flow_type       TEXT NOT NULL,
        state           TEXT NOT NULL,       -- 'pending', 'streaming', 'completed', 'failed', 'cancelled'
        provider        TEXT,
        model           TEXT,
        credential_id   TEXT,
        created_at      DATETIME NOT NULL,
        duration_ms     INTEGER,
        input_tokens    INTEGER,
        output_tokens   INTEGER,
        total_tokens    INTEGER,
        content_length  INTEGER NOT NULL DEFAULT 0,
        streamed        INTEGER NOT NULL DEFAULT 0,
        has_tool_calls  INTEGER NOT NULL DEFAULT 0,
        has_thinking    INTEGER NOT NULL DEFAULT 0,
        has_error       INTEGER NOT NULL DEFAULT 0,

        -- Lossless capture: the full serialized flow, minus annotations
        body            JSON NOT NULL
    );

    CREATE INDEX IF NOT EXISTS idx_flows_created ON flows(created_at DESC);
    CREATE INDEX IF NOT EXISTS idx_flows_provider ON flows(provider);
    CREATE INDEX IF NOT EXISTS idx_flows_model ON flows(model);
    CREATE INDEX IF NOT EXISTS idx_flows_state ON flows(state);

    -- ============================================
    -- Annotations (mutable, independent of the body)
    -- ============================================

    CREATE TABLE IF NOT EXISTS flow_annotations (
        flow_id         TEXT PRIMARY KEY REFERENCES flows(id) ON DELETE CASCADE,
        starred         INTEGER NOT NULL DEFAULT 0,
        marker          TEXT,
        comment         TEXT,
        tags            JSON NOT NULL DEFAULT '[]'
    );

    -- ============================================
    -- Full-text search documents (regenerable)
    -- ============================================

    CREATE TABLE IF NOT EXISTS flow_search (
        flow_id         TEXT PRIMARY KEY REFERENCES flows(id) ON DELETE CASCADE,
        content         TEXT NOT NULL
    );
    "#,
];

/// Run all pending migrations
pub fn run_migrations(conn: &Connection) -> crate::error::Result<()> {
    let current_version: i32 = conn
        .query_row("PRAGMA user_version", [], |r| r.get(0))
        .unwrap_or(0);

    tracing::debug!(
        current_version,
        target_version = SCHEMA_VERSION,
        "Checking database migrations"
    );

    for (i, migration) in MIGRATIONS.iter().enumerate() {
        let version = (i + 1) as i32;
        if version > current_version {
            tracing::info!(version, "Running migration");
            conn.execute_batch(migration)?;
            conn.execute(&format!("PRAGMA user_version = {}", version), [])?;
        }
    }

    Ok(())
}

/// Get the current schema version from the database
pub fn get_schema_version(conn: &Connection) -> crate::error::Result<i32> {
    let version: i32 = conn.query_row("PRAGMA user_version", [], |r| r.get(0))?;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_idempotent() {
        let conn = Connection::open_in_memory().unwrap();

        // Run migrations twice - should be idempotent
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();

        let version = get_schema_version(&conn).unwrap();
        assert_eq!(version, SCHEMA_VERSION);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables = ["flows", "flow_annotations", "flow_search"];

        for table in tables {
            let exists: i32 = conn
                .query_row(
                    "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name=?",
                    [table],
                    |r| r.get(0),
                )
                .unwrap();
            assert_eq!(exists, 1, "Table {} should exist", table);
        }
    }

    #[test]
    fn test_cascading_tables_reference_flows() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        for table in ["flow_annotations", "flow_search"] {
            let fk_count: i32 = conn
                .prepare(&format!("PRAGMA foreign_key_list({})", table))
                .unwrap()
                .query_map([], |row| row.get::<_, String>(2))
                .unwrap()
                .filter_map(|r| r.ok())
                .filter(|t| t == "flows")
                .count() as i32;
            assert!(fk_count >= 1, "{} should reference flows", table);
        }
    }
}
