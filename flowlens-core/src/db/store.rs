//! Flow store: durable keyed persistence with point lookup and
//! time-ordered scan.
//!
//! Each flow is stored as one row in `flows`: a handful of denormalized
//! columns for filtering and sorting, plus the full serialized body for
//! lossless retrieval. Annotations live in `flow_annotations` so annotation
//! writes stay cheap regardless of payload size.
//!
//! Scan isolation is read-committed: a scan observes rows committed at
//! statement time, and rows deleted concurrently are simply omitted.

use crate::error::{Error, Result};
use crate::types::{Annotations, Flow};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use std::sync::{Arc, Mutex, MutexGuard};

/// Database handle: one SQLite connection behind a mutex
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: &Path) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(path)?;

        // Enable foreign keys and WAL mode for better concurrency
        conn.execute_batch(
            "
            PRAGMA foreign_keys = ON;
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA cache_size = -64000;  -- 64MB cache
            ",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open an in-memory database (for testing)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute("PRAGMA foreign_keys = ON", [])?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Run migrations on this database
    pub fn migrate(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        super::schema::run_migrations(&conn)
    }

    /// Get the underlying connection (for advanced use)
    pub fn connection(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap()
    }
}

/// Inclusive time range for scans. `None` bounds are unconstrained.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Keyed flow persistence over a shared [`Database`]
#[derive(Clone)]
pub struct FlowStore {
    db: Arc<Database>,
}

impl FlowStore {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Insert or replace a flow.
    ///
    /// The body row is rewritten; an existing annotation row is left
    /// untouched so re-committing a flow never clobbers user annotations.
    pub fn put(&self, flow: &Flow) -> Result<()> {
        // Annotations are stored separately; the body never carries them.
        let mut body_flow = flow.clone();
        body_flow.annotations = Annotations::default();
        let body = serde_json::to_string(&body_flow)?;

        let conn = self.db.connection();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::Storage(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO flows (id, flow_type, state, provider, model, credential_id,
                               created_at, duration_ms, input_tokens, output_tokens,
                               total_tokens, content_length, streamed, has_tool_calls,
                               has_thinking, has_error, body)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)
            ON CONFLICT(id) DO UPDATE SET
                flow_type = excluded.flow_type,
                state = excluded.state,
                provider = excluded.provider,
                model = excluded.model,
                credential_id = excluded.credential_id,
                duration_ms = excluded.duration_ms,
                input_tokens = excluded.input_tokens,
                output_tokens = excluded.output_tokens,
                total_tokens = excluded.total_tokens,
                content_length = excluded.content_length,
                streamed = excluded.streamed,
                has_tool_calls = excluded.has_tool_calls,
                has_thinking = excluded.has_thinking,
                has_error = excluded.has_error,
                body = excluded.body
            "#,
            params![
                flow.id,
                flow.flow_type.as_str(),
                flow.state.kind().as_str(),
                flow.metadata.provider,
                flow.request.model,
                flow.metadata.credential_id,
                flow.timestamps.created_at.to_rfc3339(),
                flow.timestamps.duration_ms,
                flow.state.response().and_then(|r| r.usage.input_tokens),
                flow.state.response().and_then(|r| r.usage.output_tokens),
                flow.total_tokens(),
                flow.content_length(),
                flow.is_streamed() as i32,
                flow.has_tool_calls() as i32,
                flow.has_thinking() as i32,
                flow.state.error().is_some() as i32,
                body,
            ],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.execute(
            r#"
            INSERT INTO flow_annotations (flow_id, starred, marker, comment, tags)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(flow_id) DO NOTHING
            "#,
            params![
                flow.id,
                flow.annotations.starred as i32,
                flow.annotations.marker,
                flow.annotations.comment,
                serde_json::to_string(&flow.annotations.tags)?,
            ],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.commit().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    /// Point lookup by id
    pub fn get(&self, id: &str) -> Result<Option<Flow>> {
        let conn = self.db.connection();
        conn.query_row(
            r#"
            SELECT f.body, a.starred, a.marker, a.comment, a.tags
            FROM flows f
            LEFT JOIN flow_annotations a ON a.flow_id = f.id
            WHERE f.id = ?1
            "#,
            [id],
            Self::row_to_flow,
        )
        .optional()
        .map_err(Error::from)
    }

    /// Scan flows in descending created_at order, optionally bounded by a
    /// time range and a row limit
    pub fn scan_by_time_desc(&self, range: TimeRange, limit: Option<u32>) -> Result<Vec<Flow>> {
        let mut sql = String::from(
            r#"
            SELECT f.body, a.starred, a.marker, a.comment, a.tags
            FROM flows f
            LEFT JOIN flow_annotations a ON a.flow_id = f.id
            "#,
        );
        let mut clauses: Vec<String> = Vec::new();
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(start) = range.start {
            clauses.push(format!("f.created_at >= ?{}", args.len() + 1));
            args.push(Box::new(start.to_rfc3339()));
        }
        if let Some(end) = range.end {
            clauses.push(format!("f.created_at <= ?{}", args.len() + 1));
            args.push(Box::new(end.to_rfc3339()));
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY f.created_at DESC, f.id");
        if let Some(limit) = limit {
            sql.push_str(&format!(" LIMIT ?{}", args.len() + 1));
            args.push(Box::new(limit as i64));
        }

        let conn = self.db.connection();
        let mut stmt = conn.prepare(&sql)?;
        let flows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                Self::row_to_flow,
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(flows)
    }

    /// Delete one flow. Annotation and search rows cascade with it.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let conn = self.db.connection();
        let affected = conn
            .execute("DELETE FROM flows WHERE id = ?1", [id])
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(affected > 0)
    }

    /// Delete a batch of flows, returning how many existed
    pub fn delete_many(&self, ids: &[String]) -> Result<u64> {
        let conn = self.db.connection();
        let tx = conn
            .unchecked_transaction()
            .map_err(|e| Error::Storage(e.to_string()))?;
        let mut count = 0u64;
        for id in ids {
            count += tx
                .execute("DELETE FROM flows WHERE id = ?1", [id])
                .map_err(|e| Error::Storage(e.to_string()))? as u64;
        }
        tx.commit().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(count)
    }

    /// Delete every flow created before the given timestamp.
    ///
    /// Search and annotation rows cascade in the same statement, so store
    /// and index deletions are always paired.
    pub fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let conn = self.db.connection();
        let affected = conn
            .execute(
                "DELETE FROM flows WHERE created_at < ?1",
                [cutoff.to_rfc3339()],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(affected as u64)
    }

    /// Total number of stored flows
    pub fn count(&self) -> Result<u64> {
        let conn = self.db.connection();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM flows", [], |r| r.get(0))?;
        Ok(count as u64)
    }

    /// Map a joined flows/annotations row back to a [`Flow`]
    pub(crate) fn row_to_flow(row: &Row) -> rusqlite::Result<Flow> {
        let body: String = row.get(0)?;
        let starred: Option<i32> = row.get(1)?;
        let marker: Option<String> = row.get(2)?;
        let comment: Option<String> = row.get(3)?;
        let tags_json: Option<String> = row.get(4)?;

        let mut flow: Flow = serde_json::from_str(&body).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;

        flow.annotations = Annotations {
            starred: starred.unwrap_or(0) != 0,
            marker,
            comment,
            tags: tags_json
                .and_then(|t| serde_json::from_str(&t).ok())
                .unwrap_or_default(),
        };
        Ok(flow)
    }
}
