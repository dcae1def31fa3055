//! Aggregate statistics over the flow store
//!
//! Stats are a pure function of current store contents plus an optional
//! filter: everything is computed by SQL aggregation at call time, so there
//! are no incremental counters to drift from ground truth.

use crate::db::Database;
use crate::error::Result;
use crate::query::compile_filter;
use crate::search::SearchIndex;
use crate::types::{FlowFilter, FlowStats, GroupStats, LatencyStats, TokenStats};
use std::sync::Arc;

/// Stats aggregator over a shared database
#[derive(Clone)]
pub struct StatsAggregator {
    db: Arc<Database>,
    index: SearchIndex,
}

impl StatsAggregator {
    pub fn new(db: Arc<Database>, index: SearchIndex) -> Self {
        Self { db, index }
    }

    /// Compute aggregates over the store, optionally narrowed by a filter.
    ///
    /// Latency aggregates cover only flows with a known duration. The
    /// success rate is 0.0 (never NaN) when no flows match.
    pub fn flow_stats(&self, filter: &FlowFilter) -> Result<FlowStats> {
        let compiled = match compile_filter(filter, &self.index)? {
            Some(compiled) => compiled,
            None => return Ok(FlowStats::default()),
        };

        let conn = self.db.connection();
        let from = format!(
            "FROM flows f LEFT JOIN flow_annotations a ON a.flow_id = f.id {}",
            compiled.where_sql
        );
        let params = rusqlite::params_from_iter(compiled.args.iter().map(|a| a.as_ref()));

        let totals_sql = format!(
            "SELECT COUNT(*),
                    COALESCE(SUM(CASE WHEN f.state = 'completed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN f.state = 'failed' THEN 1 ELSE 0 END), 0),
                    COALESCE(SUM(CASE WHEN f.state = 'cancelled' THEN 1 ELSE 0 END), 0),
                    MIN(f.duration_ms),
                    AVG(f.duration_ms),
                    MAX(f.duration_ms),
                    COALESCE(SUM(f.input_tokens), 0),
                    COALESCE(SUM(f.output_tokens), 0),
                    COALESCE(SUM(f.total_tokens), 0),
                    AVG(f.total_tokens)
             {}",
            from
        );

        type TotalsRow = (
            i64,
            i64,
            i64,
            i64,
            Option<i64>,
            Option<f64>,
            Option<i64>,
            i64,
            i64,
            i64,
            Option<f64>,
        );
        let (
            total,
            successful,
            failed,
            cancelled,
            min_ms,
            avg_ms,
            max_ms,
            total_input,
            total_output,
            total_tokens,
            avg_total,
        ): TotalsRow = conn.query_row(&totals_sql, params, |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
                row.get(6)?,
                row.get(7)?,
                row.get(8)?,
                row.get(9)?,
                row.get(10)?,
            ))
        })?;

        let success_rate = if total > 0 {
            successful as f64 / total as f64
        } else {
            0.0
        };

        let by_provider = self.group_by(&conn, "COALESCE(f.provider, 'unknown')", &compiled)?;
        let by_model = self.group_by(&conn, "COALESCE(f.model, 'unknown')", &compiled)?;
        let by_state = self.group_by(&conn, "f.state", &compiled)?;

        Ok(FlowStats {
            total: total as u64,
            successful: successful as u64,
            failed: failed as u64,
            cancelled: cancelled as u64,
            success_rate,
            latency: LatencyStats {
                min_ms,
                avg_ms,
                max_ms,
            },
            tokens: TokenStats {
                total_input,
                total_output,
                total: total_tokens,
                avg_total,
            },
            by_provider,
            by_model,
            by_state,
        })
    }

    fn group_by(
        &self,
        conn: &rusqlite::Connection,
        key_expr: &str,
        compiled: &crate::query::FilterSql,
    ) -> Result<Vec<GroupStats>> {
        let sql = format!(
            "SELECT {key} AS grp, COUNT(*), COALESCE(SUM(f.total_tokens), 0), AVG(f.duration_ms)
             FROM flows f LEFT JOIN flow_annotations a ON a.flow_id = f.id
             {where_sql}
             GROUP BY grp ORDER BY COUNT(*) DESC, grp",
            key = key_expr,
            where_sql = compiled.where_sql,
        );
        let mut stmt = conn.prepare(&sql)?;
        let groups = stmt
            .query_map(
                rusqlite::params_from_iter(compiled.args.iter().map(|a| a.as_ref())),
                |row| {
                    Ok(GroupStats {
                        key: row.get(0)?,
                        count: row.get::<_, i64>(1)? as u64,
                        total_tokens: row.get(2)?,
                        avg_duration_ms: row.get(3)?,
                    })
                },
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(groups)
    }
}
