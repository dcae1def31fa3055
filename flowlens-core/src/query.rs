//! Query engine: filter + sort + page over the flow store
//!
//! Structural predicates compile to a SQL WHERE clause over the denormalized
//! `flows` columns; free-text predicates route through the search index and
//! intersect with the structural candidates by id. All filter fields AND
//! together.

use crate::db::{Database, FlowStore};
use crate::error::Result;
use crate::search::SearchIndex;
use crate::types::{Flow, FlowFilter, FlowPage, SortBy};
use std::collections::HashSet;
use std::sync::Arc;

/// Compiled filter: WHERE clause (possibly empty) plus bound arguments
pub(crate) struct FilterSql {
    pub where_sql: String,
    pub args: Vec<Box<dyn rusqlite::ToSql>>,
}

/// Compile a filter against the search index.
///
/// Returns `None` when a free-text predicate matched no flows at all, in
/// which case the whole query is empty and no SQL needs to run.
pub(crate) fn compile_filter(
    filter: &FlowFilter,
    index: &SearchIndex,
) -> Result<Option<FilterSql>> {
    let mut clauses: Vec<String> = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

    if let Some(start) = filter.start_time {
        clauses.push(format!("f.created_at >= ?{}", args.len() + 1));
        args.push(Box::new(start.to_rfc3339()));
    }
    if let Some(end) = filter.end_time {
        clauses.push(format!("f.created_at <= ?{}", args.len() + 1));
        args.push(Box::new(end.to_rfc3339()));
    }

    if let Some(providers) = &filter.providers {
        let (clause, mut list) = in_list("f.provider", providers.iter().cloned(), args.len());
        clauses.push(clause);
        args.append(&mut list);
    }
    if let Some(models) = &filter.models {
        let (clause, mut list) = in_list("f.model", models.iter().cloned(), args.len());
        clauses.push(clause);
        args.append(&mut list);
    }
    if let Some(states) = &filter.states {
        let (clause, mut list) = in_list(
            "f.state",
            states.iter().map(|s| s.as_str().to_string()),
            args.len(),
        );
        clauses.push(clause);
        args.append(&mut list);
    }
    if let Some(flow_types) = &filter.flow_types {
        let (clause, mut list) = in_list("f.flow_type", flow_types.iter().cloned(), args.len());
        clauses.push(clause);
        args.append(&mut list);
    }

    if let Some(has_error) = filter.has_error {
        clauses.push(format!("f.has_error = ?{}", args.len() + 1));
        args.push(Box::new(has_error as i32));
    }
    if let Some(has_tool_calls) = filter.has_tool_calls {
        clauses.push(format!("f.has_tool_calls = ?{}", args.len() + 1));
        args.push(Box::new(has_tool_calls as i32));
    }
    if let Some(has_thinking) = filter.has_thinking {
        clauses.push(format!("f.has_thinking = ?{}", args.len() + 1));
        args.push(Box::new(has_thinking as i32));
    }
    if let Some(streaming) = filter.streaming {
        clauses.push(format!("f.streamed = ?{}", args.len() + 1));
        args.push(Box::new(streaming as i32));
    }

    if let Some(min) = filter.min_tokens {
        clauses.push(format!("f.total_tokens >= ?{}", args.len() + 1));
        args.push(Box::new(min));
    }
    if let Some(max) = filter.max_tokens {
        clauses.push(format!("f.total_tokens <= ?{}", args.len() + 1));
        args.push(Box::new(max));
    }
    if let Some(min) = filter.min_duration_ms {
        clauses.push(format!("f.duration_ms >= ?{}", args.len() + 1));
        args.push(Box::new(min));
    }
    if let Some(max) = filter.max_duration_ms {
        clauses.push(format!("f.duration_ms <= ?{}", args.len() + 1));
        args.push(Box::new(max));
    }

    if let Some(credential_id) = &filter.credential_id {
        clauses.push(format!("f.credential_id = ?{}", args.len() + 1));
        args.push(Box::new(credential_id.clone()));
    }
    if filter.starred_only.unwrap_or(false) {
        clauses.push("a.starred = 1".to_string());
    }

    // Tag filter: the flow must carry at least one of the listed tags
    if let Some(tags) = &filter.tags {
        if !tags.is_empty() {
            let mut tag_clauses = Vec::new();
            for tag in tags {
                let n = args.len() + 1;
                tag_clauses.push(format!(
                    "EXISTS (SELECT 1 FROM json_each(a.tags) WHERE json_each.value = ?{})",
                    n
                ));
                args.push(Box::new(tag.clone()));
            }
            clauses.push(format!("({})", tag_clauses.join(" OR ")));
        }
    }

    // Free-text predicates: resolve through the search index and intersect
    let mut search_ids: Option<HashSet<String>> = None;
    for query in [&filter.content_search, &filter.request_search]
        .into_iter()
        .flatten()
    {
        let ids: HashSet<String> = index.matching_ids(query)?.into_iter().collect();
        search_ids = Some(match search_ids {
            None => ids,
            Some(prev) => prev.intersection(&ids).cloned().collect(),
        });
    }
    if let Some(ids) = search_ids {
        if ids.is_empty() {
            return Ok(None);
        }
        // The id set rides in one JSON-array parameter; binding one
        // placeholder per id would trip SQLite's variable limit on large
        // match sets.
        let ids: Vec<String> = ids.into_iter().collect();
        clauses.push(format!(
            "f.id IN (SELECT value FROM json_each(?{}))",
            args.len() + 1
        ));
        args.push(Box::new(serde_json::to_string(&ids)?));
    }

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("WHERE {}", clauses.join(" AND "))
    };

    Ok(Some(FilterSql { where_sql, args }))
}

fn in_list(
    column: &str,
    values: impl Iterator<Item = String>,
    offset: usize,
) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
    let mut placeholders = Vec::new();
    let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();
    for (i, value) in values.enumerate() {
        placeholders.push(format!("?{}", offset + i + 1));
        args.push(Box::new(value));
    }
    if placeholders.is_empty() {
        // An explicitly empty set matches nothing
        ("0 = 1".to_string(), args)
    } else {
        (format!("{} IN ({})", column, placeholders.join(", ")), args)
    }
}

/// Query engine over a shared store and index
#[derive(Clone)]
pub struct QueryEngine {
    db: Arc<Database>,
    index: SearchIndex,
    max_page_size: u32,
}

impl QueryEngine {
    pub fn new(db: Arc<Database>, index: SearchIndex, max_page_size: u32) -> Self {
        Self {
            db,
            index,
            max_page_size,
        }
    }

    /// Run a filtered, sorted, paged query.
    ///
    /// `page` is 1-based; `page_size` is clamped to the configured maximum
    /// rather than rejected. A page beyond the last returns empty flows with
    /// correct metadata, not an error.
    pub fn query_flows(
        &self,
        filter: &FlowFilter,
        sort_by: SortBy,
        sort_desc: bool,
        page: u32,
        page_size: u32,
    ) -> Result<FlowPage> {
        let page = page.max(1);
        let page_size = page_size.clamp(1, self.max_page_size);

        let compiled = match compile_filter(filter, &self.index)? {
            Some(compiled) => compiled,
            None => return Ok(empty_page(page, page_size)),
        };

        let conn = self.db.connection();

        let count_sql = format!(
            "SELECT COUNT(*) FROM flows f LEFT JOIN flow_annotations a ON a.flow_id = f.id {}",
            compiled.where_sql
        );
        let total: u64 = conn.query_row(
            &count_sql,
            rusqlite::params_from_iter(compiled.args.iter().map(|a| a.as_ref())),
            |r| r.get::<_, i64>(0),
        )? as u64;

        if total == 0 {
            return Ok(empty_page(page, page_size));
        }

        let direction = if sort_desc { "DESC" } else { "ASC" };
        let sort_column = match sort_by {
            SortBy::CreatedAt => "f.created_at",
            SortBy::Duration => "f.duration_ms",
            SortBy::TotalTokens => "f.total_tokens",
            SortBy::ContentLength => "f.content_length",
            SortBy::Model => "f.model",
        };

        let mut args = compiled.args;
        let data_sql = format!(
            "SELECT f.body, a.starred, a.marker, a.comment, a.tags
             FROM flows f LEFT JOIN flow_annotations a ON a.flow_id = f.id
             {} ORDER BY {} {}, f.created_at DESC, f.id LIMIT ?{} OFFSET ?{}",
            compiled.where_sql,
            sort_column,
            direction,
            args.len() + 1,
            args.len() + 2,
        );
        args.push(Box::new(page_size as i64));
        args.push(Box::new(((page - 1) as i64) * page_size as i64));

        let mut stmt = conn.prepare(&data_sql)?;
        let flows = stmt
            .query_map(
                rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
                FlowStore::row_to_flow,
            )?
            .collect::<std::result::Result<Vec<Flow>, _>>()?;

        let total_pages = ((total + page_size as u64 - 1) / page_size as u64) as u32;
        Ok(FlowPage {
            flows,
            total,
            page,
            page_size,
            total_pages,
            has_next: page < total_pages,
            has_prev: page > 1,
        })
    }

    /// All flows matching a filter, newest first (for export)
    pub fn query_all(&self, filter: &FlowFilter) -> Result<Vec<Flow>> {
        let compiled = match compile_filter(filter, &self.index)? {
            Some(compiled) => compiled,
            None => return Ok(Vec::new()),
        };

        let conn = self.db.connection();
        let sql = format!(
            "SELECT f.body, a.starred, a.marker, a.comment, a.tags
             FROM flows f LEFT JOIN flow_annotations a ON a.flow_id = f.id
             {} ORDER BY f.created_at DESC, f.id",
            compiled.where_sql
        );
        let mut stmt = conn.prepare(&sql)?;
        let flows = stmt
            .query_map(
                rusqlite::params_from_iter(compiled.args.iter().map(|a| a.as_ref())),
                FlowStore::row_to_flow,
            )?
            .collect::<std::result::Result<Vec<Flow>, _>>()?;
        Ok(flows)
    }
}

fn empty_page(page: u32, page_size: u32) -> FlowPage {
    FlowPage {
        flows: Vec::new(),
        total: 0,
        page,
        page_size,
        total_pages: 0,
        has_next: false,
        has_prev: page > 1,
    }
}
