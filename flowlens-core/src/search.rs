//! Full-text search over flow request/response content
//!
//! Documents are stored lowercased in the `flow_search` table, one per flow.
//! A query is tokenized case-insensitively into terms; a document matches
//! when it contains every term as a substring. Substring matching (rather
//! than word-boundary tokenization) is what guarantees that any literal
//! substring of a stored body is findable.
//!
//! Scoring: total term occurrences divided by sqrt(document length in
//! chars). Deterministic, and strictly monotonic in match count for a fixed
//! document. Ties break on flow id.

use crate::db::Database;
use crate::error::Result;
use crate::types::{FlowSearchHit, SearchHit};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Default width of result snippets, in characters
pub const DEFAULT_SNIPPET_WIDTH: usize = 120;

/// Search index over a shared [`Database`]
#[derive(Clone)]
pub struct SearchIndex {
    db: Arc<Database>,
    snippet_width: usize,
}

impl SearchIndex {
    pub fn new(db: Arc<Database>) -> Self {
        Self {
            db,
            snippet_width: DEFAULT_SNIPPET_WIDTH,
        }
    }

    pub fn with_snippet_width(db: Arc<Database>, snippet_width: usize) -> Self {
        Self { db, snippet_width }
    }

    /// Index the searchable text for a flow, replacing any prior entry
    pub fn index(&self, id: &str, text: &str) -> Result<()> {
        let conn = self.db.connection();
        conn.execute(
            "INSERT OR REPLACE INTO flow_search (flow_id, content) VALUES (?1, ?2)",
            rusqlite::params![id, text.to_lowercase()],
        )?;
        Ok(())
    }

    /// Remove a flow's entry from the index
    pub fn remove(&self, id: &str) -> Result<()> {
        let conn = self.db.connection();
        conn.execute("DELETE FROM flow_search WHERE flow_id = ?1", [id])?;
        Ok(())
    }

    /// Search for flows matching the query, best first
    pub fn search(&self, query: &str, limit: usize) -> Result<Vec<SearchHit>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }

        let mut hits: Vec<SearchHit> = self
            .matching_documents(&terms)?
            .into_iter()
            .map(|(id, content)| {
                let score = score(&content, &terms);
                let snippet = snippet(&content, &terms[0], self.snippet_width);
                SearchHit { id, score, snippet }
            })
            .collect();

        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        hits.truncate(limit);
        Ok(hits)
    }

    /// Search joined with flow context, for the external boundary
    pub fn search_flows(&self, query: &str, limit: usize) -> Result<Vec<FlowSearchHit>> {
        let hits = self.search(query, limit)?;
        if hits.is_empty() {
            return Ok(Vec::new());
        }

        let conn = self.db.connection();
        let mut stmt = conn.prepare(
            "SELECT created_at, model, provider FROM flows WHERE id = ?1",
        )?;

        let mut out = Vec::with_capacity(hits.len());
        for hit in hits {
            let row = stmt
                .query_row([&hit.id], |row| {
                    let created_at: String = row.get(0)?;
                    let model: Option<String> = row.get(1)?;
                    let provider: Option<String> = row.get(2)?;
                    Ok((created_at, model, provider))
                })
                .map(Some)
                .or_else(|e| match e {
                    rusqlite::Error::QueryReturnedNoRows => Ok(None),
                    other => Err(other),
                })?;

            // A flow deleted between the two statements is dropped from
            // the result rather than surfaced as an error.
            if let Some((created_at, model, provider)) = row {
                out.push(FlowSearchHit {
                    id: hit.id,
                    created_at: parse_ts(&created_at),
                    model,
                    provider,
                    snippet: hit.snippet,
                    score: hit.score,
                });
            }
        }
        Ok(out)
    }

    /// All flow ids matching the query, unranked (for filter intersection)
    pub fn matching_ids(&self, query: &str) -> Result<Vec<String>> {
        let terms = tokenize(query);
        if terms.is_empty() {
            return Ok(Vec::new());
        }
        Ok(self
            .matching_documents(&terms)?
            .into_iter()
            .map(|(id, _)| id)
            .collect())
    }

    fn matching_documents(&self, terms: &[String]) -> Result<Vec<(String, String)>> {
        let mut sql = String::from("SELECT flow_id, content FROM flow_search WHERE ");
        let clauses: Vec<String> = (0..terms.len())
            .map(|i| format!("instr(content, ?{}) > 0", i + 1))
            .collect();
        sql.push_str(&clauses.join(" AND "));

        let conn = self.db.connection();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(
                rusqlite::params_from_iter(terms.iter()),
                |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)),
            )?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}

fn parse_ts(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// Lowercase whitespace tokenization of a query
fn tokenize(query: &str) -> Vec<String> {
    query
        .split_whitespace()
        .map(|t| t.to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Total term occurrences over sqrt of document length
fn score(content: &str, terms: &[String]) -> f64 {
    let occurrences: usize = terms.iter().map(|t| content.matches(t.as_str()).count()).sum();
    let len = content.chars().count().max(1);
    occurrences as f64 / (len as f64).sqrt()
}

/// Fixed-width window centered on the first match of the first term
fn snippet(content: &str, term: &str, width: usize) -> String {
    let match_byte = content.find(term).unwrap_or(0);
    let match_char = content[..match_byte].chars().count();

    let total_chars = content.chars().count();
    let start = match_char.saturating_sub(width / 2);
    let window: String = content.chars().skip(start).take(width).collect();

    let mut out = String::new();
    if start > 0 {
        out.push_str("...");
    }
    out.push_str(window.trim());
    if start + width < total_chars {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index() -> SearchIndex {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        // Search rows reference flows; insert bare flow rows for the ids used here.
        {
            let conn = db.connection();
            for id in ["f1", "f2", "f3"] {
                conn.execute(
                    "INSERT INTO flows (id, flow_type, state, created_at, body)
                     VALUES (?1, 'chat_completions', 'completed', '2026-01-01T00:00:00+00:00', '{}')",
                    [id],
                )
                .unwrap();
            }
        }
        SearchIndex::new(db)
    }

    #[test]
    fn test_exact_substring_recall() {
        let idx = index();
        idx.index("f1", "Summarize the quarterly revenue report").unwrap();
        idx.index("f2", "Write a haiku about rust").unwrap();

        let hits = idx.search("quarterly revenue", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "f1");
    }

    #[test]
    fn test_search_is_case_insensitive() {
        let idx = index();
        idx.index("f1", "The Capital Of France").unwrap();
        let hits = idx.search("CAPITAL of france", 10).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn test_all_terms_required() {
        let idx = index();
        idx.index("f1", "alpha beta").unwrap();
        idx.index("f2", "alpha gamma").unwrap();

        let hits = idx.search("alpha beta", 10).unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "f1");
    }

    #[test]
    fn test_score_monotonic_in_match_count() {
        let idx = index();
        idx.index("f1", "rust rust rust padding padding").unwrap();
        idx.index("f2", "rust padding padding padding pad").unwrap();

        let hits = idx.search("rust", 10).unwrap();
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].id, "f1", "more occurrences should rank higher");
        assert!(hits[0].score > hits[1].score);
    }

    #[test]
    fn test_index_replaces_prior_entry() {
        let idx = index();
        idx.index("f1", "old text").unwrap();
        idx.index("f1", "new text").unwrap();

        assert!(idx.search("old", 10).unwrap().is_empty());
        assert_eq!(idx.search("new", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_remove() {
        let idx = index();
        idx.index("f1", "findable").unwrap();
        idx.remove("f1").unwrap();
        assert!(idx.search("findable", 10).unwrap().is_empty());
    }

    #[test]
    fn test_snippet_centered_on_first_match() {
        let long = format!("{} needle {}", "x".repeat(300), "y".repeat(300));
        let s = snippet(&long.to_lowercase(), "needle", 40);
        assert!(s.contains("needle"));
        assert!(s.starts_with("..."));
        assert!(s.ends_with("..."));
        assert!(s.len() < 60);
    }

    #[test]
    fn test_empty_query_matches_nothing() {
        let idx = index();
        idx.index("f1", "anything").unwrap();
        assert!(idx.search("   ", 10).unwrap().is_empty());
    }
}
