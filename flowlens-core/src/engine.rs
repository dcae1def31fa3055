//! Engine facade: one handle wiring storage, search, query, stats,
//! annotations, export, retention, and the recorder together
//!
//! Embedding hosts construct a [`FlowEngine`] once and call it from
//! whatever surface they expose. All components share the same database
//! handle, so every read observes the latest committed write.

use crate::annotations::AnnotationManager;
use crate::config::Config;
use crate::db::{Database, FlowStore};
use crate::error::{Error, Result};
use crate::export::ExportPipeline;
use crate::query::QueryEngine;
use crate::recorder::FlowRecorder;
use crate::retention;
use crate::search::SearchIndex;
use crate::stats::StatsAggregator;
use crate::types::{
    AnnotationPatch, Annotations, ExportOptions, ExportResult, Flow, FlowEvent, FlowFilter,
    FlowPage, FlowSearchHit, FlowStats, SortBy,
};
use std::sync::Arc;
use tokio::sync::broadcast;

/// The capture-and-query engine
pub struct FlowEngine {
    store: FlowStore,
    index: SearchIndex,
    query: QueryEngine,
    stats: StatsAggregator,
    annotations: AnnotationManager,
    export: ExportPipeline,
    recorder: FlowRecorder,
    retention_days: u32,
}

impl FlowEngine {
    /// Open the engine against the configured database path
    pub fn open(config: &Config) -> Result<Self> {
        let db = Database::open(&config.database_path())?;
        Self::build(db, config)
    }

    /// Open an in-memory engine (for testing and ephemeral sessions)
    pub fn open_in_memory(config: &Config) -> Result<Self> {
        let db = Database::open_in_memory()?;
        Self::build(db, config)
    }

    fn build(db: Database, config: &Config) -> Result<Self> {
        db.migrate()?;
        let db = Arc::new(db);

        let store = FlowStore::new(db.clone());
        let index = SearchIndex::with_snippet_width(db.clone(), config.engine.snippet_width);
        let query = QueryEngine::new(db.clone(), index.clone(), config.engine.max_page_size);
        let stats = StatsAggregator::new(db.clone(), index.clone());
        let annotations = AnnotationManager::new(db);
        let export = ExportPipeline::new(
            query.clone(),
            store.clone(),
            config.export.redaction_rules.clone(),
        );
        let recorder = FlowRecorder::new(
            store.clone(),
            index.clone(),
            config.engine.event_capacity,
        );

        Ok(Self {
            store,
            index,
            query,
            stats,
            annotations,
            export,
            recorder,
            retention_days: config.engine.retention_days,
        })
    }

    /// The write path: begin/append/complete/fail live here
    pub fn recorder(&self) -> &FlowRecorder {
        &self.recorder
    }

    // ============================================
    // Reads
    // ============================================

    /// Filtered, sorted, paged flow listing
    pub fn query_flows(
        &self,
        filter: &FlowFilter,
        sort_by: SortBy,
        sort_desc: bool,
        page: u32,
        page_size: u32,
    ) -> Result<FlowPage> {
        self.query
            .query_flows(filter, sort_by, sort_desc, page, page_size)
    }

    /// Full detail of one flow. Checks the live set first, so an in-flight
    /// flow shows its accumulated chunks.
    pub fn get_flow_detail(&self, id: &str) -> Result<Flow> {
        if let Some(live) = self.recorder.live_flow(id) {
            return Ok(live);
        }
        self.store
            .get(id)?
            .ok_or_else(|| Error::NotFound(id.to_string()))
    }

    /// Most recently created flows, newest first
    pub fn get_recent_flows(&self, limit: u32) -> Result<Vec<Flow>> {
        self.store
            .scan_by_time_desc(crate::db::TimeRange::default(), Some(limit))
    }

    /// Free-text search with flow context on each hit
    pub fn search_flows(&self, query: &str, limit: usize) -> Result<Vec<FlowSearchHit>> {
        self.index.search_flows(query, limit)
    }

    /// Aggregates over the store, optionally narrowed by a filter
    pub fn flow_stats(&self, filter: &FlowFilter) -> Result<FlowStats> {
        self.stats.flow_stats(filter)
    }

    // ============================================
    // Annotations
    // ============================================

    pub fn update_flow_annotations(&self, id: &str, patch: &AnnotationPatch) -> Result<Annotations> {
        self.annotations.update(id, patch)
    }

    pub fn add_flow_tag(&self, id: &str, tag: &str) -> Result<Annotations> {
        self.annotations.add_tag(id, tag)
    }

    pub fn remove_flow_tag(&self, id: &str, tag: &str) -> Result<Annotations> {
        self.annotations.remove_tag(id, tag)
    }

    pub fn toggle_flow_star(&self, id: &str) -> Result<bool> {
        self.annotations.toggle_star(id)
    }

    // ============================================
    // Export
    // ============================================

    pub fn export_flows(&self, options: &ExportOptions) -> Result<ExportResult> {
        self.export.export(options)
    }

    pub fn export_flows_by_ids(
        &self,
        ids: &[String],
        options: &ExportOptions,
    ) -> Result<ExportResult> {
        self.export.export_by_ids(ids, options)
    }

    // ============================================
    // Deletion and retention
    // ============================================

    /// Delete one flow and everything attached to it. Returns whether it
    /// existed.
    pub fn delete_flow(&self, id: &str) -> Result<bool> {
        self.store.delete(id)
    }

    /// Delete a batch of flows, returning how many existed
    pub fn delete_flows(&self, ids: &[String]) -> Result<u64> {
        self.store.delete_many(ids)
    }

    /// Delete flows older than the given horizon, returning the number
    /// deleted
    pub fn cleanup_flows(&self, retention_days: u32) -> Result<u64> {
        retention::cleanup_flows(&self.store, retention_days)
    }

    /// Retention pass using the configured horizon
    pub fn run_retention(&self) -> Result<u64> {
        self.cleanup_flows(self.retention_days)
    }

    /// Total flows currently stored
    pub fn flow_count(&self) -> Result<u64> {
        self.store.count()
    }

    // ============================================
    // Notifications
    // ============================================

    /// Subscribe to all live flow events
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.recorder.subscribe()
    }

    /// Subscribe to events for one flow
    pub fn subscribe_flow(&self, id: &str) -> broadcast::Receiver<FlowEvent> {
        self.recorder.subscribe_flow(id)
    }

    // ============================================
    // Maintenance
    // ============================================

    /// Re-derive the whole search index from stored flows. Used after an
    /// upgrade changes what text is indexed.
    pub fn rebuild_search_index(&self) -> Result<u64> {
        let flows = self
            .store
            .scan_by_time_desc(crate::db::TimeRange::default(), None)?;
        let mut indexed = 0u64;
        for flow in &flows {
            self.index.index(&flow.id, &flow.searchable_text())?;
            indexed += 1;
        }
        tracing::info!(indexed, "Search index rebuilt");
        Ok(indexed)
    }
}
