//! Retention: age-based cleanup of old flows

use crate::db::FlowStore;
use crate::error::Result;
use chrono::{Duration, Utc};

/// Delete flows whose creation time is older than the retention horizon.
///
/// A horizon of 0 days deletes everything created before now. Annotations
/// and search entries go with their flows. Returns the number deleted.
pub fn cleanup_flows(store: &FlowStore, retention_days: u32) -> Result<u64> {
    let cutoff = Utc::now() - Duration::days(retention_days as i64);
    let deleted = store.delete_older_than(cutoff)?;
    if deleted > 0 {
        tracing::info!(deleted, retention_days, "Retention cleanup removed old flows");
    } else {
        tracing::debug!(retention_days, "Retention cleanup found nothing to remove");
    }
    Ok(deleted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;
    use crate::types::*;
    use std::collections::HashMap;
    use std::sync::Arc;

    fn flow_created_at(created_at: chrono::DateTime<Utc>) -> Flow {
        let mut flow = Flow::new(
            FlowType::ChatCompletions,
            RequestRecord {
                method: "POST".to_string(),
                path: "/v1/chat/completions".to_string(),
                headers: HashMap::new(),
                body: None,
                messages: vec![],
                system_prompt: None,
                tools: vec![],
                model: None,
                params: serde_json::json!({}),
                size_bytes: 0,
                sent_at: created_at,
            },
            FlowMetadata::default(),
        );
        flow.timestamps.created_at = created_at;
        flow
    }

    #[test]
    fn test_cleanup_respects_horizon() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let store = FlowStore::new(db);

        let now = Utc::now();
        let old = flow_created_at(now - Duration::days(40));
        let recent = flow_created_at(now - Duration::days(5));
        store.put(&old).unwrap();
        store.put(&recent).unwrap();

        let deleted = cleanup_flows(&store, 30).unwrap();
        assert_eq!(deleted, 1);
        assert!(store.get(&old.id).unwrap().is_none());
        assert!(store.get(&recent.id).unwrap().is_some());
    }

    #[test]
    fn test_zero_day_horizon_deletes_everything_past() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let store = FlowStore::new(db);

        store
            .put(&flow_created_at(Utc::now() - Duration::minutes(1)))
            .unwrap();
        let deleted = cleanup_flows(&store, 0).unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(store.count().unwrap(), 0);
    }
}
