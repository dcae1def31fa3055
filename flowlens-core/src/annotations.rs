//! Annotation manager: user metadata layered on immutable flows
//!
//! Annotations live in their own table, so these writes never touch the
//! flow body and stay cheap regardless of payload size. Clearing a field
//! sets it to its empty/null value; it never deletes the flow.

use crate::db::Database;
use crate::error::{Error, Result};
use crate::types::{AnnotationPatch, Annotations};
use rusqlite::params;
use std::sync::Arc;

/// Annotation operations over a shared database
#[derive(Clone)]
pub struct AnnotationManager {
    db: Arc<Database>,
}

impl AnnotationManager {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Current annotations for a flow
    pub fn get(&self, id: &str) -> Result<Annotations> {
        let conn = self.db.connection();
        Self::load(&conn, id)
    }

    /// Apply a partial update. Fields left `None` are unchanged.
    pub fn update(&self, id: &str, patch: &AnnotationPatch) -> Result<Annotations> {
        let conn = self.db.connection();
        let mut current = Self::load(&conn, id)?;

        if let Some(starred) = patch.starred {
            current.starred = starred;
        }
        if let Some(marker) = &patch.marker {
            current.marker = marker.clone();
        }
        if let Some(comment) = &patch.comment {
            current.comment = comment.clone();
        }
        if let Some(tags) = &patch.tags {
            current.tags = dedup(tags.clone());
        }

        Self::save(&conn, id, &current)?;
        Ok(current)
    }

    /// Add a tag if not already present. Order-insensitive and idempotent.
    pub fn add_tag(&self, id: &str, tag: &str) -> Result<Annotations> {
        let conn = self.db.connection();
        let mut current = Self::load(&conn, id)?;
        if !current.tags.iter().any(|t| t == tag) {
            current.tags.push(tag.to_string());
            Self::save(&conn, id, &current)?;
        }
        Ok(current)
    }

    /// Remove a tag if present
    pub fn remove_tag(&self, id: &str, tag: &str) -> Result<Annotations> {
        let conn = self.db.connection();
        let mut current = Self::load(&conn, id)?;
        let before = current.tags.len();
        current.tags.retain(|t| t != tag);
        if current.tags.len() != before {
            Self::save(&conn, id, &current)?;
        }
        Ok(current)
    }

    /// Flip the starred flag, returning the new value
    pub fn toggle_star(&self, id: &str) -> Result<bool> {
        let conn = self.db.connection();
        let mut current = Self::load(&conn, id)?;
        current.starred = !current.starred;
        Self::save(&conn, id, &current)?;
        Ok(current.starred)
    }

    fn load(conn: &rusqlite::Connection, id: &str) -> Result<Annotations> {
        let exists: i64 =
            conn.query_row("SELECT COUNT(*) FROM flows WHERE id = ?1", [id], |r| {
                r.get(0)
            })?;
        if exists == 0 {
            return Err(Error::NotFound(id.to_string()));
        }

        let row = conn
            .query_row(
                "SELECT starred, marker, comment, tags FROM flow_annotations WHERE flow_id = ?1",
                [id],
                |row| {
                    let starred: i32 = row.get(0)?;
                    let marker: Option<String> = row.get(1)?;
                    let comment: Option<String> = row.get(2)?;
                    let tags: String = row.get(3)?;
                    Ok((starred, marker, comment, tags))
                },
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;

        Ok(match row {
            Some((starred, marker, comment, tags)) => Annotations {
                starred: starred != 0,
                marker,
                comment,
                tags: serde_json::from_str(&tags).unwrap_or_default(),
            },
            None => Annotations::default(),
        })
    }

    fn save(conn: &rusqlite::Connection, id: &str, annotations: &Annotations) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO flow_annotations (flow_id, starred, marker, comment, tags)
            VALUES (?1, ?2, ?3, ?4, ?5)
            ON CONFLICT(flow_id) DO UPDATE SET
                starred = excluded.starred,
                marker = excluded.marker,
                comment = excluded.comment,
                tags = excluded.tags
            "#,
            params![
                id,
                annotations.starred as i32,
                annotations.marker,
                annotations.comment,
                serde_json::to_string(&annotations.tags)?,
            ],
        )?;
        Ok(())
    }
}

fn dedup(tags: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    tags.into_iter().filter(|t| seen.insert(t.clone())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FlowStore;
    use crate::types::*;
    use chrono::Utc;
    use std::collections::HashMap;

    fn setup() -> (FlowStore, AnnotationManager, String) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        db.migrate().unwrap();
        let store = FlowStore::new(db.clone());
        let manager = AnnotationManager::new(db);

        let flow = Flow::new(
            FlowType::ChatCompletions,
            RequestRecord {
                method: "POST".to_string(),
                path: "/v1/chat/completions".to_string(),
                headers: HashMap::new(),
                body: Some("hello".to_string()),
                messages: vec![],
                system_prompt: None,
                tools: vec![],
                model: Some("gpt-4o".to_string()),
                params: serde_json::json!({}),
                size_bytes: 5,
                sent_at: Utc::now(),
            },
            FlowMetadata::default(),
        );
        let id = flow.id.clone();
        store.put(&flow).unwrap();
        (store, manager, id)
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let (_store, manager, _id) = setup();
        let err = manager.update("missing", &AnnotationPatch::default());
        assert!(matches!(err, Err(Error::NotFound(_))));
    }

    #[test]
    fn test_star_is_idempotent() {
        let (_store, manager, id) = setup();
        let patch = AnnotationPatch {
            starred: Some(true),
            ..Default::default()
        };
        let once = manager.update(&id, &patch).unwrap();
        let twice = manager.update(&id, &patch).unwrap();
        assert_eq!(once, twice);
        assert!(twice.starred);
    }

    #[test]
    fn test_clear_comment_sets_null() {
        let (_store, manager, id) = setup();
        manager
            .update(
                &id,
                &AnnotationPatch {
                    comment: Some(Some("interesting".to_string())),
                    ..Default::default()
                },
            )
            .unwrap();

        let cleared = manager
            .update(
                &id,
                &AnnotationPatch {
                    comment: Some(None),
                    ..Default::default()
                },
            )
            .unwrap();
        assert!(cleared.comment.is_none());
    }

    #[test]
    fn test_tag_add_remove() {
        let (_store, manager, id) = setup();
        manager.add_tag(&id, "needs-review").unwrap();
        manager.add_tag(&id, "needs-review").unwrap();
        let a = manager.get(&id).unwrap();
        assert_eq!(a.tags, vec!["needs-review".to_string()]);

        manager.remove_tag(&id, "needs-review").unwrap();
        assert!(manager.get(&id).unwrap().tags.is_empty());
    }

    #[test]
    fn test_toggle_star() {
        let (_store, manager, id) = setup();
        assert!(manager.toggle_star(&id).unwrap());
        assert!(!manager.toggle_star(&id).unwrap());
    }

    #[test]
    fn test_annotations_do_not_touch_body(){
        let (store, manager, id) = setup();
        let before = store.get(&id).unwrap().unwrap();
        manager.add_tag(&id, "tagged").unwrap();
        let after = store.get(&id).unwrap().unwrap();

        assert_eq!(after.request.body, before.request.body);
        assert_eq!(after.timestamps.created_at, before.timestamps.created_at);
        assert_eq!(after.annotations.tags, vec!["tagged".to_string()]);
    }
}
