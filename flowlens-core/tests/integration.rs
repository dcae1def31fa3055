//! Integration tests for the flowlens engine
//!
//! These tests exercise the full stack end to end: record flows through the
//! recorder, then read them back through query, search, stats, annotations,
//! export, and retention, against both on-disk and in-memory databases.

use chrono::Utc;
use flowlens_core::{
    AnnotationPatch, ChatMessage, ChunkDelta, Config, ErrorKind, ErrorRecord, ExportFormat,
    ExportOptions, FlowEngine, FlowFilter, FlowMetadata, FlowState, FlowType, RequestRecord,
    ResponseRecord, SortBy, TokenUsage,
};
use std::collections::HashMap;
use tempfile::TempDir;

fn request(model: &str, content: &str) -> RequestRecord {
    RequestRecord {
        method: "POST".to_string(),
        path: "/v1/chat/completions".to_string(),
        headers: HashMap::from([(
            "authorization".to_string(),
            "Bearer sk-abcdefghijklmnopqrstuvwxyz".to_string(),
        )]),
        body: Some(format!("{{\"messages\":[\"{}\"]}}", content)),
        messages: vec![ChatMessage {
            role: "user".to_string(),
            content: content.to_string(),
        }],
        system_prompt: None,
        tools: vec![],
        model: Some(model.to_string()),
        params: serde_json::json!({"temperature": 0.7}),
        size_bytes: content.len() as u64,
        sent_at: Utc::now(),
    }
}

fn response(content: &str, input_tokens: i64, output_tokens: i64) -> ResponseRecord {
    ResponseRecord {
        status: 200,
        headers: HashMap::new(),
        body: None,
        content: Some(content.to_string()),
        reasoning: None,
        tool_calls: vec![],
        usage: TokenUsage {
            input_tokens: Some(input_tokens),
            output_tokens: Some(output_tokens),
        },
        stop_reason: Some("stop".to_string()),
        size_bytes: content.len() as u64,
        started_at: None,
        ended_at: None,
        stream: None,
    }
}

fn provider_metadata(provider: &str) -> FlowMetadata {
    FlowMetadata {
        provider: Some(provider.to_string()),
        ..Default::default()
    }
}

fn record_completed(engine: &FlowEngine, provider: &str, model: &str, ask: &str, answer: &str) -> String {
    let id = engine.recorder().begin(
        FlowType::ChatCompletions,
        request(model, ask),
        provider_metadata(provider),
    );
    engine.recorder().complete(&id, response(answer, 100, 40)).unwrap();
    id
}

// ============================================
// Lifecycle
// ============================================

#[test]
fn test_full_streaming_lifecycle_on_disk() {
    let dir = TempDir::new().unwrap();
    let mut config = Config::default();
    config.engine.database_path = Some(dir.path().join("flows.db"));
    let engine = FlowEngine::open(&config).unwrap();

    let id = engine.recorder().begin(
        FlowType::AnthropicMessages,
        request("claude-3", "write a haiku about rivers"),
        provider_metadata("Claude"),
    );

    for word in ["water", " moves", " onward"] {
        engine
            .recorder()
            .append_chunk(
                &id,
                ChunkDelta {
                    content_delta: Some(word.to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
    }
    engine
        .recorder()
        .complete(&id, response("water moves onward", 30, 12))
        .unwrap();

    // Reopen the database and confirm the flow survived with its chunks
    drop(engine);
    let engine = FlowEngine::open(&config).unwrap();
    let detail = engine.get_flow_detail(&id).unwrap();
    match &detail.state {
        FlowState::Completed { response } => {
            let stream = response.stream.as_ref().unwrap();
            assert_eq!(stream.chunks.len(), 3);
            assert_eq!(stream.stats.chunk_count, 3);
            let indices: Vec<u32> = stream.chunks.iter().map(|c| c.index).collect();
            assert_eq!(indices, vec![0, 1, 2]);
        }
        other => panic!("expected completed, got {}", other.kind()),
    }
    assert!(detail.timestamps.duration_ms.is_some());
    assert!(detail.timestamps.ttfb_ms.is_some());
}

#[test]
fn test_failure_and_cancellation_outcomes() {
    let engine = FlowEngine::open_in_memory(&Config::default()).unwrap();

    let failed = engine.recorder().begin(
        FlowType::ChatCompletions,
        request("gpt-4o", "doomed"),
        provider_metadata("OpenAI"),
    );
    engine
        .recorder()
        .fail(
            &failed,
            ErrorRecord {
                kind: ErrorKind::RateLimit,
                message: "429 too many requests".to_string(),
                status: Some(429),
                raw: None,
                occurred_at: Utc::now(),
                retryable: true,
            },
        )
        .unwrap();

    let cancelled = engine.recorder().begin(
        FlowType::ChatCompletions,
        request("gpt-4o", "abandoned"),
        provider_metadata("OpenAI"),
    );
    engine
        .recorder()
        .fail(
            &cancelled,
            ErrorRecord {
                kind: ErrorKind::Aborted,
                message: "client disconnected".to_string(),
                status: None,
                raw: None,
                occurred_at: Utc::now(),
                retryable: false,
            },
        )
        .unwrap();

    let failed_detail = engine.get_flow_detail(&failed).unwrap();
    assert!(matches!(failed_detail.state, FlowState::Failed { .. }));
    let cancelled_detail = engine.get_flow_detail(&cancelled).unwrap();
    assert!(matches!(cancelled_detail.state, FlowState::Cancelled { .. }));

    let stats = engine.flow_stats(&FlowFilter::default()).unwrap();
    assert_eq!(stats.failed, 1);
    assert_eq!(stats.cancelled, 1);
}

// ============================================
// Query and search
// ============================================

#[test]
fn test_query_and_search_over_recorded_flows() {
    let engine = FlowEngine::open_in_memory(&Config::default()).unwrap();

    let paris = record_completed(&engine, "OpenAI", "gpt-4o", "capital of France?", "Paris");
    record_completed(&engine, "Claude", "claude-3", "capital of Japan?", "Tokyo");
    record_completed(&engine, "OpenAI", "gpt-4o-mini", "2+2?", "4");

    // Structural filter
    let filter = FlowFilter {
        providers: Some(vec!["OpenAI".to_string()]),
        ..Default::default()
    };
    let page = engine
        .query_flows(&filter, SortBy::CreatedAt, true, 1, 10)
        .unwrap();
    assert_eq!(page.total, 2);

    // Exact-substring recall through the index
    let hits = engine.search_flows("capital of France", 10).unwrap();
    assert_eq!(hits.len(), 1);
    assert_eq!(hits[0].id, paris);
    assert!(hits[0].snippet.to_lowercase().contains("capital of france"));

    // Structural + free-text intersection
    let combined = FlowFilter {
        providers: Some(vec!["OpenAI".to_string()]),
        content_search: Some("capital".to_string()),
        ..Default::default()
    };
    let page = engine
        .query_flows(&combined, SortBy::CreatedAt, true, 1, 10)
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.flows[0].id, paris);
}

#[test]
fn test_stats_scenario() {
    let engine = FlowEngine::open_in_memory(&Config::default()).unwrap();

    record_completed(&engine, "OpenAI", "gpt-4o", "a", "ok");
    record_completed(&engine, "OpenAI", "gpt-4o", "b", "ok");
    let failing = engine.recorder().begin(
        FlowType::ChatCompletions,
        request("claude-3", "c"),
        provider_metadata("Claude"),
    );
    engine
        .recorder()
        .fail(
            &failing,
            ErrorRecord {
                kind: ErrorKind::Provider,
                message: "upstream 500".to_string(),
                status: Some(500),
                raw: None,
                occurred_at: Utc::now(),
                retryable: true,
            },
        )
        .unwrap();

    let stats = engine.flow_stats(&FlowFilter::default()).unwrap();
    assert_eq!(stats.total, 3);
    assert_eq!(stats.successful, 2);
    assert_eq!(stats.failed, 1);
    assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
    assert_eq!(stats.tokens.total_input, 200);
    assert_eq!(stats.tokens.total_output, 80);

    let openai = stats.by_provider.iter().find(|g| g.key == "OpenAI").unwrap();
    assert_eq!(openai.count, 2);
}

// ============================================
// Annotations
// ============================================

#[test]
fn test_annotations_survive_independent_of_flow_body() {
    let engine = FlowEngine::open_in_memory(&Config::default()).unwrap();
    let id = record_completed(&engine, "OpenAI", "gpt-4o", "note this", "noted");

    engine.add_flow_tag(&id, "interesting").unwrap();
    engine
        .update_flow_annotations(
            &id,
            &AnnotationPatch {
                starred: Some(true),
                comment: Some(Some("review tomorrow".to_string())),
                ..Default::default()
            },
        )
        .unwrap();

    let detail = engine.get_flow_detail(&id).unwrap();
    assert!(detail.annotations.starred);
    assert_eq!(detail.annotations.tags, vec!["interesting".to_string()]);
    assert_eq!(
        detail.annotations.comment,
        Some("review tomorrow".to_string())
    );
    // The recorded content itself is untouched
    assert_eq!(
        detail.state.response().unwrap().content,
        Some("noted".to_string())
    );

    // Starred and tag filters see the annotations
    let starred = FlowFilter {
        starred_only: Some(true),
        ..Default::default()
    };
    assert_eq!(
        engine
            .query_flows(&starred, SortBy::CreatedAt, true, 1, 10)
            .unwrap()
            .total,
        1
    );
    let tagged = FlowFilter {
        tags: Some(vec!["interesting".to_string()]),
        ..Default::default()
    };
    assert_eq!(
        engine
            .query_flows(&tagged, SortBy::CreatedAt, true, 1, 10)
            .unwrap()
            .total,
        1
    );
}

// ============================================
// Export
// ============================================

#[test]
fn test_json_export_round_trip() {
    let engine = FlowEngine::open_in_memory(&Config::default()).unwrap();
    let a = record_completed(&engine, "OpenAI", "gpt-4o", "one", "1");
    let b = record_completed(&engine, "Claude", "claude-3", "two", "2");

    let options = ExportOptions {
        format: Some(ExportFormat::Json),
        ..Default::default()
    };
    let result = engine.export_flows(&options).unwrap();
    assert_eq!(result.mime_type, "application/json");
    assert!(result.filename.starts_with("flowlens-export-"));
    assert!(result.filename.ends_with(".json"));

    let doc: serde_json::Value = serde_json::from_slice(&result.data).unwrap();
    assert_eq!(doc["flow_count"], 2);
    let exported_ids: Vec<&str> = doc["flows"]
        .as_array()
        .unwrap()
        .iter()
        .map(|f| f["id"].as_str().unwrap())
        .collect();
    assert!(exported_ids.contains(&a.as_str()));
    assert!(exported_ids.contains(&b.as_str()));
}

#[test]
fn test_redacted_export_hides_secrets() {
    let engine = FlowEngine::open_in_memory(&Config::default()).unwrap();
    record_completed(
        &engine,
        "OpenAI",
        "gpt-4o",
        "my key is sk-abcdefghijklmnopqrstuvwxyz ok?",
        "never share keys",
    );

    let options = ExportOptions {
        format: Some(ExportFormat::Json),
        redact_sensitive: true,
        ..Default::default()
    };
    let result = engine.export_flows(&options).unwrap();
    let text = String::from_utf8(result.data).unwrap();
    assert!(!text.contains("sk-abcdefghijklmnopqrstuvwxyz"));
    assert!(text.contains("[REDACTED-API-KEY]"));
}

#[test]
fn test_export_by_ids_skips_missing() {
    let engine = FlowEngine::open_in_memory(&Config::default()).unwrap();
    let id = record_completed(&engine, "OpenAI", "gpt-4o", "keep", "kept");

    let options = ExportOptions {
        format: Some(ExportFormat::JsonLines),
        ..Default::default()
    };
    let result = engine
        .export_flows_by_ids(&[id.clone(), "ghost".to_string()], &options)
        .unwrap();
    let lines: Vec<&str> = std::str::from_utf8(&result.data)
        .unwrap()
        .lines()
        .collect();
    assert_eq!(lines.len(), 1);
    assert!(lines[0].contains(&id));
}

#[test]
fn test_compressed_export() {
    let engine = FlowEngine::open_in_memory(&Config::default()).unwrap();
    record_completed(&engine, "OpenAI", "gpt-4o", "zip me", "zipped");

    let options = ExportOptions {
        format: Some(ExportFormat::Csv),
        compress: true,
        ..Default::default()
    };
    let result = engine.export_flows(&options).unwrap();
    assert_eq!(result.mime_type, "application/gzip");
    assert!(result.filename.ends_with(".csv.gz"));
    // Gzip magic bytes
    assert_eq!(&result.data[..2], &[0x1f, 0x8b]);
}

// ============================================
// Retention
// ============================================

#[test]
fn test_cleanup_honors_configured_horizon() {
    let mut config = Config::default();
    config.engine.retention_days = 0;
    let engine = FlowEngine::open_in_memory(&config).unwrap();

    record_completed(&engine, "OpenAI", "gpt-4o", "old enough", "yes");
    // Horizon of 0 days makes anything already created eligible
    std::thread::sleep(std::time::Duration::from_millis(10));
    let deleted = engine.run_retention().unwrap();
    assert_eq!(deleted, 1);
    assert_eq!(engine.flow_count().unwrap(), 0);
    assert!(engine.search_flows("old enough", 10).unwrap().is_empty());
}

#[test]
fn test_cleanup_takes_explicit_horizon() {
    let engine = FlowEngine::open_in_memory(&Config::default()).unwrap();
    record_completed(&engine, "OpenAI", "gpt-4o", "fresh", "yes");

    // A wide horizon spares the flow; an explicit zero horizon reclaims it
    assert_eq!(engine.cleanup_flows(30).unwrap(), 0);
    std::thread::sleep(std::time::Duration::from_millis(10));
    assert_eq!(engine.cleanup_flows(0).unwrap(), 1);
    assert_eq!(engine.flow_count().unwrap(), 0);
}
