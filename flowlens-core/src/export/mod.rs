//! Export pipeline: serialize selected flows into interchange formats
//!
//! Formats: structured JSON, JSON-lines, a HAR-like capture log, a Markdown
//! transcript, and a CSV summary. Options are validated (including redaction
//! pattern compilation) before any flow is touched, so a bad request never
//! produces partial output. Line-oriented formats are written row by row;
//! JSON and the capture log materialize the full document.

pub mod redact;

use crate::db::FlowStore;
use crate::error::{Error, Result};
use crate::query::QueryEngine;
use crate::types::{
    ExportFormat, ExportOptions, ExportResult, Flow, FlowState, RedactionRule,
};
use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use redact::Redactor;
use std::io::Write;

pub use redact::Redactor as FlowRedactor;

/// Export pipeline over the query engine and store
pub struct ExportPipeline {
    query: QueryEngine,
    store: FlowStore,
    /// Rules used when `redact_sensitive` is set but the caller supplies none
    default_rules: Vec<RedactionRule>,
}

impl ExportPipeline {
    pub fn new(query: QueryEngine, store: FlowStore, default_rules: Vec<RedactionRule>) -> Self {
        Self {
            query,
            store,
            default_rules,
        }
    }

    /// Export every flow matching the options' filter
    pub fn export(&self, options: &ExportOptions) -> Result<ExportResult> {
        let (format, redactor) = self.validate(options)?;
        let flows = self.query.query_all(&options.filter)?;
        self.render(flows, format, options, redactor.as_ref())
    }

    /// Export a caller-chosen id list, in the given order.
    ///
    /// Ids that no longer exist are skipped rather than failing the batch.
    pub fn export_by_ids(&self, ids: &[String], options: &ExportOptions) -> Result<ExportResult> {
        let (format, redactor) = self.validate(options)?;
        let mut flows = Vec::with_capacity(ids.len());
        for id in ids {
            match self.store.get(id)? {
                Some(flow) => flows.push(flow),
                None => tracing::debug!(id = %id, "Skipping missing flow in export"),
            }
        }
        self.render(flows, format, options, redactor.as_ref())
    }

    /// Reject malformed options before any work begins
    fn validate(&self, options: &ExportOptions) -> Result<(ExportFormat, Option<Redactor>)> {
        let format = options
            .format
            .ok_or_else(|| Error::Config("export format is required".to_string()))?;

        let redactor = if options.redact_sensitive {
            let rules = if options.redaction_rules.is_empty() {
                &self.default_rules
            } else {
                &options.redaction_rules
            };
            Some(Redactor::compile(rules)?)
        } else {
            None
        };

        Ok((format, redactor))
    }

    fn render(
        &self,
        flows: Vec<Flow>,
        format: ExportFormat,
        options: &ExportOptions,
        redactor: Option<&Redactor>,
    ) -> Result<ExportResult> {
        let flows: Vec<Flow> = flows
            .into_iter()
            .map(|mut flow| {
                sanitize(&mut flow, options);
                if let Some(redactor) = redactor {
                    redactor.redact_flow(&mut flow);
                }
                flow
            })
            .collect();

        let data = match format {
            ExportFormat::Json => render_json(&flows)?,
            ExportFormat::JsonLines => render_jsonl(&flows)?,
            ExportFormat::CaptureLog => render_capture_log(&flows)?,
            ExportFormat::Markdown => render_markdown(&flows),
            ExportFormat::Csv => render_csv(&flows),
        };

        let stamp = Utc::now().format("%Y%m%d-%H%M%S");
        let mut filename = format!("flowlens-export-{}.{}", stamp, format.file_extension());
        let mut mime_type = format.mime_type().to_string();
        let data = if options.compress {
            filename.push_str(".gz");
            mime_type = "application/gzip".to_string();
            gzip(&data)?
        } else {
            data
        };

        Ok(ExportResult {
            data,
            filename,
            mime_type,
        })
    }
}

/// Strip raw payloads and chunk logs unless the options ask for them
fn sanitize(flow: &mut Flow, options: &ExportOptions) {
    if !options.include_raw {
        flow.request.body = None;
        match &mut flow.state {
            FlowState::Completed { response } => {
                response.body = None;
                if let Some(stream) = &mut response.stream {
                    for chunk in &mut stream.chunks {
                        chunk.payload = None;
                    }
                }
            }
            FlowState::Streaming { stream } => {
                for chunk in &mut stream.chunks {
                    chunk.payload = None;
                }
            }
            FlowState::Failed { error } | FlowState::Cancelled { error } => {
                error.raw = None;
            }
            FlowState::Pending => {}
        }
    }

    if !options.include_chunks {
        match &mut flow.state {
            FlowState::Completed { response } => {
                if let Some(stream) = &mut response.stream {
                    stream.chunks.clear();
                }
            }
            FlowState::Streaming { stream } => stream.chunks.clear(),
            _ => {}
        }
    }
}

fn gzip(data: &[u8]) -> Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    Ok(encoder.finish()?)
}

// ============================================
// Format renderers
// ============================================

fn render_json(flows: &[Flow]) -> Result<Vec<u8>> {
    let doc = serde_json::json!({
        "exported_at": Utc::now().to_rfc3339(),
        "flow_count": flows.len(),
        "flows": flows,
    });
    Ok(serde_json::to_vec_pretty(&doc)?)
}

fn render_jsonl(flows: &[Flow]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for flow in flows {
        serde_json::to_writer(&mut out, flow)?;
        out.push(b'\n');
    }
    Ok(out)
}

/// HAR-like capture log: one entry per flow with nested request/response
fn render_capture_log(flows: &[Flow]) -> Result<Vec<u8>> {
    let entries: Vec<serde_json::Value> = flows.iter().map(capture_entry).collect();
    let doc = serde_json::json!({
        "log": {
            "version": "1.2",
            "creator": { "name": "flowlens", "version": env!("CARGO_PKG_VERSION") },
            "entries": entries,
        }
    });
    Ok(serde_json::to_vec_pretty(&doc)?)
}

fn capture_entry(flow: &Flow) -> serde_json::Value {
    let headers = |map: &std::collections::HashMap<String, String>| -> Vec<serde_json::Value> {
        let mut pairs: Vec<_> = map.iter().collect();
        pairs.sort();
        pairs
            .into_iter()
            .map(|(name, value)| serde_json::json!({ "name": name, "value": value }))
            .collect()
    };

    let response = match &flow.state {
        FlowState::Completed { response } => serde_json::json!({
            "status": response.status,
            "headers": headers(&response.headers),
            "content": {
                "size": response.size_bytes,
                "mimeType": "application/json",
                "text": response.content,
            },
        }),
        FlowState::Failed { error } | FlowState::Cancelled { error } => serde_json::json!({
            "status": error.status.unwrap_or(0),
            "headers": [],
            "_error": { "kind": error.kind.as_str(), "message": error.message },
        }),
        _ => serde_json::json!({ "status": 0, "headers": [] }),
    };

    serde_json::json!({
        "startedDateTime": flow.timestamps.created_at.to_rfc3339(),
        "time": flow.timestamps.duration_ms.unwrap_or(0),
        "_id": flow.id,
        "_state": flow.state.kind().as_str(),
        "request": {
            "method": flow.request.method,
            "url": flow.request.path,
            "headers": headers(&flow.request.headers),
            "postData": {
                "mimeType": "application/json",
                "text": flow.request.body,
            },
        },
        "response": response,
    })
}

/// Role-tagged transcript with a metadata header per flow
fn render_markdown(flows: &[Flow]) -> Vec<u8> {
    let mut out = String::new();
    for flow in flows {
        out.push_str(&format!("## Flow {}\n\n", flow.id));
        out.push_str(&format!(
            "- Created: {}\n",
            flow.timestamps.created_at.to_rfc3339()
        ));
        out.push_str(&format!("- Type: {}\n", flow.flow_type));
        out.push_str(&format!("- State: {}\n", flow.state.kind()));
        if let Some(provider) = &flow.metadata.provider {
            out.push_str(&format!("- Provider: {}\n", provider));
        }
        if let Some(model) = &flow.request.model {
            out.push_str(&format!("- Model: {}\n", model));
        }
        if let Some(duration) = flow.timestamps.duration_ms {
            out.push_str(&format!("- Duration: {} ms\n", duration));
        }
        if let Some(tokens) = flow.total_tokens() {
            out.push_str(&format!("- Tokens: {}\n", tokens));
        }
        out.push('\n');

        if let Some(system) = &flow.request.system_prompt {
            out.push_str(&format!("**system**: {}\n\n", system));
        }
        for message in &flow.request.messages {
            out.push_str(&format!("**{}**: {}\n\n", message.role, message.content));
        }
        match &flow.state {
            FlowState::Completed { response } => {
                if let Some(reasoning) = &response.reasoning {
                    out.push_str(&format!("**assistant (thinking)**: {}\n\n", reasoning));
                }
                if let Some(content) = &response.content {
                    out.push_str(&format!("**assistant**: {}\n\n", content));
                }
                for call in &response.tool_calls {
                    out.push_str(&format!(
                        "**assistant (tool call)**: `{}` {}\n\n",
                        call.name, call.arguments
                    ));
                }
            }
            FlowState::Failed { error } | FlowState::Cancelled { error } => {
                out.push_str(&format!(
                    "**error** ({}): {}\n\n",
                    error.kind.as_str(),
                    error.message
                ));
            }
            _ => {}
        }
        out.push_str("---\n\n");
    }
    out.into_bytes()
}

/// One flattened summary row per flow; never includes raw bodies
fn render_csv(flows: &[Flow]) -> Vec<u8> {
    let mut out = String::from(
        "id,created_at,flow_type,state,provider,model,input_tokens,output_tokens,total_tokens,duration_ms,streamed,starred,tags,error\n",
    );
    for flow in flows {
        let usage = flow.state.response().map(|r| r.usage).unwrap_or_default();
        let error = flow
            .state
            .error()
            .map(|e| e.message.clone())
            .unwrap_or_default();
        let row = [
            flow.id.clone(),
            flow.timestamps.created_at.to_rfc3339(),
            flow.flow_type.as_str().to_string(),
            flow.state.kind().as_str().to_string(),
            flow.metadata.provider.clone().unwrap_or_default(),
            flow.request.model.clone().unwrap_or_default(),
            opt_num(usage.input_tokens),
            opt_num(usage.output_tokens),
            opt_num(flow.total_tokens()),
            opt_num(flow.timestamps.duration_ms),
            flow.is_streamed().to_string(),
            flow.annotations.starred.to_string(),
            flow.annotations.tags.join(";"),
            error,
        ];
        let escaped: Vec<String> = row.iter().map(|field| csv_escape(field)).collect();
        out.push_str(&escaped.join(","));
        out.push('\n');
    }
    out.into_bytes()
}

fn opt_num(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}

fn csv_escape(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}
