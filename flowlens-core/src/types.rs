//! Core domain types for flowlens
//!
//! These types form the canonical model of one intercepted LLM transaction
//! (a **Flow**) and everything layered on top of it.
//!
//! ## Terminology
//!
//! | Term | Definition |
//! |------|------------|
//! | **Flow** | One recorded LLM request/response transaction, including its chunk sequence if streamed |
//! | **Chunk** | One incremental unit of a streamed response |
//! | **Annotation** | User-attached metadata (star/marker/comment/tags) layered on an immutable Flow |
//! | **Redaction** | Pattern-based substitution applied to sensitive text before export |
//! | **Retention horizon** | Age threshold past which flows are eligible for automatic deletion |
//!
//! ## Lifecycle
//!
//! A flow is created `Pending` when the first byte of the outbound request is
//! observed, moves to `Streaming` on the first response chunk, and ends in
//! `Completed`, `Failed`, or `Cancelled`. The outcome is modeled as a tagged
//! variant ([`FlowState`]) rather than a pair of optional fields, so "both a
//! response and an error" is unrepresentable. Once terminal, only annotations
//! may still change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

// ============================================
// Flow type
// ============================================

/// Kind of LLM API the flow talked to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowType {
    ChatCompletions,
    AnthropicMessages,
    GenerateContent,
    Embeddings,
    /// Anything else, tagged with the caller-supplied name
    Other(String),
}

impl FlowType {
    /// Returns the identifier used in database storage
    pub fn as_str(&self) -> &str {
        match self {
            FlowType::ChatCompletions => "chat_completions",
            FlowType::AnthropicMessages => "anthropic_messages",
            FlowType::GenerateContent => "generate_content",
            FlowType::Embeddings => "embeddings",
            FlowType::Other(tag) => tag,
        }
    }
}

impl std::fmt::Display for FlowType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FlowType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "chat_completions" => FlowType::ChatCompletions,
            "anthropic_messages" => FlowType::AnthropicMessages,
            "generate_content" => FlowType::GenerateContent,
            "embeddings" => FlowType::Embeddings,
            other => FlowType::Other(other.to_string()),
        })
    }
}

// ============================================
// Lifecycle state
// ============================================

/// Lifecycle state of a flow.
///
/// The terminal variants own the response or error outright, so at most one
/// of the two can ever be attached to a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum FlowState {
    /// Request observed, no response bytes yet
    Pending,
    /// At least one response chunk received
    Streaming { stream: StreamInfo },
    /// Full response received
    Completed { response: ResponseRecord },
    /// Terminal error
    Failed { error: ErrorRecord },
    /// Caller aborted the call
    Cancelled { error: ErrorRecord },
}

impl FlowState {
    /// The state's kind, used for filtering and storage
    pub fn kind(&self) -> FlowStateKind {
        match self {
            FlowState::Pending => FlowStateKind::Pending,
            FlowState::Streaming { .. } => FlowStateKind::Streaming,
            FlowState::Completed { .. } => FlowStateKind::Completed,
            FlowState::Failed { .. } => FlowStateKind::Failed,
            FlowState::Cancelled { .. } => FlowStateKind::Cancelled,
        }
    }

    /// No exit from a terminal state
    pub fn is_terminal(&self) -> bool {
        self.kind().is_terminal()
    }

    /// Response record, if this flow completed
    pub fn response(&self) -> Option<&ResponseRecord> {
        match self {
            FlowState::Completed { response } => Some(response),
            _ => None,
        }
    }

    /// Error record, if this flow failed or was cancelled
    pub fn error(&self) -> Option<&ErrorRecord> {
        match self {
            FlowState::Failed { error } | FlowState::Cancelled { error } => Some(error),
            _ => None,
        }
    }
}

/// Discriminant of [`FlowState`], without the payload
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowStateKind {
    Pending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl FlowStateKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FlowStateKind::Pending => "pending",
            FlowStateKind::Streaming => "streaming",
            FlowStateKind::Completed => "completed",
            FlowStateKind::Failed => "failed",
            FlowStateKind::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            FlowStateKind::Completed | FlowStateKind::Failed | FlowStateKind::Cancelled
        )
    }
}

impl std::fmt::Display for FlowStateKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for FlowStateKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(FlowStateKind::Pending),
            "streaming" => Ok(FlowStateKind::Streaming),
            "completed" => Ok(FlowStateKind::Completed),
            "failed" => Ok(FlowStateKind::Failed),
            "cancelled" => Ok(FlowStateKind::Cancelled),
            _ => Err(format!("unknown flow state: {}", s)),
        }
    }
}

// ============================================
// Request
// ============================================

/// One chat message inside a request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    /// "system", "user", "assistant", "tool", ...
    pub role: String,
    pub content: String,
}

/// A tool made available to the model in the request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: Option<String>,
    /// JSON schema of the tool parameters
    pub parameters: serde_json::Value,
}

/// The outbound request as observed by the proxy
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestRecord {
    pub method: String,
    pub path: String,
    pub headers: HashMap<String, String>,
    /// Raw request body (dropped from exports unless raw payloads are asked for)
    pub body: Option<String>,
    /// Parsed conversation messages
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    pub model: Option<String>,
    /// Sampling parameters and other request knobs
    #[serde(default = "empty_object")]
    pub params: serde_json::Value,
    pub size_bytes: u64,
    pub sent_at: DateTime<Utc>,
}

fn empty_object() -> serde_json::Value {
    serde_json::json!({})
}

// ============================================
// Response
// ============================================

/// Token usage reported by the provider
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub input_tokens: Option<i64>,
    pub output_tokens: Option<i64>,
}

impl TokenUsage {
    /// Combined total, when both sides are known
    pub fn total(&self) -> Option<i64> {
        match (self.input_tokens, self.output_tokens) {
            (Some(i), Some(o)) => Some(i + o),
            _ => None,
        }
    }
}

/// A tool invocation emitted by the model
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: serde_json::Value,
}

/// The provider response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResponseRecord {
    pub status: u16,
    pub headers: HashMap<String, String>,
    /// Raw response body
    pub body: Option<String>,
    /// Extracted assistant text
    pub content: Option<String>,
    /// Extracted reasoning/thinking block, when present
    pub reasoning: Option<String>,
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default)]
    pub usage: TokenUsage,
    pub stop_reason: Option<String>,
    pub size_bytes: u64,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    /// Present when the response was streamed
    pub stream: Option<StreamInfo>,
}

// ============================================
// Errors
// ============================================

/// Classification of a flow error
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Network,
    Timeout,
    RateLimit,
    Auth,
    /// Provider returned an error payload
    Provider,
    /// Caller aborted the request
    Aborted,
    Other,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Network => "network",
            ErrorKind::Timeout => "timeout",
            ErrorKind::RateLimit => "rate_limit",
            ErrorKind::Auth => "auth",
            ErrorKind::Provider => "provider",
            ErrorKind::Aborted => "aborted",
            ErrorKind::Other => "other",
        }
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "network" => Ok(ErrorKind::Network),
            "timeout" => Ok(ErrorKind::Timeout),
            "rate_limit" => Ok(ErrorKind::RateLimit),
            "auth" => Ok(ErrorKind::Auth),
            "provider" => Ok(ErrorKind::Provider),
            "aborted" => Ok(ErrorKind::Aborted),
            "other" => Ok(ErrorKind::Other),
            _ => Err(format!("unknown error kind: {}", s)),
        }
    }
}

/// What went wrong with a flow
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorRecord {
    pub kind: ErrorKind,
    pub message: String,
    pub status: Option<u16>,
    /// Raw provider error payload
    pub raw: Option<String>,
    pub occurred_at: DateTime<Utc>,
    pub retryable: bool,
}

impl ErrorRecord {
    /// True when this error means the caller gave up, not the provider
    pub fn is_abort(&self) -> bool {
        self.kind == ErrorKind::Aborted
    }
}

// ============================================
// Streaming
// ============================================

/// One incremental update of a streamed response.
///
/// Indices are assigned in arrival order and are gapless from 0 within a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamChunk {
    pub index: u32,
    /// SSE event name, when the wire format has one
    pub event: Option<String>,
    /// Raw wire payload
    pub payload: Option<String>,
    pub ts: DateTime<Utc>,
    pub content_delta: Option<String>,
    pub tool_call_delta: Option<String>,
    pub thinking_delta: Option<String>,
}

/// Incrementally maintained statistics for a streamed response
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StreamStats {
    pub chunk_count: u32,
    /// Latency from request start to first chunk
    pub first_chunk_ms: Option<i64>,
    /// Running mean of the gaps between consecutive chunks
    pub mean_gap_ms: Option<f64>,
    /// Arrival time of the most recent chunk
    pub last_chunk_at: Option<DateTime<Utc>>,
}

/// Chunk log plus derived stats, owned by the response (or by the
/// `Streaming` state while the flow is still live)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StreamInfo {
    pub chunks: Vec<StreamChunk>,
    pub stats: StreamStats,
}

// ============================================
// Metadata, timestamps, annotations
// ============================================

/// Provider-side metadata attached by the proxy
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowMetadata {
    pub provider: Option<String>,
    /// Reference to the credential used, never the credential itself
    pub credential_id: Option<String>,
    #[serde(default)]
    pub retry_count: u32,
    /// Client application info (user agent, version)
    pub client: Option<String>,
    /// Upstream routing decision (pool member, region, ...)
    pub routing: Option<String>,
    /// Parameters the proxy injected into the request
    #[serde(default = "empty_object")]
    pub injected_params: serde_json::Value,
    /// Percentage of the model's context window consumed
    pub context_usage_pct: Option<f64>,
}

/// Timestamps collected over the flow lifecycle.
///
/// Invariant: created <= request_started <= request_ended <=
/// response_started <= response_ended, for each that is present.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowTimestamps {
    pub created_at: DateTime<Utc>,
    pub request_started_at: Option<DateTime<Utc>>,
    pub request_ended_at: Option<DateTime<Utc>>,
    pub response_started_at: Option<DateTime<Utc>>,
    pub response_ended_at: Option<DateTime<Utc>>,
    /// response_ended - request_started, when both are known
    pub duration_ms: Option<i64>,
    /// Time to first byte of the response
    pub ttfb_ms: Option<i64>,
}

impl FlowTimestamps {
    pub fn new(created_at: DateTime<Utc>) -> Self {
        Self {
            created_at,
            request_started_at: None,
            request_ended_at: None,
            response_started_at: None,
            response_ended_at: None,
            duration_ms: None,
            ttfb_ms: None,
        }
    }

    /// Recompute duration and ttfb from the endpoint timestamps
    pub fn derive(&mut self) {
        self.duration_ms = match (self.request_started_at, self.response_ended_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds()),
            _ => None,
        };
        self.ttfb_ms = match (self.request_started_at, self.response_started_at) {
            (Some(start), Some(first)) => Some((first - start).num_milliseconds()),
            _ => None,
        };
    }
}

/// User-attached metadata layered on an immutable flow
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Annotations {
    #[serde(default)]
    pub starred: bool,
    pub marker: Option<String>,
    pub comment: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Partial update of [`Annotations`].
///
/// Outer `None` leaves a field unchanged; for `marker` and `comment` an
/// inner `None` clears the field.
#[derive(Debug, Clone, Default)]
pub struct AnnotationPatch {
    pub starred: Option<bool>,
    pub marker: Option<Option<String>>,
    pub comment: Option<Option<String>>,
    pub tags: Option<Vec<String>>,
}

// ============================================
// Flow
// ============================================

/// One recorded LLM transaction
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    /// Globally unique, assigned once at creation, never reused
    pub id: String,
    pub flow_type: FlowType,
    pub request: RequestRecord,
    #[serde(flatten)]
    pub state: FlowState,
    #[serde(default)]
    pub metadata: FlowMetadata,
    pub timestamps: FlowTimestamps,
    #[serde(default)]
    pub annotations: Annotations,
}

impl Flow {
    /// Create a new pending flow with a fresh id
    pub fn new(flow_type: FlowType, request: RequestRecord, metadata: FlowMetadata) -> Self {
        let created_at = Utc::now();
        let mut timestamps = FlowTimestamps::new(created_at);
        timestamps.request_started_at = Some(request.sent_at);
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            flow_type,
            request,
            state: FlowState::Pending,
            metadata,
            timestamps,
            annotations: Annotations::default(),
        }
    }

    /// Combined token total, when the flow completed with known usage
    pub fn total_tokens(&self) -> Option<i64> {
        self.state.response().and_then(|r| r.usage.total())
    }

    /// Length of the extracted response content, in bytes
    pub fn content_length(&self) -> i64 {
        self.state
            .response()
            .and_then(|r| r.content.as_ref())
            .map(|c| c.len() as i64)
            .unwrap_or(0)
    }

    /// Whether the response arrived as a stream
    pub fn is_streamed(&self) -> bool {
        match &self.state {
            FlowState::Streaming { .. } => true,
            FlowState::Completed { response } => response.stream.is_some(),
            _ => false,
        }
    }

    /// Whether the model emitted any tool calls
    pub fn has_tool_calls(&self) -> bool {
        self.state
            .response()
            .map(|r| !r.tool_calls.is_empty())
            .unwrap_or(false)
    }

    /// Whether the response carried a reasoning block
    pub fn has_thinking(&self) -> bool {
        self.state
            .response()
            .map(|r| r.reasoning.is_some())
            .unwrap_or(false)
    }

    /// Condensed view for list screens and notifications
    pub fn summary(&self) -> FlowSummary {
        FlowSummary {
            id: self.id.clone(),
            flow_type: self.flow_type.clone(),
            state: self.state.kind(),
            provider: self.metadata.provider.clone(),
            model: self.request.model.clone(),
            created_at: self.timestamps.created_at,
            duration_ms: self.timestamps.duration_ms,
            total_tokens: self.total_tokens(),
            starred: self.annotations.starred,
        }
    }

    /// Text that the search index should cover: request and response content
    pub fn searchable_text(&self) -> String {
        let mut parts: Vec<&str> = Vec::new();
        if let Some(system) = &self.request.system_prompt {
            parts.push(system);
        }
        for msg in &self.request.messages {
            parts.push(&msg.content);
        }
        if self.request.messages.is_empty() {
            if let Some(body) = &self.request.body {
                parts.push(body);
            }
        }
        if let Some(response) = self.state.response() {
            if let Some(content) = &response.content {
                parts.push(content);
            }
            if let Some(reasoning) = &response.reasoning {
                parts.push(reasoning);
            }
        }
        if let Some(error) = self.state.error() {
            parts.push(&error.message);
        }
        parts.join("\n")
    }
}

/// Condensed flow view used in notifications and recent lists
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSummary {
    pub id: String,
    pub flow_type: FlowType,
    pub state: FlowStateKind,
    pub provider: Option<String>,
    pub model: Option<String>,
    pub created_at: DateTime<Utc>,
    pub duration_ms: Option<i64>,
    pub total_tokens: Option<i64>,
    pub starred: bool,
}

// ============================================
// Filtering, sorting, paging
// ============================================

/// Predicate over flows. Absent fields are unconstrained; present fields AND
/// together.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowFilter {
    pub start_time: Option<DateTime<Utc>>,
    pub end_time: Option<DateTime<Utc>>,
    pub providers: Option<Vec<String>>,
    pub models: Option<Vec<String>>,
    pub states: Option<Vec<FlowStateKind>>,
    pub flow_types: Option<Vec<String>>,
    pub has_error: Option<bool>,
    pub has_tool_calls: Option<bool>,
    pub has_thinking: Option<bool>,
    pub streaming: Option<bool>,
    /// Free-text search over response content (routed through the search index)
    pub content_search: Option<String>,
    /// Free-text search over request content (routed through the search index)
    pub request_search: Option<String>,
    pub min_tokens: Option<i64>,
    pub max_tokens: Option<i64>,
    pub min_duration_ms: Option<i64>,
    pub max_duration_ms: Option<i64>,
    pub tags: Option<Vec<String>>,
    pub starred_only: Option<bool>,
    pub credential_id: Option<String>,
}

impl FlowFilter {
    /// Free-text query, when either search field is set
    pub fn search_query(&self) -> Option<&str> {
        self.content_search
            .as_deref()
            .or(self.request_search.as_deref())
    }
}

/// Sort key for flow queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortBy {
    CreatedAt,
    Duration,
    TotalTokens,
    ContentLength,
    Model,
}

impl Default for SortBy {
    fn default() -> Self {
        SortBy::CreatedAt
    }
}

impl SortBy {
    pub fn as_str(&self) -> &'static str {
        match self {
            SortBy::CreatedAt => "created_at",
            SortBy::Duration => "duration",
            SortBy::TotalTokens => "total_tokens",
            SortBy::ContentLength => "content_length",
            SortBy::Model => "model",
        }
    }
}

impl std::str::FromStr for SortBy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "created_at" => Ok(SortBy::CreatedAt),
            "duration" => Ok(SortBy::Duration),
            "total_tokens" => Ok(SortBy::TotalTokens),
            "content_length" => Ok(SortBy::ContentLength),
            "model" => Ok(SortBy::Model),
            _ => Err(format!("unknown sort key: {}", s)),
        }
    }
}

/// One page of query results with paging metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowPage {
    pub flows: Vec<Flow>,
    pub total: u64,
    pub page: u32,
    pub page_size: u32,
    pub total_pages: u32,
    pub has_next: bool,
    pub has_prev: bool,
}

// ============================================
// Search
// ============================================

/// One hit from the search index
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    pub id: String,
    pub score: f64,
    pub snippet: String,
}

/// A search hit joined with flow context, for the external boundary
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSearchHit {
    pub id: String,
    pub created_at: DateTime<Utc>,
    pub model: Option<String>,
    pub provider: Option<String>,
    pub snippet: String,
    pub score: f64,
}

// ============================================
// Export
// ============================================

/// Supported export formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExportFormat {
    Json,
    JsonLines,
    /// HAR-like capture log: one entry per flow with nested request/response
    CaptureLog,
    /// Role-tagged transcript with a metadata header per flow
    Markdown,
    /// One flattened summary row per flow; never includes raw bodies
    Csv,
}

impl ExportFormat {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::JsonLines => "jsonl",
            ExportFormat::CaptureLog => "capture_log",
            ExportFormat::Markdown => "markdown",
            ExportFormat::Csv => "csv",
        }
    }

    pub fn mime_type(&self) -> &'static str {
        match self {
            ExportFormat::Json | ExportFormat::CaptureLog => "application/json",
            ExportFormat::JsonLines => "application/x-ndjson",
            ExportFormat::Markdown => "text/markdown",
            ExportFormat::Csv => "text/csv",
        }
    }

    pub fn file_extension(&self) -> &'static str {
        match self {
            ExportFormat::Json => "json",
            ExportFormat::JsonLines => "jsonl",
            ExportFormat::CaptureLog => "har.json",
            ExportFormat::Markdown => "md",
            ExportFormat::Csv => "csv",
        }
    }
}

impl std::str::FromStr for ExportFormat {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "json" => Ok(ExportFormat::Json),
            "jsonl" | "json_lines" => Ok(ExportFormat::JsonLines),
            "capture_log" | "har" => Ok(ExportFormat::CaptureLog),
            "markdown" | "md" => Ok(ExportFormat::Markdown),
            "csv" => Ok(ExportFormat::Csv),
            _ => Err(crate::error::Error::Config(format!(
                "unsupported export format: {}",
                s
            ))),
        }
    }
}

/// One pattern-based substitution applied at export time
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedactionRule {
    pub name: String,
    /// Regular expression matched against text fields and header values
    pub pattern: String,
    pub replacement: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

fn default_true() -> bool {
    true
}

/// Options controlling an export run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExportOptions {
    pub format: Option<ExportFormat>,
    #[serde(default)]
    pub filter: FlowFilter,
    /// Include raw request/response/chunk payloads
    #[serde(default)]
    pub include_raw: bool,
    /// Include the per-chunk stream log
    #[serde(default)]
    pub include_chunks: bool,
    #[serde(default)]
    pub redact_sensitive: bool,
    /// Ordered rule list; applied first to last
    #[serde(default)]
    pub redaction_rules: Vec<RedactionRule>,
    /// Gzip the final byte stream
    #[serde(default)]
    pub compress: bool,
}

/// Result of an export run
#[derive(Debug, Clone)]
pub struct ExportResult {
    pub data: Vec<u8>,
    pub filename: String,
    pub mime_type: String,
}

// ============================================
// Stats
// ============================================

/// Latency aggregate over flows with a known duration
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct LatencyStats {
    pub min_ms: Option<i64>,
    pub avg_ms: Option<f64>,
    pub max_ms: Option<i64>,
}

/// Token aggregate
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenStats {
    pub total_input: i64,
    pub total_output: i64,
    pub total: i64,
    /// Mean total tokens per flow with known usage
    pub avg_total: Option<f64>,
}

/// One row of a grouped breakdown (by provider, model, or state)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupStats {
    pub key: String,
    pub count: u64,
    pub total_tokens: i64,
    pub avg_duration_ms: Option<f64>,
}

/// Aggregate statistics over the store (or a filtered subset)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FlowStats {
    pub total: u64,
    pub successful: u64,
    pub failed: u64,
    pub cancelled: u64,
    /// successful / total; 0.0 when total is 0, never NaN
    pub success_rate: f64,
    pub latency: LatencyStats,
    pub tokens: TokenStats,
    pub by_provider: Vec<GroupStats>,
    pub by_model: Vec<GroupStats>,
    pub by_state: Vec<GroupStats>,
}

// ============================================
// Notifications
// ============================================

/// Incremental chunk content handed to the recorder.
///
/// The recorder stamps the index and timestamp, keeping chunk indices gapless
/// in arrival order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChunkDelta {
    pub event: Option<String>,
    pub payload: Option<String>,
    pub content_delta: Option<String>,
    pub tool_call_delta: Option<String>,
    pub thinking_delta: Option<String>,
}

/// Live notification emitted by the recorder.
///
/// Streaming updates carry only the delta, so notification cost is bounded
/// regardless of accumulated payload size.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum FlowEvent {
    FlowStarted { summary: FlowSummary },
    FlowUpdated { id: String, delta: StreamChunk },
    FlowCompleted { id: String, summary: FlowSummary },
    FlowFailed { id: String, error: ErrorRecord },
}

impl FlowEvent {
    /// Flow id this event refers to
    pub fn flow_id(&self) -> &str {
        match self {
            FlowEvent::FlowStarted { summary } => &summary.id,
            FlowEvent::FlowUpdated { id, .. } => id,
            FlowEvent::FlowCompleted { id, .. } => id,
            FlowEvent::FlowFailed { id, .. } => id,
        }
    }
}
