//! Flow recorder: the write path of the engine
//!
//! The recorder owns every live (non-terminal) flow. A flow enters as
//! `Pending` via [`FlowRecorder::begin`], optionally accumulates stream
//! chunks, and leaves the live set exactly once through
//! [`FlowRecorder::complete`] or [`FlowRecorder::fail`], at which point the
//! finished flow is persisted and indexed. Storage failures on the write
//! path are logged and swallowed so the proxied call is never disturbed.
//!
//! Live updates go out on tokio broadcast channels: one global feed plus an
//! on-demand per-flow feed. Streaming updates carry only the new chunk, so
//! notification cost stays flat no matter how much payload has accumulated.

use crate::db::FlowStore;
use crate::error::{Error, Result};
use crate::search::SearchIndex;
use crate::types::{
    ChunkDelta, ErrorRecord, Flow, FlowEvent, FlowMetadata, FlowState, FlowType, RequestRecord,
    ResponseRecord, StreamChunk, StreamInfo,
};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::broadcast;

/// Records flow lifecycles and fans out live notifications
pub struct FlowRecorder {
    store: FlowStore,
    index: SearchIndex,
    /// Each live flow behind its own mutex; the map lock is held only long
    /// enough to clone a handle, so unrelated flows never serialize.
    live: Mutex<HashMap<String, Arc<Mutex<Flow>>>>,
    events: broadcast::Sender<FlowEvent>,
    flow_channels: Mutex<HashMap<String, broadcast::Sender<FlowEvent>>>,
    event_capacity: usize,
}

impl FlowRecorder {
    pub fn new(store: FlowStore, index: SearchIndex, event_capacity: usize) -> Self {
        let (events, _) = broadcast::channel(event_capacity);
        Self {
            store,
            index,
            live: Mutex::new(HashMap::new()),
            events,
            flow_channels: Mutex::new(HashMap::new()),
            event_capacity,
        }
    }

    /// Start recording a new flow. Returns its id.
    ///
    /// The pending flow is persisted immediately so it survives a crash
    /// mid-transaction; a storage failure here is logged, not surfaced.
    pub fn begin(
        &self,
        flow_type: FlowType,
        request: RequestRecord,
        metadata: FlowMetadata,
    ) -> String {
        let flow = Flow::new(flow_type, request, metadata);
        let id = flow.id.clone();

        if let Err(e) = self.store.put(&flow) {
            tracing::warn!(id = %id, error = %e, "Failed to persist pending flow");
        }

        let summary = flow.summary();
        self.live
            .lock()
            .unwrap()
            .insert(id.clone(), Arc::new(Mutex::new(flow)));
        self.emit(&id, FlowEvent::FlowStarted { summary });

        tracing::debug!(id = %id, "Flow started");
        id
    }

    /// Record one stream chunk for a live flow.
    ///
    /// The first chunk moves the flow from `Pending` to `Streaming` and pins
    /// the response start time. Indices and timestamps are stamped here, so
    /// chunk indices are gapless from 0 in arrival order.
    pub fn append_chunk(&self, id: &str, delta: ChunkDelta) -> Result<StreamChunk> {
        let now = Utc::now();
        let handle = match self.live.lock().unwrap().get(id) {
            Some(handle) => handle.clone(),
            None => return Err(self.gone_error(id)),
        };
        let mut guard = handle.lock().unwrap();
        let flow: &mut Flow = &mut guard;

        if matches!(flow.state, FlowState::Pending) {
            // The first response byte also bounds the request send.
            flow.timestamps.request_ended_at = Some(now);
            flow.timestamps.response_started_at = Some(now);
            flow.state = FlowState::Streaming {
                stream: StreamInfo::default(),
            };
        }

        let stream = match &mut flow.state {
            FlowState::Streaming { stream } => stream,
            // Pending was handled above; live flows are never terminal.
            _ => {
                return Err(Error::invalid_state(
                    id,
                    format!("cannot append chunk in state {}", flow.state.kind()),
                ))
            }
        };

        let chunk = StreamChunk {
            index: stream.stats.chunk_count,
            event: delta.event,
            payload: delta.payload,
            ts: now,
            content_delta: delta.content_delta,
            tool_call_delta: delta.tool_call_delta,
            thinking_delta: delta.thinking_delta,
        };

        if let Some(last) = stream.stats.last_chunk_at {
            let gap = (now - last).num_milliseconds() as f64;
            let gaps = stream.stats.chunk_count as f64;
            stream.stats.mean_gap_ms = Some(match stream.stats.mean_gap_ms {
                Some(mean) => mean + (gap - mean) / gaps,
                None => gap,
            });
        } else {
            stream.stats.first_chunk_ms = flow
                .timestamps
                .request_started_at
                .map(|start| (now - start).num_milliseconds());
        }
        stream.stats.chunk_count += 1;
        stream.stats.last_chunk_at = Some(now);
        stream.chunks.push(chunk.clone());

        drop(guard);
        self.emit(
            id,
            FlowEvent::FlowUpdated {
                id: id.to_string(),
                delta: chunk.clone(),
            },
        );
        Ok(chunk)
    }

    /// Finish a flow with a full response.
    ///
    /// Idempotent against double completion: finishing an already-terminal
    /// flow is a no-op, not an error.
    pub fn complete(&self, id: &str, mut response: ResponseRecord) -> Result<()> {
        let mut flow = match self.take_live(id) {
            Some(flow) => flow,
            None => return self.already_terminal(id, "complete"),
        };

        let now = Utc::now();
        // A streamed flow carries its accumulated chunk log into the response.
        if let FlowState::Streaming { stream } = std::mem::replace(&mut flow.state, FlowState::Pending)
        {
            if response.stream.is_none() {
                response.stream = Some(stream);
            }
        }

        if flow.timestamps.response_started_at.is_none() {
            flow.timestamps.response_started_at = response.started_at;
        }
        if flow.timestamps.request_ended_at.is_none() {
            flow.timestamps.request_ended_at = flow.timestamps.response_started_at;
        }
        flow.timestamps.response_ended_at = Some(response.ended_at.unwrap_or(now));
        flow.timestamps.derive();
        flow.state = FlowState::Completed { response };

        self.finish(flow, |flow| FlowEvent::FlowCompleted {
            id: flow.id.clone(),
            summary: flow.summary(),
        });
        Ok(())
    }

    /// Finish a flow with an error. An abort maps to `Cancelled`, everything
    /// else to `Failed`. Idempotent against double termination.
    pub fn fail(&self, id: &str, error: ErrorRecord) -> Result<()> {
        let mut flow = match self.take_live(id) {
            Some(flow) => flow,
            None => return self.already_terminal(id, "fail"),
        };

        flow.timestamps.response_ended_at = Some(error.occurred_at);
        flow.timestamps.derive();
        let event_error = error.clone();
        flow.state = if error.is_abort() {
            FlowState::Cancelled { error }
        } else {
            FlowState::Failed { error }
        };

        self.finish(flow, move |flow| FlowEvent::FlowFailed {
            id: flow.id.clone(),
            error: event_error,
        });
        Ok(())
    }

    /// Subscribe to the global event feed
    pub fn subscribe(&self) -> broadcast::Receiver<FlowEvent> {
        self.events.subscribe()
    }

    /// Subscribe to events for one flow only
    pub fn subscribe_flow(&self, id: &str) -> broadcast::Receiver<FlowEvent> {
        let mut channels = self.flow_channels.lock().unwrap();
        channels
            .entry(id.to_string())
            .or_insert_with(|| broadcast::channel(self.event_capacity).0)
            .subscribe()
    }

    /// Snapshot of a live flow, when it has not yet finished
    pub fn live_flow(&self, id: &str) -> Option<Flow> {
        let handle = self.live.lock().unwrap().get(id).cloned()?;
        let flow = handle.lock().unwrap().clone();
        Some(flow)
    }

    /// Ids of all live flows
    pub fn live_ids(&self) -> Vec<String> {
        self.live.lock().unwrap().keys().cloned().collect()
    }

    /// Remove a flow from the live set, returning an owned copy
    fn take_live(&self, id: &str) -> Option<Flow> {
        let handle = self.live.lock().unwrap().remove(id)?;
        Some(match Arc::try_unwrap(handle) {
            Ok(mutex) => mutex.into_inner().unwrap(),
            // A chunk append still holds the handle; its update loses the race.
            Err(shared) => shared.lock().unwrap().clone(),
        })
    }

    /// Persist and index a finished flow, emit its terminal event, and drop
    /// its per-flow channel
    fn finish(&self, flow: Flow, event: impl FnOnce(&Flow) -> FlowEvent) {
        let id = flow.id.clone();
        if let Err(e) = self.store.put(&flow) {
            tracing::error!(id = %id, error = %e, "Failed to persist finished flow");
        }
        if let Err(e) = self.index.index(&id, &flow.searchable_text()) {
            tracing::warn!(id = %id, error = %e, "Failed to index flow");
        }

        tracing::info!(
            id = %id,
            state = %flow.state.kind(),
            duration_ms = ?flow.timestamps.duration_ms,
            "Flow finished"
        );

        self.emit(&id, event(&flow));
        self.flow_channels.lock().unwrap().remove(&id);
    }

    fn emit(&self, id: &str, event: FlowEvent) {
        // A send error just means nobody is listening.
        let _ = self.events.send(event.clone());
        if let Some(tx) = self.flow_channels.lock().unwrap().get(id) {
            let _ = tx.send(event);
        }
    }

    /// Classify an id missing from the live set: terminal flow or never seen
    fn gone_error(&self, id: &str) -> Error {
        match self.store.get(id) {
            Ok(Some(flow)) if flow.state.is_terminal() => Error::invalid_state(
                id,
                format!("flow already terminal ({})", flow.state.kind()),
            ),
            Ok(Some(_)) | Ok(None) => Error::NotFound(id.to_string()),
            Err(e) => e,
        }
    }

    /// Terminal-state idempotence for complete/fail
    fn already_terminal(&self, id: &str, op: &str) -> Result<()> {
        match self.store.get(id)? {
            Some(flow) if flow.state.is_terminal() => {
                tracing::debug!(id = %id, op = %op, "Ignoring repeat termination");
                Ok(())
            }
            Some(_) | None => Err(Error::NotFound(id.to_string())),
        }
    }
}
