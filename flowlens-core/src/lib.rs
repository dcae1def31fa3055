//! # flowlens-core
//!
//! Core library for flowlens - a capture-and-query engine for LLM traffic.
//!
//! This library provides:
//! - Domain types for flows, stream chunks, and annotations
//! - Durable SQLite storage with full-body preservation
//! - Full-text search, filtered queries, and aggregate statistics
//! - A lifecycle recorder with live event notifications
//! - Redacted export in several interchange formats
//!
//! ## Architecture
//!
//! The recorder is the only write path: a flow enters as `Pending`, may
//! accumulate stream chunks, and is persisted and indexed when it reaches a
//! terminal state. Everything else (query, search, stats, export) reads the
//! shared store; annotations are the one mutation allowed after a flow
//! finishes.
//!
//! ## Example
//!
//! ```rust,no_run
//! use flowlens_core::{Config, FlowEngine};
//!
//! // Load configuration
//! let config = Config::load().expect("failed to load config");
//!
//! // Open the engine (runs migrations)
//! let engine = FlowEngine::open(&config).expect("failed to open engine");
//! let recent = engine.get_recent_flows(20).expect("query failed");
//! ```

// Re-export commonly used items at the crate root
pub use config::Config;
pub use db::{Database, FlowStore, TimeRange};
pub use engine::FlowEngine;
pub use error::{Error, Result};
pub use recorder::FlowRecorder;
pub use types::*;

// Public modules
pub mod annotations;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod export;
pub mod logging;
pub mod query;
pub mod recorder;
pub mod retention;
pub mod search;
pub mod stats;
pub mod types;
