//! Database layer: SQLite storage for flows
//!
//! - [`schema`]: migrations and table definitions
//! - [`store`]: the flow store (keyed persistence + time-ordered scan)

pub mod schema;
pub mod store;

pub use store::{Database, FlowStore, TimeRange};
