//! Engine facade
//!
//! [`InboxEngine`] wires the producer, the worker pool and the metrics
//! aggregator to one pair of stores and exposes the operations an HTTP layer
//! needs.

mod inbox;

pub use inbox::{InboxEngine, TaskListResponse, DEFAULT_LIST_LIMIT, MAX_LIST_LIMIT};
