//! Persistence layer for the inbox
//!
//! This module provides:
//! - [`RecordStore`] trait for the business record store
//! - [`TaskStore`] trait for the inbox task table
//! - [`InMemoryRecordStore`] / [`InMemoryTaskStore`] for testing and local runs
//! - [`PostgresRecordStore`] / [`PostgresTaskStore`] for production

mod memory;
mod postgres;
mod store;

pub use memory::{InMemoryRecordStore, InMemoryTaskStore};
pub use postgres::{ensure_schema, PostgresRecordStore, PostgresTaskStore};
pub use store::{RecordStore, StoreError, TaskStore};
