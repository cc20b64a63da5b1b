//! Worker pool for inbox task execution
//!
//! This module provides:
//! - [`WorkerPool`] - Starts and stops every background task of the engine
//! - [`TaskPoller`] - Fixed-interval claim/apply/resolve loop
//! - [`TaskApplier`] - Maps a task onto a record store mutation
//! - [`CleanupSweeper`] - Retention-based deletion of terminal tasks
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                          WorkerPool                           │
//! │  ┌─────────────┐ ┌─────────────┐       ┌──────────────────┐  │
//! │  │ TaskPoller 0│ │ TaskPoller 1│  ...  │  CleanupSweeper  │  │
//! │  │ (interval)  │ │ (interval)  │       │   (interval)     │  │
//! │  └──────┬──────┘ └──────┬──────┘       └──────────────────┘  │
//! │         │ claim, apply, resolve                               │
//! │         ▼               ▼                                     │
//! │  ┌──────────────────────────────────────────────────────┐    │
//! │  │        RetryScheduler (DelayQueue, one per pool)      │    │
//! │  └──────────────────────────────────────────────────────┘    │
//! └──────────────────────────────────────────────────────────────┘
//! ```

mod apply;
mod poller;
mod pool;
mod sweeper;

#[cfg(test)]
pub(crate) mod testing;

pub use apply::{ApplyError, TaskApplier};
pub use poller::TaskPoller;
pub use pool::{WorkerPool, WorkerPoolError};
pub use sweeper::CleanupSweeper;
