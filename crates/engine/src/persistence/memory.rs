//! In-memory implementations of RecordStore and TaskStore
//!
//! Used by tests and by the worker binary's `memory` backend. Semantics match
//! the PostgreSQL stores, including claim atomicity and oldest-first fetch.

use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use uuid::Uuid;

use super::store::*;
use crate::model::{Pagination, Record, Task, TaskStats, TaskStatus};

/// In-memory record store
///
/// # Example
///
/// ```
/// use inbox_engine::InMemoryRecordStore;
///
/// let store = InMemoryRecordStore::new();
/// assert_eq!(store.len(), 0);
/// ```
#[derive(Default)]
pub struct InMemoryRecordStore {
    records: RwLock<HashMap<String, Record>>,
}

impl InMemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl RecordStore for InMemoryRecordStore {
    async fn insert(&self, record: &Record) -> Result<(), StoreError> {
        let mut records = self.records.write();
        if records.contains_key(&record.id) {
            return Err(StoreError::DuplicateKey(record.id.clone()));
        }
        records.insert(record.id.clone(), record.clone());
        Ok(())
    }

    async fn update(&self, record: &Record) -> Result<(), StoreError> {
        let mut records = self.records.write();
        match records.get_mut(&record.id) {
            Some(existing) => {
                existing.value = record.value.clone();
                Ok(())
            }
            None => Err(StoreError::RecordNotFound(record.id.clone())),
        }
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        self.records
            .write()
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))
    }

    async fn get(&self, id: &str) -> Result<Record, StoreError> {
        self.records
            .read()
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::RecordNotFound(id.to_string()))
    }

    async fn close(&self) {}
}

/// Position of a task in the creation-time index.
/// The sequence breaks ties between tasks created in the same instant.
type IndexKey = (DateTime<Utc>, u64);

#[derive(Default)]
struct TaskTable {
    ordered: BTreeMap<IndexKey, Task>,
    keys: HashMap<Uuid, IndexKey>,
    next_seq: u64,
}

impl TaskTable {
    fn get_mut(&mut self, task_id: Uuid) -> Result<&mut Task, StoreError> {
        let key = self
            .keys
            .get(&task_id)
            .ok_or(StoreError::TaskNotFound(task_id))?;
        self.ordered
            .get_mut(key)
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    fn newest_first<'a>(
        &'a self,
        filter: impl Fn(&Task) -> bool + 'a,
        pagination: Pagination,
    ) -> Vec<Task> {
        self.ordered
            .values()
            .rev()
            .filter(|t| filter(t))
            .skip(pagination.offset as usize)
            .take(pagination.limit as usize)
            .cloned()
            .collect()
    }
}

/// In-memory task store
///
/// Tasks are kept in a map ordered by `(created_at, sequence)` so pending
/// tasks are always claimed oldest first. The claim runs under a single write
/// lock, which makes it atomic with respect to every other store call.
#[derive(Default)]
pub struct InMemoryTaskStore {
    table: RwLock<TaskTable>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tasks in the store
    pub fn task_count(&self) -> usize {
        self.table.read().keys.len()
    }

    /// Move a task's `updated_at` into the past (for testing retention)
    pub fn backdate(&self, task_id: Uuid, age: Duration) -> Result<(), StoreError> {
        let mut table = self.table.write();
        let task = table.get_mut(task_id)?;
        task.updated_at -= chrono::Duration::from_std(age)
            .map_err(|e| StoreError::Serialization(e.to_string()))?;
        Ok(())
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, task: &Task) -> Result<(), StoreError> {
        let mut table = self.table.write();
        if table.keys.contains_key(&task.id) {
            return Err(StoreError::Database(format!(
                "task {} already exists",
                task.id
            )));
        }

        let key = (task.created_at, table.next_seq);
        table.next_seq += 1;
        table.keys.insert(task.id, key);
        table.ordered.insert(key, task.clone());
        Ok(())
    }

    async fn fetch_and_claim_pending(&self, limit: usize) -> Result<Vec<Task>, StoreError> {
        let mut table = self.table.write();
        let now = Utc::now();
        let mut claimed = Vec::new();

        for task in table.ordered.values_mut() {
            if claimed.len() >= limit {
                break;
            }
            if task.status == TaskStatus::Pending {
                task.status = TaskStatus::Processing;
                task.updated_at = now;
                claimed.push(task.clone());
            }
        }

        Ok(claimed)
    }

    async fn update_status(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        error: Option<&str>,
    ) -> Result<(), StoreError> {
        let mut table = self.table.write();
        let task = table.get_mut(task_id)?;
        task.status = status;
        task.last_error = error.map(str::to_string);
        task.updated_at = Utc::now();
        Ok(())
    }

    async fn increment_retries(&self, task_id: Uuid) -> Result<u32, StoreError> {
        let mut table = self.table.write();
        let task = table.get_mut(task_id)?;
        task.retries += 1;
        task.updated_at = Utc::now();
        Ok(task.retries)
    }

    async fn delete_terminal_older_than(&self, retention: Duration) -> Result<u64, StoreError> {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(retention)
                .map_err(|e| StoreError::Serialization(e.to_string()))?;

        let mut table = self.table.write();
        let expired: Vec<(IndexKey, Uuid)> = table
            .ordered
            .iter()
            .filter(|(_, t)| t.status.is_terminal() && t.updated_at < cutoff)
            .map(|(key, t)| (*key, t.id))
            .collect();

        for (key, task_id) in &expired {
            table.ordered.remove(key);
            table.keys.remove(task_id);
        }

        Ok(expired.len() as u64)
    }

    async fn get_task(&self, task_id: Uuid) -> Result<Task, StoreError> {
        let table = self.table.read();
        table
            .keys
            .get(&task_id)
            .and_then(|key| table.ordered.get(key))
            .cloned()
            .ok_or(StoreError::TaskNotFound(task_id))
    }

    async fn list_by_status(
        &self,
        status: TaskStatus,
        pagination: Pagination,
    ) -> Result<Vec<Task>, StoreError> {
        let table = self.table.read();
        Ok(table.newest_first(move |t| t.status == status, pagination))
    }

    async fn list_all(&self, pagination: Pagination) -> Result<Vec<Task>, StoreError> {
        let table = self.table.read();
        Ok(table.newest_first(|_| true, pagination))
    }

    async fn stats(&self) -> Result<TaskStats, StoreError> {
        let table = self.table.read();
        let mut stats = TaskStats {
            total: table.ordered.len() as u64,
            ..Default::default()
        };

        for task in table.ordered.values() {
            match task.status {
                TaskStatus::Pending => stats.pending += 1,
                TaskStatus::Processing => stats.processing += 1,
                TaskStatus::Completed => stats.completed += 1,
                TaskStatus::Failed => stats.failed += 1,
            }
        }

        Ok(stats)
    }

    async fn close(&self) {}
}
