//! Write path into the inbox and the direct read path

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};
use uuid::Uuid;

use crate::model::{Record, Task, TaskOperation, TaskPayload};
use crate::persistence::{RecordStore, StoreError, TaskStore};

/// Request to create a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsertRequest {
    pub id: String,
    pub value: serde_json::Value,
}

/// Request to replace a record's value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateRequest {
    pub id: String,
    pub value: serde_json::Value,
}

/// Request to remove a record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeleteRequest {
    pub id: String,
}

/// Errors surfaced to callers of the producer and the engine facade
#[derive(Debug, thiserror::Error)]
pub enum InboxError {
    /// Request rejected before anything was enqueued
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Payload could not be serialized
    #[error("failed to serialize task payload: {0}")]
    Serialization(String),

    /// Task could not be persisted
    #[error("failed to enqueue task: {0}")]
    Enqueue(StoreError),

    /// Record does not exist
    #[error("record with id '{0}' not found")]
    NotFound(String),

    /// Store error on a read path
    #[error("store error: {0}")]
    Store(StoreError),
}

/// Turns mutation requests into pending tasks
///
/// Never touches the record store on the write path; a returned task id means
/// the task is durably persisted.
pub struct InboxProducer {
    tasks: Arc<dyn TaskStore>,
    records: Arc<dyn RecordStore>,
}

impl InboxProducer {
    pub fn new(tasks: Arc<dyn TaskStore>, records: Arc<dyn RecordStore>) -> Self {
        Self { tasks, records }
    }

    /// Enqueue an insert
    pub async fn insert(&self, request: InsertRequest) -> Result<Uuid, InboxError> {
        self.enqueue(
            TaskOperation::Insert,
            TaskPayload {
                id: request.id,
                value: Some(request.value),
            },
        )
        .await
    }

    /// Enqueue a full replace of an existing record
    pub async fn update(&self, request: UpdateRequest) -> Result<Uuid, InboxError> {
        self.enqueue(
            TaskOperation::Update,
            TaskPayload {
                id: request.id,
                value: Some(request.value),
            },
        )
        .await
    }

    /// Enqueue a delete
    pub async fn delete(&self, request: DeleteRequest) -> Result<Uuid, InboxError> {
        self.enqueue(
            TaskOperation::Delete,
            TaskPayload {
                id: request.id,
                value: None,
            },
        )
        .await
    }

    /// Read a record directly from the record store, bypassing the inbox
    #[instrument(skip(self))]
    pub async fn get(&self, id: &str) -> Result<Record, InboxError> {
        match self.records.get(id).await {
            Ok(record) => Ok(record),
            Err(StoreError::RecordNotFound(id)) => Err(InboxError::NotFound(id)),
            Err(e) => Err(InboxError::Store(e)),
        }
    }

    #[instrument(skip(self, payload), fields(operation = %operation, record_id = %payload.id))]
    async fn enqueue(
        &self,
        operation: TaskOperation,
        payload: TaskPayload,
    ) -> Result<Uuid, InboxError> {
        if payload.id.trim().is_empty() {
            return Err(InboxError::InvalidRequest(
                "record id must not be empty".to_string(),
            ));
        }

        let payload =
            serde_json::to_value(&payload).map_err(|e| InboxError::Serialization(e.to_string()))?;
        let task = Task::new(operation, payload);

        self.tasks
            .create_task(&task)
            .await
            .map_err(InboxError::Enqueue)?;

        debug!(task_id = %task.id, "task enqueued");
        Ok(task.id)
    }
}
