//! Applying a claimed task to the record store

use std::sync::Arc;

use tracing::{debug, instrument, warn};

use crate::model::{Record, Task, TaskOperation, TaskPayload};
use crate::persistence::{RecordStore, StoreError};

/// Why a task could not be applied
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApplyError {
    /// Payload is not a valid `TaskPayload`
    #[error("failed to decode task payload: {0}")]
    Decode(String),

    /// Insert hit an existing record holding a different value
    #[error("record with id '{id}' already exists but with different value")]
    Conflict { id: String },

    /// Operation name not recognized
    #[error("invalid task operation: {0}")]
    InvalidOperation(String),

    /// Record store failure (including update/delete of a missing record)
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl ApplyError {
    /// Stable name of the failure kind, matched against
    /// [`RetryPolicy::non_retryable_errors`](crate::RetryPolicy)
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Decode(_) => "decode",
            Self::Conflict { .. } => "conflict",
            Self::InvalidOperation(_) => "invalid_operation",
            Self::Store(_) => "store",
        }
    }
}

/// Dispatches a task to the matching record store mutation
pub struct TaskApplier {
    records: Arc<dyn RecordStore>,
}

impl TaskApplier {
    pub fn new(records: Arc<dyn RecordStore>) -> Self {
        Self { records }
    }

    /// Apply one task
    ///
    /// Re-applying an insert whose record already holds a byte-identical value
    /// succeeds without writing.
    #[instrument(skip(self, task), fields(task_id = %task.id, operation = %task.operation))]
    pub async fn apply(&self, task: &Task) -> Result<(), ApplyError> {
        match &task.operation {
            TaskOperation::Insert => self.insert(decode(task)?).await,
            TaskOperation::Update => {
                let payload = decode(task)?;
                let record = Record::new(payload.id, payload.value.unwrap_or_default());
                self.records.update(&record).await?;
                Ok(())
            }
            TaskOperation::Delete => {
                self.records.delete(&decode(task)?.id).await?;
                Ok(())
            }
            TaskOperation::Other(name) => Err(ApplyError::InvalidOperation(name.clone())),
        }
    }

    async fn insert(&self, payload: TaskPayload) -> Result<(), ApplyError> {
        let record = Record::new(payload.id, payload.value.unwrap_or_default());

        match self.records.insert(&record).await {
            Ok(()) => Ok(()),
            Err(StoreError::DuplicateKey(_)) => {
                let existing = self.records.get(&record.id).await?;
                if same_json(&existing.value, &record.value)? {
                    debug!(record_id = %record.id, "record already holds this value");
                    Ok(())
                } else {
                    warn!(record_id = %record.id, "insert conflicts with existing record");
                    Err(ApplyError::Conflict { id: record.id })
                }
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn decode(task: &Task) -> Result<TaskPayload, ApplyError> {
    serde_json::from_value(task.payload.clone()).map_err(|e| ApplyError::Decode(e.to_string()))
}

fn same_json(a: &serde_json::Value, b: &serde_json::Value) -> Result<bool, ApplyError> {
    let encode = |v: &serde_json::Value| {
        serde_json::to_vec(v).map_err(|e| ApplyError::Decode(e.to_string()))
    };
    Ok(encode(a)? == encode(b)?)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::persistence::InMemoryRecordStore;

    fn applier() -> (TaskApplier, Arc<InMemoryRecordStore>) {
        let records = Arc::new(InMemoryRecordStore::new());
        (TaskApplier::new(records.clone()), records)
    }

    fn task(operation: TaskOperation, payload: serde_json::Value) -> Task {
        Task::new(operation, payload)
    }

    #[tokio::test]
    async fn test_insert_update_delete() {
        let (applier, records) = applier();

        applier
            .apply(&task(
                TaskOperation::Insert,
                json!({"id": "u1", "value": {"name": "Ann"}}),
            ))
            .await
            .unwrap();
        assert_eq!(records.get("u1").await.unwrap().value, json!({"name": "Ann"}));

        applier
            .apply(&task(
                TaskOperation::Update,
                json!({"id": "u1", "value": {"age": 31}}),
            ))
            .await
            .unwrap();
        assert_eq!(records.get("u1").await.unwrap().value, json!({"age": 31}));

        applier
            .apply(&task(TaskOperation::Delete, json!({"id": "u1"})))
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_identical_insert_is_idempotent() {
        let (applier, records) = applier();
        let insert = task(TaskOperation::Insert, json!({"id": "a", "value": {"x": [1, 2]}}));

        applier.apply(&insert).await.unwrap();
        applier.apply(&insert).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_differing_insert_conflicts() {
        let (applier, records) = applier();
        applier
            .apply(&task(TaskOperation::Insert, json!({"id": "a", "value": 1})))
            .await
            .unwrap();

        let err = applier
            .apply(&task(TaskOperation::Insert, json!({"id": "a", "value": 2})))
            .await
            .unwrap_err();
        assert_eq!(err, ApplyError::Conflict { id: "a".to_string() });
        assert_eq!(err.kind(), "conflict");
        assert_eq!(
            err.to_string(),
            "record with id 'a' already exists but with different value"
        );
        assert_eq!(records.get("a").await.unwrap().value, json!(1));
    }

    #[tokio::test]
    async fn test_missing_record_fails_update_and_delete() {
        let (applier, _) = applier();

        let err = applier
            .apply(&task(TaskOperation::Update, json!({"id": "nope", "value": 1})))
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ApplyError::Store(StoreError::RecordNotFound("nope".to_string()))
        );

        let err = applier
            .apply(&task(TaskOperation::Delete, json!({"id": "nope"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "store");
    }

    #[tokio::test]
    async fn test_unknown_operation_and_bad_payload() {
        let (applier, records) = applier();

        let err = applier
            .apply(&task(
                TaskOperation::Other("archive".to_string()),
                json!({"id": "a"}),
            ))
            .await
            .unwrap_err();
        assert_eq!(err, ApplyError::InvalidOperation("archive".to_string()));
        assert_eq!(err.to_string(), "invalid task operation: archive");

        let err = applier
            .apply(&task(TaskOperation::Insert, json!({"value": 1})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "decode");
        assert!(records.is_empty());
    }
}
