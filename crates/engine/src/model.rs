//! Domain types shared by the stores, the producer and the worker pool

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Task status in the inbox
///
/// ```text
/// pending ──claim──▶ processing ──ok──▶ completed
///    ▲                    │
///    └──retry delay───────┤
///                         └──retries exhausted──▶ failed
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting to be claimed by a poller
    Pending,

    /// Claimed by exactly one poller
    Processing,

    /// Applied to the record store
    Completed,

    /// Retries exhausted
    Failed,
}

impl TaskStatus {
    /// Whether no further transitions happen without external intervention
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            other => Err(format!("unknown task status: {}", other)),
        }
    }
}

/// Mutation carried by a task
///
/// Stores persist the operation as text, so a row may carry a name this
/// version does not know. Such tasks are kept as [`TaskOperation::Other`] and
/// fail on apply instead of failing the whole fetch.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TaskOperation {
    Insert,
    Update,
    Delete,
    Other(String),
}

impl TaskOperation {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Insert => "insert",
            Self::Update => "update",
            Self::Delete => "delete",
            Self::Other(name) => name,
        }
    }

    /// Parse a stored operation name. Never fails.
    pub fn parse(name: &str) -> Self {
        match name {
            "insert" => Self::Insert,
            "update" => Self::Update,
            "delete" => Self::Delete,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for TaskOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for TaskOperation {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for TaskOperation {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let name = String::deserialize(deserializer)?;
        Ok(Self::parse(&name))
    }
}

/// Body of a task: the target record id and, for insert/update, the document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskPayload {
    pub id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<serde_json::Value>,
}

/// A unit of deferred work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub operation: TaskOperation,
    pub payload: serde_json::Value,
    pub status: TaskStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub retries: u32,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl Task {
    /// Create a new pending task with a time-ordered id
    pub fn new(operation: TaskOperation, payload: serde_json::Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            operation,
            payload,
            status: TaskStatus::Pending,
            created_at: now,
            updated_at: now,
            retries: 0,
            last_error: None,
        }
    }
}

/// Business entity stored in the record store
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: String,
    pub value: serde_json::Value,
}

impl Record {
    pub fn new(id: impl Into<String>, value: serde_json::Value) -> Self {
        Self {
            id: id.into(),
            value,
        }
    }
}

/// Task counts by status
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStats {
    pub total: u64,
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
}

impl TaskStats {
    /// Tasks not yet resolved (pending + processing)
    pub fn queue_depth(&self) -> u64 {
        self.pending + self.processing
    }
}

/// Pagination parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub offset: u32,
    pub limit: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            offset: 0,
            limit: 100,
        }
    }
}

impl Pagination {
    pub fn new(limit: u32, offset: u32) -> Self {
        Self { offset, limit }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Processing,
            TaskStatus::Completed,
            TaskStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<TaskStatus>().unwrap(), status);
        }
        assert!("dead".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Failed.is_terminal());
        assert!(!TaskStatus::Pending.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
    }

    #[test]
    fn test_unknown_operation_is_preserved() {
        let op = TaskOperation::parse("upsert");
        assert_eq!(op, TaskOperation::Other("upsert".to_string()));
        assert_eq!(op.to_string(), "upsert");

        let json = serde_json::to_string(&TaskOperation::Delete).unwrap();
        assert_eq!(json, "\"delete\"");
        let parsed: TaskOperation = serde_json::from_str("\"archive\"").unwrap();
        assert_eq!(parsed.as_str(), "archive");
    }

    #[test]
    fn test_delete_payload_omits_value() {
        let payload = TaskPayload {
            id: "u1".to_string(),
            value: None,
        };
        assert_eq!(
            serde_json::to_value(&payload).unwrap(),
            serde_json::json!({"id": "u1"})
        );
    }

    #[test]
    fn test_new_task_is_pending() {
        let task = Task::new(TaskOperation::Insert, serde_json::json!({"id": "a"}));
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.retries, 0);
        assert_eq!(task.created_at, task.updated_at);
        assert!(task.last_error.is_none());
    }

    #[test]
    fn test_queue_depth() {
        let stats = TaskStats {
            total: 10,
            pending: 3,
            processing: 2,
            completed: 4,
            failed: 1,
        };
        assert_eq!(stats.queue_depth(), 5);
    }
}
