use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use std::fmt;
use std::str::FromStr;

/// Unique identifier for a task instance, wrapping a UUID v7 (time-sortable).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Create a new TaskId using UUID v7.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }

    /// Create a TaskId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Task instance lifecycle states.
///
/// - Todo: eligible for scheduling once due
/// - Done: every step succeeded (terminal)
/// - Error: a step exhausted its retries, or the instance was dead-lettered (terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Todo,
    Done,
    Error,
}

impl TaskStatus {
    /// Whether the poll query will never select this status again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, TaskStatus::Done | TaskStatus::Error)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Todo => write!(f, "todo"),
            TaskStatus::Done => write!(f, "done"),
            TaskStatus::Error => write!(f, "error"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "todo" => Ok(TaskStatus::Todo),
            "done" => Ok(TaskStatus::Done),
            "error" => Ok(TaskStatus::Error),
            other => Err(format!("invalid task status: '{other}'")),
        }
    }
}

impl Default for TaskStatus {
    fn default() -> Self {
        TaskStatus::Todo
    }
}

/// A persisted task instance: one run of a named task definition.
///
/// `current_step`, `retry_count` and `status` are owned by the execution
/// engine. `payload` belongs to the step actions; `args` is the input the
/// instance was created with.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInstance {
    pub id: TaskId,
    /// Name of the task definition this instance runs.
    pub name: String,
    /// Step to execute next. Empty means "start at the first step".
    #[serde(default)]
    pub current_step: String,
    /// `None` is the empty status and is treated as `todo`.
    #[serde(default)]
    pub status: Option<TaskStatus>,
    /// Number of failed step executions so far. Never decremented.
    #[serde(default)]
    pub retry_count: u32,
    /// Earliest time the scheduler may pick this instance up.
    pub due_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    /// Opaque step-owned state, persisted verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    /// Opaque input supplied at creation, persisted verbatim.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
}

impl TaskInstance {
    /// Build a fresh `todo` instance that has not started any step.
    pub fn new(name: impl Into<String>, due_at: DateTime<Utc>) -> Self {
        Self {
            id: TaskId::new(),
            name: name.into(),
            current_step: String::new(),
            status: Some(TaskStatus::Todo),
            retry_count: 0,
            due_at,
            created_at: Utc::now(),
            payload: None,
            args: None,
        }
    }

    /// The status with the empty value read as `todo`.
    pub fn effective_status(&self) -> TaskStatus {
        self.status.unwrap_or_default()
    }

    /// Whether the scheduler should pick this instance up at `now`.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.effective_status() == TaskStatus::Todo && self.due_at <= now
    }

    /// Decode the payload into a caller-defined type. `Ok(None)` when unset.
    pub fn payload_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.payload
            .as_ref()
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
    }

    /// Replace the payload with the serialized form of `value`.
    pub fn set_payload<T: Serialize>(&mut self, value: &T) -> Result<(), serde_json::Error> {
        self.payload = Some(serde_json::to_value(value)?);
        Ok(())
    }

    /// Decode the creation arguments into a caller-defined type.
    pub fn args_as<T: DeserializeOwned>(&self) -> Result<Option<T>, serde_json::Error> {
        self.args
            .as_ref()
            .map(|v| serde_json::from_value(v.clone()))
            .transpose()
    }
}

/// Request to enqueue a new task instance. The repository assigns the id,
/// `created_at`, the `todo` status and an empty `current_step`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub name: String,
    /// Defaults to "now" when omitted.
    pub due_at: Option<DateTime<Utc>>,
    pub args: Option<serde_json::Value>,
    pub payload: Option<serde_json::Value>,
}

impl NewTask {
    /// A task due immediately with no arguments.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            due_at: None,
            args: None,
            payload: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Buffer {
        user_address: String,
        node_id: String,
    }

    #[test]
    fn test_task_id_display() {
        let id = TaskId::new();
        let parsed: TaskId = id.to_string().parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn test_task_status_roundtrip() {
        for status in [TaskStatus::Todo, TaskStatus::Done, TaskStatus::Error] {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(status, parsed);
        }
        assert!("pending".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!TaskStatus::Todo.is_terminal());
        assert!(TaskStatus::Done.is_terminal());
        assert!(TaskStatus::Error.is_terminal());
    }

    #[test]
    fn test_empty_status_is_todo() {
        let mut task = TaskInstance::new("t", Utc::now());
        task.status = None;
        assert_eq!(task.effective_status(), TaskStatus::Todo);
    }

    #[test]
    fn test_is_due() {
        let now = Utc::now();
        let mut task = TaskInstance::new("t", now - Duration::seconds(1));
        assert!(task.is_due(now));

        task.due_at = now + Duration::minutes(5);
        assert!(!task.is_due(now));

        task.due_at = now;
        task.status = Some(TaskStatus::Done);
        assert!(!task.is_due(now));
    }

    #[test]
    fn test_payload_hooks() {
        let mut task = TaskInstance::new("t", Utc::now());
        assert_eq!(task.payload_as::<Buffer>().unwrap(), None);

        let buffer = Buffer {
            user_address: "salutsalut".to_string(),
            node_id: "node-1".to_string(),
        };
        task.set_payload(&buffer).unwrap();
        assert_eq!(task.payload_as::<Buffer>().unwrap(), Some(buffer));
    }

    #[test]
    fn test_args_decode_mismatch_is_error() {
        let mut task = TaskInstance::new("t", Utc::now());
        task.args = Some(json!({"user_address": 42}));
        assert!(task.args_as::<Buffer>().is_err());
    }

    #[test]
    fn test_instance_deserializes_with_missing_engine_fields() {
        let raw = json!({
            "id": Uuid::now_v7(),
            "name": "t",
            "due_at": "2026-01-01T00:00:00Z",
            "created_at": "2026-01-01T00:00:00Z"
        });
        let task: TaskInstance = serde_json::from_value(raw).unwrap();
        assert!(task.current_step.is_empty());
        assert_eq!(task.status, None);
        assert_eq!(task.retry_count, 0);
    }
}
