//! Task model - one row per command execution, simple or orchestrated

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
}

impl TaskStatus {
    /// Legal status transitions: pending -> in_progress -> {completed, failed},
    /// cancelled only from pending. Terminal states never move.
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::InProgress)
            | (TaskStatus::Pending, TaskStatus::Failed)
            | (TaskStatus::Pending, TaskStatus::Cancelled)
            | (TaskStatus::InProgress, TaskStatus::Completed)
            | (TaskStatus::InProgress, TaskStatus::Failed) => true,
            _ => self == next,
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Cancelled
        )
    }
}

#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TaskPriority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: String,
    pub title: String,
    pub description: String,
    pub command: Option<String>,
    /// Command parameters as a JSON object
    pub parameters: Value,
    pub status: TaskStatus,
    pub priority: TaskPriority,
    /// Opaque result payload: intent metadata, agent output, approval records,
    /// subtask outcomes for parent tasks
    pub result: Option<Value>,
    pub error_message: Option<String>,
    pub assigned_agent: Option<String>,
    pub created_by: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(title: &str, description: &str, created_by: &str) -> Self {
        let now = Utc::now();
        Task {
            id: Uuid::new_v4().to_string(),
            title: title.to_string(),
            description: description.to_string(),
            command: None,
            parameters: json!({}),
            status: TaskStatus::Pending,
            priority: TaskPriority::Medium,
            result: None,
            error_message: None,
            assigned_agent: None,
            created_by: created_by.to_string(),
            started_at: None,
            completed_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Get the result payload as a mutable JSON object, initializing it if absent.
    pub fn result_object_mut(&mut self) -> &mut Map<String, Value> {
        if !matches!(self.result, Some(Value::Object(_))) {
            self.result = Some(json!({}));
        }
        self.result
            .as_mut()
            .and_then(|v| v.as_object_mut())
            .unwrap()
    }

    /// Insert a key into the result payload.
    pub fn set_result_field(&mut self, key: &str, value: Value) {
        self.result_object_mut().insert(key.to_string(), value);
    }

    pub fn result_field(&self, key: &str) -> Option<&Value> {
        self.result.as_ref().and_then(|r| r.get(key))
    }
}
