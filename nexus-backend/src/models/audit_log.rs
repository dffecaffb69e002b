//! Append-only audit log model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum AuditEventType {
    UserAction,
    AgentAction,
    TaskCreated,
    TaskCompleted,
    TaskFailed,
    TransactionCreated,
    TransactionCompleted,
    SystemEvent,
    SecurityEvent,
}

/// Audit entries are written on every terminal state transition and never
/// updated or deleted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditLog {
    pub id: String,
    pub event_type: AuditEventType,
    pub event_name: String,
    pub description: String,
    pub user_id: Option<String>,
    pub agent_id: Option<String>,
    pub task_id: Option<String>,
    pub transaction_id: Option<String>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl AuditLog {
    pub fn new(event_type: AuditEventType, description: &str) -> Self {
        AuditLog {
            id: Uuid::new_v4().to_string(),
            event_type,
            event_name: event_type.to_string(),
            description: description.to_string(),
            user_id: None,
            agent_id: None,
            task_id: None,
            transaction_id: None,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_user(mut self, user_id: &str) -> Self {
        self.user_id = Some(user_id.to_string());
        self
    }

    pub fn with_task(mut self, task_id: &str) -> Self {
        self.task_id = Some(task_id.to_string());
        self
    }

    pub fn with_transaction(mut self, transaction_id: &str) -> Self {
        self.transaction_id = Some(transaction_id.to_string());
        self
    }
}
