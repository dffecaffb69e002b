//! Transaction model - audit-grade record of one executed command

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use strum::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionType {
    Command,
    Query,
    Notification,
    System,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Processing,
    Success,
    Failed,
    RolledBack,
}

/// Created exactly once per execution attempt and never mutated afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub transaction_type: TransactionType,
    pub status: TransactionStatus,
    pub task_id: Option<String>,
    pub request_data: Option<Value>,
    pub response_data: Option<Value>,
    pub error_data: Option<Value>,
    pub cost: f64,
    pub created_by: String,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn new(
        transaction_type: TransactionType,
        status: TransactionStatus,
        created_by: &str,
    ) -> Self {
        Transaction {
            id: Uuid::new_v4().to_string(),
            transaction_type,
            status,
            task_id: None,
            request_data: None,
            response_data: None,
            error_data: None,
            cost: 0.0,
            created_by: created_by.to_string(),
            started_at: None,
            completed_at: None,
            created_at: Utc::now(),
        }
    }
}
