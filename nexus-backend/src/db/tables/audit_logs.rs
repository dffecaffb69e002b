//! Audit log table operations (append-only)

use rusqlite::Row;

use super::super::Database;
use super::parse_ts;
use crate::models::{AuditEventType, AuditLog};

impl Database {
    /// Append an audit log entry. There is deliberately no update or delete.
    pub fn insert_audit_log(&self, entry: &AuditLog) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO audit_logs (id, event_type, event_name, description, user_id,
             agent_id, task_id, transaction_id, ip_address, user_agent, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                &entry.id,
                entry.event_type.to_string(),
                &entry.event_name,
                &entry.description,
                &entry.user_id,
                &entry.agent_id,
                &entry.task_id,
                &entry.transaction_id,
                &entry.ip_address,
                &entry.user_agent,
                entry.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| format!("Failed to insert audit log: {}", e))?;
        Ok(())
    }

    /// List audit entries linked to a task, oldest first
    pub fn list_audit_logs_for_task(&self, task_id: &str) -> Result<Vec<AuditLog>, String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, event_type, event_name, description, user_id, agent_id, task_id,
             transaction_id, ip_address, user_agent, created_at
             FROM audit_logs WHERE task_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(|e| format!("Failed to prepare audit log query: {}", e))?;
        let entries = stmt
            .query_map([task_id], Self::row_to_audit_log)
            .map_err(|e| format!("Failed to list audit logs: {}", e))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(entries)
    }

    fn row_to_audit_log(row: &Row) -> rusqlite::Result<AuditLog> {
        let event_type: String = row.get(1)?;
        let created_at: String = row.get(10)?;
        Ok(AuditLog {
            id: row.get(0)?,
            event_type: event_type.parse().unwrap_or(AuditEventType::SystemEvent),
            event_name: row.get(2)?,
            description: row.get(3)?,
            user_id: row.get(4)?,
            agent_id: row.get(5)?,
            task_id: row.get(6)?,
            transaction_id: row.get(7)?,
            ip_address: row.get(8)?,
            user_agent: row.get(9)?,
            created_at: parse_ts(&created_at),
        })
    }
}
