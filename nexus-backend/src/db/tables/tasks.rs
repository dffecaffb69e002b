//! Task table operations

use chrono::Utc;
use rusqlite::{OptionalExtension, Row};
use serde_json::Value;

use super::super::Database;
use super::{parse_ts, parse_ts_opt};
use crate::models::{Task, TaskPriority, TaskStatus};

impl Database {
    /// Insert a new task row
    pub fn create_task(&self, task: &Task) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks (id, title, description, command, parameters, status, priority,
             result, error_message, assigned_agent, created_by, started_at, completed_at,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            rusqlite::params![
                &task.id,
                &task.title,
                &task.description,
                &task.command,
                task.parameters.to_string(),
                task.status.to_string(),
                task.priority.to_string(),
                task.result.as_ref().map(|r| r.to_string()),
                &task.error_message,
                &task.assigned_agent,
                &task.created_by,
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.created_at.to_rfc3339(),
                task.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| format!("Failed to create task: {}", e))?;
        Ok(())
    }

    /// Get a task by ID
    pub fn get_task(&self, id: &str) -> Result<Option<Task>, String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, description, command, parameters, status, priority,
             result, error_message, assigned_agent, created_by, started_at, completed_at,
             created_at, updated_at
             FROM tasks WHERE id = ?1",
            )
            .map_err(|e| format!("Failed to prepare task query: {}", e))?;
        let task = stmt
            .query_row([id], Self::row_to_task)
            .optional()
            .map_err(|e| format!("Failed to load task: {}", e))?;
        Ok(task)
    }

    /// Write back a task's mutable fields. Refuses illegal status transitions
    /// and leaves the row untouched when one is attempted.
    pub fn update_task(&self, task: &mut Task) -> Result<(), String> {
        if let Some(current) = self.get_task(&task.id)? {
            if !current.status.can_transition_to(task.status) {
                log::warn!(
                    "[DB] Refusing illegal task status transition {} -> {} for task {}",
                    current.status,
                    task.status,
                    task.id
                );
                task.status = current.status;
            }
        }
        task.updated_at = Utc::now();

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE tasks SET title = ?2, description = ?3, command = ?4, parameters = ?5,
             status = ?6, priority = ?7, result = ?8, error_message = ?9, assigned_agent = ?10,
             started_at = ?11, completed_at = ?12, updated_at = ?13
             WHERE id = ?1",
            rusqlite::params![
                &task.id,
                &task.title,
                &task.description,
                &task.command,
                task.parameters.to_string(),
                task.status.to_string(),
                task.priority.to_string(),
                task.result.as_ref().map(|r| r.to_string()),
                &task.error_message,
                &task.assigned_agent,
                task.started_at.map(|t| t.to_rfc3339()),
                task.completed_at.map(|t| t.to_rfc3339()),
                task.updated_at.to_rfc3339(),
            ],
        )
        .map_err(|e| format!("Failed to update task: {}", e))?;
        Ok(())
    }

    /// List tasks owned by a user, newest first
    pub fn list_tasks_for_user(
        &self,
        created_by: &str,
        status: Option<TaskStatus>,
    ) -> Result<Vec<Task>, String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, title, description, command, parameters, status, priority,
             result, error_message, assigned_agent, created_by, started_at, completed_at,
             created_at, updated_at
             FROM tasks
             WHERE created_by = ?1 AND (?2 IS NULL OR status = ?2)
             ORDER BY created_at DESC LIMIT 100",
            )
            .map_err(|e| format!("Failed to prepare task list query: {}", e))?;
        let tasks = stmt
            .query_map(
                rusqlite::params![created_by, status.map(|s| s.to_string())],
                Self::row_to_task,
            )
            .map_err(|e| format!("Failed to list tasks: {}", e))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(tasks)
    }

    fn row_to_task(row: &Row) -> rusqlite::Result<Task> {
        let parameters: String = row.get(4)?;
        let status: String = row.get(5)?;
        let priority: String = row.get(6)?;
        let result: Option<String> = row.get(7)?;
        let started_at: Option<String> = row.get(11)?;
        let completed_at: Option<String> = row.get(12)?;
        let created_at: String = row.get(13)?;
        let updated_at: String = row.get(14)?;

        Ok(Task {
            id: row.get(0)?,
            title: row.get(1)?,
            description: row.get(2)?,
            command: row.get(3)?,
            parameters: serde_json::from_str(&parameters)
                .unwrap_or(Value::Object(Default::default())),
            status: status.parse().unwrap_or(TaskStatus::Pending),
            priority: priority.parse().unwrap_or(TaskPriority::Medium),
            result: result.and_then(|r| serde_json::from_str(&r).ok()),
            error_message: row.get(8)?,
            assigned_agent: row.get(9)?,
            created_by: row.get(10)?,
            started_at: parse_ts_opt(started_at),
            completed_at: parse_ts_opt(completed_at),
            created_at: parse_ts(&created_at),
            updated_at: parse_ts(&updated_at),
        })
    }
}
