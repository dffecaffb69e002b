//! SQLite database - schema definitions and connection management
//!
//! This file contains:
//! - Database struct definition
//! - Connection management (new, init)
//! - Schema creation
//!
//! All table operations are in the tables/ subdirectory.

use rusqlite::{Connection, Result as SqliteResult};
use std::path::Path;
use std::sync::Mutex;

/// Main database wrapper with connection pooling via Mutex
pub struct Database {
    pub(crate) conn: Mutex<Connection>,
}

impl Database {
    /// Create a new database connection and initialize schema
    pub fn new(database_url: &str) -> Result<Self, String> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent).ok();
            }
        }

        let conn = Connection::open(database_url)
            .map_err(|e| format!("Failed to open database {}: {}", database_url, e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()
            .map_err(|e| format!("Failed to initialize database schema: {}", e))?;
        Ok(db)
    }

    /// In-memory database, used by tests
    pub fn new_in_memory() -> Result<Self, String> {
        let conn = Connection::open_in_memory()
            .map_err(|e| format!("Failed to open in-memory database: {}", e))?;
        let db = Self {
            conn: Mutex::new(conn),
        };
        db.init()
            .map_err(|e| format!("Failed to initialize database schema: {}", e))?;
        Ok(db)
    }

    /// Initialize all database tables
    fn init(&self) -> SqliteResult<()> {
        let conn = self.conn.lock().unwrap();

        // Tasks table - simple tasks, orchestrated parents and their subtasks.
        // JSON payloads (parameters, result) are stored as TEXT.
        conn.execute(
            "CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                title TEXT NOT NULL,
                description TEXT NOT NULL,
                command TEXT,
                parameters TEXT NOT NULL DEFAULT '{}',
                status TEXT NOT NULL DEFAULT 'pending',
                priority TEXT NOT NULL DEFAULT 'medium',
                result TEXT,
                error_message TEXT,
                assigned_agent TEXT,
                created_by TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_created_by ON tasks(created_by)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            [],
        )?;

        // Transactions table - one row per execution attempt, used for
        // budget summation over successful spend
        conn.execute(
            "CREATE TABLE IF NOT EXISTS transactions (
                id TEXT PRIMARY KEY,
                transaction_type TEXT NOT NULL,
                status TEXT NOT NULL,
                task_id TEXT,
                request_data TEXT,
                response_data TEXT,
                error_data TEXT,
                cost REAL NOT NULL DEFAULT 0,
                created_by TEXT NOT NULL,
                started_at TEXT,
                completed_at TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_created_by ON transactions(created_by)",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_transactions_task_id ON transactions(task_id)",
            [],
        )?;

        // Audit logs table - append-only
        conn.execute(
            "CREATE TABLE IF NOT EXISTS audit_logs (
                id TEXT PRIMARY KEY,
                event_type TEXT NOT NULL,
                event_name TEXT NOT NULL,
                description TEXT NOT NULL,
                user_id TEXT,
                agent_id TEXT,
                task_id TEXT,
                transaction_id TEXT,
                ip_address TEXT,
                user_agent TEXT,
                created_at TEXT NOT NULL
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_audit_logs_task_id ON audit_logs(task_id)",
            [],
        )?;

        Ok(())
    }
}
