//! Transaction table operations

use chrono::NaiveDate;
use rusqlite::{OptionalExtension, Row};

use super::super::Database;
use super::{parse_ts, parse_ts_opt};
use crate::models::{Transaction, TransactionStatus, TransactionType};

impl Database {
    /// Insert a transaction row. Transactions are never updated after creation.
    pub fn create_transaction(&self, tx: &Transaction) -> Result<(), String> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO transactions (id, transaction_type, status, task_id, request_data,
             response_data, error_data, cost, created_by, started_at, completed_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                &tx.id,
                tx.transaction_type.to_string(),
                tx.status.to_string(),
                &tx.task_id,
                tx.request_data.as_ref().map(|v| v.to_string()),
                tx.response_data.as_ref().map(|v| v.to_string()),
                tx.error_data.as_ref().map(|v| v.to_string()),
                tx.cost,
                &tx.created_by,
                tx.started_at.map(|t| t.to_rfc3339()),
                tx.completed_at.map(|t| t.to_rfc3339()),
                tx.created_at.to_rfc3339(),
            ],
        )
        .map_err(|e| format!("Failed to create transaction: {}", e))?;
        Ok(())
    }

    pub fn get_transaction(&self, id: &str) -> Result<Option<Transaction>, String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, transaction_type, status, task_id, request_data, response_data,
             error_data, cost, created_by, started_at, completed_at, created_at
             FROM transactions WHERE id = ?1",
            )
            .map_err(|e| format!("Failed to prepare transaction query: {}", e))?;
        let tx = stmt
            .query_row([id], Self::row_to_transaction)
            .optional()
            .map_err(|e| format!("Failed to load transaction: {}", e))?;
        Ok(tx)
    }

    /// Sum of successful transaction costs for a user within an inclusive
    /// date window. This is the budget gate's spend history read.
    pub fn sum_successful_costs(
        &self,
        created_by: &str,
        start_date: NaiveDate,
        end_date: NaiveDate,
    ) -> Result<f64, String> {
        let conn = self.conn.lock().unwrap();
        let total: f64 = conn
            .query_row(
            "SELECT COALESCE(SUM(cost), 0) FROM transactions
             WHERE created_by = ?1 AND status = 'success'
             AND date(created_at) >= date(?2) AND date(created_at) <= date(?3)",
            rusqlite::params![
                created_by,
                start_date.format("%Y-%m-%d").to_string(),
                end_date.format("%Y-%m-%d").to_string(),
            ],
                |row| row.get(0),
            )
            .map_err(|e| format!("Failed to sum transaction costs: {}", e))?;
        Ok(total)
    }

    /// List transactions linked to a task
    pub fn list_transactions_for_task(&self, task_id: &str) -> Result<Vec<Transaction>, String> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, transaction_type, status, task_id, request_data, response_data,
             error_data, cost, created_by, started_at, completed_at, created_at
             FROM transactions WHERE task_id = ?1 ORDER BY created_at ASC",
            )
            .map_err(|e| format!("Failed to prepare transaction list query: {}", e))?;
        let txs = stmt
            .query_map([task_id], Self::row_to_transaction)
            .map_err(|e| format!("Failed to list transactions: {}", e))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(txs)
    }

    fn row_to_transaction(row: &Row) -> rusqlite::Result<Transaction> {
        let transaction_type: String = row.get(1)?;
        let status: String = row.get(2)?;
        let request_data: Option<String> = row.get(4)?;
        let response_data: Option<String> = row.get(5)?;
        let error_data: Option<String> = row.get(6)?;
        let started_at: Option<String> = row.get(9)?;
        let completed_at: Option<String> = row.get(10)?;
        let created_at: String = row.get(11)?;

        Ok(Transaction {
            id: row.get(0)?,
            transaction_type: transaction_type
                .parse()
                .unwrap_or(TransactionType::Command),
            status: status.parse().unwrap_or(TransactionStatus::Pending),
            task_id: row.get(3)?,
            request_data: request_data.and_then(|v| serde_json::from_str(&v).ok()),
            response_data: response_data.and_then(|v| serde_json::from_str(&v).ok()),
            error_data: error_data.and_then(|v| serde_json::from_str(&v).ok()),
            cost: row.get(7)?,
            created_by: row.get(8)?,
            started_at: parse_ts_opt(started_at),
            completed_at: parse_ts_opt(completed_at),
            created_at: parse_ts(&created_at),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use serde_json::json;

    fn spend(db: &Database, user: &str, cost: f64, status: TransactionStatus, days_ago: i64) {
        let mut tx = Transaction::new(TransactionType::Command, status, user);
        tx.cost = cost;
        tx.created_at = Utc::now() - Duration::days(days_ago);
        db.create_transaction(&tx).unwrap();
    }

    #[test]
    fn test_transaction_round_trip() {
        let db = Database::new_in_memory().unwrap();
        let mut tx = Transaction::new(
            TransactionType::Command,
            TransactionStatus::Success,
            "user-1",
        );
        tx.cost = 12.5;
        tx.task_id = Some("task-1".to_string());
        tx.request_data = Some(json!({"user_message": "hello"}));
        db.create_transaction(&tx).unwrap();

        let loaded = db.get_transaction(&tx.id).unwrap().unwrap();
        assert_eq!(loaded.status, TransactionStatus::Success);
        assert_eq!(loaded.cost, 12.5);
        assert_eq!(loaded.request_data, Some(json!({"user_message": "hello"})));

        let for_task = db.list_transactions_for_task("task-1").unwrap();
        assert_eq!(for_task.len(), 1);

        assert!(db.get_transaction("no-such-id").unwrap().is_none());
    }

    #[test]
    fn test_sum_counts_only_successful_spend_in_window() {
        let db = Database::new_in_memory().unwrap();
        let today = Utc::now().date_naive();

        spend(&db, "user-1", 950.0, TransactionStatus::Success, 0);
        spend(&db, "user-1", 40.0, TransactionStatus::Failed, 0);
        spend(&db, "user-1", 100.0, TransactionStatus::Success, 3);
        spend(&db, "user-2", 500.0, TransactionStatus::Success, 0);

        let daily = db.sum_successful_costs("user-1", today, today).unwrap();
        assert_eq!(daily, 950.0);

        let windowed = db
            .sum_successful_costs("user-1", today - Duration::days(7), today)
            .unwrap();
        assert_eq!(windowed, 1050.0);
    }
}
