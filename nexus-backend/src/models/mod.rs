pub mod audit_log;
pub mod task;
pub mod transaction;

pub use audit_log::{AuditEventType, AuditLog};
pub use task::{Task, TaskPriority, TaskStatus};
pub use transaction::{Transaction, TransactionStatus, TransactionType};
