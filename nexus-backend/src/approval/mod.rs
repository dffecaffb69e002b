//! Approval workflow - tasks held at the approval gate stay pending until a
//! human approves or rejects them. Approval resumes execution immediately.

use std::sync::Arc;

use chrono::Utc;
use serde_json::json;

use crate::executor::TaskExecutor;
use crate::intent::IntentResult;
use crate::models::{AuditEventType, AuditLog, Task, TaskStatus};

pub struct ApprovalService {
    executor: Arc<TaskExecutor>,
}

impl ApprovalService {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        ApprovalService { executor }
    }

    fn load_pending(&self, task_id: &str) -> Result<(Task, IntentResult), String> {
        let task = self
            .executor
            .database()
            .get_task(task_id)?
            .ok_or_else(|| format!("Task not found: {}", task_id))?;

        if task.status != TaskStatus::Pending {
            return Err(format!(
                "Task {} is not awaiting approval (status: {})",
                task_id, task.status
            ));
        }

        let request = task
            .result_field("approval_request")
            .cloned()
            .ok_or_else(|| format!("Task {} has no approval request", task_id))?;
        if request["status"] != "pending" {
            return Err(format!(
                "Approval request for task {} was already resolved",
                task_id
            ));
        }

        let intent: IntentResult = serde_json::from_value(request["intent"].clone())
            .map_err(|e| format!("Stored approval request is unreadable: {}", e))?;
        Ok((task, intent))
    }

    fn audit(&self, event_type: AuditEventType, description: &str, task: &Task, user: &str) {
        let entry = AuditLog::new(event_type, description)
            .with_user(user)
            .with_task(&task.id);
        if let Err(e) = self.executor.database().insert_audit_log(&entry) {
            log::warn!("[APPROVAL] Failed to write audit entry: {}", e);
        }
    }

    /// Grant a pending approval and resume the task's execution in place.
    /// The returned task reflects the completed (or failed) run.
    pub async fn approve_task(&self, task_id: &str, approved_by: &str) -> Result<Task, String> {
        let (mut task, intent) = self.load_pending(task_id)?;

        if let Some(request) = task
            .result_object_mut()
            .get_mut("approval_request")
        {
            request["status"] = json!("approved");
            request["approved_by"] = json!(approved_by);
            request["approved_at"] = json!(Utc::now().to_rfc3339());
        }
        self.executor.database().update_task(&mut task)?;
        self.audit(
            AuditEventType::UserAction,
            &format!("Approval granted by {}", approved_by),
            &task,
            approved_by,
        );
        log::info!("[APPROVAL] Task {} approved by {}", task_id, approved_by);

        self.executor
            .run_agent_phase(&mut task, &intent, Some(&json!({ "approved": true })))
            .await?;
        Ok(task)
    }

    /// Reject a pending approval; the task is cancelled and never executes.
    pub fn reject_task(
        &self,
        task_id: &str,
        rejected_by: &str,
        reason: Option<&str>,
    ) -> Result<Task, String> {
        let (mut task, _intent) = self.load_pending(task_id)?;

        if let Some(request) = task
            .result_object_mut()
            .get_mut("approval_request")
        {
            request["status"] = json!("rejected");
            request["rejected_by"] = json!(rejected_by);
            request["rejected_at"] = json!(Utc::now().to_rfc3339());
            if let Some(reason) = reason {
                request["reason"] = json!(reason);
            }
        }
        task.status = TaskStatus::Cancelled;
        task.completed_at = Some(Utc::now());
        self.executor.database().update_task(&mut task)?;
        self.audit(
            AuditEventType::UserAction,
            &format!("Approval rejected by {}", rejected_by),
            &task,
            rejected_by,
        );
        self.executor.broadcaster().publish_new(
            "status_changed",
            &task.created_by,
            json!({ "task_id": task.id, "status": task.status.to_string() }),
        );
        log::info!("[APPROVAL] Task {} rejected by {}", task_id, rejected_by);
        Ok(task)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::MockAgent;
    use crate::agents::AgentRegistry;
    use crate::config::Config;
    use crate::db::Database;
    use crate::events::EventBroadcaster;
    use crate::intent::{RiskLevel, StubClassifier};

    fn approval_intent() -> IntentResult {
        IntentResult {
            intent: "communication".to_string(),
            confidence: 0.9,
            entities: json!({}),
            command: None,
            parameters: Some(json!({"action": "draft"})),
            requires_approval: true,
            estimated_cost: None,
            risk_level: Some(RiskLevel::Medium),
        }
    }

    fn build_service(agent: Arc<MockAgent>) -> (ApprovalService, Arc<TaskExecutor>, Arc<MockAgent>) {
        let mut registry = AgentRegistry::new();
        registry.register(agent.clone());
        let executor = Arc::new(TaskExecutor::new(
            Arc::new(Database::new_in_memory().unwrap()),
            Arc::new(Config::default()),
            Arc::new(registry),
            Arc::new(EventBroadcaster::new()),
            Arc::new(StubClassifier {
                result: approval_intent(),
            }),
        ));
        (ApprovalService::new(executor.clone()), executor, agent)
    }

    #[tokio::test]
    async fn test_approve_resumes_execution() {
        let agent = Arc::new(MockAgent::succeeding("communication", json!({"sent": true})));
        let (service, executor, agent) = build_service(agent);

        let pending = executor
            .execute_task("email the report", "alice", None)
            .await
            .unwrap();
        assert_eq!(pending.status, TaskStatus::Pending);
        assert_eq!(agent.call_count(), 0);

        let task = service.approve_task(&pending.id, "admin").await.unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(agent.call_count(), 1);

        let stored = executor.database().get_task(&pending.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        assert_eq!(
            stored.result_field("approval_request").unwrap()["status"],
            "approved"
        );
    }

    #[tokio::test]
    async fn test_reject_cancels_task() {
        let agent = Arc::new(MockAgent::succeeding("communication", json!({})));
        let (service, executor, agent) = build_service(agent);

        let pending = executor
            .execute_task("email the report", "alice", None)
            .await
            .unwrap();

        let task = service
            .reject_task(&pending.id, "admin", Some("not now"))
            .unwrap();
        assert_eq!(task.status, TaskStatus::Cancelled);
        assert_eq!(agent.call_count(), 0);
        assert_eq!(
            task.result_field("approval_request").unwrap()["reason"],
            "not now"
        );
    }

    #[tokio::test]
    async fn test_approve_requires_pending_request() {
        let agent = Arc::new(MockAgent::succeeding("communication", json!({})));
        let (service, executor, _) = build_service(agent);

        let err = service.approve_task("missing-id", "admin").await.unwrap_err();
        assert!(err.contains("not found"));

        let pending = executor
            .execute_task("email the report", "alice", None)
            .await
            .unwrap();
        service.approve_task(&pending.id, "admin").await.unwrap();

        // a resolved task cannot be approved again
        let err = service.approve_task(&pending.id, "admin").await.unwrap_err();
        assert!(err.contains("not awaiting approval"));
    }
}
