//! Task executor - drives a single task through classification, gating,
//! agent execution, persistence, and event notification.

use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value, json};

use crate::agents::AgentRegistry;
use crate::budget;
use crate::config::Config;
use crate::db::Database;
use crate::events::EventBroadcaster;
use crate::intent::{IntentClassifier, IntentResult};
use crate::models::{
    AuditEventType, AuditLog, Task, TaskStatus, Transaction, TransactionStatus, TransactionType,
};
use crate::policy;

const TITLE_MAX_LENGTH: usize = 80;

/// Ordered first-match-wins keyword rules for resolving an agent type from
/// free-form intent labels or command text.
const AGENT_TYPE_RULES: &[(&str, &[&str])] = &[
    ("research", &["research", "search", "find", "lookup"]),
    (
        "communication",
        &["communication", "email", "send", "draft", "message"],
    ),
    ("purchase", &["purchase", "buy", "price", "product"]),
];

/// Map an intent to the agent responsible for it. Labels are matched by
/// containment, not equality, so a classifier emitting "send_email" or
/// "find_product" still resolves. Unmatched intents fall back to the
/// command text, and finally to research, which can do no harm.
pub fn determine_agent_type(intent: &IntentResult) -> &'static str {
    let label = intent.intent.to_lowercase();
    for (agent, keywords) in AGENT_TYPE_RULES {
        if keywords.iter().any(|kw| label.contains(kw)) {
            return agent;
        }
    }

    let command = intent.command.as_deref().unwrap_or("").to_lowercase();
    for (agent, keywords) in AGENT_TYPE_RULES {
        if keywords.iter().any(|kw| command.contains(kw)) {
            return agent;
        }
    }

    "research"
}

fn intent_action(intent: &IntentResult) -> String {
    intent
        .parameters
        .as_ref()
        .and_then(|p| p.get("action"))
        .and_then(Value::as_str)
        .map(str::to_lowercase)
        .unwrap_or_default()
}

pub struct TaskExecutor {
    db: Arc<Database>,
    config: Arc<Config>,
    registry: Arc<AgentRegistry>,
    broadcaster: Arc<EventBroadcaster>,
    classifier: Arc<dyn IntentClassifier>,
}

impl TaskExecutor {
    pub fn new(
        db: Arc<Database>,
        config: Arc<Config>,
        registry: Arc<AgentRegistry>,
        broadcaster: Arc<EventBroadcaster>,
        classifier: Arc<dyn IntentClassifier>,
    ) -> Self {
        TaskExecutor {
            db,
            config,
            registry,
            broadcaster,
            classifier,
        }
    }

    fn log_audit(&self, event_type: AuditEventType, description: &str, task: &Task) {
        let entry = AuditLog::new(event_type, description)
            .with_user(&task.created_by)
            .with_task(&task.id);
        if let Err(e) = self.db.insert_audit_log(&entry) {
            log::warn!("[EXECUTOR] Failed to write audit entry: {}", e);
        }
    }

    fn publish_status(&self, task: &Task) {
        self.broadcaster.publish_new(
            "status_changed",
            &task.created_by,
            json!({ "task_id": task.id, "status": task.status.to_string() }),
        );
    }

    fn fail_task(&self, task: &mut Task, reason: &str) -> Result<(), String> {
        let sanitized = policy::sanitize_error_message(reason);
        task.status = TaskStatus::Failed;
        task.error_message = Some(sanitized.clone());
        task.completed_at = Some(Utc::now());
        self.db.update_task(task)?;
        self.log_audit(AuditEventType::TaskFailed, &sanitized, task);
        self.publish_status(task);
        Ok(())
    }

    /// Full pipeline for a new message: persist a task row, then classify,
    /// gate, and execute it. Returns the task in its final state for this
    /// pass; a task awaiting approval comes back still pending.
    pub async fn execute_task(
        &self,
        message: &str,
        created_by: &str,
        context: Option<Value>,
    ) -> Result<Task, String> {
        let mut task = self.create_task_row(message, created_by)?;
        self.process_task(&mut task, context.as_ref()).await?;
        Ok(task)
    }

    /// Persist a fresh pending task row for a message and announce it. The
    /// orchestrator creates its whole subtask graph through here before any
    /// of it runs.
    pub(crate) fn create_task_row(&self, message: &str, created_by: &str) -> Result<Task, String> {
        policy::validate_user_input(message)?;

        let title: String = message.chars().take(TITLE_MAX_LENGTH).collect();
        let task = Task::new(&title, message, created_by);
        self.db.create_task(&task)?;
        self.log_audit(AuditEventType::TaskCreated, "Task created", &task);
        self.broadcaster
            .publish_new("task_created", created_by, json!({ "task_id": task.id }));
        Ok(task)
    }

    /// Classification, gating, and execution for an already-persisted task.
    pub(crate) async fn process_task(
        &self,
        task: &mut Task,
        context: Option<&Value>,
    ) -> Result<(), String> {
        let mut intent = self.classifier.classify(&task.description, context).await;
        log::info!(
            "[EXECUTOR] Classified task {} as '{}' ({:.2})",
            task.id,
            intent.intent,
            intent.confidence
        );

        // extra parameters from the caller (e.g. a decomposed subtask) win
        // over whatever classification produced
        if let Some(extra) = context
            .and_then(|c| c.get("parameters"))
            .and_then(Value::as_object)
        {
            let params = intent
                .parameters
                .get_or_insert_with(|| json!({}));
            if let Some(obj) = params.as_object_mut() {
                for (k, v) in extra {
                    obj.insert(k.clone(), v.clone());
                }
            }
        }

        task.command = intent.command.clone();
        task.parameters = intent.parameters.clone().unwrap_or_else(|| json!({}));
        self.db.update_task(task)?;

        let estimated_cost = intent.estimated_cost.unwrap_or(0.0);
        if let Err(reason) =
            budget::check_budget(&self.db, &self.config, &task.created_by, estimated_cost)
        {
            log::warn!("[EXECUTOR] Budget gate rejected task {}: {}", task.id, reason);
            self.fail_task(task, &reason)?;
            return Ok(());
        }

        let agent_type = determine_agent_type(&intent);
        let action = intent_action(&intent);
        let mandatory = policy::requires_mandatory_approval(&action, agent_type);
        let approved = context
            .and_then(|c| c.get("approved"))
            .and_then(Value::as_bool)
            .unwrap_or(false);

        if (intent.requires_approval || mandatory) && !approved {
            log::info!(
                "[EXECUTOR] Task {} requires approval (mandatory: {})",
                task.id,
                mandatory
            );
            task.set_result_field(
                "approval_request",
                json!({
                    "status": "pending",
                    "intent": intent,
                    "agent_type": agent_type,
                    "action": action,
                    "estimated_cost": estimated_cost,
                    "requested_at": Utc::now().to_rfc3339(),
                }),
            );
            self.db.update_task(task)?;
            self.broadcaster.publish_new(
                "approval_needed",
                &task.created_by,
                json!({
                    "task_id": task.id,
                    "agent_type": agent_type,
                    "estimated_cost": estimated_cost,
                }),
            );
            return Ok(());
        }

        self.run_agent_phase(task, &intent, context).await
    }

    fn build_agent_payload(
        task: &Task,
        intent: &IntentResult,
        context: Option<&Value>,
    ) -> Value {
        let mut payload = Map::new();
        if let Some(Value::Object(params)) = &intent.parameters {
            payload.extend(params.clone());
        }

        let mut message = task.description.clone();
        if let Some(summary) = context
            .and_then(|c| c.get("dependency_summary"))
            .and_then(Value::as_str)
        {
            message.push_str("\n\nResearch findings:\n");
            message.push_str(summary);
        }

        // agents look up their input under different keys
        for key in ["query", "message", "text"] {
            payload
                .entry(key.to_string())
                .or_insert_with(|| Value::String(message.clone()));
        }
        Value::Object(payload)
    }

    /// Agent execution and result bookkeeping. Entered directly for
    /// unrestricted tasks and again after an approval grant.
    pub(crate) async fn run_agent_phase(
        &self,
        task: &mut Task,
        intent: &IntentResult,
        context: Option<&Value>,
    ) -> Result<(), String> {
        let agent_type = determine_agent_type(intent);
        if let Err(reason) = policy::check_tool_allowed(agent_type) {
            self.fail_task(task, &reason)?;
            return Ok(());
        }

        let Some(agent) = self.registry.get(agent_type) else {
            self.fail_task(task, &format!("No agent registered for '{}'", agent_type))?;
            return Ok(());
        };

        task.status = TaskStatus::InProgress;
        task.started_at = Some(Utc::now());
        task.assigned_agent = Some(agent_type.to_string());
        self.db.update_task(task)?;
        self.publish_status(task);
        self.broadcaster.publish_new(
            "agent_started",
            &task.created_by,
            json!({ "task_id": task.id, "agent": agent_type }),
        );
        self.log_audit(
            AuditEventType::AgentAction,
            &format!("Agent '{}' started", agent_type),
            task,
        );

        let payload = Self::build_agent_payload(task, intent, context);
        let result = agent.run(&payload).await;

        let tx = if result.success {
            budget::record_spending(
                &self.db,
                &task.created_by,
                &task.id,
                result.cost,
                Some(result.data.clone()),
            )?
        } else {
            let mut tx = Transaction::new(
                TransactionType::Command,
                TransactionStatus::Failed,
                &task.created_by,
            );
            tx.task_id = Some(task.id.clone());
            tx.cost = result.cost;
            tx.started_at = task.started_at;
            tx.completed_at = Some(Utc::now());
            tx.request_data = Some(payload);
            tx.error_data = result.error.as_ref().map(|e| json!({ "error": e }));
            self.db.create_transaction(&tx)?;
            tx
        };
        self.log_audit(
            AuditEventType::TransactionCreated,
            &format!("Transaction {} recorded (cost ${:.2})", tx.id, tx.cost),
            task,
        );

        self.broadcaster.publish_new(
            "agent_completed",
            &task.created_by,
            json!({
                "task_id": task.id,
                "agent": agent_type,
                "success": result.success,
                "duration_ms": result.duration_ms,
            }),
        );

        if result.success {
            task.status = TaskStatus::Completed;
            task.completed_at = Some(Utc::now());
            let sources = result.data.get("sources").cloned();
            task.set_result_field("output", result.data);
            task.set_result_field("agent", json!(agent_type));
            task.set_result_field("cost", json!(result.cost));
            task.set_result_field("duration_ms", json!(result.duration_ms));
            if let Some(sources) = sources {
                task.set_result_field("sources", sources);
            }
            self.db.update_task(task)?;
            self.log_audit(AuditEventType::TaskCompleted, "Task completed", task);
            self.publish_status(task);
            self.broadcaster.publish_new(
                "task_completed",
                &task.created_by,
                json!({ "task_id": task.id, "cost": result.cost }),
            );
        } else {
            let reason = result.error.as_deref().unwrap_or("Agent execution failed");
            self.fail_task(task, reason)?;
        }

        Ok(())
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn broadcaster(&self) -> &EventBroadcaster {
        &self.broadcaster
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::testing::MockAgent;
    use crate::intent::{RiskLevel, StubClassifier};

    fn stub_intent(intent: &str) -> IntentResult {
        IntentResult {
            intent: intent.to_string(),
            confidence: 0.9,
            entities: json!({}),
            command: None,
            parameters: None,
            requires_approval: false,
            estimated_cost: None,
            risk_level: Some(RiskLevel::Low),
        }
    }

    fn build_executor(
        intent: IntentResult,
        agents: Vec<Arc<MockAgent>>,
    ) -> (TaskExecutor, Vec<Arc<MockAgent>>) {
        let mut registry = AgentRegistry::new();
        for agent in &agents {
            registry.register(agent.clone());
        }
        let executor = TaskExecutor::new(
            Arc::new(Database::new_in_memory().unwrap()),
            Arc::new(Config::default()),
            Arc::new(registry),
            Arc::new(EventBroadcaster::new()),
            Arc::new(StubClassifier { result: intent }),
        );
        (executor, agents)
    }

    #[test]
    fn test_agent_type_resolution() {
        assert_eq!(determine_agent_type(&stub_intent("research")), "research");
        assert_eq!(
            determine_agent_type(&stub_intent("communication")),
            "communication"
        );
        assert_eq!(determine_agent_type(&stub_intent("purchase")), "purchase");

        // containment over non-canonical labels, research rule first
        assert_eq!(
            determine_agent_type(&stub_intent("send_email")),
            "communication"
        );
        assert_eq!(determine_agent_type(&stub_intent("find_product")), "research");
        assert_eq!(determine_agent_type(&stub_intent("buy_item")), "purchase");

        let mut unknown = stub_intent("unknown");
        unknown.command = Some("research the market".to_string());
        assert_eq!(determine_agent_type(&unknown), "research");

        unknown.command = Some("send an email to Bob".to_string());
        assert_eq!(determine_agent_type(&unknown), "communication");

        unknown.command = Some("compare prices".to_string());
        assert_eq!(determine_agent_type(&unknown), "purchase");

        unknown.command = None;
        assert_eq!(determine_agent_type(&unknown), "research");
    }

    #[tokio::test]
    async fn test_successful_execution_persists_and_charges() {
        let agent = Arc::new(MockAgent::succeeding("research", json!({"answer": 1})));
        let (executor, agents) = build_executor(stub_intent("research"), vec![agent]);

        let task = executor
            .execute_task("look up rust release dates", "alice", None)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.result_field("agent"), Some(&json!("research")));
        assert_eq!(agents[0].call_count(), 1);

        let stored = executor.database().get_task(&task.id).unwrap().unwrap();
        assert_eq!(stored.status, TaskStatus::Completed);
        let txs = executor
            .database()
            .list_transactions_for_task(&task.id)
            .unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].status, TransactionStatus::Success);
    }

    #[tokio::test]
    async fn test_approval_required_leaves_task_pending() {
        let agent = Arc::new(MockAgent::succeeding("communication", json!({})));
        let mut intent = stub_intent("communication");
        intent.requires_approval = true;
        let (executor, agents) = build_executor(intent, vec![agent]);

        let task = executor
            .execute_task("email the team about the launch", "alice", None)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.result_field("approval_request").is_some());
        assert_eq!(agents[0].call_count(), 0);
    }

    #[tokio::test]
    async fn test_mandatory_approval_overrides_classifier() {
        let agent = Arc::new(MockAgent::succeeding("communication", json!({})));
        let mut intent = stub_intent("communication");
        intent.requires_approval = false;
        intent.parameters = Some(json!({"action": "send_email", "to": "a@example.com"}));
        let (executor, agents) = build_executor(intent, vec![agent]);

        let task = executor
            .execute_task("notify the vendor", "alice", None)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(agents[0].call_count(), 0);
    }

    #[tokio::test]
    async fn test_destructive_message_forces_approval() {
        // classifier says low risk and no approval; business rules override
        let agent = Arc::new(MockAgent::succeeding("research", json!({})));
        let mut intent = stub_intent("unknown");
        intent.risk_level = Some(RiskLevel::Low);
        let (executor, agents) = build_executor(intent, vec![agent]);

        let task = executor
            .execute_task("Delete my account", "alice", None)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Pending);
        let request = task.result_field("approval_request").unwrap();
        assert_eq!(request["intent"]["risk_level"], "high");
        assert_eq!(request["intent"]["requires_approval"], true);
        assert_eq!(agents[0].call_count(), 0);
    }

    #[tokio::test]
    async fn test_budget_gate_fails_task() {
        let agent = Arc::new(MockAgent::succeeding("purchase", json!({})));
        let mut intent = stub_intent("purchase");
        intent.estimated_cost = Some(1_000_000.0);
        let (executor, agents) = build_executor(intent, vec![agent]);

        let task = executor
            .execute_task("look into bulk hardware", "alice", None)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert!(
            task.error_message
                .unwrap()
                .contains("maximum spend per task")
        );
        assert_eq!(agents[0].call_count(), 0);
    }

    #[tokio::test]
    async fn test_result_records_duration_and_sources() {
        let agent = Arc::new(MockAgent::succeeding(
            "research",
            json!({
                "summary": "two relevant articles",
                "sources": ["https://example.com/a", "https://example.com/b"],
            }),
        ));
        let (executor, _) = build_executor(stub_intent("research"), vec![agent]);

        let task = executor
            .execute_task("look into sqlite tuning", "alice", None)
            .await
            .unwrap();

        assert!(task.result_field("duration_ms").unwrap().is_u64());
        assert_eq!(
            task.result_field("sources"),
            Some(&json!(["https://example.com/a", "https://example.com/b"]))
        );

        let stored = executor.database().get_task(&task.id).unwrap().unwrap();
        assert!(stored.result.unwrap()["duration_ms"].is_u64());
    }

    #[tokio::test]
    async fn test_failing_agent_marks_task_failed() {
        let agent = Arc::new(MockAgent::failing("research", "upstream unavailable"));
        let (executor, _) = build_executor(stub_intent("research"), vec![agent]);

        let task = executor
            .execute_task("dig into the outage", "alice", None)
            .await
            .unwrap();

        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(
            task.error_message.as_deref(),
            Some("upstream unavailable")
        );
    }

    #[tokio::test]
    async fn test_dependency_summary_reaches_agent_payload() {
        let agent = Arc::new(MockAgent::succeeding("communication", json!({})));
        let (executor, agents) =
            build_executor(stub_intent("communication"), vec![agent]);

        executor
            .execute_task(
                "draft a note about the findings",
                "alice",
                Some(json!({"dependency_summary": "the findings are good"})),
            )
            .await
            .unwrap();

        let calls = agents[0].calls.lock().unwrap();
        let message = calls[0]["message"].as_str().unwrap();
        assert!(message.contains("Research findings:\nthe findings are good"));
    }

    #[tokio::test]
    async fn test_unsafe_input_rejected_before_classification() {
        let agent = Arc::new(MockAgent::succeeding("research", json!({})));
        let (executor, _) = build_executor(stub_intent("research"), vec![agent]);

        let err = executor
            .execute_task("please eval(this)", "alice", None)
            .await
            .unwrap_err();
        assert!(err.contains("unsafe content"));
    }
}
