//! Orchestrator - detects multi-step requests, decomposes them into an
//! ordered dependency graph of subtasks, and runs them through the executor.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Value, json};

use crate::executor::TaskExecutor;
use crate::models::{Task, TaskStatus};

const RESEARCH_KEYWORDS: &[&str] = &["research", "search", "find", "lookup"];
const COMMUNICATION_KEYWORDS: &[&str] = &["email", "send", "draft", "message"];
const PURCHASE_KEYWORDS: &[&str] = &["buy", "purchase", "product", "price"];

#[derive(Debug, Clone, PartialEq)]
pub struct SubtaskSpec {
    pub description: String,
    pub parameters: Value,
    pub depends_on: Vec<usize>,
}

fn matched_families(message: &str) -> Vec<&'static str> {
    let lower = message.to_lowercase();
    let mut families = Vec::new();
    for (name, keywords) in [
        ("research", RESEARCH_KEYWORDS),
        ("communication", COMMUNICATION_KEYWORDS),
        ("purchase", PURCHASE_KEYWORDS),
    ] {
        if keywords.iter().any(|kw| lower.contains(kw)) {
            families.push(name);
        }
    }
    families
}

/// A request is complex when it touches more than one action family; those
/// get decomposed instead of running as a single task.
pub fn is_complex_intent(message: &str) -> bool {
    matched_families(message).len() > 1
}

/// Break a complex request into ordered subtasks. Later subtasks name the
/// indices they depend on; execution order is the vector order.
pub fn decompose_intent(message: &str) -> Vec<SubtaskSpec> {
    let families = matched_families(message);
    let research = families.contains(&"research");
    let communication = families.contains(&"communication");
    let purchase = families.contains(&"purchase");

    if research && communication {
        return vec![
            SubtaskSpec {
                description: format!("Research background for: {}", message),
                parameters: json!({}),
                depends_on: vec![],
            },
            SubtaskSpec {
                description: format!("Draft an email about: {}", message),
                parameters: json!({ "action": "draft" }),
                depends_on: vec![0],
            },
        ];
    }

    if research && purchase {
        return vec![
            SubtaskSpec {
                description: format!("Research background for: {}", message),
                parameters: json!({}),
                depends_on: vec![],
            },
            SubtaskSpec {
                description: format!("Compare prices for: {}", message),
                parameters: json!({}),
                depends_on: vec![0],
            },
        ];
    }

    vec![SubtaskSpec {
        description: message.to_string(),
        parameters: json!({}),
        depends_on: vec![],
    }]
}

pub struct Orchestrator {
    executor: Arc<TaskExecutor>,
}

impl Orchestrator {
    pub fn new(executor: Arc<TaskExecutor>) -> Self {
        Orchestrator { executor }
    }

    /// Entry point for a user message: simple requests run as one task,
    /// complex ones as an ordered subtask graph under a persisted parent
    /// task. The returned value reports every subtask's final state.
    pub async fn orchestrate(&self, message: &str, created_by: &str) -> Result<Value, String> {
        // a decomposition that collapses to one subtask has no graph to
        // manage and runs as a plain task
        let subtasks = if is_complex_intent(message) {
            decompose_intent(message)
        } else {
            Vec::new()
        };
        if subtasks.len() <= 1 {
            return self.run_single(message, created_by).await;
        }

        log::info!(
            "[ORCHESTRATOR] Decomposed into {} subtask(s) for user {}",
            subtasks.len(),
            created_by
        );

        let db = self.executor.database();
        let mut parent = self.executor.create_task_row(message, created_by)?;

        // persist the whole graph before any of it runs, each subtask row
        // pointing back at its parent
        let mut rows = Vec::with_capacity(subtasks.len());
        for (index, subtask) in subtasks.iter().enumerate() {
            let mut row = self
                .executor
                .create_task_row(&subtask.description, created_by)?;
            row.set_result_field("parent_task_id", json!(parent.id));
            row.set_result_field("subtask_index", json!(index));
            row.set_result_field("dependencies", json!(subtask.depends_on));
            db.update_task(&mut row)?;
            rows.push(row);
        }

        parent.set_result_field(
            "subtask_ids",
            json!(rows.iter().map(|r| r.id.as_str()).collect::<Vec<_>>()),
        );
        parent.status = TaskStatus::InProgress;
        parent.started_at = Some(Utc::now());
        db.update_task(&mut parent)?;
        self.publish_status(&parent);

        // index -> dependency summary for completed subtasks
        let mut completed: BTreeMap<usize, String> = BTreeMap::new();
        let mut outcomes: Vec<Value> = Vec::with_capacity(subtasks.len());

        for (index, (subtask, mut row)) in subtasks.iter().zip(rows).enumerate() {
            let unmet: Vec<usize> = subtask
                .depends_on
                .iter()
                .copied()
                .filter(|dep| !completed.contains_key(dep))
                .collect();
            if !unmet.is_empty() {
                log::warn!(
                    "[ORCHESTRATOR] Skipping subtask {} ({}): dependencies not met",
                    index,
                    subtask.description
                );
                row.status = TaskStatus::Failed;
                row.error_message = Some("Dependencies not met".to_string());
                row.completed_at = Some(Utc::now());
                db.update_task(&mut row)?;
                outcomes.push(json!({
                    "description": subtask.description,
                    "task_id": row.id,
                    "status": row.status.to_string(),
                    "error": row.error_message,
                    "unmet_dependencies": unmet,
                }));
                continue;
            }

            let mut context = json!({ "parameters": subtask.parameters });
            if let Some(dep) = subtask.depends_on.first() {
                if let Some(summary) = completed.get(dep) {
                    context["dependency_summary"] = json!(summary);
                }
            }

            self.executor.process_task(&mut row, Some(&context)).await?;

            if row.status == TaskStatus::Completed {
                completed.insert(index, Self::summarize_result(&row.result));
            }
            outcomes.push(json!({
                "description": subtask.description,
                "task_id": row.id,
                "status": row.status.to_string(),
                "error": row.error_message,
            }));
        }

        let all_completed = outcomes.iter().all(|o| o["status"] == "completed");
        if all_completed {
            parent.status = TaskStatus::Completed;
        } else {
            parent.status = TaskStatus::Failed;
            parent.error_message = Some("One or more subtasks did not complete".to_string());
        }
        parent.completed_at = Some(Utc::now());
        parent.set_result_field("subtasks", json!(outcomes));
        parent.set_result_field("all_completed", json!(all_completed));
        db.update_task(&mut parent)?;
        self.publish_status(&parent);

        Ok(json!({
            "complex": true,
            "parent_task_id": parent.id,
            "status": parent.status.to_string(),
            "subtask_count": subtasks.len(),
            "all_completed": all_completed,
            "subtasks": outcomes,
        }))
    }

    async fn run_single(&self, message: &str, created_by: &str) -> Result<Value, String> {
        let task = self.executor.execute_task(message, created_by, None).await?;
        Ok(json!({
            "complex": false,
            "task_id": task.id,
            "status": task.status.to_string(),
            "result": task.result,
            "error": task.error_message,
        }))
    }

    fn publish_status(&self, task: &Task) {
        self.executor.broadcaster().publish_new(
            "status_changed",
            &task.created_by,
            json!({ "task_id": task.id, "status": task.status.to_string() }),
        );
    }

    /// Condense a completed task's result for injection into a dependent
    /// subtask; the research agent's summary field when present, otherwise
    /// the serialized output.
    fn summarize_result(result: &Option<Value>) -> String {
        let Some(result) = result else {
            return String::new();
        };
        if let Some(summary) = result["output"]["summary"].as_str() {
            return summary.to_string();
        }
        result["output"].to_string()
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
    use crate::intent::{IntentClassifier, IntentResult, RiskLevel};
    use async_trait::async_trait;

    /// Routes by the decomposed subtask description so each subtask gets
    /// the intent its wording implies.
    struct RoutingClassifier;

    #[async_trait]
    impl IntentClassifier for RoutingClassifier {
        async fn classify(&self, message: &str, _context: Option<&Value>) -> IntentResult {
            let intent = if message.starts_with("Draft an email") {
                "communication"
            } else if message.starts_with("Compare prices") {
                "purchase"
            } else {
                "research"
            };
            IntentResult {
                intent: intent.to_string(),
                confidence: 0.95,
                entities: json!({}),
                command: None,
                parameters: None,
                requires_approval: false,
                estimated_cost: None,
                risk_level: Some(RiskLevel::Low),
            }
        }
    }

    fn build_orchestrator(agents: Vec<Arc<MockAgent>>) -> (Orchestrator, Vec<Arc<MockAgent>>) {
        let mut registry = AgentRegistry::new();
        for agent in &agents {
            registry.register(agent.clone());
        }
        let executor = TaskExecutor::new(
            Arc::new(Database::new_in_memory().unwrap()),
            Arc::new(Config::default()),
            Arc::new(registry),
            Arc::new(EventBroadcaster::new()),
            Arc::new(RoutingClassifier),
        );
        (Orchestrator::new(Arc::new(executor)), agents)
    }

    #[test]
    fn test_complexity_detection() {
        assert!(!is_complex_intent("research rust web frameworks"));
        assert!(!is_complex_intent("send an email to bob"));
        assert!(is_complex_intent(
            "research rust web frameworks and email me a summary"
        ));
        assert!(is_complex_intent("find the best laptop price"));
    }

    #[test]
    fn test_decompose_research_then_email() {
        let subtasks = decompose_intent("research solar panels and draft an email about them");
        assert_eq!(subtasks.len(), 2);
        assert!(subtasks[0].depends_on.is_empty());
        assert_eq!(subtasks[1].depends_on, vec![0]);
        assert_eq!(subtasks[1].parameters["action"], "draft");
    }

    #[test]
    fn test_decompose_research_then_price() {
        let subtasks = decompose_intent("search for a standing desk and compare the price");
        assert_eq!(subtasks.len(), 2);
        assert!(subtasks[1].description.starts_with("Compare prices"));
        assert_eq!(subtasks[1].depends_on, vec![0]);
    }

    #[test]
    fn test_decompose_simple_is_single_subtask() {
        let subtasks = decompose_intent("summarize the latest rust release");
        assert_eq!(subtasks.len(), 1);
        assert!(subtasks[0].depends_on.is_empty());
    }

    #[tokio::test]
    async fn test_simple_message_runs_single_task() {
        let research = Arc::new(MockAgent::succeeding("research", json!({"summary": "ok"})));
        let (orchestrator, agents) = build_orchestrator(vec![research]);

        let outcome = orchestrator
            .orchestrate("lookup the rust release schedule", "alice")
            .await
            .unwrap();

        assert_eq!(outcome["complex"], false);
        assert_eq!(outcome["status"], "completed");
        assert_eq!(agents[0].call_count(), 1);
    }

    #[tokio::test]
    async fn test_two_families_without_template_run_single_task() {
        // touches purchase and communication, but no decomposition template
        // covers that pair, so the single subtask runs as a plain task
        let research = Arc::new(MockAgent::succeeding("research", json!({"summary": "ok"})));
        let (orchestrator, agents) = build_orchestrator(vec![research]);

        let outcome = orchestrator
            .orchestrate("buy a gift and send a message to mom", "alice")
            .await
            .unwrap();

        assert_eq!(outcome["complex"], false);
        assert_eq!(agents[0].call_count(), 1);

        let stored = orchestrator
            .executor
            .database()
            .list_tasks_for_user("alice", None)
            .unwrap();
        assert_eq!(stored.len(), 1);
    }

    #[tokio::test]
    async fn test_complex_request_persists_parent_and_subtask_rows() {
        let research = Arc::new(MockAgent::succeeding(
            "research",
            json!({"summary": "two venues stand out"}),
        ));
        let communication = Arc::new(MockAgent::succeeding("communication", json!({})));
        let (orchestrator, _) = build_orchestrator(vec![research, communication]);

        let outcome = orchestrator
            .orchestrate("research venues and email the shortlist", "alice")
            .await
            .unwrap();

        assert_eq!(outcome["complex"], true);
        assert_eq!(outcome["all_completed"], true);

        let db = orchestrator.executor.database();
        assert_eq!(db.list_tasks_for_user("alice", None).unwrap().len(), 3);

        let parent_id = outcome["parent_task_id"].as_str().unwrap();
        let parent = db.get_task(parent_id).unwrap().unwrap();
        assert_eq!(parent.status, TaskStatus::Completed);
        assert_eq!(parent.result_field("all_completed"), Some(&json!(true)));
        assert_eq!(
            parent.result_field("subtasks").unwrap().as_array().unwrap().len(),
            2
        );
        assert_eq!(
            parent.result_field("subtask_ids").unwrap().as_array().unwrap().len(),
            2
        );

        for (index, entry) in outcome["subtasks"].as_array().unwrap().iter().enumerate() {
            let row = db
                .get_task(entry["task_id"].as_str().unwrap())
                .unwrap()
                .unwrap();
            assert_eq!(row.status, TaskStatus::Completed);
            assert_eq!(row.result_field("parent_task_id"), Some(&json!(parent_id)));
            assert_eq!(row.result_field("subtask_index"), Some(&json!(index)));
        }
        let second = db
            .get_task(outcome["subtasks"][1]["task_id"].as_str().unwrap())
            .unwrap()
            .unwrap();
        assert_eq!(second.result_field("dependencies"), Some(&json!([0])));
    }

    #[tokio::test]
    async fn test_failed_dependency_skips_dependent_subtask() {
        let research = Arc::new(MockAgent::failing("research", "search backend down"));
        let communication = Arc::new(MockAgent::succeeding("communication", json!({})));
        let (orchestrator, agents) =
            build_orchestrator(vec![research, communication]);

        let outcome = orchestrator
            .orchestrate("research venues and email the shortlist", "alice")
            .await
            .unwrap();

        assert_eq!(outcome["complex"], true);
        assert_eq!(outcome["all_completed"], false);
        assert_eq!(outcome["subtasks"][0]["status"], "failed");
        assert_eq!(outcome["subtasks"][1]["error"], "Dependencies not met");
        // the dependent agent was never invoked
        assert_eq!(agents[1].call_count(), 0);
    }

    #[tokio::test]
    async fn test_dependency_summary_flows_into_dependent_subtask() {
        let research = Arc::new(MockAgent::succeeding(
            "research",
            json!({"summary": "three venues fit the budget"}),
        ));
        let communication = Arc::new(MockAgent::succeeding("communication", json!({})));
        let (orchestrator, agents) =
            build_orchestrator(vec![research, communication]);

        let outcome = orchestrator
            .orchestrate("research venues and email the shortlist", "alice")
            .await
            .unwrap();

        assert_eq!(outcome["all_completed"], true);

        let calls = agents[1].calls.lock().unwrap();
        assert_eq!(calls.len(), 1);
        let message = calls[0]["message"].as_str().unwrap();
        assert!(message.contains("Research findings:\nthree venues fit the budget"));
        assert_eq!(calls[0]["action"], "draft");
    }
}
