//! Agent abstraction and registry.
//!
//! Every executable capability implements [`Agent`]; the executor only ever
//! reaches agents through the registry, so the set of runnable capabilities
//! is exactly what was registered at startup.

pub mod communication;
pub mod purchase;
pub mod research;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::config::Config;
use crate::intent::RiskLevel;
use crate::policy;

/// Pre-execution estimate used by budget and approval gates.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Estimate {
    pub cost: f64,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    pub success: bool,
    pub data: Value,
    pub error: Option<String>,
    pub cost: f64,
    pub risk_level: RiskLevel,
    pub requires_approval: bool,
    pub duration_ms: u64,
}

impl AgentResult {
    pub fn ok(data: Value) -> Self {
        AgentResult {
            success: true,
            data,
            error: None,
            cost: 0.0,
            risk_level: RiskLevel::Low,
            requires_approval: false,
            duration_ms: 0,
        }
    }

    pub fn failed(error: &str) -> Self {
        AgentResult {
            success: false,
            data: json!({}),
            error: Some(error.to_string()),
            cost: 0.0,
            risk_level: RiskLevel::Low,
            requires_approval: false,
            duration_ms: 0,
        }
    }
}

#[async_trait]
pub trait Agent: Send + Sync {
    fn name(&self) -> &'static str;

    /// Reject a structurally invalid payload before any work happens.
    fn validate(&self, _payload: &Value) -> Result<(), String> {
        Ok(())
    }

    fn estimate(&self, payload: &Value) -> Estimate;

    async fn execute(&self, payload: &Value) -> Result<AgentResult, String>;

    /// Uniform execution wrapper: validate, estimate, time the execution,
    /// and fold the estimate into the result. Approval enforcement happens
    /// upstream in the executor, never here.
    async fn run(&self, payload: &Value) -> AgentResult {
        if let Err(e) = self.validate(payload) {
            log::warn!("[AGENT] {} rejected payload: {}", self.name(), e);
            return AgentResult::failed(&e);
        }

        let estimate = self.estimate(payload);
        log::info!(
            "[AGENT] {} starting (estimated cost ${:.2}, risk {})",
            self.name(),
            estimate.cost,
            estimate.risk_level
        );

        let start = Instant::now();
        let mut result = match self.execute(payload).await {
            Ok(result) => result,
            Err(e) => AgentResult::failed(&policy::sanitize_error_message(&e)),
        };
        result.duration_ms = start.elapsed().as_millis() as u64;

        if result.cost == 0.0 {
            result.cost = estimate.cost;
        }
        result.risk_level = result.risk_level.max(estimate.risk_level);
        result.requires_approval = result.requires_approval || estimate.requires_approval;

        if result.success {
            log::info!(
                "[AGENT] {} completed in {}ms (cost ${:.2})",
                self.name(),
                result.duration_ms,
                result.cost
            );
        } else {
            log::warn!(
                "[AGENT] {} failed in {}ms: {}",
                self.name(),
                result.duration_ms,
                result.error.as_deref().unwrap_or("unknown error")
            );
        }

        result
    }
}

pub struct AgentRegistry {
    agents: HashMap<String, Arc<dyn Agent>>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        AgentRegistry {
            agents: HashMap::new(),
        }
    }

    pub fn register(&mut self, agent: Arc<dyn Agent>) {
        let name = agent.name().to_string();
        if self.agents.insert(name.clone(), agent).is_some() {
            log::warn!("[AGENT] Replacing previously registered agent '{}'", name);
        }
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Agent>> {
        self.agents.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.agents.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for AgentRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Standard production wiring: research, communication, purchase.
pub fn create_default_registry(config: &Config) -> AgentRegistry {
    let mut registry = AgentRegistry::new();
    registry.register(Arc::new(research::ResearchAgent::new(config)));
    registry.register(Arc::new(communication::CommunicationAgent::new(config)));
    registry.register(Arc::new(purchase::PurchaseAgent::new(config)));
    log::info!("[AGENT] Registered agents: {}", registry.names().join(", "));
    registry
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::Mutex;

    /// Scripted agent for orchestration tests; records every payload it ran.
    pub(crate) struct MockAgent {
        pub name: &'static str,
        pub result: AgentResult,
        pub estimate: Estimate,
        pub calls: Mutex<Vec<Value>>,
    }

    impl MockAgent {
        pub(crate) fn succeeding(name: &'static str, data: Value) -> Self {
            MockAgent {
                name,
                result: AgentResult::ok(data),
                estimate: Estimate {
                    cost: 0.0,
                    risk_level: RiskLevel::Low,
                    requires_approval: false,
                },
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn failing(name: &'static str, error: &str) -> Self {
            MockAgent {
                name,
                result: AgentResult::failed(error),
                estimate: Estimate {
                    cost: 0.0,
                    risk_level: RiskLevel::Low,
                    requires_approval: false,
                },
                calls: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn call_count(&self) -> usize {
            self.calls.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl Agent for MockAgent {
        fn name(&self) -> &'static str {
            self.name
        }

        fn estimate(&self, _payload: &Value) -> Estimate {
            self.estimate
        }

        async fn execute(&self, payload: &Value) -> Result<AgentResult, String> {
            self.calls.lock().unwrap().push(payload.clone());
            Ok(self.result.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use testing::MockAgent;

    #[tokio::test]
    async fn test_run_wraps_execute_with_estimate() {
        let mut agent = MockAgent::succeeding("research", json!({"answer": 42}));
        agent.estimate = Estimate {
            cost: 0.25,
            risk_level: RiskLevel::Medium,
            requires_approval: true,
        };

        let result = agent.run(&json!({"query": "q"})).await;
        assert!(result.success);
        assert_eq!(result.cost, 0.25);
        assert_eq!(result.risk_level, RiskLevel::Medium);
        assert!(result.requires_approval);
        assert_eq!(agent.call_count(), 1);
    }

    #[tokio::test]
    async fn test_registry_lookup() {
        let mut registry = AgentRegistry::new();
        registry.register(Arc::new(MockAgent::succeeding("research", json!({}))));

        assert!(registry.get("research").is_some());
        assert!(registry.get("shell").is_none());
        assert_eq!(registry.names(), vec!["research".to_string()]);
    }
}
