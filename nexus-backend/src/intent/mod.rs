//! Intent classification - turns a natural-language message into a
//! structured intent, with deterministic business rules layered on top of
//! whatever the inference backend returned.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::ai::gemini::GeminiClient;
use crate::ai::groq::GroqClient;
use crate::config::Config;
use crate::policy;

pub const CONFIDENCE_THRESHOLD: f64 = 0.70;

const SPENDING_KEYWORDS: &[&str] = &[
    "pay", "cost", "buy", "purchase", "spend", "price", "fee", "charge",
];
const DESTRUCTIVE_KEYWORDS: &[&str] = &[
    "delete", "remove", "destroy", "drop", "kill", "terminate",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl std::fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        };
        write!(f, "{}", s)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentResult {
    pub intent: String,
    pub confidence: f64,
    #[serde(default)]
    pub entities: Value,
    #[serde(default)]
    pub command: Option<String>,
    #[serde(default)]
    pub parameters: Option<Value>,
    #[serde(default)]
    pub requires_approval: bool,
    #[serde(default)]
    pub estimated_cost: Option<f64>,
    #[serde(default)]
    pub risk_level: Option<RiskLevel>,
}

impl IntentResult {
    /// What gets returned when every inference backend is down: unknown
    /// intent, zero confidence, approval forced, risk pinned high.
    pub fn fallback() -> Self {
        IntentResult {
            intent: "unknown".to_string(),
            confidence: 0.0,
            entities: json!({}),
            command: None,
            parameters: None,
            requires_approval: true,
            estimated_cost: None,
            risk_level: Some(RiskLevel::High),
        }
    }

    fn raise_risk_to(&mut self, floor: RiskLevel) {
        match self.risk_level {
            Some(current) if current >= floor => {}
            _ => self.risk_level = Some(floor),
        }
    }
}

/// Deterministic rules applied after classification. Rules are cumulative
/// and only ever tighten the result: approval flags are set, never cleared,
/// and risk levels are raised, never lowered. Runs against the raw message,
/// not the sanitized prompt text.
pub fn apply_business_rules(result: &mut IntentResult, message: &str) {
    let lower = message.to_lowercase();

    if result.estimated_cost.unwrap_or(0.0) > 0.0 {
        result.requires_approval = true;
        result.raise_risk_to(RiskLevel::Medium);
    }

    if SPENDING_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        result.requires_approval = true;
        if result.estimated_cost.is_none() {
            result.estimated_cost = Some(0.0);
        }
    }

    if DESTRUCTIVE_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
        result.requires_approval = true;
        result.raise_risk_to(RiskLevel::High);
    }

    if result.confidence < CONFIDENCE_THRESHOLD {
        log::warn!(
            "[INTENT] Low confidence classification: {} ({:.2})",
            result.intent,
            result.confidence
        );
    }
}

/// Classification seam. Production uses the LLM-backed implementation; tests
/// substitute stubs so orchestration can be exercised deterministically.
#[async_trait]
pub trait IntentClassifier: Send + Sync {
    /// Classification never fails: backend errors degrade to the fallback
    /// result rather than surfacing as errors.
    async fn classify(&self, message: &str, context: Option<&Value>) -> IntentResult;
}

pub struct LlmIntentClassifier {
    groq: Option<GroqClient>,
    gemini: Option<GeminiClient>,
}

const SYSTEM_PROMPT: &str = r#"You are an intent classifier for a task automation system.
Analyze the user's message and respond with a JSON object containing:
- "intent": one of "research", "communication", "purchase", or "unknown"
- "confidence": a number between 0.0 and 1.0
- "entities": an object of extracted entities (recipients, topics, products, amounts)
- "command": a short imperative description of what should be done, or null
- "parameters": an object of parameters for executing the command (e.g. "action", "to", "subject", "query"), or null
- "requires_approval": true if the action has external effects
- "estimated_cost": estimated cost in dollars as a number, or null if free
- "risk_level": one of "low", "medium", "high", "critical", or null
Respond with JSON only."#;

impl LlmIntentClassifier {
    pub fn new(config: &Config) -> Self {
        let groq = match &config.groq_api_key {
            Some(key) => match GroqClient::new(key) {
                Ok(client) => Some(client),
                Err(e) => {
                    log::warn!("[INTENT] Groq client unavailable: {}", e);
                    None
                }
            },
            None => None,
        };
        let gemini = match &config.gemini_api_key {
            Some(key) => match GeminiClient::new(key) {
                Ok(client) => Some(client),
                Err(e) => {
                    log::warn!("[INTENT] Gemini client unavailable: {}", e);
                    None
                }
            },
            None => None,
        };

        if groq.is_none() && gemini.is_none() {
            log::warn!("[INTENT] No inference backend configured, all classification will degrade");
        }

        LlmIntentClassifier { groq, gemini }
    }

    fn build_user_prompt(message: &str, context: Option<&Value>) -> String {
        let sanitized = policy::sanitize_user_input(message);
        match context {
            Some(ctx) => format!("Context: {}\n\nMessage: {}", ctx, sanitized),
            None => format!("Message: {}", sanitized),
        }
    }

    fn parse_result(value: Value) -> Result<IntentResult, String> {
        serde_json::from_value(value).map_err(|e| format!("Invalid intent payload: {}", e))
    }
}

#[async_trait]
impl IntentClassifier for LlmIntentClassifier {
    async fn classify(&self, message: &str, context: Option<&Value>) -> IntentResult {
        let user_prompt = Self::build_user_prompt(message, context);

        let mut result = None;

        if let Some(groq) = &self.groq {
            match groq.complete_json(SYSTEM_PROMPT, &user_prompt, 0.3).await {
                Ok(value) => match Self::parse_result(value) {
                    Ok(parsed) => result = Some(parsed),
                    Err(e) => log::warn!("[INTENT] Groq returned unusable intent: {}", e),
                },
                Err(e) => {
                    log::warn!(
                        "[INTENT] Groq classification failed: {}",
                        policy::sanitize_error_message(&e)
                    );
                }
            }
        }

        if result.is_none() {
            if let Some(gemini) = &self.gemini {
                match gemini.complete_json(SYSTEM_PROMPT, &user_prompt, 0.3).await {
                    Ok(value) => match Self::parse_result(value) {
                        Ok(parsed) => result = Some(parsed),
                        Err(e) => log::warn!("[INTENT] Gemini returned unusable intent: {}", e),
                    },
                    Err(e) => {
                        log::warn!(
                            "[INTENT] Gemini classification failed: {}",
                            policy::sanitize_error_message(&e)
                        );
                    }
                }
            }
        }

        let mut result = result.unwrap_or_else(|| {
            log::error!("[INTENT] All inference backends failed, using degraded fallback");
            IntentResult::fallback()
        });

        apply_business_rules(&mut result, message);
        result
    }
}

#[cfg(test)]
pub(crate) struct StubClassifier {
    pub result: IntentResult,
}

#[cfg(test)]
#[async_trait]
impl IntentClassifier for StubClassifier {
    async fn classify(&self, message: &str, _context: Option<&Value>) -> IntentResult {
        let mut result = self.result.clone();
        apply_business_rules(&mut result, message);
        result
    }
}
