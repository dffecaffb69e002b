//! Communication agent - email drafting and sending.
//!
//! Drafting is free and local (LLM with a templated fallback); sending goes
//! through Resend and always carries the approval flag.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::Serialize;
use serde_json::{Value, json};
use std::time::Duration;

use crate::agents::{Agent, AgentResult, Estimate};
use crate::ai::groq::GroqClient;
use crate::config::Config;
use crate::intent::RiskLevel;

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap());

const RESEND_ENDPOINT: &str = "https://api.resend.com/emails";

#[derive(Serialize)]
struct ResendRequest<'a> {
    from: &'a str,
    to: Vec<&'a str>,
    subject: &'a str,
    html: String,
}

struct ResendClient {
    client: Client,
    api_key: String,
    from: String,
}

impl ResendClient {
    fn new(api_key: &str, from: &str) -> Result<Self, String> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to build Resend client: {}", e))?;
        Ok(ResendClient {
            client,
            api_key: api_key.to_string(),
            from: from.to_string(),
        })
    }

    async fn send(&self, to: &str, subject: &str, body: &str) -> Result<Value, String> {
        let request = ResendRequest {
            from: &self.from,
            to: vec![to],
            subject,
            html: body.replace('\n', "<br>"),
        };

        let response = self
            .client
            .post(RESEND_ENDPOINT)
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Resend request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("Resend returned {}: {}", status, text));
        }

        response
            .json::<Value>()
            .await
            .map_err(|e| format!("Resend returned invalid JSON: {}", e))
    }
}

pub struct CommunicationAgent {
    groq: Option<GroqClient>,
    resend: Option<ResendClient>,
}

impl CommunicationAgent {
    pub fn new(config: &Config) -> Self {
        let groq = config.groq_api_key.as_deref().and_then(|key| {
            GroqClient::new(key)
                .map_err(|e| log::warn!("[COMM] Groq client unavailable: {}", e))
                .ok()
        });
        let resend = config.resend_api_key.as_deref().and_then(|key| {
            ResendClient::new(key, &config.resend_from)
                .map_err(|e| log::warn!("[COMM] Resend client unavailable: {}", e))
                .ok()
        });
        CommunicationAgent { groq, resend }
    }

    fn action(payload: &Value) -> String {
        payload
            .get("action")
            .and_then(Value::as_str)
            .unwrap_or("draft")
            .to_lowercase()
    }

    fn message(payload: &Value) -> String {
        for key in ["message", "text", "query", "body"] {
            if let Some(value) = payload.get(key).and_then(Value::as_str) {
                if !value.trim().is_empty() {
                    return value.to_string();
                }
            }
        }
        String::new()
    }

    async fn draft(&self, payload: &Value) -> Result<AgentResult, String> {
        let context = Self::message(payload);
        let subject = payload
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("Regarding your request");
        let to = payload.get("to").and_then(Value::as_str);

        if let Some(groq) = &self.groq {
            let system = "You are an email writing assistant. Write a professional email \
                          body for the described request. Respond with a JSON object: \
                          {\"subject\": \"...\", \"body\": \"...\"}.";
            let user = format!("Subject hint: {}\n\nRequest: {}", subject, context);
            match groq.complete_json(system, &user, 0.7).await {
                Ok(value) => {
                    let drafted_body = value["body"].as_str().unwrap_or("");
                    if !drafted_body.is_empty() {
                        return Ok(AgentResult::ok(json!({
                            "action": "draft",
                            "subject": value["subject"].as_str().unwrap_or(subject),
                            "body": drafted_body,
                            "to": to,
                        })));
                    }
                    log::warn!("[COMM] Draft response missing 'body' field");
                }
                Err(e) => log::warn!("[COMM] Draft generation failed: {}", e),
            }
        }

        // templated fallback when inference is unavailable
        let fallback = format!(
            "Hello,\n\n{}\n\nBest regards",
            if context.is_empty() {
                "Following up on your request."
            } else {
                context.as_str()
            }
        );
        Ok(AgentResult::ok(json!({
            "action": "draft",
            "subject": subject,
            "body": fallback,
            "to": to,
            "fallback": true,
        })))
    }

    async fn send(&self, payload: &Value) -> Result<AgentResult, String> {
        let to = payload
            .get("to")
            .and_then(Value::as_str)
            .ok_or_else(|| "Send requires a 'to' recipient".to_string())?;
        if !EMAIL_RE.is_match(to) {
            return Err(format!("Invalid recipient email address: {}", to));
        }

        let subject = payload
            .get("subject")
            .and_then(Value::as_str)
            .unwrap_or("Regarding your request");
        let body = payload
            .get("body")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| Self::message(payload));
        if body.trim().is_empty() {
            return Err("Send requires a non-empty body".to_string());
        }

        let resend = self
            .resend
            .as_ref()
            .ok_or_else(|| "Email sending is not configured".to_string())?;

        let response = resend.send(to, subject, &body).await?;
        log::info!("[COMM] Email sent to {} (subject: {})", to, subject);

        let mut result = AgentResult::ok(json!({
            "action": "send",
            "to": to,
            "subject": subject,
            "provider_response": response,
        }));
        result.requires_approval = true;
        result.risk_level = RiskLevel::Medium;
        Ok(result)
    }
}

#[async_trait]
impl Agent for CommunicationAgent {
    fn name(&self) -> &'static str {
        "communication"
    }

    fn validate(&self, payload: &Value) -> Result<(), String> {
        match Self::action(payload).as_str() {
            "draft" => Ok(()),
            "send" => {
                let to = payload
                    .get("to")
                    .and_then(Value::as_str)
                    .ok_or_else(|| "Send requires a 'to' recipient".to_string())?;
                if EMAIL_RE.is_match(to) {
                    Ok(())
                } else {
                    Err(format!("Invalid recipient email address: {}", to))
                }
            }
            other => Err(format!("Unknown communication action: {}", other)),
        }
    }

    fn estimate(&self, payload: &Value) -> Estimate {
        if Self::action(payload) == "send" {
            Estimate {
                cost: 0.0,
                risk_level: RiskLevel::Medium,
                requires_approval: true,
            }
        } else {
            Estimate {
                cost: 0.0,
                risk_level: RiskLevel::Low,
                requires_approval: false,
            }
        }
    }

    async fn execute(&self, payload: &Value) -> Result<AgentResult, String> {
        match Self::action(payload).as_str() {
            "send" => self.send(payload).await,
            _ => self.draft(payload).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_agent() -> CommunicationAgent {
        CommunicationAgent {
            groq: None,
            resend: None,
        }
    }

    #[test]
    fn test_action_defaults_to_draft() {
        assert_eq!(CommunicationAgent::action(&json!({})), "draft");
        assert_eq!(
            CommunicationAgent::action(&json!({"action": "SEND"})),
            "send"
        );
    }

    #[test]
    fn test_validate_send_requires_valid_recipient() {
        let agent = offline_agent();
        assert!(agent.validate(&json!({"action": "draft"})).is_ok());
        assert!(
            agent
                .validate(&json!({"action": "send", "to": "a@example.com"}))
                .is_ok()
        );
        assert!(agent.validate(&json!({"action": "send"})).is_err());
        assert!(
            agent
                .validate(&json!({"action": "send", "to": "not-an-email"}))
                .is_err()
        );
    }

    #[test]
    fn test_send_estimate_requires_approval() {
        let agent = offline_agent();
        let send = agent.estimate(&json!({"action": "send", "to": "a@example.com"}));
        assert!(send.requires_approval);
        assert_eq!(send.risk_level, RiskLevel::Medium);

        let draft = agent.estimate(&json!({"action": "draft"}));
        assert!(!draft.requires_approval);
    }

    #[tokio::test]
    async fn test_draft_falls_back_without_inference() {
        let agent = offline_agent();
        let result = agent
            .execute(&json!({"action": "draft", "message": "meeting moved to Friday"}))
            .await
            .unwrap();
        assert!(result.success);
        assert!(
            result.data["body"]
                .as_str()
                .unwrap()
                .contains("meeting moved to Friday")
        );
        assert_eq!(result.data["fallback"], true);
    }

    #[tokio::test]
    async fn test_send_without_provider_fails() {
        let agent = offline_agent();
        let err = agent
            .execute(&json!({"action": "send", "to": "a@example.com", "body": "hi"}))
            .await
            .unwrap_err();
        assert!(err.contains("not configured"));
    }
}
