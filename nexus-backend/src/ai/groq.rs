//! Groq chat-completion client (primary inference backend)

use reqwest::{Client, header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use super::parse_json_completion;

const GROQ_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
const GROQ_MODEL: &str = "llama-3.1-70b-versatile";

#[derive(Clone)]
pub struct GroqClient {
    client: Client,
    model: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    response_format: ResponseFormat,
}

#[derive(Debug, Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    format_type: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

impl GroqClient {
    pub fn new(api_key: &str) -> Result<Self, String> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json"),
        );
        let auth_value = header::HeaderValue::from_str(&format!("Bearer {}", api_key))
            .map_err(|e| format!("Invalid API key format: {}", e))?;
        headers.insert(header::AUTHORIZATION, auth_value);

        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(30))
            .build()
            .map_err(|e| format!("Failed to create HTTP client: {}", e))?;

        Ok(Self {
            client,
            model: GROQ_MODEL.to_string(),
        })
    }

    /// Send a chat completion expecting a single JSON object back.
    pub async fn complete_json(
        &self,
        system: &str,
        user: &str,
        temperature: f32,
    ) -> Result<Value, String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: system.to_string(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: user.to_string(),
                },
            ],
            temperature,
            response_format: ResponseFormat {
                format_type: "json_object".to_string(),
            },
        };

        log::debug!("[GROQ] Sending request with model {}", self.model);

        let response = self
            .client
            .post(GROQ_ENDPOINT)
            .json(&request)
            .send()
            .await
            .map_err(|e| format!("Groq API request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(format!(
                "Groq API returned error status: {}, body: {}",
                status, error_text
            ));
        }

        let data: ChatResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Groq response: {}", e))?;

        let content = data
            .choices
            .first()
            .and_then(|c| c.message.content.as_deref())
            .ok_or_else(|| "Groq API returned no choices".to_string())?;

        parse_json_completion(content)
    }
}
