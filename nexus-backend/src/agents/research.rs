//! Research agent - source discovery, best-effort scraping, and an LLM
//! summary with a templated fallback.

use async_trait::async_trait;
use serde_json::{Value, json};

use crate::agents::{Agent, AgentResult, Estimate};
use crate::ai::groq::GroqClient;
use crate::config::Config;
use crate::intent::RiskLevel;
use crate::web::{SearchClient, SearchResult};

const MAX_CONTENT_LENGTH: usize = 5_000;
const SUMMARY_SOURCE_LIMIT: usize = 3;
const SUMMARY_EXCERPT_LENGTH: usize = 1_000;

pub struct ResearchAgent {
    search: SearchClient,
    groq: Option<GroqClient>,
}

/// Find candidate sources for a query. Shared with the purchase agent's
/// product research path.
pub(crate) async fn discover_sources(
    search: &SearchClient,
    query: &str,
) -> Result<Vec<SearchResult>, String> {
    let results = search.search(query).await?;
    if results.is_empty() {
        return Err(format!("No sources found for query: {}", query));
    }
    Ok(results)
}

impl ResearchAgent {
    pub fn new(config: &Config) -> Self {
        let groq = config.groq_api_key.as_deref().and_then(|key| {
            GroqClient::new(key)
                .map_err(|e| log::warn!("[RESEARCH] Groq client unavailable: {}", e))
                .ok()
        });
        ResearchAgent {
            search: SearchClient::new(config.brave_api_key.clone()),
            groq,
        }
    }

    fn extract_query(payload: &Value) -> Option<String> {
        for key in ["query", "message", "text"] {
            if let Some(value) = payload.get(key).and_then(Value::as_str) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        None
    }

    /// Fetch each source's page text, keeping whatever succeeds. A page that
    /// cannot be fetched still contributes its search snippet.
    async fn gather_content(&self, sources: &[SearchResult]) -> Vec<Value> {
        let mut gathered = Vec::with_capacity(sources.len());
        for source in sources {
            let content = match self.search.fetch_text(&source.url).await {
                Ok(text) => {
                    let truncated: String = text.chars().take(MAX_CONTENT_LENGTH).collect();
                    truncated
                }
                Err(e) => {
                    log::debug!("[RESEARCH] Skipping {}: {}", source.url, e);
                    source.description.clone()
                }
            };
            gathered.push(json!({
                "title": source.title,
                "url": source.url,
                "content": content,
            }));
        }
        gathered
    }

    async fn summarize(&self, query: &str, sources: &[Value]) -> String {
        let excerpts: Vec<String> = sources
            .iter()
            .take(SUMMARY_SOURCE_LIMIT)
            .map(|s| {
                let title = s["title"].as_str().unwrap_or("untitled");
                let content: String = s["content"]
                    .as_str()
                    .unwrap_or("")
                    .chars()
                    .take(SUMMARY_EXCERPT_LENGTH)
                    .collect();
                format!("Source: {}\n{}", title, content)
            })
            .collect();

        if let Some(groq) = &self.groq {
            let system = "You are a research assistant. Summarize the provided sources \
                          into a concise answer to the user's question. Respond with a JSON \
                          object: {\"summary\": \"...\"}.";
            let user = format!("Question: {}\n\n{}", query, excerpts.join("\n\n"));
            match groq.complete_json(system, &user, 0.3).await {
                Ok(value) => {
                    if let Some(summary) = value["summary"].as_str() {
                        return summary.to_string();
                    }
                    log::warn!("[RESEARCH] Summary response missing 'summary' field");
                }
                Err(e) => log::warn!("[RESEARCH] Summary generation failed: {}", e),
            }
        }

        // templated fallback keeps the agent useful without inference
        let titles: Vec<&str> = sources
            .iter()
            .take(SUMMARY_SOURCE_LIMIT)
            .filter_map(|s| s["title"].as_str())
            .collect();
        format!(
            "Found {} source(s) for \"{}\". Top results: {}",
            sources.len(),
            query,
            titles.join("; ")
        )
    }
}

#[async_trait]
impl Agent for ResearchAgent {
    fn name(&self) -> &'static str {
        "research"
    }

    fn validate(&self, payload: &Value) -> Result<(), String> {
        Self::extract_query(payload)
            .map(|_| ())
            .ok_or_else(|| "Research payload requires a 'query', 'message', or 'text'".to_string())
    }

    fn estimate(&self, _payload: &Value) -> Estimate {
        Estimate {
            cost: 0.01,
            risk_level: RiskLevel::Low,
            requires_approval: false,
        }
    }

    async fn execute(&self, payload: &Value) -> Result<AgentResult, String> {
        let query = Self::extract_query(payload)
            .ok_or_else(|| "Research payload requires a query".to_string())?;

        let sources = discover_sources(&self.search, &query).await?;
        log::info!(
            "[RESEARCH] Found {} source(s) via {} for: {}",
            sources.len(),
            self.search.search_method(),
            query
        );

        let gathered = self.gather_content(&sources).await;
        let summary = self.summarize(&query, &gathered).await;

        Ok(AgentResult::ok(json!({
            "query": query,
            "summary": summary,
            "sources": gathered,
            "source_count": sources.len(),
            "search_method": self.search.search_method(),
        })))
    }
}
