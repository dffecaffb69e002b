//! Inference backend clients.
//!
//! Both providers expose the same shape: system instructions plus a user
//! payload in, a single JSON object completion out. Callers treat them
//! interchangeably and are responsible for their own fallback chains.

pub mod gemini;
pub mod groq;

pub use gemini::GeminiClient;
pub use groq::GroqClient;

/// Strip markdown code fences that models sometimes wrap JSON output in.
pub fn strip_code_fences(content: &str) -> &str {
    let mut text = content.trim();
    if let Some(rest) = text.strip_prefix("```json") {
        text = rest;
    } else if let Some(rest) = text.strip_prefix("```") {
        text = rest;
    }
    if let Some(rest) = text.strip_suffix("```") {
        text = rest;
    }
    text.trim()
}

/// Parse a completion body as a JSON object, tolerating incidental fencing.
pub fn parse_json_completion(content: &str) -> Result<serde_json::Value, String> {
    let cleaned = strip_code_fences(content);
    serde_json::from_str(cleaned)
        .map_err(|e| format!("Failed to parse completion as JSON: {} - body: {}", e, cleaned))
}
