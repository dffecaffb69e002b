//! Web search and page fetching for the research pipeline.
//!
//! Search runs against the Brave API when a key is configured and falls back
//! to scraping DuckDuckGo's HTML endpoint. Page fetches extract plain text;
//! a failed fetch is per-URL and never fatal to a batch.

use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

const USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36";
const MAX_SOURCES: usize = 5;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub title: String,
    pub url: String,
    pub description: String,
}

#[derive(Clone)]
pub struct SearchClient {
    client: Client,
    brave_api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct BraveResponse {
    web: Option<BraveWeb>,
}

#[derive(Debug, Deserialize)]
struct BraveWeb {
    results: Vec<BraveResult>,
}

#[derive(Debug, Deserialize)]
struct BraveResult {
    #[serde(default)]
    title: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    description: String,
}

impl SearchClient {
    pub fn new(brave_api_key: Option<String>) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .unwrap_or_default();
        Self {
            client,
            brave_api_key,
        }
    }

    /// Which backend answered the last search, for result metadata
    pub fn search_method(&self) -> &'static str {
        if self.brave_api_key.is_some() {
            "brave"
        } else {
            "duckduckgo"
        }
    }

    /// Search the web, preferring Brave and degrading to the DuckDuckGo
    /// scrape on any Brave failure.
    pub async fn search(&self, query: &str) -> Result<Vec<SearchResult>, String> {
        if self.brave_api_key.is_some() {
            match self.search_brave(query).await {
                Ok(results) => return Ok(results),
                Err(e) => {
                    log::warn!("[SEARCH] Brave search failed, falling back to DuckDuckGo: {}", e);
                }
            }
        }
        self.search_duckduckgo(query).await
    }

    async fn search_brave(&self, query: &str) -> Result<Vec<SearchResult>, String> {
        let api_key = self
            .brave_api_key
            .as_deref()
            .ok_or_else(|| "BRAVE_API_KEY not configured".to_string())?;

        let response = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("Accept", "application/json")
            .header("X-Subscription-Token", api_key)
            .query(&[("q", query.to_string()), ("count", MAX_SOURCES.to_string())])
            .send()
            .await
            .map_err(|e| format!("Brave search request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Brave search returned error status: {}", status));
        }

        let data: BraveResponse = response
            .json()
            .await
            .map_err(|e| format!("Failed to parse Brave response: {}", e))?;

        let results: Vec<SearchResult> = data
            .web
            .map(|w| w.results)
            .unwrap_or_default()
            .into_iter()
            .take(MAX_SOURCES)
            .map(|r| SearchResult {
                title: r.title,
                url: r.url,
                description: r.description,
            })
            .collect();

        log::info!("[SEARCH] Brave search found {} sources", results.len());
        Ok(results)
    }

    async fn search_duckduckgo(&self, query: &str) -> Result<Vec<SearchResult>, String> {
        let response = self
            .client
            .get("https://html.duckduckgo.com/html/")
            .query(&[("q", query)])
            .send()
            .await
            .map_err(|e| format!("DuckDuckGo search request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("DuckDuckGo returned error status: {}", status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read DuckDuckGo response: {}", e))?;

        let results = parse_duckduckgo_results(&body);
        log::info!("[SEARCH] DuckDuckGo search found {} sources", results.len());
        Ok(results)
    }

    /// Fetch a URL and extract plain text from its HTML.
    pub async fn fetch_text(&self, url: &str) -> Result<String, String> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("Fetch failed for {}: {}", url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("Fetch for {} returned status {}", url, status));
        }

        let body = response
            .text()
            .await
            .map_err(|e| format!("Failed to read body of {}: {}", url, e))?;

        Ok(extract_text_from_html(&body))
    }
}

static DDG_RESULT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap()
});
static DDG_SNIPPET_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<a[^>]*class="result__snippet"[^>]*>(.*?)</a>"#).unwrap()
});

/// Parse result links and snippets out of DuckDuckGo's HTML results page
fn parse_duckduckgo_results(html: &str) -> Vec<SearchResult> {
    let snippets: Vec<String> = DDG_SNIPPET_RE
        .captures_iter(html)
        .map(|c| extract_text_from_html(&c[1]))
        .collect();

    DDG_RESULT_RE
        .captures_iter(html)
        .take(MAX_SOURCES)
        .enumerate()
        .map(|(i, c)| SearchResult {
            title: extract_text_from_html(&c[2]),
            url: c[1].to_string(),
            description: snippets.get(i).cloned().unwrap_or_default(),
        })
        .collect()
}

static SCRIPT_STYLE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?is)<(script|style)[^>]*>.*?</(script|style)>").unwrap()
});
static BLOCK_END_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)</(p|h[1-6]|li|tr|div)>|<br\s*/?>").unwrap());
static TAG_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"<[^>]+>").unwrap());

/// Extract readable plain text from HTML: drop script/style blocks, turn
/// block boundaries into newlines, strip remaining tags, decode the common
/// entities, and normalize whitespace.
pub fn extract_text_from_html(html: &str) -> String {
    let without_scripts = SCRIPT_STYLE_RE.replace_all(html, " ");
    let with_breaks = BLOCK_END_RE.replace_all(&without_scripts, "\n");
    let stripped = TAG_RE.replace_all(&with_breaks, " ");

    let decoded = stripped
        .replace("&nbsp;", " ")
        .replace("&amp;", "&")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&#x27;", "'");

    decoded
        .lines()
        .map(|line| {
            line.split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
        })
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_text_from_html() {
        let html = r#"
        <html>
          <head><style>body { color: red; }</style></head>
          <body>
            <script>var x = 1;</script>
            <h1>Cloud Providers</h1>
            <p>AWS &amp; GCP are popular.</p>
            <p>Azure   too.</p>
          </body>
        </html>
        "#;
        let text = extract_text_from_html(html);
        assert!(text.contains("Cloud Providers"));
        assert!(text.contains("AWS & GCP are popular."));
        assert!(text.contains("Azure too."));
        assert!(!text.contains("var x"));
        assert!(!text.contains("color: red"));
    }

    #[test]
    fn test_parse_duckduckgo_results() {
        let html = r#"
        <div class="result">
          <a rel="nofollow" class="result__a" href="https://example.com/a">First <b>Result</b></a>
          <a class="result__snippet" href="https://example.com/a">Snippet one</a>
        </div>
        <div class="result">
          <a rel="nofollow" class="result__a" href="https://example.com/b">Second Result</a>
          <a class="result__snippet" href="https://example.com/b">Snippet two</a>
        </div>
        "#;
        let results = parse_duckduckgo_results(html);
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].title, "First Result");
        assert_eq!(results[0].url, "https://example.com/a");
        assert_eq!(results[0].description, "Snippet one");
        assert_eq!(results[1].title, "Second Result");
    }

    #[test]
    fn test_search_method_reflects_configuration() {
        assert_eq!(SearchClient::new(None).search_method(), "duckduckgo");
        assert_eq!(
            SearchClient::new(Some("key".to_string())).search_method(),
            "brave"
        );
    }
}
