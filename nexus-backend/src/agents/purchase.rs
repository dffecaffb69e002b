//! Purchase agent - crypto price lookup via CoinGecko and product price
//! research built on source discovery. Research only; nothing here spends
//! money, so actual purchases stay behind the approval gate upstream.

use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::Client;
use serde_json::{Value, json};
use std::time::Duration;

use crate::agents::research::discover_sources;
use crate::agents::{Agent, AgentResult, Estimate};
use crate::ai::groq::GroqClient;
use crate::config::Config;
use crate::intent::RiskLevel;
use crate::web::SearchClient;

const COINGECKO_ENDPOINT: &str = "https://api.coingecko.com/api/v3/simple/price";

const CRYPTO_KEYWORDS: &[&str] = &[
    "bitcoin", "btc", "ethereum", "eth", "crypto", "cryptocurrency", "coin", "token",
];

static PRICE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$([0-9]+(?:,[0-9]{3})*(?:\.[0-9]{2})?)").unwrap());

pub struct PurchaseAgent {
    search: SearchClient,
    groq: Option<GroqClient>,
    client: Client,
    max_spend: f64,
}

fn map_coin_id(query: &str) -> &'static str {
    let lower = query.to_lowercase();
    if lower.contains("ethereum") || lower.contains("eth") {
        "ethereum"
    } else if lower.contains("solana") || lower.contains("sol") {
        "solana"
    } else if lower.contains("cardano") || lower.contains("ada") {
        "cardano"
    } else {
        "bitcoin"
    }
}

fn is_crypto_query(query: &str) -> bool {
    let lower = query.to_lowercase();
    CRYPTO_KEYWORDS.iter().any(|kw| lower.contains(kw))
}

/// Pull dollar amounts out of free text; commas tolerated.
fn extract_prices(text: &str) -> Vec<f64> {
    PRICE_RE
        .captures_iter(text)
        .filter_map(|cap| cap[1].replace(',', "").parse::<f64>().ok())
        .collect()
}

/// Price-range summary over extracted listing prices, checked against the
/// per-task spend ceiling.
fn analyze_prices(prices: &[f64], max_spend: f64) -> Value {
    if prices.is_empty() {
        return json!({ "prices_found": 0 });
    }
    let min = prices.iter().cloned().fold(f64::INFINITY, f64::min);
    let max = prices.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    let average = prices.iter().sum::<f64>() / prices.len() as f64;
    json!({
        "prices_found": prices.len(),
        "lowest": min,
        "highest": max,
        "average": average,
        "within_budget": min <= max_spend,
        "budget_limit": max_spend,
    })
}

impl PurchaseAgent {
    pub fn new(config: &Config) -> Self {
        let groq = config.groq_api_key.as_deref().and_then(|key| {
            GroqClient::new(key)
                .map_err(|e| log::warn!("[PURCHASE] Groq client unavailable: {}", e))
                .ok()
        });
        PurchaseAgent {
            search: SearchClient::new(config.brave_api_key.clone()),
            groq,
            client: Client::builder()
                .timeout(Duration::from_secs(15))
                .build()
                .unwrap_or_default(),
            max_spend: config.max_spend_per_task,
        }
    }

    fn extract_query(payload: &Value) -> Option<String> {
        for key in ["query", "message", "text", "product"] {
            if let Some(value) = payload.get(key).and_then(Value::as_str) {
                let trimmed = value.trim();
                if !trimmed.is_empty() {
                    return Some(trimmed.to_string());
                }
            }
        }
        None
    }

    async fn crypto_price(&self, query: &str) -> Result<AgentResult, String> {
        let coin = map_coin_id(query);
        let response = self
            .client
            .get(COINGECKO_ENDPOINT)
            .query(&[("ids", coin), ("vs_currencies", "usd")])
            .send()
            .await
            .map_err(|e| format!("CoinGecko request failed: {}", e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(format!("CoinGecko returned {}", status));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| format!("CoinGecko returned invalid JSON: {}", e))?;
        let price = body[coin]["usd"]
            .as_f64()
            .ok_or_else(|| format!("CoinGecko response missing price for {}", coin))?;

        log::info!("[PURCHASE] {} price: ${:.2}", coin, price);
        Ok(AgentResult::ok(json!({
            "kind": "crypto_price",
            "coin": coin,
            "price_usd": price,
            "within_budget": price <= self.max_spend,
        })))
    }

    async fn compare_products(&self, query: &str, sources: &[Value]) -> String {
        if let Some(groq) = &self.groq {
            let listing: Vec<String> = sources
                .iter()
                .take(3)
                .map(|s| {
                    format!(
                        "{}: {}",
                        s["title"].as_str().unwrap_or("untitled"),
                        s["description"].as_str().unwrap_or("")
                    )
                })
                .collect();
            let system = "You compare product options for a buyer. Given the sources, \
                          recommend the best option and note price differences. Respond \
                          with a JSON object: {\"comparison\": \"...\"}.";
            let user = format!("Product query: {}\n\n{}", query, listing.join("\n"));
            match groq.complete_json(system, &user, 0.3).await {
                Ok(value) => {
                    if let Some(comparison) = value["comparison"].as_str() {
                        return comparison.to_string();
                    }
                }
                Err(e) => log::warn!("[PURCHASE] Comparison generation failed: {}", e),
            }
        }
        format!(
            "Found {} listing(s) for \"{}\". Review the sources for pricing details.",
            sources.len(),
            query
        )
    }

    async fn product_research(&self, query: &str) -> Result<AgentResult, String> {
        let search_query = format!("{} product review price", query);
        let results = discover_sources(&self.search, &search_query).await?;

        let mut prices = Vec::new();
        let sources: Vec<Value> = results
            .iter()
            .map(|r| {
                prices.extend(extract_prices(&r.title));
                prices.extend(extract_prices(&r.description));
                json!({
                    "title": r.title,
                    "url": r.url,
                    "description": r.description,
                })
            })
            .collect();

        let comparison = self.compare_products(query, &sources).await;

        let budget_analysis = analyze_prices(&prices, self.max_spend);

        Ok(AgentResult::ok(json!({
            "kind": "product_research",
            "query": query,
            "comparison": comparison,
            "sources": sources,
            "budget_analysis": budget_analysis,
        })))
    }
}

#[async_trait]
impl Agent for PurchaseAgent {
    fn name(&self) -> &'static str {
        "purchase"
    }

    fn validate(&self, payload: &Value) -> Result<(), String> {
        Self::extract_query(payload)
            .map(|_| ())
            .ok_or_else(|| "Purchase payload requires a 'query', 'message', or 'product'".to_string())
    }

    fn estimate(&self, _payload: &Value) -> Estimate {
        // price research spends nothing; intent-level rules force approval
        // before any real purchase could be scheduled
        Estimate {
            cost: 0.0,
            risk_level: RiskLevel::Low,
            requires_approval: false,
        }
    }

    async fn execute(&self, payload: &Value) -> Result<AgentResult, String> {
        let query = Self::extract_query(payload)
            .ok_or_else(|| "Purchase payload requires a query".to_string())?;

        if is_crypto_query(&query) {
            self.crypto_price(&query).await
        } else {
            self.product_research(&query).await
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crypto_detection() {
        assert!(is_crypto_query("what is the bitcoin price"));
        assert!(is_crypto_query("ETH price today"));
        assert!(!is_crypto_query("best mechanical keyboard"));
    }

    #[test]
    fn test_coin_mapping() {
        assert_eq!(map_coin_id("price of ethereum"), "ethereum");
        assert_eq!(map_coin_id("how much is SOL"), "solana");
        assert_eq!(map_coin_id("cardano ada outlook"), "cardano");
        assert_eq!(map_coin_id("btc please"), "bitcoin");
        assert_eq!(map_coin_id("crypto in general"), "bitcoin");
    }

    #[test]
    fn test_price_extraction() {
        let prices = extract_prices("was $1,299.99, now $999.99 or from $50");
        assert_eq!(prices, vec![1299.99, 999.99, 50.0]);
        assert!(extract_prices("no prices here").is_empty());
    }

    #[test]
    fn test_price_analysis_reports_range_and_average() {
        let analysis = analyze_prices(&[100.0, 200.0, 600.0], 500.0);
        assert_eq!(analysis["prices_found"], 3);
        assert_eq!(analysis["lowest"], 100.0);
        assert_eq!(analysis["highest"], 600.0);
        assert_eq!(analysis["average"], 300.0);
        assert_eq!(analysis["within_budget"], true);

        let analysis = analyze_prices(&[600.0], 500.0);
        assert_eq!(analysis["within_budget"], false);

        assert_eq!(analyze_prices(&[], 500.0)["prices_found"], 0);
    }
}
