use std::env;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub groq_api_key: Option<String>,
    pub gemini_api_key: Option<String>,
    pub brave_api_key: Option<String>,
    pub resend_api_key: Option<String>,
    pub resend_from: String,
    pub daily_budget_limit: f64,
    pub monthly_budget_limit: f64,
    pub max_spend_per_task: f64,
}

fn optional_env(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.is_empty())
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            database_url: env::var("DATABASE_URL").unwrap_or_else(|_| "./.db/nexus.db".to_string()),
            groq_api_key: optional_env("GROQ_API_KEY"),
            gemini_api_key: optional_env("GEMINI_API_KEY"),
            brave_api_key: optional_env("BRAVE_API_KEY"),
            resend_api_key: optional_env("RESEND_API_KEY"),
            resend_from: env::var("RESEND_FROM")
                .unwrap_or_else(|_| "onboarding@resend.dev".to_string()),
            daily_budget_limit: env::var("DAILY_BUDGET_LIMIT")
                .unwrap_or_else(|_| "1000.0".to_string())
                .parse()
                .expect("DAILY_BUDGET_LIMIT must be a valid number"),
            monthly_budget_limit: env::var("MONTHLY_BUDGET_LIMIT")
                .unwrap_or_else(|_| "30000.0".to_string())
                .parse()
                .expect("MONTHLY_BUDGET_LIMIT must be a valid number"),
            max_spend_per_task: env::var("MAX_SPEND_PER_TASK")
                .unwrap_or_else(|_| "1000.0".to_string())
                .parse()
                .expect("MAX_SPEND_PER_TASK must be a valid number"),
        }
    }
}

#[cfg(test)]
impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: ":memory:".to_string(),
            groq_api_key: None,
            gemini_api_key: None,
            brave_api_key: None,
            resend_api_key: None,
            resend_from: "onboarding@resend.dev".to_string(),
            daily_budget_limit: 1000.0,
            monthly_budget_limit: 30000.0,
            max_spend_per_task: 1000.0,
        }
    }
}
