use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QuotaScope {
    Global,
    User,
}

impl std::fmt::Display for QuotaScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            QuotaScope::Global => write!(f, "global"),
            QuotaScope::User => write!(f, "user"),
        }
    }
}

impl std::str::FromStr for QuotaScope {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "global" => Ok(QuotaScope::Global),
            "user" => Ok(QuotaScope::User),
            other => Err(format!("unknown quota scope: {}", other)),
        }
    }
}

/// Limit set for one scope. Absent limits mean no bound in that dimension.
/// Exactly one global row exists; per-user rows are optional overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageQuota {
    pub id: String,
    pub scope: QuotaScope,
    pub scope_id: Option<String>,
    pub daily_cost_limit_usd: Option<f64>,
    pub monthly_cost_limit_usd: Option<f64>,
    pub daily_token_limit: Option<i64>,
    pub monthly_token_limit: Option<i64>,
    pub requests_per_minute: Option<u32>,
    pub requests_per_hour: Option<u32>,
    pub alert_threshold_percent: u8,
    pub created_at: String,
    pub updated_at: String,
}

/// Partial update applied to a quota row. `None` leaves the field unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct QuotaUpdate {
    pub daily_cost_limit_usd: Option<f64>,
    pub monthly_cost_limit_usd: Option<f64>,
    pub daily_token_limit: Option<i64>,
    pub monthly_token_limit: Option<i64>,
    pub requests_per_minute: Option<u32>,
    pub requests_per_hour: Option<u32>,
    pub alert_threshold_percent: Option<u8>,
}

/// Rolling usage in the current daily and monthly windows.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CurrentUsage {
    pub daily_tokens_used: i64,
    pub daily_cost_used: f64,
    pub monthly_tokens_used: i64,
    pub monthly_cost_used: f64,
}

/// Admission decision: usage snapshot plus the limits that applied.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaCheck {
    pub allowed: bool,
    pub reason: Option<String>,
    pub daily_cost_used: f64,
    pub daily_cost_limit: Option<f64>,
    pub monthly_cost_used: f64,
    pub monthly_cost_limit: Option<f64>,
    pub daily_tokens_used: i64,
    pub daily_token_limit: Option<i64>,
    pub monthly_tokens_used: i64,
    pub monthly_token_limit: Option<i64>,
}

/// Alert for one (dimension, period) at or past the configured threshold.
#[derive(Debug, Clone, Serialize)]
pub struct QuotaAlert {
    /// "cost" or "tokens".
    pub alert_type: &'static str,
    /// "daily" or "monthly".
    pub period: &'static str,
    pub current_value: f64,
    pub limit_value: f64,
    pub percent_used: f64,
    pub threshold_percent: u8,
    pub is_exceeded: bool,
}

/// One completed assistant turn's accounting.
#[derive(Debug, Clone, Serialize)]
pub struct UsageLogEntry {
    pub id: String,
    pub assistant_id: Option<String>,
    pub conversation_id: Option<String>,
    pub message_id: Option<String>,
    pub model: String,
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub cost_usd: f64,
    pub created_at: String,
}
