use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::id::Id;
use super::rates::Rates;

/// A single entry in a user's append-only usage log. Every debit the billing
/// pipeline makes is recorded here; other actions (e.g. recharges) are
/// written elsewhere but must round-trip through this same column.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEntry {
    pub action: String,
    pub task_id: Option<Id>,
    pub shard_id: Option<Id>,
    #[serde(rename = "sid", default, skip_serializing_if = "Option::is_none")]
    pub server_id: Option<Id>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub success: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fail: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sent: Option<i64>,
    pub amount: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_credits: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_credits: Option<f64>,
    pub ts: DateTime<Utc>,
    #[serde(flatten, default)]
    pub detail: serde_json::Map<String, JsonValue>,
}

#[derive(Debug, Clone, Serialize)]
pub struct UserData {
    pub user_id: Id,
    pub credits: f64,
    pub usage: Vec<UsageEntry>,
    pub inbox: Vec<JsonValue>,
    pub stats: Vec<JsonValue>,
    pub rates: Option<Rates>,
    pub admin_rate_set_by: Option<String>,
}
