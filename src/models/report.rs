use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::id::Id;

/// The durable, at-most-once billing record for a shard. `shard_id` carries a
/// uniqueness constraint at the database level -- that constraint, not any
/// in-process check, is the idempotency anchor for the whole billing
/// pipeline (see the RBP transaction).
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub report_id: i64,
    pub shard_id: Id,
    pub server_id: Option<Id>,
    pub user_id: Id,
    pub success: i64,
    pub fail: i64,
    pub sent: i64,
    pub credits: f64,
    pub detail: JsonValue,
    pub ts: DateTime<Utc>,
}

/// The result a worker reports for a shard it ran.
#[derive(Debug, Clone, Deserialize)]
pub struct ShardResult {
    pub shard_id: Id,
    pub success: i64,
    pub fail: i64,
    pub sent: i64,
    #[serde(default)]
    pub detail: JsonValue,
}
