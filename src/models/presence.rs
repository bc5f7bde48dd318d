use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::Id;

/// Ephemeral, cache-resident record of a connected worker. Never persisted
/// to the state store -- a worker that reconnects is a fresh `WorkerInfo`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerInfo {
    pub server_id: Id,
    pub server_name: String,
    pub registered_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub ready: bool,
}

/// A server's current in-flight shard count, used by the dispatcher to
/// prefer lightly-loaded workers.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct WorkerLoad {
    pub in_flight: i64,
}
