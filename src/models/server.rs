use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerStatus {
    Connected,
    Available,
    Disconnected,
}

impl ServerStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServerStatus::Connected => "connected",
            ServerStatus::Available => "available",
            ServerStatus::Disconnected => "disconnected",
        }
    }
}

impl std::str::FromStr for ServerStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "connected" => Ok(Self::Connected),
            "available" => Ok(Self::Available),
            "disconnected" => Ok(Self::Disconnected),
            other => Err(format!("unknown server status: {other}")),
        }
    }
}

/// The durable record of a worker server. `clients_count`/`status`/`last_seen`
/// are kept in sync with the ephemeral presence tracked by the cache layer so
/// that the server list survives a restart of the cache backend.
#[derive(Debug, Clone, Serialize)]
pub struct Server {
    pub server_id: Id,
    pub server_name: String,
    pub server_url: Option<String>,
    pub clients_count: i32,
    pub status: ServerStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub registered_at: DateTime<Utc>,
    pub meta: JsonValue,
    pub assigned_user: Option<Id>,
    pub assigned_by_admin: Option<String>,
}
