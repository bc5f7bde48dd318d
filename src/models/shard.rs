use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use super::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShardStatus {
    Pending,
    Running,
    Done,
}

impl ShardStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ShardStatus::Pending => "pending",
            ShardStatus::Running => "running",
            ShardStatus::Done => "done",
        }
    }
}

impl std::str::FromStr for ShardStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown shard status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Shard {
    pub shard_id: Id,
    pub task_id: Id,
    pub server_id: Option<Id>,
    pub phones: Vec<String>,
    pub status: ShardStatus,
    pub attempts: i32,
    pub locked_at: Option<DateTime<Utc>>,
    pub updated: DateTime<Utc>,
    pub result: JsonValue,
}
