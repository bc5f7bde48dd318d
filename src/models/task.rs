use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::id::Id;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Pending,
    Running,
    Done,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Done => "done",
        }
    }
}

impl std::str::FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            other => Err(format!("unknown task status: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Task {
    pub task_id: Id,
    pub user_id: Id,
    pub message: String,
    pub total: i64,
    pub count: i64,
    pub status: TaskStatus,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
}

/// Input to task creation. `numbers` is split into shards by the dispatcher;
/// an empty list is a valid, immediately-`done` task (§9 boundary case).
#[derive(Debug, Clone, Deserialize)]
pub struct NewTask {
    pub user_id: Id,
    pub message: String,
    pub numbers: Vec<String>,
    pub count: i64,
}
