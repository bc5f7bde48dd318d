//! JSON frame shapes for the two long-lived channel protocols (§6): the
//! worker control channel (`/ws/worker`) and the observer channel
//! (`/ws/observer`). Both are message-framed JSON over a websocket.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::models::id::Id;

/// Every client→server frame on either channel: `{action, data}`.
#[derive(Debug, Deserialize)]
pub struct ClientFrame {
    pub action: String,
    #[serde(default)]
    pub data: JsonValue,
}

#[derive(Debug, Deserialize)]
pub struct RegisterData {
    pub server_id: Id,
    pub server_name: String,
    #[serde(default)]
    pub meta: JsonValue,
}

impl RegisterData {
    pub fn ready(&self) -> bool {
        self.meta
            .get("ready")
            .and_then(JsonValue::as_bool)
            .unwrap_or(false)
    }
}

#[derive(Debug, Deserialize)]
pub struct ReadyData {
    pub ready: bool,
}

#[derive(Debug, Deserialize, Default)]
pub struct HeartbeatData {
    #[serde(default)]
    pub clients_count: i32,
}

#[derive(Debug, Deserialize)]
pub struct ShardResultData {
    pub shard_id: Id,
    #[serde(default)]
    pub task_id: Option<Id>,
    pub user_id: Id,
    pub success: i64,
    pub fail: i64,
    #[serde(default)]
    pub detail: JsonValue,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeUserData {
    pub user_id: Id,
}

#[derive(Debug, Deserialize)]
pub struct SubscribeTaskData {
    pub task_id: Id,
}

#[derive(Debug, Deserialize)]
pub struct UnsubscribeTaskData {
    pub task_id: Id,
}

/// A shard pushed to a worker for execution.
#[derive(Debug, Clone, Serialize)]
pub struct ShardPayload {
    pub shard_id: Id,
    pub task_id: Id,
    pub user_id: Id,
    pub phones: Vec<String>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

/// Server→worker frames (§6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerServerMessage {
    Registered {
        server_id: Id,
        ok: bool,
    },
    ReadyAck {
        server_id: Id,
        ready: bool,
        ok: bool,
    },
    HeartbeatAck {
        ok: bool,
    },
    ShardRun {
        shard: ShardPayload,
    },
    ShardResultAck {
        shard_id: Id,
        ok: bool,
        deducted: bool,
    },
    SuperAdminCommand {
        action: String,
        params: JsonValue,
        command_id: String,
    },
    Error {
        message: String,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ShardCountsView {
    pub pending: i64,
    pub running: i64,
    pub done: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ResultTotalsView {
    pub success: i64,
    pub fail: i64,
    pub sent: i64,
}

/// Server→observer frames (§4.4, §6).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ObserverServerMessage {
    UserSubscribed {
        user_id: Id,
    },
    Subscribed {
        task_id: Id,
    },
    Unsubscribed {
        task_id: Id,
    },
    ServersList {
        servers: Vec<JsonValue>,
    },
    ServersListUpdate {
        servers: Vec<JsonValue>,
    },
    TaskUpdate {
        task_id: Id,
        status: String,
        shards: ShardCountsView,
        result: ResultTotalsView,
        #[serde(skip_serializing_if = "Option::is_none")]
        credits: Option<f64>,
        completed: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        trace_id: Option<String>,
    },
    BalanceUpdate {
        user_id: Id,
        credits: f64,
    },
    UsageUpdate {
        user_id: Id,
        entry: JsonValue,
    },
    InboxUpdate {
        user_id: Id,
        item: JsonValue,
    },
    ServerUpdate {
        server: JsonValue,
    },
    Pong,
    Error {
        message: String,
    },
}
