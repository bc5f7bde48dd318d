//! Subscriber Hub (SH): long-lived channels to observer clients (end-user
//! and admin UIs), fanning out task/balance/usage/server events (§4.4).
//! Grounded in `original_source/api.py::frontend_websocket`'s connection
//! loop and the original's per-user/per-task subscriber maps.

mod projection;

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use serde_json::Value as JsonValue;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::context::AppContext;
use crate::models::id::Id;
use crate::wire::{ObserverServerMessage, ResultTotalsView, ShardCountsView};

const RECV_TIMEOUT: Duration = Duration::from_secs(90);
const SEND_TIMEOUT: Duration = Duration::from_secs(3);
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

struct ObserverConn {
    tx: mpsc::Sender<Message>,
    user_id: Option<Id>,
}

/// Two indexes over the same set of live observer channels: by subscribed
/// user (a channel subscribes to at most one user) and by subscribed task
/// (a channel may subscribe to many tasks) (§4.4).
#[derive(Default)]
pub struct Sh {
    conns: Mutex<HashMap<u64, ObserverConn>>,
    by_user: Mutex<HashMap<Id, HashSet<u64>>>,
    by_task: Mutex<HashMap<Id, HashSet<u64>>>,
    next_id: AtomicU64,
}

impl Sh {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&self, tx: mpsc::Sender<Message>) -> u64 {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.conns
            .lock()
            .unwrap()
            .insert(id, ObserverConn { tx, user_id: None });
        id
    }

    /// Removes a channel from every index. Called both on disconnect and
    /// whenever a write to it fails (§4.4 fan-out eviction).
    fn unregister(&self, id: u64) {
        self.conns.lock().unwrap().remove(&id);
        let mut by_user = self.by_user.lock().unwrap();
        by_user.retain(|_, set| {
            set.remove(&id);
            !set.is_empty()
        });
        let mut by_task = self.by_task.lock().unwrap();
        by_task.retain(|_, set| {
            set.remove(&id);
            !set.is_empty()
        });
    }

    fn subscribe_user(&self, id: u64, user_id: Id) {
        let mut conns = self.conns.lock().unwrap();
        if let Some(conn) = conns.get_mut(&id) {
            if let Some(prior) = conn.user_id.take() {
                if let Some(set) = self.by_user.lock().unwrap().get_mut(&prior) {
                    set.remove(&id);
                }
            }
            conn.user_id = Some(user_id.clone());
        }
        drop(conns);
        self.by_user
            .lock()
            .unwrap()
            .entry(user_id)
            .or_default()
            .insert(id);
    }

    fn subscribe_task(&self, id: u64, task_id: Id) {
        self.by_task
            .lock()
            .unwrap()
            .entry(task_id)
            .or_default()
            .insert(id);
    }

    fn unsubscribe_task(&self, id: u64, task_id: &Id) {
        if let Some(set) = self.by_task.lock().unwrap().get_mut(task_id) {
            set.remove(&id);
        }
    }

    fn send_to(&self, id: u64, msg: &ObserverServerMessage) {
        let tx = self.conns.lock().unwrap().get(&id).map(|c| c.tx.clone());
        let Some(tx) = tx else { return };
        let Ok(text) = serde_json::to_string(msg) else {
            return;
        };
        if tx.try_send(Message::Text(text)).is_err() {
            self.unregister(id);
        }
    }

    fn send_raw_to(&self, id: u64, text: &str) {
        let tx = self.conns.lock().unwrap().get(&id).map(|c| c.tx.clone());
        let Some(tx) = tx else { return };
        if tx.try_send(Message::Text(text.to_owned())).is_err() {
            self.unregister(id);
        }
    }

    fn emit_to_user(&self, user_id: &Id, msg: &ObserverServerMessage) {
        let ids: Vec<u64> = self
            .by_user
            .lock()
            .unwrap()
            .get(user_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        for id in ids {
            self.send_to(id, msg);
        }
    }

    /// Emits to task subscribers, falling back to the task owner's
    /// user-level subscribers if none exist (§4.4, §9, invariant 6).
    fn emit_to_task_or_owner(&self, task_id: &Id, owner_user_id: &Id, msg: &ObserverServerMessage) {
        let ids: Vec<u64> = self
            .by_task
            .lock()
            .unwrap()
            .get(task_id)
            .map(|s| s.iter().copied().collect())
            .unwrap_or_default();
        if ids.is_empty() {
            self.emit_to_user(owner_user_id, msg);
            return;
        }
        for id in ids {
            self.send_to(id, msg);
        }
    }

    fn broadcast(&self, msg: &ObserverServerMessage) {
        let ids: Vec<u64> = self.conns.lock().unwrap().keys().copied().collect();
        for id in ids {
            self.send_to(id, msg);
        }
    }

    /// Forwards a `super_admin_response` frame from a worker unchanged to
    /// every observer channel (§4.1, §6).
    pub fn forward_opaque(&self, value: JsonValue) {
        let Ok(text) = serde_json::to_string(&value) else {
            return;
        };
        let ids: Vec<u64> = self.conns.lock().unwrap().keys().copied().collect();
        for id in ids {
            self.send_raw_to(id, &text);
        }
    }

    /// Emits an event to a user's subscribers from outside the hub (HTTP
    /// controllers: admin deduct, inbox push).
    pub fn emit_to_user_public(&self, user_id: &Id, msg: &ObserverServerMessage) {
        self.emit_to_user(user_id, msg);
    }

    pub async fn broadcast_servers_list_update(&self, ctx: &AppContext) {
        let servers = projection::build(ctx).await;
        self.broadcast(&ObserverServerMessage::ServersListUpdate { servers });
    }

    /// Builds and emits the `task_update` (and, when this call was the one
    /// that debited credits, `balance_update`/`usage_update`) for a shard
    /// that just finished (§4.3 post-commit step).
    pub async fn emit_task_update_for_shard(
        &self,
        ctx: &AppContext,
        shard_id: &Id,
        deducted: bool,
        task_done: bool,
    ) {
        let Ok(shard) = crate::repo::shards::fetch_one(ctx.db(), shard_id).await else {
            return;
        };
        let (task_id, owner) = {
            let Ok(task) = crate::repo::tasks::fetch_one(ctx.db(), &shard.task_id).await else {
                return;
            };
            (task.task_id, task.user_id)
        };

        // Only a winning (non-duplicate) billing debit has a new balance to
        // report; fetch it once and thread it into both the task_update's
        // `credits` field and the balance/usage fan-out below.
        let user = if deducted {
            crate::repo::users::fetch(ctx.db(), &owner).await.ok()
        } else {
            None
        };

        let new_credits = user.as_ref().map(|u| u.credits);
        let Some(snapshot) =
            build_task_update(ctx, &shard.task_id, None, task_done, new_credits).await
        else {
            return;
        };
        self.emit_to_task_or_owner(&task_id, &owner, &snapshot);

        if let Some(user) = user {
            self.emit_to_user(
                &owner,
                &ObserverServerMessage::BalanceUpdate {
                    user_id: owner.clone(),
                    credits: user.credits,
                },
            );
            if let Some(entry) = user.usage.last() {
                self.emit_to_user(
                    &owner,
                    &ObserverServerMessage::UsageUpdate {
                        user_id: owner.clone(),
                        entry: serde_json::to_value(entry).unwrap_or(JsonValue::Null),
                    },
                );
            }
        }
    }
}

/// Computes a `task_update` snapshot straight from the state store -- used
/// both for the immediate reply to `subscribe_task` (closing the
/// late-subscriber race, §4.4) and for post-billing fan-out.
async fn build_task_update(
    ctx: &AppContext,
    task_id: &Id,
    trace_id: Option<String>,
    completed_hint: bool,
    credits: Option<f64>,
) -> Option<ObserverServerMessage> {
    let task = crate::repo::tasks::fetch_one(ctx.db(), task_id)
        .await
        .ok()?;
    let counts = crate::repo::shards::counts_for_task(ctx.db(), task_id)
        .await
        .unwrap_or_default();
    let totals = crate::repo::reports::totals_for_task(ctx.db(), task_id)
        .await
        .unwrap_or_default();

    let completed = completed_hint || task.status == crate::models::task::TaskStatus::Done;

    Some(ObserverServerMessage::TaskUpdate {
        task_id: task.task_id,
        status: task.status.as_str().to_owned(),
        shards: ShardCountsView {
            pending: counts.pending,
            running: counts.running,
            done: counts.done,
            total: counts.total,
        },
        result: ResultTotalsView {
            success: totals.success,
            fail: totals.fail,
            sent: totals.sent,
        },
        credits,
        completed,
        trace_id,
    })
}

pub async fn ws_handler(ws: WebSocket, ctx: AppContext) {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Message>(32);
    let id = ctx.sh().register(tx.clone());

    let mut last_inbound = Instant::now();
    let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        handle_inbound(&text, id, &ctx).await;
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_))) => {
                        last_inbound = Instant::now();
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                    Some(Ok(Message::Binary(_))) => {}
                }
            }
            Some(out) = rx.recv() => {
                if tokio::time::timeout(SEND_TIMEOUT, sink.send(out)).await.is_err() {
                    break;
                }
            }
            _ = idle_check.tick() => {
                if last_inbound.elapsed() > RECV_TIMEOUT {
                    break;
                }
            }
        }
    }

    ctx.sh().unregister(id);
}

async fn handle_inbound(text: &str, id: u64, ctx: &AppContext) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(error = %err, "malformed observer frame");
            return;
        }
    };
    let Some(action) = value.get("action").and_then(serde_json::Value::as_str) else {
        return;
    };
    let data = value
        .get("data")
        .cloned()
        .unwrap_or(serde_json::Value::Null);

    match action {
        "subscribe_user" => {
            let Ok(req) = serde_json::from_value::<crate::wire::SubscribeUserData>(data) else {
                return;
            };
            ctx.sh().subscribe_user(id, req.user_id.clone());
            ctx.sh().send_to(
                id,
                &ObserverServerMessage::UserSubscribed {
                    user_id: req.user_id,
                },
            );
        }
        "subscribe_task" => {
            let Ok(req) = serde_json::from_value::<crate::wire::SubscribeTaskData>(data) else {
                return;
            };
            ctx.sh().subscribe_task(id, req.task_id.clone());
            ctx.sh().send_to(
                id,
                &ObserverServerMessage::Subscribed {
                    task_id: req.task_id.clone(),
                },
            );
            if let Some(snapshot) = build_task_update(ctx, &req.task_id, None, false, None).await {
                ctx.sh().send_to(id, &snapshot);
            }
        }
        "unsubscribe_task" => {
            let Ok(req) = serde_json::from_value::<crate::wire::UnsubscribeTaskData>(data) else {
                return;
            };
            ctx.sh().unsubscribe_task(id, &req.task_id);
            ctx.sh().send_to(
                id,
                &ObserverServerMessage::Unsubscribed {
                    task_id: req.task_id,
                },
            );
        }
        "get_servers" => {
            let servers = projection::build(ctx).await;
            ctx.sh()
                .send_to(id, &ObserverServerMessage::ServersList { servers });
        }
        "ping" => {
            ctx.sh().send_to(id, &ObserverServerMessage::Pong);
        }
        other => tracing::debug!(action = other, "unhandled observer action"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn recv_text(rx: &mut mpsc::Receiver<Message>) -> Option<String> {
        match rx.try_recv() {
            Ok(Message::Text(text)) => Some(text),
            _ => None,
        }
    }

    #[tokio::test]
    async fn emit_to_task_or_owner_prefers_task_subscribers() {
        let sh = Sh::new();
        let task_id = Id::generate();
        let owner_id = Id::generate();

        let (task_tx, mut task_rx) = mpsc::channel(8);
        let task_conn = sh.register(task_tx);
        sh.subscribe_task(task_conn, task_id.clone());

        let (owner_tx, mut owner_rx) = mpsc::channel(8);
        let owner_conn = sh.register(owner_tx);
        sh.subscribe_user(owner_conn, owner_id.clone());

        let msg = ObserverServerMessage::ServersListUpdate { servers: vec![] };
        sh.emit_to_task_or_owner(&task_id, &owner_id, &msg);

        assert!(recv_text(&mut task_rx).is_some());
        assert!(recv_text(&mut owner_rx).is_none());
    }

    #[tokio::test]
    async fn emit_to_task_or_owner_falls_back_to_owner_when_no_task_subscribers() {
        let sh = Sh::new();
        let task_id = Id::generate();
        let owner_id = Id::generate();

        let (owner_tx, mut owner_rx) = mpsc::channel(8);
        let owner_conn = sh.register(owner_tx);
        sh.subscribe_user(owner_conn, owner_id.clone());

        let msg = ObserverServerMessage::ServersListUpdate { servers: vec![] };
        sh.emit_to_task_or_owner(&task_id, &owner_id, &msg);

        assert!(recv_text(&mut owner_rx).is_some());
    }
}
