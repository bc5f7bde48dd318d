//! Worker Channel Hub (WCH): one long-lived bidirectional channel per
//! connected worker (§4.1). Grounded in `original_source/api.py::
//! worker_websocket`'s connection loop -- register/ready/heartbeat/
//! shard_result handling, the 90s receive timeout, and the 3s send timeout
//! before evicting a peer.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use chrono::Utc;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::config::settings;
use crate::context::AppContext;
use crate::models::id::Id;
use crate::models::presence::WorkerInfo;
use crate::models::server::ServerStatus;
use crate::rbp;
use crate::repo;
use crate::wire::{
    HeartbeatData, ReadyData, RegisterData, ShardPayload, ShardResultData, WorkerServerMessage,
};

const RECV_TIMEOUT: Duration = Duration::from_secs(90);
const SEND_TIMEOUT: Duration = Duration::from_secs(3);
const IDLE_CHECK_INTERVAL: Duration = Duration::from_secs(5);

struct WorkerHandle {
    tx: mpsc::Sender<Message>,
    ready: bool,
}

/// The live registry of connected workers: `server_id -> channel handle`.
/// At most one entry per `server_id` -- a new registration supersedes and
/// closes any prior one (§3 ownership rule).
#[derive(Default)]
pub struct WorkerRegistry {
    workers: Mutex<HashMap<Id, WorkerHandle>>,
}

#[derive(Debug, thiserror::Error)]
pub enum PushError {
    #[error("worker not connected")]
    NotConnected,
    #[error("send to worker timed out")]
    Timeout,
    #[error("worker channel closed")]
    Closed,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_connected(&self, server_id: &Id) -> bool {
        self.workers.lock().unwrap().contains_key(server_id)
    }

    pub fn ready_ids(&self) -> Vec<Id> {
        self.workers
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, h)| h.ready)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Pushes a shard to `server_id`. Looks up the channel under a short
    /// critical section, then sends outside the lock -- a slow peer must
    /// never stall other workers' registry operations (§9).
    pub async fn push_shard(&self, server_id: &Id, shard: ShardPayload) -> Result<(), PushError> {
        let tx = {
            let guard = self.workers.lock().unwrap();
            guard.get(server_id).map(|h| h.tx.clone())
        };
        let Some(tx) = tx else {
            return Err(PushError::NotConnected);
        };
        let frame = serde_json::to_string(&WorkerServerMessage::ShardRun { shard })
            .expect("shard_run message serializes");
        tokio::time::timeout(SEND_TIMEOUT, tx.send(Message::Text(frame)))
            .await
            .map_err(|_| PushError::Timeout)?
            .map_err(|_| PushError::Closed)
    }

    fn insert(&self, server_id: Id, handle: WorkerHandle) -> Option<mpsc::Sender<Message>> {
        let mut guard = self.workers.lock().unwrap();
        let prior = guard.insert(server_id, handle);
        prior.map(|h| h.tx)
    }

    fn set_ready(&self, server_id: &Id, ready: bool) {
        if let Some(handle) = self.workers.lock().unwrap().get_mut(server_id) {
            handle.ready = ready;
        }
    }

    fn remove(&self, server_id: &Id) {
        self.workers.lock().unwrap().remove(server_id);
    }
}

pub async fn ws_handler(ws: WebSocket, ctx: AppContext) {
    let (mut sink, mut stream) = ws.split();
    let (tx, mut rx) = mpsc::channel::<Message>(32);

    let mut server_id: Option<Id> = None;
    let mut last_inbound = Instant::now();
    let mut idle_check = tokio::time::interval(IDLE_CHECK_INTERVAL);

    loop {
        tokio::select! {
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        handle_inbound(&text, &mut server_id, &tx, &ctx).await;
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
                    tracing::info!(server_id = ?server_id, "worker channel idle timeout, closing");
                    break;
                }
            }
        }
    }

    if let Some(server_id) = server_id {
        disconnect_cleanup(&server_id, &ctx).await;
    }
}

async fn handle_inbound(
    text: &str,
    server_id: &mut Option<Id>,
    tx: &mpsc::Sender<Message>,
    ctx: &AppContext,
) {
    let value: serde_json::Value = match serde_json::from_str(text) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(error = %err, "malformed worker frame");
            return;
        }
    };

    // Most frames carry an {action, data} envelope (§6). `super_admin_response`
    // is the one exception: it arrives top-level, shaped `{type, command_id,
    // success, message, logs}`, and is forwarded to observers verbatim.
    if let Some(action) = value.get("action").and_then(serde_json::Value::as_str) {
        let data = value
            .get("data")
            .cloned()
            .unwrap_or(serde_json::Value::Null);
        match action {
            "register" => handle_register(data, server_id, tx, ctx).await,
            "ready" => handle_ready(data, server_id, tx, ctx).await,
            "heartbeat" => handle_heartbeat(data, server_id, tx, ctx).await,
            "shard_result" => handle_shard_result(data, server_id, tx, ctx).await,
            "shard_run_ack" => { /* observability only */ }
            other => tracing::debug!(action = other, "unhandled worker action"),
        }
        return;
    }

    if value.get("type").and_then(serde_json::Value::as_str) == Some("super_admin_response") {
        ctx.sh().forward_opaque(value);
    }
}

async fn handle_register(
    data: serde_json::Value,
    server_id: &mut Option<Id>,
    tx: &mpsc::Sender<Message>,
    ctx: &AppContext,
) {
    let Ok(register) = serde_json::from_value::<RegisterData>(data) else {
        let _ = tx.send(Message::Close(None)).await;
        return;
    };

    let ready = register.ready();
    let new_id = register.server_id.clone();

    if let Some(prior_tx) = ctx.wch().insert(
        new_id.clone(),
        WorkerHandle {
            tx: tx.clone(),
            ready,
        },
    ) {
        let _ = prior_tx.send(Message::Close(None)).await;
    }
    *server_id = Some(new_id.clone());

    let _ = ctx
        .cache()
        .worker_online(&WorkerInfo {
            server_id: new_id.clone(),
            server_name: register.server_name.clone(),
            registered_at: Utc::now(),
            last_heartbeat: Utc::now(),
            ready,
        })
        .await;

    let status = if ready {
        ServerStatus::Connected
    } else {
        ServerStatus::Available
    };
    if let Err(err) =
        repo::servers::upsert_registration(ctx.db(), &new_id, &register.server_name, None).await
    {
        tracing::warn!(error = %err, "failed to persist server registration");
    }
    let _ = repo::servers::mark_status(ctx.db(), &new_id, status).await;
    if !matches!(register.meta, serde_json::Value::Null) {
        let _ = repo::servers::set_meta(ctx.db(), &new_id, register.meta).await;
    }

    let ack = WorkerServerMessage::Registered {
        server_id: new_id,
        ok: true,
    };
    send_ack(tx, ack).await;

    ctx.sh().broadcast_servers_list_update(ctx).await;
}

async fn handle_ready(
    data: serde_json::Value,
    server_id: &Option<Id>,
    tx: &mpsc::Sender<Message>,
    ctx: &AppContext,
) {
    let (Some(server_id), Ok(ready)) =
        (server_id.clone(), serde_json::from_value::<ReadyData>(data))
    else {
        return;
    };

    ctx.wch().set_ready(&server_id, ready.ready);
    if let Some(mut info) = ctx
        .cache()
        .get_worker_info(&server_id)
        .await
        .unwrap_or(None)
    {
        info.ready = ready.ready;
        let _ = ctx.cache().worker_online(&info).await;
    }
    let status = if ready.ready {
        ServerStatus::Connected
    } else {
        ServerStatus::Available
    };
    let _ = repo::servers::mark_status(ctx.db(), &server_id, status).await;

    send_ack(
        tx,
        WorkerServerMessage::ReadyAck {
            server_id: server_id.clone(),
            ready: ready.ready,
            ok: true,
        },
    )
    .await;

    ctx.sh().broadcast_servers_list_update(ctx).await;
}

async fn handle_heartbeat(
    data: serde_json::Value,
    server_id: &Option<Id>,
    tx: &mpsc::Sender<Message>,
    ctx: &AppContext,
) {
    let Some(server_id) = server_id.clone() else {
        return;
    };
    let heartbeat: HeartbeatData = serde_json::from_value(data).unwrap_or_default();

    let _ = ctx.cache().update_heartbeat(&server_id, Utc::now()).await;
    let _ = sqlx::query(
        "UPDATE servers SET last_seen = NOW(), clients_count = $2 WHERE server_id = $1",
    )
    .bind(&server_id)
    .bind(heartbeat.clients_count)
    .execute(ctx.db())
    .await;

    send_ack(tx, WorkerServerMessage::HeartbeatAck { ok: true }).await;
}

async fn handle_shard_result(
    data: serde_json::Value,
    server_id: &Option<Id>,
    tx: &mpsc::Sender<Message>,
    ctx: &AppContext,
) {
    let Some(server_id) = server_id.clone() else {
        return;
    };
    let Ok(result) = serde_json::from_value::<ShardResultData>(data) else {
        return;
    };

    let shard_id = result.shard_id.clone();
    let outcome = rbp::apply_shard_result(
        ctx.db(),
        ctx.cache(),
        &settings().rates,
        &server_id,
        crate::models::report::ShardResult {
            shard_id: shard_id.clone(),
            success: result.success,
            fail: result.fail,
            sent: result.success + result.fail,
            detail: result.detail,
        },
    )
    .await;

    let deducted = match &outcome {
        Ok(billed) => billed.deducted,
        Err(err) => {
            tracing::error!(error = %err, shard_id = %shard_id, "failed to apply shard result");
            false
        }
    };

    send_ack(
        tx,
        WorkerServerMessage::ShardResultAck {
            shard_id: shard_id.clone(),
            ok: outcome.is_ok(),
            deducted,
        },
    )
    .await;

    if let Ok(billed) = outcome {
        ctx.sh()
            .emit_task_update_for_shard(ctx, &shard_id, billed.deducted, billed.task_done)
            .await;
    }
}

async fn send_ack(tx: &mpsc::Sender<Message>, msg: WorkerServerMessage) {
    if let Ok(text) = serde_json::to_string(&msg) {
        let _ = tx.send(Message::Text(text)).await;
    }
}

async fn disconnect_cleanup(server_id: &Id, ctx: &AppContext) {
    ctx.wch().remove(server_id);
    let _ = ctx.cache().worker_offline(server_id).await;
    let _ = repo::servers::mark_status(ctx.db(), server_id, ServerStatus::Disconnected).await;
    ctx.sh().broadcast_servers_list_update(ctx).await;
    tracing::info!(server_id = %server_id, "worker disconnected");
}
