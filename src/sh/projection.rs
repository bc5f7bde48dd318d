//! Server List Projection (§4.5): merges the durable `servers` table with
//! the cache's live `OnlineWorker` membership into the view observers see.

use chrono::Utc;
use serde_json::json;

use crate::config::settings;
use crate::context::AppContext;
use crate::models::server::{Server, ServerStatus};

pub async fn build(ctx: &AppContext) -> Vec<serde_json::Value> {
    let Ok(servers) = crate::repo::servers::fetch_all(ctx.db()).await else {
        return Vec::new();
    };

    let online = ctx.cache().get_online_workers().await.unwrap_or_default();
    let offline_after = chrono::Duration::seconds(settings().cache.offline_after_seconds as i64);
    let hide_after = chrono::Duration::hours(1);
    let now = Utc::now();

    let mut views = Vec::with_capacity(servers.len());
    for server in servers {
        if let Some(last_seen) = server.last_seen {
            if now - last_seen > hide_after {
                continue;
            }
        }
        views.push(project_one(ctx, server, &online, offline_after, now).await);
    }
    views
}

async fn project_one(
    ctx: &AppContext,
    server: Server,
    online: &[crate::models::id::Id],
    offline_after: chrono::Duration,
    now: chrono::DateTime<Utc>,
) -> serde_json::Value {
    let status = if online.contains(&server.server_id) {
        match ctx.cache().get_worker_info(&server.server_id).await {
            Ok(Some(info)) if !info.ready => ServerStatus::Available,
            _ => ServerStatus::Connected,
        }
    } else if server
        .last_seen
        .map(|seen| now - seen > offline_after)
        .unwrap_or(true)
    {
        ServerStatus::Disconnected
    } else if server.clients_count > 0 {
        ServerStatus::Connected
    } else {
        ServerStatus::Available
    };

    let load = ctx
        .cache()
        .get_worker_load(&server.server_id)
        .await
        .map(|l| l.in_flight)
        .unwrap_or(0);

    json!({
        "server_id": server.server_id,
        "server_name": server.server_name,
        "server_url": server.server_url,
        "clients_count": server.clients_count,
        "status": status.as_str(),
        "last_seen": server.last_seen,
        "load": load,
        "assigned_user": server.assigned_user,
    })
}
