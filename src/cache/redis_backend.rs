use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use serde_json::Value as JsonValue;

use super::{CacheBackend, LockGuard};
use crate::config::CacheSettings;
use crate::models::id::Id;
use crate::models::presence::{WorkerInfo, WorkerLoad};

const ONLINE_WORKERS_SET: &str = "online_workers";
const WORKER_HASH_TTL: u64 = 30;
const LOAD_KEY_TTL: u64 = 60;

fn worker_key(server_id: &Id) -> String {
    format!("worker:{server_id}")
}

fn load_key(server_id: &Id) -> String {
    format!("worker:{server_id}:load")
}

fn lock_key(name: &str) -> String {
    format!("lock:{name}")
}

/// Releases a lock only if the stored token still matches ours, so a client
/// that outlived its TTL can't clobber someone else's lock.
const RELEASE_SCRIPT: &str = r#"
if redis.call("get", KEYS[1]) == ARGV[1] then
    return redis.call("del", KEYS[1])
else
    return 0
end
"#;

pub struct RedisBackend {
    conn: ConnectionManager,
}

impl RedisBackend {
    pub async fn connect(settings: &CacheSettings) -> Self {
        let client = redis::Client::open(settings.redis_url.clone()).expect("redis url must parse");
        let conn = ConnectionManager::new(client)
            .await
            .expect("initial redis connection");
        Self { conn }
    }
}

#[async_trait]
impl CacheBackend for RedisBackend {
    async fn worker_online(&self, info: &WorkerInfo) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(info)?;
        let key = worker_key(&info.server_id);
        let _: () = conn.set_ex(&key, payload, WORKER_HASH_TTL).await?;
        let _: () = conn
            .sadd(ONLINE_WORKERS_SET, info.server_id.as_str())
            .await?;
        Ok(())
    }

    async fn update_heartbeat(&self, server_id: &Id, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let key = worker_key(server_id);
        let raw: Option<String> = conn.get(&key).await?;
        if let Some(raw) = raw {
            let mut info: WorkerInfo = serde_json::from_str(&raw)?;
            info.last_heartbeat = now;
            let payload = serde_json::to_string(&info)?;
            let _: () = conn.set_ex(&key, payload, WORKER_HASH_TTL).await?;
        }
        Ok(())
    }

    async fn worker_offline(&self, server_id: &Id) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.del(worker_key(server_id)).await?;
        let _: () = conn.del(load_key(server_id)).await?;
        let _: () = conn.srem(ONLINE_WORKERS_SET, server_id.as_str()).await?;
        Ok(())
    }

    async fn get_online_workers(&self) -> anyhow::Result<Vec<Id>> {
        let mut conn = self.conn.clone();
        let members: Vec<String> = conn.smembers(ONLINE_WORKERS_SET).await?;
        let mut online = Vec::new();
        for member in members {
            let id = Id::from(member);
            let exists: bool = conn.exists(worker_key(&id)).await?;
            if exists {
                online.push(id);
            } else {
                // The hash expired without an explicit offline -- evict the
                // stale set membership so it doesn't accumulate forever.
                let _: () = conn.srem(ONLINE_WORKERS_SET, id.as_str()).await?;
            }
        }
        Ok(online)
    }

    async fn get_worker_info(&self, server_id: &Id) -> anyhow::Result<Option<WorkerInfo>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(worker_key(server_id)).await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn incr_worker_load(&self, server_id: &Id) -> anyhow::Result<i64> {
        let mut conn = self.conn.clone();
        let key = load_key(server_id);
        let value: i64 = conn.incr(&key, 1).await?;
        let _: () = conn.expire(&key, LOAD_KEY_TTL as i64).await?;
        Ok(value)
    }

    async fn decr_worker_load(&self, server_id: &Id) -> anyhow::Result<i64> {
        let mut conn = self.conn.clone();
        let key = load_key(server_id);
        let value: i64 = conn.incr(&key, -1).await?;
        let value = if value < 0 {
            let _: () = conn.set(&key, 0).await?;
            0
        } else {
            value
        };
        let _: () = conn.expire(&key, LOAD_KEY_TTL as i64).await?;
        Ok(value)
    }

    async fn get_worker_load(&self, server_id: &Id) -> anyhow::Result<WorkerLoad> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(load_key(server_id)).await?;
        Ok(WorkerLoad {
            in_flight: value.unwrap_or(0),
        })
    }

    async fn acquire_lock(&self, name: &str, ttl: Duration) -> anyhow::Result<Option<LockGuard>> {
        let mut conn = self.conn.clone();
        let token = Id::generate().to_string();
        let key = lock_key(name);
        let set: bool = redis::cmd("SET")
            .arg(&key)
            .arg(&token)
            .arg("NX")
            .arg("PX")
            .arg(ttl.as_millis() as u64)
            .query_async::<Option<String>>(&mut conn)
            .await?
            .is_some();
        if set {
            Ok(Some(LockGuard {
                name: name.to_owned(),
                token,
            }))
        } else {
            Ok(None)
        }
    }

    async fn release_lock(&self, guard: &LockGuard) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let script = redis::Script::new(RELEASE_SCRIPT);
        let _: i64 = script
            .key(lock_key(&guard.name))
            .arg(&guard.token)
            .invoke_async(&mut conn)
            .await?;
        Ok(())
    }

    async fn cleanup_expired(&self) -> anyhow::Result<()> {
        // Redis expires keys natively; the only cross-key bookkeeping that
        // can go stale is `online_workers` set membership, which
        // `get_online_workers` already self-heals. Nothing to do here.
        Ok(())
    }

    async fn cache_task_progress(&self, task_id: &Id, progress: JsonValue) -> anyhow::Result<()> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&progress)?;
        let _: () = conn
            .set_ex(format!("task_progress:{task_id}"), payload, 3600)
            .await?;
        Ok(())
    }

    async fn get_task_progress(&self, task_id: &Id) -> anyhow::Result<Option<JsonValue>> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(format!("task_progress:{task_id}")).await?;
        Ok(raw.map(|s| serde_json::from_str(&s)).transpose()?)
    }

    async fn get_stats(&self) -> anyhow::Result<JsonValue> {
        let mut conn = self.conn.clone();
        let online: i64 = conn.scard(ONLINE_WORKERS_SET).await?;
        Ok(serde_json::json!({
            "backend": "redis",
            "online_workers": online,
        }))
    }
}
