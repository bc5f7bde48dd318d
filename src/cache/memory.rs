use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value as JsonValue};

use super::{CacheBackend, LockGuard};
use crate::config::CacheSettings;
use crate::models::id::Id;
use crate::models::presence::{WorkerInfo, WorkerLoad};

struct Lock {
    token: String,
    expires_at: Instant,
}

/// The in-process fallback backend. Mirrors the key semantics of
/// `RedisBackend` (TTLs, lock tokens) using ordinary locked maps, so that
/// degrading to it changes *where* state lives, not *what* the contract
/// guarantees.
pub struct MemoryBackend {
    presence_ttl: Duration,
    workers: Mutex<HashMap<Id, (WorkerInfo, Instant)>>,
    loads: Mutex<HashMap<Id, (i64, Instant)>>,
    locks: Mutex<HashMap<String, Lock>>,
    progress: Mutex<HashMap<Id, JsonValue>>,
}

impl MemoryBackend {
    pub fn new(settings: &CacheSettings) -> Self {
        Self {
            presence_ttl: Duration::from_secs(settings.presence_ttl_seconds),
            workers: Mutex::new(HashMap::new()),
            loads: Mutex::new(HashMap::new()),
            locks: Mutex::new(HashMap::new()),
            progress: Mutex::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl CacheBackend for MemoryBackend {
    async fn worker_online(&self, info: &WorkerInfo) -> anyhow::Result<()> {
        self.workers
            .lock()
            .unwrap()
            .insert(info.server_id.clone(), (info.clone(), Instant::now()));
        Ok(())
    }

    async fn update_heartbeat(&self, server_id: &Id, now: DateTime<Utc>) -> anyhow::Result<()> {
        let mut workers = self.workers.lock().unwrap();
        if let Some((info, seen)) = workers.get_mut(server_id) {
            info.last_heartbeat = now;
            *seen = Instant::now();
        }
        Ok(())
    }

    async fn worker_offline(&self, server_id: &Id) -> anyhow::Result<()> {
        self.workers.lock().unwrap().remove(server_id);
        self.loads.lock().unwrap().remove(server_id);
        Ok(())
    }

    async fn get_online_workers(&self) -> anyhow::Result<Vec<Id>> {
        let ttl = self.presence_ttl;
        let workers = self.workers.lock().unwrap();
        Ok(workers
            .iter()
            .filter(|(_, (_, seen))| seen.elapsed() < ttl)
            .map(|(id, _)| id.clone())
            .collect())
    }

    async fn get_worker_info(&self, server_id: &Id) -> anyhow::Result<Option<WorkerInfo>> {
        let workers = self.workers.lock().unwrap();
        Ok(workers
            .get(server_id)
            .filter(|(_, seen)| seen.elapsed() < self.presence_ttl)
            .map(|(info, _)| info.clone()))
    }

    async fn incr_worker_load(&self, server_id: &Id) -> anyhow::Result<i64> {
        let mut loads = self.loads.lock().unwrap();
        let entry = loads
            .entry(server_id.clone())
            .or_insert((0, Instant::now()));
        entry.0 += 1;
        entry.1 = Instant::now();
        Ok(entry.0)
    }

    async fn decr_worker_load(&self, server_id: &Id) -> anyhow::Result<i64> {
        let mut loads = self.loads.lock().unwrap();
        let entry = loads
            .entry(server_id.clone())
            .or_insert((0, Instant::now()));
        entry.0 = (entry.0 - 1).max(0);
        entry.1 = Instant::now();
        Ok(entry.0)
    }

    async fn get_worker_load(&self, server_id: &Id) -> anyhow::Result<WorkerLoad> {
        let loads = self.loads.lock().unwrap();
        Ok(WorkerLoad {
            in_flight: loads.get(server_id).map(|(n, _)| *n).unwrap_or(0),
        })
    }

    async fn acquire_lock(&self, name: &str, ttl: Duration) -> anyhow::Result<Option<LockGuard>> {
        let mut locks = self.locks.lock().unwrap();
        if let Some(existing) = locks.get(name) {
            if existing.expires_at > Instant::now() {
                return Ok(None);
            }
        }
        let token = Id::generate().to_string();
        locks.insert(
            name.to_owned(),
            Lock {
                token: token.clone(),
                expires_at: Instant::now() + ttl,
            },
        );
        Ok(Some(LockGuard {
            name: name.to_owned(),
            token,
        }))
    }

    async fn release_lock(&self, guard: &LockGuard) -> anyhow::Result<()> {
        let mut locks = self.locks.lock().unwrap();
        if locks.get(&guard.name).map(|l| &l.token) == Some(&guard.token) {
            locks.remove(&guard.name);
        }
        Ok(())
    }

    async fn cleanup_expired(&self) -> anyhow::Result<()> {
        let now = Instant::now();
        self.locks.lock().unwrap().retain(|_, l| l.expires_at > now);
        let ttl = self.presence_ttl;
        self.workers
            .lock()
            .unwrap()
            .retain(|_, (_, seen)| seen.elapsed() < ttl);
        Ok(())
    }

    async fn cache_task_progress(&self, task_id: &Id, progress: JsonValue) -> anyhow::Result<()> {
        self.progress
            .lock()
            .unwrap()
            .insert(task_id.clone(), progress);
        Ok(())
    }

    async fn get_task_progress(&self, task_id: &Id) -> anyhow::Result<Option<JsonValue>> {
        Ok(self.progress.lock().unwrap().get(task_id).cloned())
    }

    async fn get_stats(&self) -> anyhow::Result<JsonValue> {
        Ok(json!({
            "backend": "memory",
            "online_workers": self.workers.lock().unwrap().len(),
            "held_locks": self.locks.lock().unwrap().len(),
        }))
    }
}
