//! Cache/Coordinator (CC): the distributed presence, load, and locking layer
//! shared by the Worker Channel Hub and Shard Dispatcher. Backed by Redis in
//! production, with a mandatory in-memory fallback that preserves the exact
//! same contract when Redis is unreachable -- callers never see a cache
//! error, only slightly coarser guarantees (no cross-process sharing).
//!
//! Grounded in `original_source/redis_manager.py`: key names, TTLs, and the
//! reconnect-cooldown behavior below all mirror that module.

mod memory;
mod redis_backend;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;

use crate::config::CacheSettings;
use crate::models::id::Id;
use crate::models::presence::{WorkerInfo, WorkerLoad};

pub use memory::MemoryBackend;
pub use redis_backend::RedisBackend;

/// A held distributed lock. Dropping it without calling `release` leaves the
/// lock to expire on its own TTL -- callers should still release explicitly
/// on the happy path.
#[derive(Debug)]
pub struct LockGuard {
    pub name: String,
    pub token: String,
}

#[async_trait]
pub trait CacheBackend: Send + Sync {
    async fn worker_online(&self, info: &WorkerInfo) -> anyhow::Result<()>;
    async fn update_heartbeat(&self, server_id: &Id, now: DateTime<Utc>) -> anyhow::Result<()>;
    async fn worker_offline(&self, server_id: &Id) -> anyhow::Result<()>;
    async fn get_online_workers(&self) -> anyhow::Result<Vec<Id>>;
    async fn get_worker_info(&self, server_id: &Id) -> anyhow::Result<Option<WorkerInfo>>;
    async fn incr_worker_load(&self, server_id: &Id) -> anyhow::Result<i64>;
    async fn decr_worker_load(&self, server_id: &Id) -> anyhow::Result<i64>;
    async fn get_worker_load(&self, server_id: &Id) -> anyhow::Result<WorkerLoad>;
    async fn acquire_lock(&self, name: &str, ttl: Duration) -> anyhow::Result<Option<LockGuard>>;
    async fn release_lock(&self, guard: &LockGuard) -> anyhow::Result<()>;
    async fn cleanup_expired(&self) -> anyhow::Result<()>;
    async fn cache_task_progress(&self, task_id: &Id, progress: JsonValue) -> anyhow::Result<()>;
    async fn get_task_progress(&self, task_id: &Id) -> anyhow::Result<Option<JsonValue>>;
    async fn get_stats(&self) -> anyhow::Result<JsonValue>;
}

const RECONNECT_COOLDOWN: Duration = Duration::from_secs(15);
const MAX_RECONNECT_ATTEMPTS: u32 = 5;

/// Mirrors `redis_manager.py`'s `socket_timeout=5`: a primary-backend call
/// that doesn't finish within this bound is treated as unreachable, the same
/// as a connection error, so a dead Redis degrades callers to the in-memory
/// backend instead of hanging them.
const PRIMARY_CALL_TIMEOUT: Duration = Duration::from_secs(5);

/// Tracks whether the primary (Redis) backend is currently reachable, with
/// the same cooldown/attempt-budget shape as `redis_manager.py`'s
/// `_reconnect`, so a flapping Redis doesn't get hammered with reconnects.
struct Degradation {
    degraded: AtomicBool,
    attempts: AtomicU32,
    last_attempt: StdMutex<Instant>,
}

impl Degradation {
    fn new() -> Self {
        Self {
            degraded: AtomicBool::new(false),
            attempts: AtomicU32::new(0),
            last_attempt: StdMutex::new(Instant::now()),
        }
    }

    fn mark_degraded(&self) {
        self.degraded.store(true, Ordering::SeqCst);
    }

    fn should_retry(&self) -> bool {
        if !self.degraded.load(Ordering::SeqCst) {
            return false;
        }
        if self.attempts.load(Ordering::SeqCst) >= MAX_RECONNECT_ATTEMPTS {
            return false;
        }
        let mut last = self.last_attempt.lock().unwrap();
        if last.elapsed() < RECONNECT_COOLDOWN {
            return false;
        }
        *last = Instant::now();
        self.attempts.fetch_add(1, Ordering::SeqCst);
        true
    }

    fn mark_recovered(&self) {
        self.degraded.store(false, Ordering::SeqCst);
        self.attempts.store(0, Ordering::SeqCst);
    }
}

/// The Cache/Coordinator handle shared across the server. Always tries the
/// primary backend first; on any error it falls back to the in-memory
/// backend for that call and flags the primary as degraded so subsequent
/// calls skip straight to the fallback until the cooldown allows a retry.
pub struct Cache {
    primary: Box<dyn CacheBackend>,
    fallback: MemoryBackend,
    state: Degradation,
}

impl Cache {
    pub async fn connect(settings: &CacheSettings) -> Self {
        let primary = RedisBackend::connect(settings).await;
        Self {
            primary: Box::new(primary),
            fallback: MemoryBackend::new(settings),
            state: Degradation::new(),
        }
    }

    /// Builds a `Cache` backed only by the in-memory store, with no Redis
    /// involved at all. Used by the integration test harness, which doesn't
    /// run a Redis instance alongside the test database.
    pub fn memory_only(settings: &CacheSettings) -> Self {
        Self {
            primary: Box::new(MemoryBackend::new(settings)),
            fallback: MemoryBackend::new(settings),
            state: Degradation::new(),
        }
    }

    fn using_fallback(&self) -> bool {
        self.state.degraded.load(Ordering::SeqCst) && !self.state.should_retry()
    }

    fn backend(&self) -> &dyn CacheBackend {
        if self.using_fallback() {
            &self.fallback
        } else {
            self.primary.as_ref()
        }
    }

    /// Runs `fut` against the primary backend under `PRIMARY_CALL_TIMEOUT`,
    /// turning a hung Redis into a timeout error that the fallback logic
    /// below treats the same as a connection error. Calls already routed to
    /// the in-memory fallback run unbounded.
    async fn with_timeout<T>(
        used_primary: bool,
        fut: impl std::future::Future<Output = anyhow::Result<T>>,
    ) -> anyhow::Result<T> {
        if !used_primary {
            return fut.await;
        }
        match tokio::time::timeout(PRIMARY_CALL_TIMEOUT, fut).await {
            Ok(result) => result,
            Err(_) => Err(anyhow::anyhow!("primary cache backend timed out")),
        }
    }

    pub async fn worker_online(&self, info: &WorkerInfo) -> anyhow::Result<()> {
        let used_primary = !self.using_fallback();
        let result = Self::with_timeout(used_primary, self.backend().worker_online(info)).await;
        if result.is_err() && used_primary {
            tracing::warn!(error = ?result, "cache backend unreachable, degrading to in-memory");
            self.state.mark_degraded();
            return self.fallback.worker_online(info).await;
        }
        if used_primary && result.is_ok() {
            self.state.mark_recovered();
        }
        result
    }

    pub async fn update_heartbeat(&self, server_id: &Id, now: DateTime<Utc>) -> anyhow::Result<()> {
        let used_primary = !self.using_fallback();
        let result = Self::with_timeout(
            used_primary,
            self.backend().update_heartbeat(server_id, now),
        )
        .await;
        if result.is_err() && used_primary {
            self.state.mark_degraded();
            return self.fallback.update_heartbeat(server_id, now).await;
        }
        if used_primary && result.is_ok() {
            self.state.mark_recovered();
        }
        result
    }

    pub async fn worker_offline(&self, server_id: &Id) -> anyhow::Result<()> {
        let used_primary = !self.using_fallback();
        let result =
            Self::with_timeout(used_primary, self.backend().worker_offline(server_id)).await;
        if result.is_err() && used_primary {
            self.state.mark_degraded();
            return self.fallback.worker_offline(server_id).await;
        }
        if used_primary && result.is_ok() {
            self.state.mark_recovered();
        }
        result
    }

    pub async fn get_online_workers(&self) -> anyhow::Result<Vec<Id>> {
        let used_primary = !self.using_fallback();
        let result = Self::with_timeout(used_primary, self.backend().get_online_workers()).await;
        match result {
            Ok(v) => {
                if used_primary {
                    self.state.mark_recovered();
                }
                Ok(v)
            }
            Err(err) if used_primary => {
                tracing::warn!(error = %err, "cache backend unreachable, degrading to in-memory");
                self.state.mark_degraded();
                self.fallback.get_online_workers().await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_worker_info(&self, server_id: &Id) -> anyhow::Result<Option<WorkerInfo>> {
        let used_primary = !self.using_fallback();
        let result =
            Self::with_timeout(used_primary, self.backend().get_worker_info(server_id)).await;
        match result {
            Ok(v) => {
                if used_primary {
                    self.state.mark_recovered();
                }
                Ok(v)
            }
            Err(err) if used_primary => {
                tracing::warn!(error = %err, "cache backend unreachable, degrading to in-memory");
                self.state.mark_degraded();
                self.fallback.get_worker_info(server_id).await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn incr_worker_load(&self, server_id: &Id) -> anyhow::Result<i64> {
        let used_primary = !self.using_fallback();
        let result =
            Self::with_timeout(used_primary, self.backend().incr_worker_load(server_id)).await;
        match result {
            Ok(v) => {
                if used_primary {
                    self.state.mark_recovered();
                }
                Ok(v)
            }
            Err(err) if used_primary => {
                tracing::warn!(error = %err, "cache backend unreachable, degrading to in-memory");
                self.state.mark_degraded();
                self.fallback.incr_worker_load(server_id).await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn decr_worker_load(&self, server_id: &Id) -> anyhow::Result<i64> {
        let used_primary = !self.using_fallback();
        let result =
            Self::with_timeout(used_primary, self.backend().decr_worker_load(server_id)).await;
        match result {
            Ok(v) => {
                if used_primary {
                    self.state.mark_recovered();
                }
                Ok(v)
            }
            Err(err) if used_primary => {
                tracing::warn!(error = %err, "cache backend unreachable, degrading to in-memory");
                self.state.mark_degraded();
                self.fallback.decr_worker_load(server_id).await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_worker_load(&self, server_id: &Id) -> anyhow::Result<WorkerLoad> {
        let used_primary = !self.using_fallback();
        let result =
            Self::with_timeout(used_primary, self.backend().get_worker_load(server_id)).await;
        match result {
            Ok(v) => {
                if used_primary {
                    self.state.mark_recovered();
                }
                Ok(v)
            }
            Err(err) if used_primary => {
                tracing::warn!(error = %err, "cache backend unreachable, degrading to in-memory");
                self.state.mark_degraded();
                self.fallback.get_worker_load(server_id).await
            }
            Err(err) => Err(err),
        }
    }

    /// Picks the least-loaded worker among `candidates`, grounded in
    /// `redis_manager.py::get_best_worker`.
    pub async fn get_best_worker(&self, candidates: &[Id]) -> anyhow::Result<Option<Id>> {
        let mut best: Option<(Id, i64)> = None;
        for candidate in candidates {
            let load = self.get_worker_load(candidate).await?.in_flight;
            if best.as_ref().is_none_or(|(_, b)| load < *b) {
                best = Some((candidate.clone(), load));
            }
        }
        Ok(best.map(|(id, _)| id))
    }

    pub async fn acquire_lock(
        &self,
        name: &str,
        ttl: Duration,
    ) -> anyhow::Result<Option<LockGuard>> {
        let used_primary = !self.using_fallback();
        let result = Self::with_timeout(used_primary, self.backend().acquire_lock(name, ttl)).await;
        match result {
            Ok(v) => {
                if used_primary {
                    self.state.mark_recovered();
                }
                Ok(v)
            }
            Err(err) if used_primary => {
                tracing::warn!(error = %err, "cache backend unreachable, degrading to in-memory");
                self.state.mark_degraded();
                self.fallback.acquire_lock(name, ttl).await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn release_lock(&self, guard: &LockGuard) -> anyhow::Result<()> {
        let used_primary = !self.using_fallback();
        let result = Self::with_timeout(used_primary, self.backend().release_lock(guard)).await;
        if result.is_err() && used_primary {
            self.state.mark_degraded();
            return self.fallback.release_lock(guard).await;
        }
        if used_primary && result.is_ok() {
            self.state.mark_recovered();
        }
        result
    }

    /// Runs `f` while holding the named lock, releasing it afterwards
    /// regardless of outcome. Returns `Ok(None)` if the lock could not be
    /// acquired.
    pub async fn with_lock<T, F, Fut>(
        &self,
        name: &str,
        ttl: Duration,
        f: F,
    ) -> anyhow::Result<Option<T>>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = anyhow::Result<T>>,
    {
        let Some(guard) = self.acquire_lock(name, ttl).await? else {
            return Ok(None);
        };
        let result = f().await;
        self.release_lock(&guard).await?;
        result.map(Some)
    }

    pub async fn cleanup_expired(&self) -> anyhow::Result<()> {
        let used_primary = !self.using_fallback();
        let result = Self::with_timeout(used_primary, self.backend().cleanup_expired()).await;
        if result.is_err() && used_primary {
            self.state.mark_degraded();
            return self.fallback.cleanup_expired().await;
        }
        if used_primary && result.is_ok() {
            self.state.mark_recovered();
        }
        result
    }

    pub async fn cache_task_progress(
        &self,
        task_id: &Id,
        progress: JsonValue,
    ) -> anyhow::Result<()> {
        let used_primary = !self.using_fallback();
        let result = self
            .backend()
            .cache_task_progress(task_id, progress.clone())
            .await;
        if result.is_err() && used_primary {
            self.state.mark_degraded();
            return self.fallback.cache_task_progress(task_id, progress).await;
        }
        if used_primary && result.is_ok() {
            self.state.mark_recovered();
        }
        result
    }

    pub async fn get_task_progress(&self, task_id: &Id) -> anyhow::Result<Option<JsonValue>> {
        let used_primary = !self.using_fallback();
        let result =
            Self::with_timeout(used_primary, self.backend().get_task_progress(task_id)).await;
        match result {
            Ok(v) => {
                if used_primary {
                    self.state.mark_recovered();
                }
                Ok(v)
            }
            Err(err) if used_primary => {
                tracing::warn!(error = %err, "cache backend unreachable, degrading to in-memory");
                self.state.mark_degraded();
                self.fallback.get_task_progress(task_id).await
            }
            Err(err) => Err(err),
        }
    }

    pub async fn get_stats(&self) -> anyhow::Result<JsonValue> {
        let used_primary = !self.using_fallback();
        let result = Self::with_timeout(used_primary, self.backend().get_stats()).await;
        match result {
            Ok(v) => {
                if used_primary {
                    self.state.mark_recovered();
                }
                Ok(v)
            }
            Err(err) if used_primary => {
                tracing::warn!(error = %err, "cache backend unreachable, degrading to in-memory");
                self.state.mark_degraded();
                self.fallback.get_stats().await
            }
            Err(err) => Err(err),
        }
    }
}
