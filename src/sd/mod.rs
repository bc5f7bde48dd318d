//! Shard Dispatcher (SD): splits a task's phone numbers into shards and
//! round-robins them across ready workers (§4.2). Grounded in
//! `original_source/api.py::create_task` and `_assign_and_push_shards`.

use std::time::Duration;

use chrono::Duration as ChronoDuration;

use crate::config::settings;
use crate::context::AppContext;
use crate::error::AppError;
use crate::models::id::Id;
use crate::models::shard::Shard;
use crate::models::task::{NewTask, Task, TaskStatus};
use crate::repo;
use crate::rr;
use crate::wire::ShardPayload;

pub struct TaskCreateResult {
    pub task_id: Id,
    pub total_shards_expected: i64,
    pub trace_id: Option<String>,
}

/// Pre-flight (synchronous) plus background dispatch for a new task (§4.2
/// steps 1-7). Returns as soon as the task row is persisted; shard creation
/// and push happen in a spawned background task.
pub async fn create_task(
    ctx: AppContext,
    new: NewTask,
    shard_size_override: Option<usize>,
    trace_id: Option<String>,
) -> Result<TaskCreateResult, AppError> {
    repo::users::ensure_user(ctx.db(), &new.user_id).await?;

    let (rates, _source) = rr::resolve(ctx.db(), &new.user_id, &settings().rates).await?;
    let estimated_cost = new.numbers.len() as f64 * rates.price_success;
    let user = repo::users::fetch(ctx.db(), &new.user_id).await?;
    if user.credits < estimated_cost {
        return Err(AppError::InsufficientCredits {
            current: user.credits,
            required: estimated_cost,
        });
    }

    if new.numbers.is_empty() {
        // §9 open question, resolved: an empty task auto-completes rather
        // than sitting pending forever with nothing to dispatch.
        let task = repo::tasks::insert(ctx.db(), &new, 0, TaskStatus::Done).await?;
        return Ok(TaskCreateResult {
            task_id: task.task_id,
            total_shards_expected: 0,
            trace_id,
        });
    }

    let ready = ready_workers(&ctx).await;
    let shard_size = compute_shard_size(shard_size_override, ready.len(), new.numbers.len());
    let total = new.numbers.len() as i64;
    let total_shards_expected = div_ceil(new.numbers.len(), shard_size) as i64;

    let task = repo::tasks::insert(ctx.db(), &new, total, TaskStatus::Pending).await?;
    let task_id = task.task_id.clone();
    let numbers = new.numbers;
    let bg_trace_id = trace_id.clone();

    tokio::spawn(async move {
        dispatch_background(ctx, task_id, numbers, shard_size, bg_trace_id).await;
    });

    Ok(TaskCreateResult {
        task_id: task.task_id,
        total_shards_expected,
        trace_id,
    })
}

/// Shard-size rule (§4.2 step 4, §8 invariant 8).
fn compute_shard_size(
    override_size: Option<usize>,
    ready_workers: usize,
    phone_count: usize,
) -> usize {
    if let Some(size) = override_size {
        return size.max(1);
    }
    if ready_workers > 0 && phone_count <= ready_workers {
        return 1;
    }
    if ready_workers > 0 {
        return div_ceil(phone_count, ready_workers);
    }
    settings().dispatch.default_shard_size.max(1)
}

fn div_ceil(n: usize, d: usize) -> usize {
    (n + d - 1) / d.max(1)
}

async fn dispatch_background(
    ctx: AppContext,
    task_id: Id,
    numbers: Vec<String>,
    shard_size: usize,
    trace_id: Option<String>,
) {
    let chunks: Vec<Vec<String>> = numbers
        .chunks(shard_size.max(1))
        .map(|c| c.to_vec())
        .collect();

    let shards = match repo::shards::insert_many(ctx.db(), &task_id, &chunks).await {
        Ok(shards) => shards,
        Err(err) => {
            tracing::error!(error = %err, task_id = %task_id, "failed to persist shards");
            return;
        }
    };

    let task = match repo::tasks::fetch_one(ctx.db(), &task_id).await {
        Ok(task) => task,
        Err(err) => {
            tracing::error!(error = %err, task_id = %task_id, "failed to reload task for dispatch");
            return;
        }
    };

    let pushed = dispatch_shards(&ctx, &task, &shards, trace_id).await;
    if pushed > 0 {
        let _ = repo::tasks::set_status(ctx.db(), &task_id, TaskStatus::Running).await;
    }

    // Opportunistic stale-shard reclaim piggybacks on every task creation, in
    // addition to the dedicated periodic sweep (§4.2, §9).
    reclaim_stale(&ctx).await;
}

/// Round-robins `shards[i]` to `ready[i % ready.len()]`, pushing each
/// concurrently and respecting an overall dispatch timeout. A push that's
/// still in flight when the deadline passes is not waited on further, but
/// keeps running in the background and still resolves its own load
/// counter correctly -- the deadline bounds how long the caller waits, not
/// whether in-flight work completes cleanly (§4.2, §5).
async fn dispatch_shards(
    ctx: &AppContext,
    task: &Task,
    shards: &[Shard],
    trace_id: Option<String>,
) -> usize {
    let ready = ready_workers(ctx).await;
    if ready.is_empty() {
        return 0;
    }

    let mut handles = Vec::with_capacity(shards.len());
    for (i, shard) in shards.iter().enumerate() {
        let worker = ready[i % ready.len()].clone();
        let ctx = ctx.clone();
        let task = task.clone();
        let shard = shard.clone();
        let trace_id = trace_id.clone();
        handles.push(tokio::spawn(async move {
            push_one(&ctx, &task, &shard, &worker, trace_id).await
        }));
    }

    let overall_timeout = Duration::from_millis(settings().dispatch.dispatch_timeout_ms);
    match tokio::time::timeout(overall_timeout, futures::future::join_all(handles)).await {
        Ok(results) => results
            .into_iter()
            .filter(|r| matches!(r, Ok(true)))
            .count(),
        Err(_) => {
            tracing::warn!(task_id = %task.task_id, "shard dispatch exceeded overall timeout, stragglers not awaited");
            0
        }
    }
}

async fn push_one(
    ctx: &AppContext,
    task: &Task,
    shard: &Shard,
    worker: &Id,
    trace_id: Option<String>,
) -> bool {
    let _ = ctx.cache().incr_worker_load(worker).await;

    let payload = ShardPayload {
        shard_id: shard.shard_id.clone(),
        task_id: task.task_id.clone(),
        user_id: task.user_id.clone(),
        phones: shard.phones.clone(),
        message: task.message.clone(),
        trace_id,
    };

    match ctx.wch().push_shard(worker, payload).await {
        Ok(()) => {
            if let Err(err) = repo::shards::mark_running(ctx.db(), &shard.shard_id, worker).await {
                tracing::error!(error = %err, shard_id = %shard.shard_id, "failed to mark shard running");
            }
            true
        }
        Err(err) => {
            tracing::warn!(error = %err, shard_id = %shard.shard_id, worker = %worker, "shard push failed, rolling back load");
            let _ = ctx.cache().decr_worker_load(worker).await;
            false
        }
    }
}

async fn ready_workers(ctx: &AppContext) -> Vec<Id> {
    let online = ctx.cache().get_online_workers().await.unwrap_or_default();
    let mut ready = Vec::new();
    for id in online {
        if let Ok(Some(info)) = ctx.cache().get_worker_info(&id).await {
            if info.ready {
                ready.push(id);
            }
        }
    }
    ready.sort();
    ready
}

/// Resets shards stuck `running` past the stale threshold back to
/// `pending`, making them eligible for the next dispatch trigger (§4.2,
/// §5, scenario S3). Invoked opportunistically from task creation and
/// from a dedicated periodic task (see `cmd::serve`).
pub async fn reclaim_stale(ctx: &AppContext) {
    let threshold = ChronoDuration::seconds(settings().dispatch.stale_shard_seconds);
    match repo::shards::reclaim_stale(ctx.db(), threshold).await {
        Ok(shards) if !shards.is_empty() => {
            tracing::info!(
                count = shards.len(),
                "reclaimed stale shards back to pending"
            );
        }
        Ok(_) => {}
        Err(err) => tracing::error!(error = %err, "stale shard reclaim query failed"),
    }
}
