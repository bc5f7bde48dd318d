//! Result & Billing Pipeline (RBP): turns a worker's `shard_result` into a
//! durable, at-most-once billing record. Grounded in
//! `original_source/api.py::report_shard_result` and spec §4.3.

use serde_json::json;
use sqlx::PgPool;

use crate::cache::Cache;
use crate::config::RatesSettings;
use crate::models::id::Id;
use crate::models::report::ShardResult;
use crate::models::shard::ShardStatus;
use crate::models::user::UsageEntry;
use crate::repo;
use crate::rr;

#[derive(Debug)]
pub struct BillingOutcome {
    /// Whether this call was the one that actually produced the Report row
    /// and the matching debit -- mirrors `shard_result_ack.deducted`.
    pub deducted: bool,
    pub credits_charged: f64,
    pub task_done: bool,
}

/// Processes a worker's reported shard result: records the outcome, bills
/// the owning user at most once, and rolls the shard/task state forward.
///
/// The whole operation runs in a single transaction anchored on the
/// `reports.shard_id` unique constraint (§4.3, §9) -- a concurrent or
/// retried report for the same shard loses the insert race; this function
/// still moves the shard to `done` and re-checks task completion, but
/// `deducted` comes back `false` and no credits move.
pub async fn apply_shard_result(
    db: &PgPool,
    cache: &Cache,
    rate_defaults: &RatesSettings,
    server_id: &Id,
    result: ShardResult,
) -> anyhow::Result<BillingOutcome> {
    let shard = repo::shards::fetch_one(db, &result.shard_id).await?;
    let task = repo::tasks::fetch_one(db, &shard.task_id).await?;

    let (rates, _source) = rr::resolve(db, &task.user_id, rate_defaults).await?;
    let credits = rates.charge_for(result.success as u64, result.fail as u64);

    let mut txn = db.begin().await?;

    // The uniqueness constraint on reports.shard_id is the actual
    // idempotency anchor; everything above this point is safe to repeat.
    // `ON CONFLICT DO NOTHING` keeps a duplicate from raising a unique-
    // violation error, which would otherwise abort the rest of this
    // transaction's statements (shard/task rollforward) along with it.
    let inserted_id: Option<i64> = sqlx::query_scalar(
        r#"
        INSERT INTO reports(shard_id, server_id, user_id, success, fail, sent, credits, detail, ts)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, NOW())
        ON CONFLICT (shard_id) DO NOTHING
        RETURNING report_id
        "#,
    )
    .bind(&result.shard_id)
    .bind(server_id)
    .bind(&task.user_id)
    .bind(result.success)
    .bind(result.fail)
    .bind(result.success + result.fail)
    .bind(credits)
    .bind(&result.detail)
    .fetch_optional(&mut txn)
    .await?;

    let deducted = inserted_id.is_some();

    if deducted {
        let old_credits = repo::users::credits_for_update(&mut txn, &task.user_id).await?;
        let new_credits = (old_credits - credits).max(0.0);
        let entry = UsageEntry {
            action: "deduct".to_owned(),
            task_id: Some(task.task_id.clone()),
            shard_id: Some(result.shard_id.clone()),
            server_id: Some(server_id.clone()),
            success: Some(result.success),
            fail: Some(result.fail),
            sent: Some(result.success + result.fail),
            amount: credits,
            old_credits: Some(old_credits),
            new_credits: Some(new_credits),
            ts: chrono::Utc::now(),
            detail: serde_json::Map::new(),
        };
        repo::users::debit(&mut txn, &task.user_id, &entry).await?;
    } else {
        tracing::info!(shard_id = %result.shard_id, "duplicate shard result, skipping debit");
    }

    let shard_result = json!({
        "success": result.success,
        "fail": result.fail,
        "sent": result.success + result.fail,
        "detail": result.detail,
    });

    sqlx::query("UPDATE shards SET status = $2, result = $3, updated = NOW() WHERE shard_id = $1")
        .bind(&result.shard_id)
        .bind(ShardStatus::Done.as_str())
        .bind(&shard_result)
        .execute(&mut txn)
        .await?;

    let remaining: i64 =
        sqlx::query_scalar("SELECT count(*) FROM shards WHERE task_id = $1 AND status != 'done'")
            .bind(&task.task_id)
            .fetch_one(&mut txn)
            .await?;

    let task_done = remaining == 0;
    if task_done {
        sqlx::query("UPDATE tasks SET status = 'done', updated = NOW() WHERE task_id = $1")
            .bind(&task.task_id)
            .execute(&mut txn)
            .await?;
    }

    txn.commit().await?;

    let _ = cache.decr_worker_load(server_id).await;
    let _ = cache
        .cache_task_progress(
            &task.task_id,
            json!({ "remaining_shards": remaining, "done": task_done }),
        )
        .await;

    Ok(BillingOutcome {
        deducted,
        credits_charged: if deducted { credits } else { 0.0 },
        task_done,
    })
}
