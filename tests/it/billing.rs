use shardhub::cache::Cache;
use shardhub::config;
use shardhub::models::id::Id;
use shardhub::models::report::ShardResult;
use shardhub::models::task::{NewTask, TaskStatus};
use shardhub::rbp;
use shardhub::repo;

use crate::support::test_context;

#[tokio::test]
async fn apply_shard_result_bills_exactly_once_for_duplicate_reports() {
    let ctx = test_context!();
    let cache = Cache::memory_only(&config::settings().cache);

    let user_id = Id::generate();
    repo::users::ensure_user(ctx.db(), &user_id).await.unwrap();

    let task = repo::tasks::insert(
        ctx.db(),
        &NewTask {
            user_id: user_id.clone(),
            message: "hi".to_owned(),
            numbers: vec!["+15550100".to_owned()],
            count: 1,
        },
        1,
        TaskStatus::Pending,
    )
    .await
    .unwrap();

    let shards =
        repo::shards::insert_many(ctx.db(), &task.task_id, &[vec!["+15550100".to_owned()]])
            .await
            .unwrap();
    let shard_id = shards[0].shard_id.clone();

    let server_id = Id::generate();
    repo::servers::upsert_registration(ctx.db(), &server_id, "worker-1", None)
        .await
        .unwrap();
    let result = ShardResult {
        shard_id: shard_id.clone(),
        success: 1,
        fail: 0,
        sent: 1,
        detail: serde_json::json!({}),
    };

    let before = repo::users::fetch(ctx.db(), &user_id).await.unwrap();

    let first = rbp::apply_shard_result(
        ctx.db(),
        &cache,
        &config::settings().rates,
        &server_id,
        result.clone(),
    )
    .await
    .unwrap();
    assert!(first.deducted);
    assert!(first.credits_charged > 0.0);

    let second = rbp::apply_shard_result(
        ctx.db(),
        &cache,
        &config::settings().rates,
        &server_id,
        result,
    )
    .await
    .unwrap();
    assert!(!second.deducted);
    assert_eq!(second.credits_charged, 0.0);

    let after = repo::users::fetch(ctx.db(), &user_id).await.unwrap();
    assert!((before.credits - after.credits - first.credits_charged).abs() < 1e-9);

    let reports = repo::reports::fetch_for_task(ctx.db(), &task.task_id)
        .await
        .unwrap();
    assert_eq!(reports.len(), 1);
}

#[tokio::test]
async fn apply_shard_result_clamps_debit_at_zero_credits() {
    let ctx = test_context!();
    let cache = Cache::memory_only(&config::settings().cache);

    let user_id = Id::generate();
    repo::users::ensure_user(ctx.db(), &user_id).await.unwrap();

    // Drain the user's starting balance down to a sliver smaller than the
    // shard's eventual billing charge, forcing the clamp in repo::users::debit.
    sqlx::query("UPDATE user_data SET credits = 0.01 WHERE user_id = $1")
        .bind(&user_id)
        .execute(ctx.db())
        .await
        .unwrap();

    let task = repo::tasks::insert(
        ctx.db(),
        &NewTask {
            user_id: user_id.clone(),
            message: "hi".to_owned(),
            numbers: vec!["+15550100".to_owned(), "+15550101".to_owned()],
            count: 1,
        },
        2,
        TaskStatus::Pending,
    )
    .await
    .unwrap();

    let shards = repo::shards::insert_many(
        ctx.db(),
        &task.task_id,
        &[vec!["+15550100".to_owned(), "+15550101".to_owned()]],
    )
    .await
    .unwrap();

    let server_id = Id::generate();
    repo::servers::upsert_registration(ctx.db(), &server_id, "worker-1", None)
        .await
        .unwrap();
    let result = ShardResult {
        shard_id: shards[0].shard_id.clone(),
        success: 2,
        fail: 0,
        sent: 2,
        detail: serde_json::json!({}),
    };

    rbp::apply_shard_result(
        ctx.db(),
        &cache,
        &config::settings().rates,
        &server_id,
        result,
    )
    .await
    .unwrap();

    let after = repo::users::fetch(ctx.db(), &user_id).await.unwrap();
    assert_eq!(after.credits, 0.0);
}

#[tokio::test]
async fn dispatch_timeout_leaves_shard_assigned_for_stale_reclaim() {
    let ctx = test_context!();

    let user_id = Id::generate();
    repo::users::ensure_user(ctx.db(), &user_id).await.unwrap();
    let task = repo::tasks::insert(
        ctx.db(),
        &NewTask {
            user_id,
            message: "hi".to_owned(),
            numbers: vec!["+15550100".to_owned()],
            count: 1,
        },
        1,
        TaskStatus::Pending,
    )
    .await
    .unwrap();
    let shards =
        repo::shards::insert_many(ctx.db(), &task.task_id, &[vec!["+15550100".to_owned()]])
            .await
            .unwrap();
    let server_id = Id::generate();
    repo::servers::upsert_registration(ctx.db(), &server_id, "worker-1", None)
        .await
        .unwrap();
    repo::shards::mark_running(ctx.db(), &shards[0].shard_id, &server_id)
        .await
        .unwrap();

    let before = repo::shards::fetch_one(ctx.db(), &shards[0].shard_id)
        .await
        .unwrap();
    assert_eq!(before.attempts, 0);

    sqlx::query("UPDATE shards SET locked_at = NOW() - INTERVAL '1 hour' WHERE shard_id = $1")
        .bind(&shards[0].shard_id)
        .execute(ctx.db())
        .await
        .unwrap();

    let reclaimed = repo::shards::reclaim_stale(ctx.db(), chrono::Duration::seconds(60))
        .await
        .unwrap();
    assert_eq!(reclaimed.len(), 1);
    assert_eq!(reclaimed[0].attempts, 1);
    assert!(reclaimed[0].server_id.is_none());
}
