use chrono::{DateTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};

use crate::models::id::Id;
use crate::models::shard::{Shard, ShardStatus};

fn row_to_shard(row: sqlx::postgres::PgRow) -> Result<Shard, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let phones: JsonValue = row.try_get("phones")?;
    let phones = serde_json::from_value(phones).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    Ok(Shard {
        shard_id: row.try_get("shard_id")?,
        task_id: row.try_get("task_id")?,
        server_id: row.try_get("server_id")?,
        phones,
        status: status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        attempts: row.try_get("attempts")?,
        locked_at: row.try_get("locked_at")?,
        updated: row.try_get("updated")?,
        result: row.try_get("result")?,
    })
}

pub async fn insert_many(
    db: &PgPool,
    task_id: &Id,
    chunks: &[Vec<String>],
) -> Result<Vec<Shard>, sqlx::Error> {
    let mut shards = Vec::with_capacity(chunks.len());
    for phones in chunks {
        let shard_id = Id::generate();
        let phones_json = serde_json::to_value(phones).expect("phone list serializes");
        let row = sqlx::query(
            r#"
            INSERT INTO shards(shard_id, task_id, phones, status, attempts, updated, result)
            VALUES ($1, $2, $3, 'pending', 0, NOW(), '{}'::jsonb)
            RETURNING shard_id, task_id, server_id, phones, status, attempts, locked_at, updated, result
            "#,
        )
        .bind(&shard_id)
        .bind(task_id)
        .bind(phones_json)
        .fetch_one(db)
        .await?;

        shards.push(row_to_shard(row)?);
    }
    Ok(shards)
}

pub async fn pending_for_task(db: &PgPool, task_id: &Id) -> Result<Vec<Shard>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT shard_id, task_id, server_id, phones, status, attempts, locked_at, updated, result
        FROM shards WHERE task_id = $1 AND status = 'pending'
        ORDER BY shard_id
        "#,
    )
    .bind(task_id)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(row_to_shard).collect()
}

pub async fn fetch_one(db: &PgPool, shard_id: &Id) -> Result<Shard, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT shard_id, task_id, server_id, phones, status, attempts, locked_at, updated, result
        FROM shards WHERE shard_id = $1
        "#,
    )
    .bind(shard_id)
    .fetch_one(db)
    .await?;

    row_to_shard(row)
}

/// Assigns a shard to a worker and moves it to `running`, grounded in
/// `_assign_and_push_shards`'s per-shard update.
pub async fn mark_running(db: &PgPool, shard_id: &Id, server_id: &Id) -> Result<(), sqlx::Error> {
    sqlx::query(
        "UPDATE shards SET server_id = $2, status = 'running', locked_at = NOW(), updated = NOW() WHERE shard_id = $1",
    )
    .bind(shard_id)
    .bind(server_id)
    .execute(db)
    .await?;
    Ok(())
}

pub async fn mark_result(
    db: &PgPool,
    shard_id: &Id,
    status: ShardStatus,
    result: JsonValue,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE shards SET status = $2, result = $3, updated = NOW() WHERE shard_id = $1")
        .bind(shard_id)
        .bind(status.as_str())
        .bind(result)
        .execute(db)
        .await?;
    Ok(())
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ShardCounts {
    pub pending: i64,
    pub running: i64,
    pub done: i64,
    pub total: i64,
}

pub async fn counts_for_task(db: &PgPool, task_id: &Id) -> Result<ShardCounts, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT
            count(*) FILTER (WHERE status = 'pending') AS pending,
            count(*) FILTER (WHERE status = 'running') AS running,
            count(*) FILTER (WHERE status = 'done') AS done,
            count(*) AS total
        FROM shards WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .fetch_one(db)
    .await?;

    Ok(ShardCounts {
        pending: row.try_get("pending")?,
        running: row.try_get("running")?,
        done: row.try_get("done")?,
        total: row.try_get("total")?,
    })
}

/// Returns shards that have been `running` for longer than `stale_after`,
/// grounded in `_reclaim_stale_shards`.
pub async fn reclaim_stale(
    db: &PgPool,
    stale_after: chrono::Duration,
) -> Result<Vec<Shard>, sqlx::Error> {
    let cutoff: DateTime<Utc> = Utc::now() - stale_after;
    let rows = sqlx::query(
        r#"
        UPDATE shards SET status = 'pending', server_id = NULL, locked_at = NULL,
            attempts = attempts + 1, updated = NOW()
        WHERE status = 'running' AND locked_at < $1
        RETURNING shard_id, task_id, server_id, phones, status, attempts, locked_at, updated, result
        "#,
    )
    .bind(cutoff)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(row_to_shard).collect()
}
