use sqlx::{PgPool, Row};

use crate::models::id::Id;
use crate::models::report::Report;

fn row_to_report(row: sqlx::postgres::PgRow) -> Result<Report, sqlx::Error> {
    Ok(Report {
        report_id: row.try_get("report_id")?,
        shard_id: row.try_get("shard_id")?,
        server_id: row.try_get("server_id")?,
        user_id: row.try_get("user_id")?,
        success: row.try_get("success")?,
        fail: row.try_get("fail")?,
        sent: row.try_get("sent")?,
        credits: row.try_get("credits")?,
        detail: row.try_get("detail")?,
        ts: row.try_get("ts")?,
    })
}

#[derive(Debug, Clone, Copy, Default, serde::Serialize)]
pub struct ReportTotals {
    pub success: i64,
    pub fail: i64,
    pub sent: i64,
}

pub async fn totals_for_task(db: &PgPool, task_id: &Id) -> Result<ReportTotals, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT
            coalesce(sum(r.success), 0)::bigint AS success,
            coalesce(sum(r.fail), 0)::bigint AS fail,
            coalesce(sum(r.sent), 0)::bigint AS sent
        FROM reports r
        JOIN shards s ON s.shard_id = r.shard_id
        WHERE s.task_id = $1
        "#,
    )
    .bind(task_id)
    .fetch_one(db)
    .await?;

    Ok(ReportTotals {
        success: row.try_get("success")?,
        fail: row.try_get("fail")?,
        sent: row.try_get("sent")?,
    })
}

pub async fn fetch_for_task(db: &PgPool, task_id: &Id) -> Result<Vec<Report>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT r.report_id, r.shard_id, r.server_id, r.user_id, r.success, r.fail, r.sent, r.credits, r.detail, r.ts
        FROM reports r
        JOIN shards s ON s.shard_id = r.shard_id
        WHERE s.task_id = $1
        ORDER BY r.report_id
        "#,
    )
    .bind(task_id)
    .fetch_all(db)
    .await?;

    rows.into_iter().map(row_to_report).collect()
}
