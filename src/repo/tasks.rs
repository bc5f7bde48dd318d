use sqlx::{PgPool, Row};

use crate::models::id::Id;
use crate::models::task::{NewTask, Task, TaskStatus};

fn row_to_task(row: sqlx::postgres::PgRow) -> Result<Task, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Task {
        task_id: row.try_get("task_id")?,
        user_id: row.try_get("user_id")?,
        message: row.try_get("message")?,
        total: row.try_get("total")?,
        count: row.try_get("count")?,
        status: status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        created: row.try_get("created")?,
        updated: row.try_get("updated")?,
    })
}

pub async fn insert(
    db: &PgPool,
    new: &NewTask,
    total: i64,
    status: TaskStatus,
) -> Result<Task, sqlx::Error> {
    let task_id = Id::generate();
    let row = sqlx::query(
        r#"
        INSERT INTO tasks(task_id, user_id, message, total, count, status, created, updated)
        VALUES ($1, $2, $3, $4, $5, $6, NOW(), NOW())
        RETURNING task_id, user_id, message, total, count, status, created, updated
        "#,
    )
    .bind(&task_id)
    .bind(&new.user_id)
    .bind(&new.message)
    .bind(total)
    .bind(new.count)
    .bind(status.as_str())
    .fetch_one(db)
    .await?;

    row_to_task(row)
}

pub async fn fetch_one(db: &PgPool, task_id: &Id) -> Result<Task, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT task_id, user_id, message, total, count, status, created, updated
        FROM tasks WHERE task_id = $1
        "#,
    )
    .bind(task_id)
    .fetch_one(db)
    .await?;

    row_to_task(row)
}

pub async fn set_status(db: &PgPool, task_id: &Id, status: TaskStatus) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE tasks SET status = $2, updated = NOW() WHERE task_id = $1")
        .bind(task_id)
        .bind(status.as_str())
        .execute(db)
        .await?;
    Ok(())
}

/// Marks a task `done` once every one of its shards has reached the `done`
/// state, per the RBP completion rule.
pub async fn mark_done_if_all_shards_finished(
    db: &PgPool,
    task_id: &Id,
) -> Result<bool, sqlx::Error> {
    let remaining: i64 =
        sqlx::query_scalar("SELECT count(*) FROM shards WHERE task_id = $1 AND status != 'done'")
            .bind(task_id)
            .fetch_one(db)
            .await?;

    if remaining == 0 {
        set_status(db, task_id, TaskStatus::Done).await?;
        Ok(true)
    } else {
        Ok(false)
    }
}
