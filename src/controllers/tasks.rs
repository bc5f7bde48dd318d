use std::convert::Infallible;
use std::time::Duration;

use axum::extract::{Path, State};
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::Json;
use futures::stream::Stream;
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::context::AppContext;
use crate::error::AppError;
use crate::models::id::Id;
use crate::models::task::NewTask;
use crate::repo;
use crate::sd;

#[derive(Debug, Deserialize)]
pub struct CreateTaskRequest {
    pub user_id: Id,
    pub message: String,
    pub numbers: Vec<String>,
    #[serde(default)]
    pub shard_size: Option<usize>,
    #[serde(default)]
    pub trace_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTaskResponse {
    pub ok: bool,
    pub task_id: Id,
    pub trace_id: Option<String>,
    pub total_shards: i64,
}

/// `POST /task/create` (§6). Returns as soon as the task row is persisted;
/// shard creation and dispatch happen in the background (§4.2, §5).
pub async fn create(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, AppError> {
    let count = req.numbers.len() as i64;
    let new_task = NewTask {
        user_id: req.user_id,
        message: req.message,
        numbers: req.numbers,
        count,
    };

    let result = sd::create_task(ctx, new_task, req.shard_size, req.trace_id).await?;

    Ok(Json(CreateTaskResponse {
        ok: true,
        task_id: result.task_id,
        trace_id: result.trace_id,
        total_shards: result.total_shards_expected,
    }))
}

#[derive(Debug, Serialize)]
pub struct TaskStatusResponse {
    pub task_id: Id,
    pub status: String,
    pub total: i64,
    pub shards: repo::shards::ShardCounts,
    pub result: repo::reports::ReportTotals,
}

/// `GET /task/{id}/status` (§6). Must stay fast -- never triggers
/// stale-reclaim inline.
pub async fn status(
    State(ctx): State<AppContext>,
    Path(task_id): Path<Id>,
) -> Result<Json<TaskStatusResponse>, AppError> {
    let task = repo::tasks::fetch_one(ctx.db(), &task_id)
        .await
        .map_err(|e| match e {
            sqlx::Error::RowNotFound => AppError::TaskNotFound,
            other => AppError::Sqlx(other),
        })?;
    let shards = repo::shards::counts_for_task(ctx.db(), &task_id).await?;
    let result = repo::reports::totals_for_task(ctx.db(), &task_id).await?;

    Ok(Json(TaskStatusResponse {
        task_id: task.task_id,
        status: task.status.as_str().to_owned(),
        total: task.total,
        shards,
        result,
    }))
}

/// `GET /task/{id}/events` (§6): streams the same payload shape as
/// `task_update` until the task reaches `done`.
pub async fn events(State(ctx): State<AppContext>, Path(task_id): Path<Id>) -> impl IntoResponse {
    let stream = async_stream(ctx, task_id);
    Sse::new(stream).keep_alive(axum::response::sse::KeepAlive::default())
}

fn async_stream(ctx: AppContext, task_id: Id) -> impl Stream<Item = Result<Event, Infallible>> {
    futures::stream::unfold((ctx, task_id, false), |(ctx, task_id, done)| async move {
        if done {
            return None;
        }

        let task = repo::tasks::fetch_one(ctx.db(), &task_id).await.ok()?;
        let shards = repo::shards::counts_for_task(ctx.db(), &task_id)
            .await
            .unwrap_or_default();
        let result = repo::reports::totals_for_task(ctx.db(), &task_id)
            .await
            .unwrap_or_default();
        let completed = task.status == crate::models::task::TaskStatus::Done;

        let payload = json!({
            "task_id": task.task_id,
            "status": task.status.as_str(),
            "shards": shards,
            "result": result,
            "completed": completed,
        });

        let event = Event::default().json_data(payload).ok()?;
        if !completed {
            tokio::time::sleep(Duration::from_secs(2)).await;
        }
        Some((Ok(event), (ctx, task_id, completed)))
    })
}
