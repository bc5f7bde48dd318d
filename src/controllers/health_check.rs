use std::time::Duration;

use axum::extract::State;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use sqlx::PgPool;
use tokio::time::Instant;

use crate::context::AppContext;

#[derive(Debug, Serialize)]
pub struct HealthCheck {
    current_time: DateTime<Utc>,
    db_ping_ms: Option<u128>,
    cache_ok: bool,
}

pub async fn show(State(ctx): State<AppContext>) -> Json<HealthCheck> {
    Json(HealthCheck {
        current_time: Utc::now(),
        db_ping_ms: ping(ctx.db()).await.map(|d| d.as_millis()),
        cache_ok: ctx.cache().get_stats().await.is_ok(),
    })
}

async fn ping(db: &PgPool) -> Option<Duration> {
    let start = Instant::now();
    sqlx::query("SELECT 1").execute(db).await.ok()?;
    Some(Instant::now() - start)
}
