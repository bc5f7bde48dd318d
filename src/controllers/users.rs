use axum::extract::{Path, State};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::context::AppContext;
use crate::error::AppError;
use crate::models::id::Id;
use crate::models::user::UsageEntry;
use crate::repo;
use crate::wire::ObserverServerMessage;

#[derive(Debug, Deserialize)]
pub struct DeductRequest {
    pub amount: f64,
    #[serde(default)]
    pub task_id: Option<Id>,
    #[serde(default)]
    pub shard_id: Option<Id>,
    #[serde(default)]
    pub detail: serde_json::Map<String, JsonValue>,
}

#[derive(Debug, Serialize)]
pub struct DeductResponse {
    pub ok: bool,
    pub credits: f64,
}

/// `POST /user/{id}/deduct` (§6): the administrative debit path, distinct
/// from the at-most-once shard billing in RBP. Emits `balance_update`.
pub async fn deduct(
    State(ctx): State<AppContext>,
    Path(user_id): Path<Id>,
    Json(req): Json<DeductRequest>,
) -> Result<Json<DeductResponse>, AppError> {
    repo::users::ensure_user(ctx.db(), &user_id).await?;

    let entry = UsageEntry {
        action: "deduct".to_owned(),
        task_id: req.task_id,
        shard_id: req.shard_id,
        server_id: None,
        success: None,
        fail: None,
        sent: None,
        amount: req.amount,
        old_credits: None,
        new_credits: None,
        ts: chrono::Utc::now(),
        detail: req.detail,
    };

    let credits = repo::users::admin_deduct(ctx.db(), &user_id, &entry).await?;

    ctx.sh().emit_to_user_public(
        &user_id,
        &ObserverServerMessage::BalanceUpdate {
            user_id: user_id.clone(),
            credits,
        },
    );

    Ok(Json(DeductResponse { ok: true, credits }))
}
