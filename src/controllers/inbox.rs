use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::context::AppContext;
use crate::error::AppError;
use crate::models::id::Id;
use crate::repo;
use crate::wire::ObserverServerMessage;

#[derive(Debug, Deserialize)]
pub struct PushRequest {
    pub user_id: Id,
    pub item: JsonValue,
}

#[derive(Debug, Serialize)]
pub struct PushResponse {
    pub ok: bool,
}

/// `POST /inbox/push` (§6): appends to a user's inbox, emits `inbox_update`.
pub async fn push(
    State(ctx): State<AppContext>,
    Json(req): Json<PushRequest>,
) -> Result<Json<PushResponse>, AppError> {
    repo::users::ensure_user(ctx.db(), &req.user_id).await?;
    repo::users::push_inbox(ctx.db(), &req.user_id, req.item.clone()).await?;

    ctx.sh().emit_to_user_public(
        &req.user_id,
        &ObserverServerMessage::InboxUpdate {
            user_id: req.user_id.clone(),
            item: req.item,
        },
    );

    Ok(Json(PushResponse { ok: true }))
}
