use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::Router;

use crate::context::AppContext;
use crate::controllers::{health_check, inbox, tasks, users};
use crate::{sh, wch};

async fn worker_ws(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| wch::ws_handler(socket, ctx))
}

async fn observer_ws(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| sh::ws_handler(socket, ctx))
}

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route("/api/health", get(health_check::show))
        .route("/ws/worker", get(worker_ws))
        .route("/ws/observer", get(observer_ws))
        .route("/api/task/create", post(tasks::create))
        .route("/api/task/:task_id/status", get(tasks::status))
        .route("/api/task/:task_id/events", get(tasks::events))
        .route("/api/user/:user_id/deduct", post(users::deduct))
        .route("/api/inbox/push", post(inbox::push))
}
