use serde_json::json;

use crate::support::test_context;

#[tokio::test]
async fn create_then_status_reports_pending_task() {
    let ctx = test_context!();

    let response = ctx
        .post(
            "/api/task/create",
            &json!({
                "user_id": "alice",
                "message": "hello",
                "numbers": ["+15550100", "+15550101", "+15550102"],
                "shard_size": 2,
            }),
        )
        .await;
    assert!(response.status().is_success());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("to read response body");
    let created: serde_json::Value = serde_json::from_slice(&body).expect("to parse JSON body");
    assert_eq!(created["ok"], json!(true));
    assert_eq!(created["total_shards"], json!(2));
    let task_id = created["task_id"].as_str().expect("task_id to be a string");

    let response = ctx.get(&format!("/api/task/{task_id}/status")).await;
    assert!(response.status().is_success());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("to read response body");
    let status: serde_json::Value = serde_json::from_slice(&body).expect("to parse JSON body");
    assert_eq!(status["task_id"], json!(task_id));
    assert_eq!(status["total"], json!(3));
}

#[tokio::test]
async fn create_with_no_numbers_auto_completes() {
    let ctx = test_context!();

    let response = ctx
        .post(
            "/api/task/create",
            &json!({
                "user_id": "bob",
                "message": "empty send",
                "numbers": [],
            }),
        )
        .await;
    assert!(response.status().is_success());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("to read response body");
    let created: serde_json::Value = serde_json::from_slice(&body).expect("to parse JSON body");
    assert_eq!(created["total_shards"], json!(0));

    let task_id = created["task_id"].as_str().expect("task_id to be a string");
    let response = ctx.get(&format!("/api/task/{task_id}/status")).await;
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("to read response body");
    let status: serde_json::Value = serde_json::from_slice(&body).expect("to parse JSON body");
    assert_eq!(status["status"], json!("done"));
}

#[tokio::test]
async fn status_for_unknown_task_is_not_found() {
    let ctx = test_context!();

    let response = ctx.get("/api/task/does-not-exist/status").await;
    assert_eq!(response.status(), axum::http::StatusCode::NOT_FOUND);
}
