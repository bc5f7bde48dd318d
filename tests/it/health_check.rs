use crate::support::test_context;

#[tokio::test]
async fn health_check_reports_db_and_cache_ok() {
    let ctx = test_context!();

    let response = ctx.get("/api/health").await;
    assert!(response.status().is_success());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("to read response body");
    let json: serde_json::Value = serde_json::from_slice(&body).expect("to parse JSON body");

    assert!(json["db_ping_ms"].is_number());
    assert_eq!(json["cache_ok"], serde_json::json!(true));
}
