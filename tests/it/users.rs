use serde_json::json;

use crate::support::test_context;

#[tokio::test]
async fn deduct_reduces_balance_and_creates_user_on_first_use() {
    let ctx = test_context!();

    let response = ctx
        .post(
            "/api/user/carol/deduct",
            &json!({
                "amount": 25.0,
                "detail": {"reason": "manual adjustment"},
            }),
        )
        .await;
    assert!(response.status().is_success());

    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .expect("to read response body");
    let deducted: serde_json::Value = serde_json::from_slice(&body).expect("to parse JSON body");
    assert_eq!(deducted["ok"], json!(true));
    assert_eq!(deducted["credits"], json!(975.0));

    let credits: f64 = sqlx::query_scalar("SELECT credits FROM user_data WHERE user_id = $1")
        .bind("carol")
        .fetch_one(ctx.db())
        .await
        .expect("user_data row to exist");
    assert_eq!(credits, 975.0);
}

#[tokio::test]
async fn repeated_deducts_accumulate() {
    let ctx = test_context!();

    for _ in 0..3 {
        let response = ctx
            .post("/api/user/dave/deduct", &json!({"amount": 10.0}))
            .await;
        assert!(response.status().is_success());
    }

    let credits: f64 = sqlx::query_scalar("SELECT credits FROM user_data WHERE user_id = $1")
        .bind("dave")
        .fetch_one(ctx.db())
        .await
        .expect("user_data row to exist");
    assert_eq!(credits, 970.0);
}
