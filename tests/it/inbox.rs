use serde_json::json;

use crate::support::test_context;

#[tokio::test]
async fn push_appends_item_and_creates_user_on_first_use() {
    let ctx = test_context!();

    let response = ctx
        .post(
            "/api/inbox/push",
            &json!({
                "user_id": "erin",
                "item": {"kind": "notice", "text": "welcome"},
            }),
        )
        .await;
    assert!(response.status().is_success());

    let inbox: serde_json::Value =
        sqlx::query_scalar("SELECT inbox FROM user_data WHERE user_id = $1")
            .bind("erin")
            .fetch_one(ctx.db())
            .await
            .expect("user_data row to exist");

    assert_eq!(inbox, json!([{"kind": "notice", "text": "welcome"}]));
}

#[tokio::test]
async fn push_appends_multiple_items_in_order() {
    let ctx = test_context!();

    for i in 0..3 {
        let response = ctx
            .post(
                "/api/inbox/push",
                &json!({"user_id": "frank", "item": {"seq": i}}),
            )
            .await;
        assert!(response.status().is_success());
    }

    let inbox: serde_json::Value =
        sqlx::query_scalar("SELECT inbox FROM user_data WHERE user_id = $1")
            .bind("frank")
            .fetch_one(ctx.db())
            .await
            .expect("user_data row to exist");

    assert_eq!(inbox, json!([{"seq": 0}, {"seq": 1}, {"seq": 2}]));
}
