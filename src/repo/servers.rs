use serde_json::Value as JsonValue;
use sqlx::{PgPool, Row};

use crate::models::id::Id;
use crate::models::server::{Server, ServerStatus};

fn row_to_server(row: sqlx::postgres::PgRow) -> Result<Server, sqlx::Error> {
    let status: String = row.try_get("status")?;
    Ok(Server {
        server_id: row.try_get("server_id")?,
        server_name: row.try_get("server_name")?,
        server_url: row.try_get("server_url")?,
        clients_count: row.try_get("clients_count")?,
        status: status
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?,
        last_seen: row.try_get("last_seen")?,
        registered_at: row.try_get("registered_at")?,
        meta: row.try_get("meta")?,
        assigned_user: row.try_get("assigned_user")?,
        assigned_by_admin: row.try_get("assigned_by_admin")?,
    })
}

pub async fn upsert_registration(
    db: &PgPool,
    server_id: &Id,
    server_name: &str,
    server_url: Option<&str>,
) -> Result<Server, sqlx::Error> {
    let row = sqlx::query(
        r#"
        INSERT INTO servers(server_id, server_name, server_url, clients_count, status, last_seen, registered_at, meta)
        VALUES ($1, $2, $3, 0, 'connected', NOW(), NOW(), '{}'::jsonb)
        ON CONFLICT (server_id) DO UPDATE SET
            server_name = EXCLUDED.server_name,
            server_url = EXCLUDED.server_url,
            status = 'connected',
            last_seen = NOW()
        RETURNING server_id, server_name, server_url, clients_count, status, last_seen, registered_at, meta, assigned_user, assigned_by_admin
        "#,
    )
    .bind(server_id)
    .bind(server_name)
    .bind(server_url)
    .fetch_one(db)
    .await?;

    row_to_server(row)
}

pub async fn mark_status(
    db: &PgPool,
    server_id: &Id,
    status: ServerStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE servers SET status = $2, last_seen = NOW() WHERE server_id = $1")
        .bind(server_id)
        .bind(status.as_str())
        .execute(db)
        .await?;
    Ok(())
}

pub async fn fetch_all(db: &PgPool) -> Result<Vec<Server>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT server_id, server_name, server_url, clients_count, status, last_seen, registered_at, meta, assigned_user, assigned_by_admin
        FROM servers ORDER BY server_id
        "#,
    )
    .fetch_all(db)
    .await?;

    rows.into_iter().map(row_to_server).collect()
}

pub async fn fetch_one(db: &PgPool, server_id: &Id) -> Result<Server, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT server_id, server_name, server_url, clients_count, status, last_seen, registered_at, meta, assigned_user, assigned_by_admin
        FROM servers WHERE server_id = $1
        "#,
    )
    .bind(server_id)
    .fetch_one(db)
    .await?;

    row_to_server(row)
}

pub async fn set_meta(db: &PgPool, server_id: &Id, meta: JsonValue) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE servers SET meta = $2 WHERE server_id = $1")
        .bind(server_id)
        .bind(meta)
        .execute(db)
        .await?;
    Ok(())
}
