use serde_json::Value as JsonValue;
use sqlx::{PgPool, Postgres, Row, Transaction};

use crate::models::id::Id;
use crate::models::rates::Rates;
use crate::models::user::{UsageEntry, UserData};

fn row_to_user_data(row: sqlx::postgres::PgRow) -> Result<UserData, sqlx::Error> {
    let usage: JsonValue = row.try_get("usage")?;
    let usage: Vec<UsageEntry> =
        serde_json::from_value(usage).map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
    let rates: Option<JsonValue> = row.try_get("rates")?;
    let rates = rates
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    Ok(UserData {
        user_id: row.try_get("user_id")?,
        credits: row.try_get("credits")?,
        usage,
        inbox: serde_json::from_value(row.try_get("inbox")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        stats: serde_json::from_value(row.try_get("stats")?)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
        rates,
        admin_rate_set_by: row.try_get("admin_rate_set_by")?,
    })
}

/// Creates the `users` FK anchor and `user_data` row for a user id the core
/// sees for the first time, defaulting to 1000 credits. A no-op if the user
/// already exists.
pub async fn ensure_user(db: &PgPool, user_id: &Id) -> Result<(), sqlx::Error> {
    let mut txn = db.begin().await?;

    sqlx::query(
        "INSERT INTO users(user_id, username, created) VALUES ($1, $1, NOW()) ON CONFLICT (user_id) DO NOTHING",
    )
    .bind(user_id)
    .execute(&mut txn)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO user_data(user_id, credits, usage, inbox, stats)
        VALUES ($1, 1000, '[]'::jsonb, '[]'::jsonb, '[]'::jsonb)
        ON CONFLICT (user_id) DO NOTHING
        "#,
    )
    .bind(user_id)
    .execute(&mut txn)
    .await?;

    txn.commit().await
}

pub async fn fetch(db: &PgPool, user_id: &Id) -> Result<UserData, sqlx::Error> {
    let row = sqlx::query(
        "SELECT user_id, credits, usage, inbox, stats, rates, admin_rate_set_by FROM user_data WHERE user_id = $1",
    )
    .bind(user_id)
    .fetch_one(db)
    .await?;

    row_to_user_data(row)
}

pub async fn get_rates(db: &PgPool, user_id: &Id) -> Result<Option<Rates>, sqlx::Error> {
    let rates: Option<JsonValue> =
        sqlx::query_scalar("SELECT rates FROM user_data WHERE user_id = $1")
            .bind(user_id)
            .fetch_optional(db)
            .await?
            .flatten();

    rates
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub async fn set_rates(
    db: &PgPool,
    user_id: &Id,
    rates: Rates,
    set_by: &str,
) -> Result<(), sqlx::Error> {
    let rates_json = serde_json::to_value(rates).expect("rates serialize");
    sqlx::query("UPDATE user_data SET rates = $2, admin_rate_set_by = $3 WHERE user_id = $1")
        .bind(user_id)
        .bind(rates_json)
        .bind(set_by)
        .execute(db)
        .await?;
    Ok(())
}

/// Reads the current balance under a row lock, held for the rest of the
/// caller's transaction so a concurrent debit can't race between this read
/// and the `debit` call that follows it.
pub async fn credits_for_update<'c>(
    txn: &mut Transaction<'c, Postgres>,
    user_id: &Id,
) -> Result<f64, sqlx::Error> {
    sqlx::query_scalar("SELECT credits FROM user_data WHERE user_id = $1 FOR UPDATE")
        .bind(user_id)
        .fetch_one(txn)
        .await
}

/// Debits `amount` credits from a user and appends a `"deduct"` usage entry,
/// within the caller's transaction. Returns the balance *before* the debit so
/// callers can check sufficiency themselves if they need to (the at-most-once
/// billing path in RBP does not reject insufficient balances -- see §4.3).
pub async fn debit<'c>(
    txn: &mut Transaction<'c, Postgres>,
    user_id: &Id,
    entry: &UsageEntry,
) -> Result<f64, sqlx::Error> {
    let entry_json = serde_json::to_value(entry).expect("usage entry serializes");
    let row = sqlx::query(
        r#"
        WITH prior AS (
            SELECT credits FROM user_data WHERE user_id = $1
        )
        UPDATE user_data
        SET credits = GREATEST(0, credits - $2), usage = usage || $3::jsonb
        WHERE user_id = $1
        RETURNING (SELECT credits FROM prior) AS previous_credits
        "#,
    )
    .bind(user_id)
    .bind(entry.amount)
    .bind(serde_json::Value::Array(vec![entry_json]))
    .fetch_one(txn)
    .await?;

    row.try_get("previous_credits")
}

/// Administrative debit path (`POST /user/{id}/deduct`): same ledger update
/// as `debit`, but runs standalone against the pool rather than inside an
/// RBP transaction, and returns the balance *after* the debit.
pub async fn admin_deduct(
    db: &PgPool,
    user_id: &Id,
    entry: &UsageEntry,
) -> Result<f64, sqlx::Error> {
    let entry_json = serde_json::to_value(entry).expect("usage entry serializes");
    let row = sqlx::query(
        r#"
        UPDATE user_data
        SET credits = GREATEST(0, credits - $2), usage = usage || $3::jsonb
        WHERE user_id = $1
        RETURNING credits
        "#,
    )
    .bind(user_id)
    .bind(entry.amount)
    .bind(serde_json::Value::Array(vec![entry_json]))
    .fetch_one(db)
    .await?;

    row.try_get("credits")
}

pub async fn push_inbox(db: &PgPool, user_id: &Id, item: JsonValue) -> Result<(), sqlx::Error> {
    sqlx::query("UPDATE user_data SET inbox = inbox || $2::jsonb WHERE user_id = $1")
        .bind(user_id)
        .bind(serde_json::Value::Array(vec![item]))
        .execute(db)
        .await?;
    Ok(())
}
