use serde_json::Value as JsonValue;
use sqlx::PgPool;

use crate::models::rates::{RateRange, Rates};

const GLOBAL_ADMIN_ID: &str = "server_manager";

/// Reads the global default rate set from the `admin_configs` sentinel row,
/// grounded in `_get_global_rates`. Returns `None` if no admin has ever set
/// one, in which case the caller falls back to the configured default.
pub async fn get_global_rates(db: &PgPool) -> Result<Option<Rates>, sqlx::Error> {
    let rates: Option<JsonValue> =
        sqlx::query_scalar("SELECT rates FROM admin_configs WHERE admin_id = $1")
            .bind(GLOBAL_ADMIN_ID)
            .fetch_optional(db)
            .await?
            .flatten();

    rates
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub async fn get_rate_range(db: &PgPool) -> Result<Option<RateRange>, sqlx::Error> {
    let range: Option<JsonValue> =
        sqlx::query_scalar("SELECT rate_range FROM admin_configs WHERE admin_id = $1")
            .bind(GLOBAL_ADMIN_ID)
            .fetch_optional(db)
            .await?
            .flatten();

    range
        .map(serde_json::from_value)
        .transpose()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

pub async fn set_global_rates(db: &PgPool, rates: Rates) -> Result<(), sqlx::Error> {
    let rates_json = serde_json::to_value(rates).expect("rates serialize");
    sqlx::query(
        r#"
        INSERT INTO admin_configs(admin_id, rates, updated)
        VALUES ($1, $2, NOW())
        ON CONFLICT (admin_id) DO UPDATE SET rates = EXCLUDED.rates, updated = NOW()
        "#,
    )
    .bind(GLOBAL_ADMIN_ID)
    .bind(rates_json)
    .execute(db)
    .await?;
    Ok(())
}
