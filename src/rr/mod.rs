//! Rates Resolver (RR): decides which price list applies to a shard's
//! billing. Grounded in `original_source/api.py`'s
//! `_get_user_rates`/`_get_global_rates`/`_get_user_rate_source` (§4.6):
//! a user-level override always wins if present, regardless of who set it;
//! otherwise an admin-set global default applies; otherwise the statically
//! configured default.

use sqlx::PgPool;

use crate::config::RatesSettings;
use crate::models::id::Id;
use crate::models::rates::Rates;
use crate::repo;

pub const SUPER_ADMIN: &str = "super_admin";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateSource {
    User,
    Admin,
    Default,
}

pub async fn resolve(
    db: &PgPool,
    user_id: &Id,
    defaults: &RatesSettings,
) -> Result<(Rates, RateSource), sqlx::Error> {
    if let Some(rates) = repo::users::get_rates(db, user_id).await? {
        return Ok((rates, RateSource::User));
    }

    if let Some(rates) = repo::rates::get_global_rates(db).await? {
        return Ok((rates, RateSource::Admin));
    }

    Ok((
        Rates {
            price_success: defaults.default_send_price,
            price_failure: defaults.default_fail_price,
        },
        RateSource::Default,
    ))
}

#[derive(Debug, thiserror::Error)]
pub enum RateWriteError {
    #[error("rate {0:?} is outside the admin-configured range")]
    OutOfRange(Rates),
    #[error(transparent)]
    Db(#[from] sqlx::Error),
}

/// Applies a rate override for `user_id`. A `super_admin` write is
/// unconstrained; any other writer is rejected (not clamped) if the
/// requested rate falls outside the configured range (§4.6).
pub async fn set_user_rate_override(
    db: &PgPool,
    user_id: &Id,
    rates: Rates,
    set_by: &str,
) -> Result<Rates, RateWriteError> {
    if set_by != SUPER_ADMIN {
        if let Some(range) = repo::rates::get_rate_range(db).await? {
            if !range.contains(rates) {
                return Err(RateWriteError::OutOfRange(rates));
            }
        }
    }

    repo::users::set_rates(db, user_id, rates, set_by).await?;
    Ok(rates)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rates::RateRange;

    #[test]
    fn rate_range_rejects_out_of_range_send_price() {
        let range = RateRange {
            min_price_success: 0.5,
            max_price_success: 2.0,
        };
        assert!(!range.contains(Rates {
            price_success: 5.0,
            price_failure: 0.0,
        }));
        assert!(range.contains(Rates {
            price_success: 1.0,
            price_failure: 0.0,
        }));
    }
}
