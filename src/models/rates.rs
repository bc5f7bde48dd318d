use serde::{Deserialize, Serialize};

/// Per-message prices applied by the billing pipeline. A rate set can live
/// at three levels -- global default, admin override, user override -- and
/// the resolver (`rr`) picks among them in a fixed priority order (§4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Rates {
    pub price_success: f64,
    pub price_failure: f64,
}

impl Rates {
    pub fn charge_for(&self, success: u64, fail: u64) -> f64 {
        success as f64 * self.price_success + fail as f64 * self.price_failure
    }
}

/// An inclusive range admin-set overrides must fall within. Checked only at
/// write time -- once stored, a user's rates are authoritative even if the
/// range tightens later (§4.6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RateRange {
    pub min_price_success: f64,
    pub max_price_success: f64,
}

impl RateRange {
    pub fn contains(&self, rates: Rates) -> bool {
        rates.price_success >= self.min_price_success
            && rates.price_success <= self.max_price_success
    }
}
