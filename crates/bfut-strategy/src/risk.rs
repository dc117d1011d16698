//! Risk-based position sizing.
//!
//! The budget for a trade is a fraction of the available balance; the
//! quantity is the budget divided by the distance to the stop, so a stop
//! out loses at most the budget.

use bfut_core::{Price, Size};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Values closer than this are treated as equal.
const EPSILON: Decimal = Decimal::from_parts(1, 0, 0, false, 8);

/// Largest accepted risk fraction per trade.
const MAX_RISK_PCT: Decimal = Decimal::from_parts(5, 0, 0, false, 1);

/// Source of the balance that backs position sizing.
///
/// Live this is the order manager's cached quote balance; in a backtest it
/// is the ledger's cash.
#[cfg_attr(test, mockall::automock)]
pub trait BalanceSource: Send + Sync {
    fn available_balance(&self) -> Option<Decimal>;
}

/// Fixed balance, for tools and tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedBalance(pub Decimal);

impl BalanceSource for FixedBalance {
    fn available_balance(&self) -> Option<Decimal> {
        Some(self.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskConfig {
    /// Fraction of balance risked per trade when none is given.
    #[serde(default = "default_risk_pct")]
    pub default_risk_pct: Decimal,

    /// Decimal places of order quantities.
    #[serde(default = "default_qty_precision")]
    pub qty_precision: u32,

    /// Smallest order quantity worth sending.
    #[serde(default = "default_min_qty")]
    pub min_qty: Decimal,
}

fn default_risk_pct() -> Decimal {
    Decimal::new(1, 2)
}

fn default_qty_precision() -> u32 {
    3
}

fn default_min_qty() -> Decimal {
    Decimal::new(1, 3)
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            default_risk_pct: default_risk_pct(),
            qty_precision: default_qty_precision(),
            min_qty: default_min_qty(),
        }
    }
}

fn risk_pct_in_range(pct: Decimal) -> bool {
    pct > Decimal::ZERO && pct <= MAX_RISK_PCT
}

pub struct RiskPolicy {
    balance: Arc<dyn BalanceSource>,
    config: RiskConfig,
}

impl RiskPolicy {
    pub fn new(balance: Arc<dyn BalanceSource>, mut config: RiskConfig) -> Self {
        if !risk_pct_in_range(config.default_risk_pct) {
            warn!(
                configured = %config.default_risk_pct,
                fallback = %default_risk_pct(),
                "Default risk fraction outside (0, 0.5], using fallback"
            );
            config.default_risk_pct = default_risk_pct();
        }
        Self { balance, config }
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn available_balance(&self) -> Option<Decimal> {
        self.balance.available_balance()
    }

    fn effective_risk_pct(&self, risk_pct: Option<Decimal>) -> Decimal {
        match risk_pct {
            Some(pct) if risk_pct_in_range(pct) => pct,
            Some(pct) => {
                warn!(
                    requested = %pct,
                    default = %self.config.default_risk_pct,
                    "Risk fraction outside (0, 0.5], using default"
                );
                self.config.default_risk_pct
            }
            None => self.config.default_risk_pct,
        }
    }

    /// Quote amount to risk on one trade: balance × risk fraction.
    pub fn position_budget(&self, risk_pct: Option<Decimal>) -> Option<Decimal> {
        let pct = self.effective_risk_pct(risk_pct);
        let Some(balance) = self.balance.available_balance() else {
            warn!("No balance available, cannot size position");
            return None;
        };
        if balance <= Decimal::ZERO {
            warn!(%balance, "Non-positive balance, cannot size position");
            return None;
        }
        let budget = balance * pct;
        debug!(%balance, %pct, %budget, "Position budget");
        Some(budget)
    }

    /// Quantity whose stop-out loss equals `budget`, using the configured
    /// precision and minimum.
    pub fn quantity_from_risk(&self, budget: Decimal, entry: Price, stop: Price) -> Option<Size> {
        quantity_from_risk(
            budget,
            entry,
            stop,
            self.config.qty_precision,
            self.config.min_qty,
        )
    }

    /// Whether risking `qty` between `entry` and `stop` stays within the
    /// budget for `risk_pct`.
    pub fn validate_order_risk(
        &self,
        entry: Price,
        stop: Price,
        qty: Size,
        risk_pct: Option<Decimal>,
    ) -> bool {
        let distance = entry.distance(stop);
        if distance < EPSILON {
            warn!(%entry, %stop, "Entry and stop too close to validate risk");
            return false;
        }
        let Some(budget) = self.position_budget(risk_pct) else {
            return false;
        };
        let Some(proposed) = distance.checked_mul(qty.inner().abs()) else {
            warn!(%distance, %qty, "Order risk out of range");
            return false;
        };
        if proposed > budget {
            warn!(%proposed, %budget, "Order risk exceeds budget");
            return false;
        }
        true
    }
}

/// `round(budget / |entry - stop|, precision)`, or `None` when the inputs
/// are degenerate or the result is below `min_qty`. Rounding is
/// half-to-even.
pub fn quantity_from_risk(
    budget: Decimal,
    entry: Price,
    stop: Price,
    precision: u32,
    min_qty: Decimal,
) -> Option<Size> {
    if budget < EPSILON || entry.inner() < EPSILON || stop.inner() < EPSILON {
        debug!(%budget, %entry, %stop, "Degenerate sizing inputs");
        return None;
    }
    let distance = entry.distance(stop);
    if distance < EPSILON {
        warn!(%entry, %stop, "Entry and stop too close to size position");
        return None;
    }
    let Some(raw) = budget.checked_div(distance) else {
        warn!(%budget, %distance, "Sized quantity out of range");
        return None;
    };
    let qty = raw.round_dp_with_strategy(precision, RoundingStrategy::MidpointNearestEven);
    if qty < min_qty {
        debug!(%qty, %min_qty, "Sized quantity below minimum");
        return None;
    }
    Some(Size::new(qty))
}
