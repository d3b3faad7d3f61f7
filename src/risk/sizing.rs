use crate::data::TradeOrder;
use crate::error::RiskError;
use crate::risk::calculator::RiskCalculator;
use serde::{Deserialize, Serialize};
use statrs::statistics::Statistics;
use tracing::{debug, info};

/// Position sizing and pre-trade risk settings. Every value is a decimal
/// fraction of portfolio value except `fallback_volatility`, a daily
/// standard deviation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SizingConfig {
    /// Largest single position
    pub max_position_pct: f64,
    /// Capital put at one standard deviation per trade
    pub risk_per_trade: f64,
    /// Largest historical VaR one new position may add
    pub max_var_contribution: f64,
    /// Largest parametric VaR of a single trade before it is scaled down
    pub max_trade_var_pct: f64,
    /// Used when the return history is too short to estimate volatility
    pub fallback_volatility: f64,
    pub confidence: f64,
}

impl Default for SizingConfig {
    fn default() -> Self {
        Self {
            max_position_pct: 0.05,
            risk_per_trade: 0.01,
            max_var_contribution: 0.002,
            max_trade_var_pct: 0.01,
            fallback_volatility: 0.02,
            confidence: 0.95,
        }
    }
}

/// Recommended position for one instrument
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSizing {
    pub symbol: String,
    /// Whole units at `price`
    pub units: u64,
    pub position_value: f64,
    /// Daily standard deviation used for the volatility bound
    pub daily_volatility: f64,
    /// Historical VaR loss per unit of value, >= 0
    pub var_per_value: f64,
    /// Expected VaR loss of the position in currency units
    pub risk_amount: f64,
    /// `risk_amount` over portfolio value
    pub risk_pct: f64,
}

/// Outcome of the pre-trade risk check. Trades are never rejected
/// outright; an oversized trade is scaled down to `approved_value`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeRiskCheck {
    pub requested_value: f64,
    pub approved_value: f64,
    pub position_pct: f64,
    /// Parametric VaR of the trade over portfolio value, when returns were given
    pub var_pct: Option<f64>,
    pub message: String,
}

impl TradeRiskCheck {
    pub fn is_adjusted(&self) -> bool {
        self.approved_value < self.requested_value
    }

    /// The trade resized to the approved value
    pub fn adjusted_order(&self, trade: &TradeOrder) -> TradeOrder {
        TradeOrder::new(trade.symbol.clone(), self.approved_value, trade.side)
    }
}

/// Sizes new positions and screens trades against per-trade risk budgets
#[derive(Debug, Clone, Default)]
pub struct PositionSizer {
    calculator: RiskCalculator,
    config: SizingConfig,
}

impl PositionSizer {
    pub fn new(calculator: RiskCalculator, config: SizingConfig) -> Self {
        Self { calculator, config }
    }

    pub fn config(&self) -> &SizingConfig {
        &self.config
    }

    /// Most conservative of three bounds: the VaR budget, the volatility
    /// budget and the position cap.
    pub fn position_size(
        &self,
        symbol: &str,
        price: f64,
        returns: &[f64],
        portfolio_value: f64,
    ) -> Result<PositionSizing, RiskError> {
        positive(price, "price")?;
        positive(portfolio_value, "portfolio value")?;

        let cap = portfolio_value * self.config.max_position_pct;
        let enough_history = returns.len() >= self.calculator.config().min_observations.max(2);

        let daily_volatility = if enough_history {
            returns.std_dev()
        } else {
            self.config.fallback_volatility
        };

        let var_per_value = if enough_history {
            (-self.calculator.value_at_risk(returns, self.config.confidence)?).max(0.0)
        } else {
            0.0
        };

        let var_bound = if var_per_value > 0.0 {
            portfolio_value * self.config.max_var_contribution / var_per_value
        } else {
            cap
        };
        let volatility_bound = if daily_volatility > 0.0 {
            portfolio_value * self.config.risk_per_trade / daily_volatility
        } else {
            cap
        };

        let target = var_bound.min(volatility_bound).min(cap);
        let units = (target / price).floor().max(0.0) as u64;
        let position_value = units as f64 * price;
        let risk_amount = position_value * var_per_value;

        debug!(
            "Sized {}: {} units (var bound {:.2}, vol bound {:.2}, cap {:.2})",
            symbol, units, var_bound, volatility_bound, cap
        );

        Ok(PositionSizing {
            symbol: symbol.to_string(),
            units,
            position_value,
            daily_volatility,
            var_per_value,
            risk_amount,
            risk_pct: risk_amount / portfolio_value,
        })
    }

    /// Check a trade's notional against the position cap and, when a
    /// return history is supplied, its parametric VaR budget.
    pub fn check_trade_risk(
        &self,
        trade: &TradeOrder,
        portfolio_value: f64,
        returns: Option<&[f64]>,
    ) -> Result<TradeRiskCheck, RiskError> {
        positive(portfolio_value, "portfolio value")?;

        let requested = trade.quantity.abs();
        let position_pct = requested / portfolio_value;

        if position_pct > self.config.max_position_pct {
            let approved = portfolio_value * self.config.max_position_pct;
            info!(
                "Trade in {} reduced from {:.2}% to {:.2}% of portfolio",
                trade.symbol,
                position_pct * 100.0,
                self.config.max_position_pct * 100.0
            );
            return Ok(TradeRiskCheck {
                requested_value: requested,
                approved_value: approved,
                position_pct,
                var_pct: None,
                message: format!(
                    "Position size reduced from {:.2}% to {:.2}%",
                    position_pct * 100.0,
                    self.config.max_position_pct * 100.0
                ),
            });
        }

        let var_pct = match returns {
            Some(returns) => match self.calculator.parametric_var(returns, self.config.confidence) {
                Ok(var) => Some((-var).max(0.0) * requested / portfolio_value),
                Err(e) => {
                    debug!("No trade VaR for {}: {}", trade.symbol, e);
                    None
                }
            },
            None => None,
        };

        if let Some(pct) = var_pct.filter(|p| *p > self.config.max_trade_var_pct) {
            let approved = requested * self.config.max_trade_var_pct / pct;
            info!(
                "Trade in {} reduced: VaR {:.2}% over {:.2}% budget",
                trade.symbol,
                pct * 100.0,
                self.config.max_trade_var_pct * 100.0
            );
            return Ok(TradeRiskCheck {
                requested_value: requested,
                approved_value: approved,
                position_pct,
                var_pct,
                message: format!(
                    "Position VaR reduced from {:.2}% to {:.2}%",
                    pct * 100.0,
                    self.config.max_trade_var_pct * 100.0
                ),
            });
        }

        Ok(TradeRiskCheck {
            requested_value: requested,
            approved_value: requested,
            position_pct,
            var_pct,
            message: "Trade meets risk criteria".to_string(),
        })
    }
}

fn positive(value: f64, name: &'static str) -> Result<(), RiskError> {
    if !value.is_finite() {
        return Err(RiskError::NonFinite(name.to_string()));
    }
    if value <= 0.0 {
        return Err(RiskError::NonPositive(name));
    }
    Ok(())
}
