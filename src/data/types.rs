use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;

/// Instrument symbol -> notional value in currency units.
///
/// Ordered so that every calculation walks instruments deterministically.
pub type Positions = BTreeMap<String, f64>;

/// Instrument symbol -> historical return series.
pub type ReturnsData = HashMap<String, ReturnSeries>;

/// Trade direction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    /// +1 for buys, -1 for sells
    pub fn sign(&self) -> f64 {
        match self {
            Side::Buy => 1.0,
            Side::Sell => -1.0,
        }
    }
}

/// Alert / violation severity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE", try_from = "String")]
pub enum Severity {
    Warning,  // Log and carry on
    Error,    // Block the action
    Critical, // Escalate immediately
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Warning => "WARNING",
            Severity::Error => "ERROR",
            Severity::Critical => "CRITICAL",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "WARNING" => Ok(Severity::Warning),
            "ERROR" => Ok(Severity::Error),
            "CRITICAL" => Ok(Severity::Critical),
            other => Err(format!("unknown severity: {}", other)),
        }
    }
}

impl TryFrom<String> for Severity {
    type Error = String;

    fn try_from(s: String) -> Result<Self, String> {
        s.parse()
    }
}

/// Chronologically ordered daily returns for one instrument.
///
/// Serialized as a list of `(date, return)` pairs; deserialization goes
/// through `ReturnSeries::new` so stored order is always by date.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "Vec<(NaiveDate, f64)>", into = "Vec<(NaiveDate, f64)>")]
pub struct ReturnSeries {
    points: Vec<(NaiveDate, f64)>,
}

impl ReturnSeries {
    /// Build from (date, return) pairs. Pairs are sorted by date; a repeated
    /// date keeps its last value.
    pub fn new(mut points: Vec<(NaiveDate, f64)>) -> Self {
        points.sort_by_key(|(date, _)| *date);
        points.dedup_by(|later, earlier| {
            if later.0 == earlier.0 {
                earlier.1 = later.1;
                true
            } else {
                false
            }
        });
        Self { points }
    }

    /// Build a series of consecutive calendar days starting at `start`
    pub fn from_values(start: NaiveDate, values: &[f64]) -> Self {
        let points = values.iter()
            .enumerate()
            .map(|(i, &r)| (start + Duration::days(i as i64), r))
            .collect();
        Self { points }
    }

    pub fn points(&self) -> &[(NaiveDate, f64)] {
        &self.points
    }

    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|(_, r)| *r).collect()
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Date-indexed view for alignment
    pub fn by_date(&self) -> BTreeMap<NaiveDate, f64> {
        self.points.iter().copied().collect()
    }
}

impl From<Vec<(NaiveDate, f64)>> for ReturnSeries {
    fn from(points: Vec<(NaiveDate, f64)>) -> Self {
        Self::new(points)
    }
}

impl From<ReturnSeries> for Vec<(NaiveDate, f64)> {
    fn from(series: ReturnSeries) -> Self {
        series.points
    }
}

/// A proposed trade checked by the pre-trade compliance gate.
///
/// `quantity` is the notional amount traded, always non-negative; the
/// direction comes from `side`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOrder {
    pub symbol: String,
    pub quantity: f64,
    pub side: Side,
}

impl TradeOrder {
    pub fn new(symbol: impl Into<String>, quantity: f64, side: Side) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            side,
        }
    }

    pub fn buy(symbol: impl Into<String>, quantity: f64) -> Self {
        Self::new(symbol, quantity, Side::Buy)
    }

    pub fn sell(symbol: impl Into<String>, quantity: f64) -> Self {
        Self::new(symbol, quantity, Side::Sell)
    }

    /// Change in position notional if the trade fills
    pub fn signed_quantity(&self) -> f64 {
        self.side.sign() * self.quantity.abs()
    }
}

/// A trade that already executed, used by lookback rules (turnover, wash sale)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutedTrade {
    pub symbol: String,
    pub quantity: f64,
    pub side: Side,
    pub timestamp: DateTime<Utc>,
    /// Realized PnL of the trade, when it closed exposure
    pub realized_pnl: Option<f64>,
}

impl ExecutedTrade {
    pub fn new(symbol: impl Into<String>, quantity: f64, side: Side, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: symbol.into(),
            quantity,
            side,
            timestamp,
            realized_pnl: None,
        }
    }

    pub fn with_realized_pnl(mut self, pnl: f64) -> Self {
        self.realized_pnl = Some(pnl);
        self
    }
}

/// Gross notional value: sum of absolute position values
pub fn gross_value(positions: &Positions) -> f64 {
    positions.values().map(|v| v.abs()).sum()
}
