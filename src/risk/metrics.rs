use crate::error::RiskError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Which side of a threshold counts as a breach
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreachDirection {
    /// Loss-type metrics: breach when the observed value is more negative
    Below,
    /// Magnitude-type metrics: breach when the observed value is larger
    Above,
}

impl BreachDirection {
    pub fn is_breached(&self, observed: f64, threshold: f64) -> bool {
        match self {
            BreachDirection::Below => observed < threshold,
            BreachDirection::Above => observed > threshold,
        }
    }
}

/// Risk metric identifiers as they appear in configuration.
///
/// Unrecognised names are kept as `Unsupported` so that a newer config file
/// never fails to load; limits on them are skipped.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MetricType {
    Var95,
    Var99,
    VarAmount95,
    VarAmount99,
    Cvar95,
    Cvar99,
    ParametricVar95,
    Volatility,
    DownsideDeviation,
    MaxDrawdown,
    Beta,
    SharpeRatio,
    ConcentrationRisk,
    PositionSize,
    Unsupported(String),
}

impl MetricType {
    /// Every metric the calculator knows how to produce
    pub const SUPPORTED: [MetricType; 14] = [
        MetricType::Var95,
        MetricType::Var99,
        MetricType::VarAmount95,
        MetricType::VarAmount99,
        MetricType::Cvar95,
        MetricType::Cvar99,
        MetricType::ParametricVar95,
        MetricType::Volatility,
        MetricType::DownsideDeviation,
        MetricType::MaxDrawdown,
        MetricType::Beta,
        MetricType::SharpeRatio,
        MetricType::ConcentrationRisk,
        MetricType::PositionSize,
    ];

    pub fn name(&self) -> &str {
        match self {
            MetricType::Var95 => "var_95",
            MetricType::Var99 => "var_99",
            MetricType::VarAmount95 => "var_95_amount",
            MetricType::VarAmount99 => "var_99_amount",
            MetricType::Cvar95 => "cvar_95",
            MetricType::Cvar99 => "cvar_99",
            MetricType::ParametricVar95 => "parametric_var_95",
            MetricType::Volatility => "volatility",
            MetricType::DownsideDeviation => "downside_deviation",
            MetricType::MaxDrawdown => "max_drawdown",
            MetricType::Beta => "beta",
            MetricType::SharpeRatio => "sharpe_ratio",
            MetricType::ConcentrationRisk => "concentration_risk",
            MetricType::PositionSize => "position_size",
            MetricType::Unsupported(name) => name,
        }
    }

    pub fn is_supported(&self) -> bool {
        !matches!(self, MetricType::Unsupported(_))
    }

    /// Breach direction implied by the metric's semantics, `None` for
    /// unsupported metrics.
    pub fn breach_direction(&self) -> Option<BreachDirection> {
        match self {
            MetricType::Var95
            | MetricType::Var99
            | MetricType::VarAmount95
            | MetricType::VarAmount99
            | MetricType::Cvar95
            | MetricType::Cvar99
            | MetricType::ParametricVar95
            | MetricType::MaxDrawdown
            | MetricType::SharpeRatio => Some(BreachDirection::Below),
            MetricType::Volatility
            | MetricType::DownsideDeviation
            | MetricType::Beta
            | MetricType::ConcentrationRisk
            | MetricType::PositionSize => Some(BreachDirection::Above),
            MetricType::Unsupported(_) => None,
        }
    }
}

impl FromStr for MetricType {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase();
        let metric = MetricType::SUPPORTED
            .iter()
            .find(|m| m.name() == normalized)
            .cloned()
            .unwrap_or(MetricType::Unsupported(s.trim().to_string()));
        Ok(metric)
    }
}

impl From<String> for MetricType {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(metric) => metric,
            Err(never) => match never {},
        }
    }
}

impl From<MetricType> for String {
    fn from(m: MetricType) -> Self {
        m.name().to_string()
    }
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Output of a portfolio risk calculation.
///
/// Every supported metric ends up either in `metrics` or in `unavailable`
/// together with the reason it could not be computed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RiskReport {
    pub portfolio_value: f64,
    pub observations: usize,
    pub metrics: BTreeMap<MetricType, f64>,
    pub unavailable: BTreeMap<MetricType, String>,
}

impl RiskReport {
    pub fn new(portfolio_value: f64) -> Self {
        Self {
            portfolio_value,
            ..Default::default()
        }
    }

    pub fn get(&self, metric: &MetricType) -> Option<f64> {
        self.metrics.get(metric).copied()
    }

    pub fn is_available(&self, metric: &MetricType) -> bool {
        self.metrics.contains_key(metric)
    }

    /// Store a metric outcome, routing failures to `unavailable`
    pub(crate) fn record(&mut self, metric: MetricType, outcome: Result<f64, RiskError>) {
        match outcome {
            Ok(value) => {
                self.metrics.insert(metric, value);
            }
            Err(e) => {
                tracing::debug!("Metric {} unavailable: {}", metric, e);
                self.unavailable.insert(metric, e.to_string());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_known_metrics() {
        assert_eq!("var_95".parse::<MetricType>().unwrap(), MetricType::Var95);
        assert_eq!("Concentration_Risk".parse::<MetricType>().unwrap(), MetricType::ConcentrationRisk);
        assert_eq!(MetricType::from("position_size".to_string()), MetricType::PositionSize);
    }

    #[test]
    fn test_unknown_metric_is_unsupported() {
        let metric: MetricType = "liquidity_score".parse().unwrap();
        assert_eq!(metric, MetricType::Unsupported("liquidity_score".into()));
        assert!(!metric.is_supported());
        assert!(metric.breach_direction().is_none());
    }

    #[test]
    fn test_breach_directions() {
        let below = MetricType::Var95.breach_direction().unwrap();
        assert!(below.is_breached(-0.06, -0.05));
        assert!(!below.is_breached(-0.04, -0.05));

        let above = MetricType::Volatility.breach_direction().unwrap();
        assert!(above.is_breached(0.30, 0.25));
        assert!(!above.is_breached(0.25, 0.25));
    }

    #[test]
    fn test_metric_serde_round_trip_names() {
        let json = serde_json::to_string(&MetricType::MaxDrawdown).unwrap();
        assert_eq!(json, "\"max_drawdown\"");
        let back: MetricType = serde_json::from_str("\"max_drawdown\"").unwrap();
        assert_eq!(back, MetricType::MaxDrawdown);
    }

    #[test]
    fn test_report_records_failures() {
        let mut report = RiskReport::new(100.0);
        report.record(MetricType::Beta, Err(RiskError::MissingBenchmark));
        report.record(MetricType::Volatility, Ok(0.2));

        assert_eq!(report.get(&MetricType::Volatility), Some(0.2));
        assert!(!report.is_available(&MetricType::Beta));
        assert!(report.unavailable[&MetricType::Beta].contains("benchmark"));
    }
}
