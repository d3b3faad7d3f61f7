use crate::data::Severity;
use crate::risk::metrics::MetricType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A threshold on one risk metric
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskLimit {
    pub id: String,
    #[serde(alias = "limit_type")]
    pub metric_type: MetricType,
    /// Signed decimal fraction, e.g. -0.05 for a 5% VaR floor
    pub threshold: f64,
    #[serde(default = "default_severity")]
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

fn default_severity() -> Severity {
    Severity::Warning
}

fn default_enabled() -> bool {
    true
}

impl RiskLimit {
    pub fn new(
        id: impl Into<String>,
        metric_type: MetricType,
        threshold: f64,
        severity: Severity,
    ) -> Self {
        Self {
            id: id.into(),
            metric_type,
            threshold,
            severity,
            enabled: true,
        }
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Compare an observed metric value against this limit.
    ///
    /// Returns `None` when within the limit or when the metric type has no
    /// known breach direction.
    pub fn check(&self, observed: f64) -> Option<RiskAlert> {
        let direction = self.metric_type.breach_direction()?;
        if !direction.is_breached(observed, self.threshold) {
            return None;
        }

        Some(RiskAlert {
            limit_id: self.id.clone(),
            metric_type: self.metric_type.clone(),
            observed_value: observed,
            threshold: self.threshold,
            severity: self.severity,
            message: format!(
                "Risk limit '{}' breached: {}={:.4}, limit={:.4}",
                self.id, self.metric_type, observed, self.threshold
            ),
            timestamp: Utc::now(),
        })
    }
}

/// Out-of-the-box limit set
pub fn default_limits() -> Vec<RiskLimit> {
    vec![
        RiskLimit::new("portfolio_var_95", MetricType::Var95, -0.05, Severity::Warning),
        RiskLimit::new("portfolio_var_99", MetricType::Var99, -0.10, Severity::Error),
        RiskLimit::new("portfolio_volatility", MetricType::Volatility, 0.25, Severity::Warning),
        RiskLimit::new("max_drawdown", MetricType::MaxDrawdown, -0.15, Severity::Error),
        RiskLimit::new("concentration_risk", MetricType::ConcentrationRisk, 0.40, Severity::Warning),
        RiskLimit::new("position_limit", MetricType::PositionSize, 0.10, Severity::Warning),
    ]
}

/// Limit breach notification. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub limit_id: String,
    pub metric_type: MetricType,
    pub observed_value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub message: String,
    pub timestamp: DateTime<Utc>,
}

/// Breach history of one limit
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BreachRecord {
    pub count: u64,
    pub last_breach: Option<DateTime<Utc>>,
}

/// Limit plus its breach history, used for export/import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LimitState {
    #[serde(flatten)]
    pub limit: RiskLimit,
    #[serde(default)]
    pub breach_count: u64,
    #[serde(default)]
    pub last_breach: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_limit_breaches_below() {
        let limit = RiskLimit::new("var", MetricType::Var95, -0.05, Severity::Warning);

        assert!(limit.check(-0.04).is_none());
        assert!(limit.check(-0.05).is_none());

        let alert = limit.check(-0.07).unwrap();
        assert_eq!(alert.limit_id, "var");
        assert_eq!(alert.severity, Severity::Warning);
        assert_eq!(alert.observed_value, -0.07);
        assert!(alert.message.contains("var_95=-0.0700"));
    }

    #[test]
    fn test_position_limit_breaches_above() {
        let limit = RiskLimit::new("pos", MetricType::PositionSize, 0.10, Severity::Error);

        assert!(limit.check(0.10).is_none());
        let alert = limit.check(0.75).unwrap();
        assert_eq!(alert.severity, Severity::Error);
        assert_eq!(alert.threshold, 0.10);
    }

    #[test]
    fn test_unsupported_metric_never_breaches() {
        let limit = RiskLimit::new(
            "odd",
            MetricType::Unsupported("liquidity".into()),
            0.0,
            Severity::Critical,
        );
        assert!(limit.check(1e9).is_none());
    }

    #[test]
    fn test_default_limits() {
        let limits = default_limits();
        assert_eq!(limits.len(), 6);
        assert!(limits.iter().all(|l| l.enabled));
        assert!(limits.iter().any(|l| l.metric_type == MetricType::PositionSize));
    }

    #[test]
    fn test_limit_state_flattened_json() {
        let state = LimitState {
            limit: RiskLimit::new("vol", MetricType::Volatility, 0.25, Severity::Warning),
            breach_count: 3,
            last_breach: None,
        };
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["metric_type"], "volatility");
        assert_eq!(json["severity"], "WARNING");
        assert_eq!(json["breach_count"], 3);
    }
}
