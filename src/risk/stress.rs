use crate::data::{gross_value, Positions};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Shock key applied to every instrument the scenario does not name
pub const WILDCARD: &str = "*";

/// A named set of fractional price shocks
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StressScenario {
    #[serde(default)]
    pub description: String,
    /// Instrument symbol (or `"*"`) -> fractional shock, e.g. -0.20
    pub shocks: BTreeMap<String, f64>,
}

impl StressScenario {
    pub fn new(description: impl Into<String>) -> Self {
        Self {
            description: description.into(),
            shocks: BTreeMap::new(),
        }
    }

    pub fn with_shock(mut self, key: impl Into<String>, shock: f64) -> Self {
        self.shocks.insert(key.into(), shock);
        self
    }

    /// Shock for `symbol`: an explicit entry wins over the wildcard;
    /// instruments matched by neither are not shocked.
    pub fn shock_for(&self, symbol: &str) -> Option<f64> {
        self.shocks.get(symbol)
            .or_else(|| self.shocks.get(WILDCARD))
            .copied()
    }

    /// Simulated value change of `positions` under this scenario
    pub fn apply(&self, positions: &Positions) -> StressResult {
        let value_before: f64 = positions.values().sum();
        let value_change: f64 = positions.iter()
            .filter_map(|(symbol, value)| self.shock_for(symbol).map(|shock| value * shock))
            .sum();

        let gross = gross_value(positions);
        let change_pct = if gross > 0.0 { value_change / gross } else { 0.0 };

        StressResult {
            value_before,
            value_after: value_before + value_change,
            value_change,
            change_pct,
        }
    }
}

/// Outcome of one stress scenario
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StressResult {
    pub value_before: f64,
    pub value_after: f64,
    pub value_change: f64,
    /// Change as a fraction of gross portfolio value
    pub change_pct: f64,
}

/// Run every scenario against the same position snapshot
pub fn run_stress_tests(
    positions: &Positions,
    scenarios: &BTreeMap<String, StressScenario>,
) -> BTreeMap<String, StressResult> {
    scenarios.iter()
        .map(|(name, scenario)| (name.clone(), scenario.apply(positions)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn positions(entries: &[(&str, f64)]) -> Positions {
        entries.iter().map(|(s, v)| (s.to_string(), *v)).collect()
    }

    #[test]
    fn test_wildcard_market_crash() {
        let book = positions(&[("A", 100000.0), ("B", 200000.0)]);
        let crash = StressScenario::new("20% market decline").with_shock("*", -0.20);

        let result = crash.apply(&book);
        assert!((result.value_change - (-60000.0)).abs() < 1e-6);
        assert!((result.value_after - 240000.0).abs() < 1e-6);
        assert!((result.change_pct - (-0.20)).abs() < 1e-12);
    }

    #[test]
    fn test_named_shock_overrides_wildcard() {
        let book = positions(&[("A", 100000.0), ("B", 200000.0)]);
        let scenario = StressScenario::new("A rallies")
            .with_shock("*", -0.10)
            .with_shock("A", 0.05);

        let result = scenario.apply(&book);
        // A: +5000, B: -20000
        assert!((result.value_change - (-15000.0)).abs() < 1e-6);
    }

    #[test]
    fn test_unmatched_instruments_unshocked() {
        let book = positions(&[("A", 100000.0), ("B", 200000.0)]);
        let scenario = StressScenario::new("A only").with_shock("A", -0.50);

        assert!((scenario.apply(&book).value_change - (-50000.0)).abs() < 1e-6);
        assert_eq!(scenario.shock_for("B"), None);
    }

    #[test]
    fn test_run_all_scenarios() {
        let book = positions(&[("A", 1000.0)]);
        let mut scenarios = BTreeMap::new();
        scenarios.insert("crash".to_string(), StressScenario::new("").with_shock("*", -0.3));
        scenarios.insert("rally".to_string(), StressScenario::new("").with_shock("*", 0.1));

        let results = run_stress_tests(&book, &scenarios);
        assert_eq!(results.len(), 2);
        assert!((results["crash"].value_change - (-300.0)).abs() < 1e-9);
        assert!((results["rally"].value_change - 100.0).abs() < 1e-9);
    }
}
