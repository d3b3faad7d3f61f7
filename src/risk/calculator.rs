use crate::data::{Positions, ReturnSeries, ReturnsData};
use crate::error::RiskError;
use crate::risk::metrics::{MetricType, RiskReport};
use crate::risk::portfolio::{align, PortfolioWeights};
use crate::risk::stress::{run_stress_tests, StressResult, StressScenario};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use statrs::distribution::{ContinuousCDF, Normal};
use statrs::statistics::Statistics;
use tracing::{debug, warn};

/// Standard deviations below this are treated as zero
const ZERO_VARIANCE_EPS: f64 = 1e-12;

/// Calculator settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CalculatorConfig {
    /// Minimum observations before any return-based metric is computed
    pub min_observations: usize,

    /// Annual risk-free rate as a decimal fraction
    pub risk_free_rate: f64,

    /// Periods per year used for annualisation
    pub periods_per_year: usize,

    /// Number of most recent observations used for volatility
    pub volatility_window: usize,

    /// Symbol in the returns data to use as the beta benchmark
    pub benchmark: Option<String>,
}

impl Default for CalculatorConfig {
    fn default() -> Self {
        Self {
            min_observations: 30,
            risk_free_rate: 0.0,
            periods_per_year: 252,
            volatility_window: 252,
            benchmark: None,
        }
    }
}

/// Portfolio VaR accounting for correlation, in currency units
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelatedVar {
    pub confidence: f64,
    pub portfolio_var: f64,
    /// Standalone historical VaR of each position
    pub components: BTreeMap<String, f64>,
    /// Portfolio VaR minus the sum of standalone VaRs; positive when
    /// holdings offset each other
    pub diversification_benefit: f64,
}

/// Pure risk-metric calculator.
///
/// All return-based metrics are signed decimal fractions (-0.05 = -5%)
/// except the `var_*_amount` metrics, which are in currency units.
#[derive(Debug, Clone, Default)]
pub struct RiskCalculator {
    config: CalculatorConfig,
}

impl RiskCalculator {
    pub fn new(config: CalculatorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &CalculatorConfig {
        &self.config
    }

    fn annualization(&self) -> f64 {
        (self.config.periods_per_year as f64).sqrt()
    }

    fn require_observations(&self, actual: usize) -> Result<(), RiskError> {
        let required = self.config.min_observations.max(2);
        if actual < required {
            return Err(RiskError::InsufficientData { required, actual });
        }
        Ok(())
    }

    fn check_confidence(confidence: f64) -> Result<(), RiskError> {
        if !(confidence > 0.0 && confidence < 1.0) {
            return Err(RiskError::InvalidConfidence(confidence));
        }
        Ok(())
    }

    /// Historical-simulation VaR: the return at the (1 - confidence)
    /// percentile of the sorted series.
    pub fn value_at_risk(&self, returns: &[f64], confidence: f64) -> Result<f64, RiskError> {
        Self::check_confidence(confidence)?;
        self.require_observations(returns.len())?;

        let mut sorted = returns.to_vec();
        sorted.sort_by(|a, b| a.total_cmp(b));

        // 1 - 0.95 is not exact in binary; nudge so 100 * 0.05 ceils to 5
        let n = sorted.len();
        let tail_count = ((n as f64) * (1.0 - confidence) - 1e-9).ceil() as usize;
        let index = tail_count.saturating_sub(1).min(n - 1);

        Ok(sorted[index])
    }

    /// Expected shortfall: mean of the returns at or beyond VaR
    pub fn conditional_var(&self, returns: &[f64], confidence: f64) -> Result<f64, RiskError> {
        let var = self.value_at_risk(returns, confidence)?;
        let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= var).collect();

        // VaR is itself a member of the series, so the tail is never empty
        Ok(tail.iter().sum::<f64>() / tail.len() as f64)
    }

    /// Variance-covariance VaR assuming normally distributed returns
    pub fn parametric_var(&self, returns: &[f64], confidence: f64) -> Result<f64, RiskError> {
        Self::check_confidence(confidence)?;
        self.require_observations(returns.len())?;

        let z = Self::lower_quantile(confidence)?;
        Ok(returns.mean() + z * returns.std_dev())
    }

    /// Standard normal quantile at 1 - confidence (negative)
    fn lower_quantile(confidence: f64) -> Result<f64, RiskError> {
        let normal = Normal::new(0.0, 1.0)
            .map_err(|e| RiskError::NonFinite(format!("standard normal: {}", e)))?;
        Ok(normal.inverse_cdf(1.0 - confidence))
    }

    /// Annualised sample standard deviation over the volatility window
    pub fn volatility(&self, returns: &[f64]) -> Result<f64, RiskError> {
        self.require_observations(returns.len())?;

        let window = self.config.volatility_window.max(2);
        let recent = &returns[returns.len().saturating_sub(window)..];

        Ok(recent.std_dev() * self.annualization())
    }

    /// Annualised sample standard deviation of the negative returns only
    pub fn downside_deviation(&self, returns: &[f64]) -> Result<f64, RiskError> {
        self.require_observations(returns.len())?;

        let negatives: Vec<f64> = returns.iter().copied().filter(|r| *r < 0.0).collect();
        if negatives.len() < 2 {
            return Ok(0.0);
        }

        Ok(negatives.std_dev() * self.annualization())
    }

    /// Largest peak-to-trough decline of the compounded return curve,
    /// starting from an initial value of 1.0. Returned as a value <= 0.
    pub fn max_drawdown(&self, returns: &[f64]) -> Result<f64, RiskError> {
        self.require_observations(returns.len())?;

        let mut value = 1.0;
        let mut peak = 1.0;
        let mut worst = 0.0_f64;

        for r in returns {
            value *= 1.0 + r;
            if value > peak {
                peak = value;
            }
            let drawdown = (value - peak) / peak;
            if drawdown < worst {
                worst = drawdown;
            }
        }

        Ok(worst)
    }

    /// Sample covariance with the benchmark over sample benchmark variance.
    /// Series are paired on their common dates.
    pub fn beta(&self, returns: &ReturnSeries, benchmark: &ReturnSeries) -> Result<f64, RiskError> {
        let (asset, market) = align(returns, benchmark);
        self.require_observations(asset.len())?;

        let market_variance = market.as_slice().variance();
        if market_variance.sqrt() < ZERO_VARIANCE_EPS {
            return Err(RiskError::ZeroVariance("beta"));
        }

        Ok(asset.iter().covariance(market.iter()) / market_variance)
    }

    /// (annualised mean - risk-free rate) / annualised volatility
    pub fn sharpe_ratio(&self, returns: &[f64]) -> Result<f64, RiskError> {
        self.require_observations(returns.len())?;

        let std_dev = returns.std_dev();
        if std_dev < ZERO_VARIANCE_EPS {
            return Err(RiskError::ZeroVariance("sharpe_ratio"));
        }

        let annual_mean = returns.mean() * self.config.periods_per_year as f64;
        Ok((annual_mean - self.config.risk_free_rate) / (std_dev * self.annualization()))
    }

    /// Herfindahl-Hirschman index over position weights, in (0, 1]
    pub fn concentration_risk(&self, positions: &Positions) -> Result<f64, RiskError> {
        Ok(PortfolioWeights::from_positions(positions)?.herfindahl_index())
    }

    /// Largest single position as a fraction of gross value
    pub fn largest_position_weight(&self, positions: &Positions) -> Result<f64, RiskError> {
        Ok(PortfolioWeights::from_positions(positions)?.largest_weight())
    }

    /// Portfolio VaR in currency units: the VaR fraction of the weighted
    /// return series scaled by gross portfolio value.
    pub fn portfolio_var(
        &self,
        positions: &Positions,
        returns: &ReturnsData,
        confidence: f64,
    ) -> Result<f64, RiskError> {
        let weights = PortfolioWeights::from_positions(positions)?;
        let series = weights.portfolio_returns(returns)?;
        let var = self.value_at_risk(&series.values(), confidence)?;
        Ok(var * weights.gross_value())
    }

    /// Variance-covariance portfolio VaR in currency units from the sample
    /// covariance of every held instrument on their common dates, with each
    /// position's standalone historical VaR over the same dates.
    pub fn correlated_var(
        &self,
        positions: &Positions,
        returns: &ReturnsData,
        confidence: f64,
    ) -> Result<CorrelatedVar, RiskError> {
        Self::check_confidence(confidence)?;
        let weights = PortfolioWeights::from_positions(positions)?;
        let aligned = weights.aligned_returns(returns)?;
        self.require_observations(aligned.dates.len())?;

        let mut variance = 0.0;
        for a in &aligned.columns {
            for b in &aligned.columns {
                variance += a.weight * b.weight * a.values.iter().covariance(b.values.iter());
            }
        }
        let z = Self::lower_quantile(confidence)?;
        let portfolio_var = z * variance.max(0.0).sqrt() * weights.gross_value();

        let mut components = BTreeMap::new();
        for column in &aligned.columns {
            let notional = column.weight * weights.gross_value();
            // a short loses on the upper tail
            let exposure: Vec<f64> = column.values.iter().map(|r| r * notional.signum()).collect();
            let var = self.value_at_risk(&exposure, confidence)?;
            components.insert(column.symbol.clone(), var * notional.abs());
        }

        let undiversified: f64 = components.values().sum();
        debug!(
            "Correlated VaR {:.2} vs undiversified {:.2} over {} instruments",
            portfolio_var,
            undiversified,
            components.len()
        );

        Ok(CorrelatedVar {
            confidence,
            portfolio_var,
            diversification_benefit: portfolio_var - undiversified,
            components,
        })
    }

    /// Simulated value change per scenario
    pub fn stress_test(
        &self,
        positions: &Positions,
        scenarios: &BTreeMap<String, StressScenario>,
    ) -> BTreeMap<String, StressResult> {
        run_stress_tests(positions, scenarios)
    }

    /// All portfolio metrics, using the configured benchmark symbol (if any)
    /// from `returns` for beta.
    pub fn calculate_portfolio_risk(
        &self,
        positions: &Positions,
        returns: &ReturnsData,
    ) -> Result<RiskReport, RiskError> {
        let benchmark = self.config.benchmark
            .as_ref()
            .and_then(|symbol| returns.get(symbol));
        self.calculate_portfolio_risk_with_benchmark(positions, returns, benchmark)
    }

    /// All portfolio metrics. Only an empty or zero-valued position set is
    /// an error; any other failure leaves the affected metric unavailable.
    pub fn calculate_portfolio_risk_with_benchmark(
        &self,
        positions: &Positions,
        returns: &ReturnsData,
        benchmark: Option<&ReturnSeries>,
    ) -> Result<RiskReport, RiskError> {
        let weights = PortfolioWeights::from_positions(positions)?;
        let mut report = RiskReport::new(weights.gross_value());

        report.record(MetricType::ConcentrationRisk, Ok(weights.herfindahl_index()));
        report.record(MetricType::PositionSize, Ok(weights.largest_weight()));

        match weights.portfolio_returns(returns) {
            Ok(series) => {
                report.observations = series.len();
                self.fill_return_metrics(&mut report, &series, weights.gross_value(), benchmark);
            }
            Err(e) => {
                warn!("Portfolio return series unavailable: {}", e);
                for metric in RETURN_METRICS {
                    report.record(metric, Err(e.clone()));
                }
            }
        }

        debug!(
            "Portfolio risk: value={:.2} observations={} available={} unavailable={}",
            report.portfolio_value,
            report.observations,
            report.metrics.len(),
            report.unavailable.len()
        );

        Ok(report)
    }

    /// Return-based metrics for a single instrument holding `notional`
    pub fn calculate_instrument_risk(
        &self,
        series: &ReturnSeries,
        notional: f64,
        benchmark: Option<&ReturnSeries>,
    ) -> RiskReport {
        let mut report = RiskReport::new(notional.abs());
        report.observations = series.len();
        self.fill_return_metrics(&mut report, series, notional.abs(), benchmark);
        report
    }

    fn fill_return_metrics(
        &self,
        report: &mut RiskReport,
        series: &ReturnSeries,
        value: f64,
        benchmark: Option<&ReturnSeries>,
    ) {
        let returns = series.values();

        let var_95 = self.value_at_risk(&returns, 0.95);
        let var_99 = self.value_at_risk(&returns, 0.99);
        report.record(MetricType::VarAmount95, var_95.clone().map(|v| v * value));
        report.record(MetricType::VarAmount99, var_99.clone().map(|v| v * value));
        report.record(MetricType::Var95, var_95);
        report.record(MetricType::Var99, var_99);
        report.record(MetricType::Cvar95, self.conditional_var(&returns, 0.95));
        report.record(MetricType::Cvar99, self.conditional_var(&returns, 0.99));
        report.record(MetricType::ParametricVar95, self.parametric_var(&returns, 0.95));
        report.record(MetricType::Volatility, self.volatility(&returns));
        report.record(MetricType::DownsideDeviation, self.downside_deviation(&returns));
        report.record(MetricType::MaxDrawdown, self.max_drawdown(&returns));
        report.record(MetricType::SharpeRatio, self.sharpe_ratio(&returns));

        let beta = match benchmark {
            Some(bench) => self.beta(series, bench),
            None => Err(RiskError::MissingBenchmark),
        };
        report.record(MetricType::Beta, beta);
    }
}

/// Metrics derived from the portfolio return series
const RETURN_METRICS: [MetricType; 12] = [
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
    MetricType::SharpeRatio,
    MetricType::Beta,
];

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use proptest::prelude::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn positions(entries: &[(&str, f64)]) -> Positions {
        entries.iter().map(|(s, v)| (s.to_string(), *v)).collect()
    }

    /// Deterministic zig-zag returns with a few large losses
    fn sample_returns(n: usize) -> Vec<f64> {
        (0..n)
            .map(|i| {
                let base = ((i * 7919) % 41) as f64 / 1000.0 - 0.02;
                if i % 13 == 0 { base - 0.03 } else { base }
            })
            .collect()
    }

    #[test]
    fn test_var_constant_losses() {
        let calc = RiskCalculator::default();
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &[-0.01; 30]));
        returns.insert("B".into(), ReturnSeries::from_values(start(), &[-0.01; 30]));
        let book = positions(&[("A", 500000.0), ("B", 500000.0)]);

        let report = calc.calculate_portfolio_risk(&book, &returns).unwrap();

        let var = report.get(&MetricType::Var95).unwrap();
        assert!((var - (-0.01)).abs() < 1e-12);
        let amount = report.get(&MetricType::VarAmount95).unwrap();
        assert!((amount - (-10000.0)).abs() < 1e-6);
        assert!((calc.portfolio_var(&book, &returns, 0.95).unwrap() - (-10000.0)).abs() < 1e-6);

        // Constant returns: volatility is numerically zero
        assert!(report.get(&MetricType::Volatility).unwrap() < 1e-9);
        // and Sharpe is undefined
        assert!(!report.is_available(&MetricType::SharpeRatio));
    }

    #[test]
    fn test_var_percentile_index() {
        let calc = RiskCalculator::default();
        // 100 returns: -0.50, -0.49, ..., 0.49
        let returns: Vec<f64> = (0..100).map(|i| (i as f64 - 50.0) / 100.0).collect();

        // ceil(100 * 0.05) - 1 = 4th index
        assert!((calc.value_at_risk(&returns, 0.95).unwrap() - (-0.46)).abs() < 1e-12);
        // ceil(100 * 0.01) - 1 = 0th index
        assert!((calc.value_at_risk(&returns, 0.99).unwrap() - (-0.50)).abs() < 1e-12);
        // tail mean of -0.50..-0.46
        assert!((calc.conditional_var(&returns, 0.95).unwrap() - (-0.48)).abs() < 1e-12);
    }

    #[test]
    fn test_var_requires_minimum_observations() {
        let calc = RiskCalculator::default();
        let err = calc.value_at_risk(&[-0.01; 10], 0.95).unwrap_err();
        assert_eq!(err, RiskError::InsufficientData { required: 30, actual: 10 });
    }

    #[test]
    fn test_invalid_confidence() {
        let calc = RiskCalculator::default();
        assert_eq!(
            calc.value_at_risk(&sample_returns(40), 1.0).unwrap_err(),
            RiskError::InvalidConfidence(1.0)
        );
    }

    #[test]
    fn test_parametric_var_normal_quantile() {
        let calc = RiskCalculator::default();
        let returns = sample_returns(60);
        let expected = returns.as_slice().mean() - 1.6448536269514722 * returns.as_slice().std_dev();

        let var = calc.parametric_var(&returns, 0.95).unwrap();
        assert!((var - expected).abs() < 1e-9);
    }

    #[test]
    fn test_volatility_annualised() {
        let calc = RiskCalculator::default();
        let returns: Vec<f64> = (0..40).map(|i| if i % 2 == 0 { 0.01 } else { -0.01 }).collect();

        let vol = calc.volatility(&returns).unwrap();
        let expected = returns.as_slice().std_dev() * 252f64.sqrt();
        assert!((vol - expected).abs() < 1e-12);
        assert!(vol > 0.15 && vol < 0.17);
    }

    #[test]
    fn test_volatility_window_uses_recent_observations() {
        let calc = RiskCalculator::new(CalculatorConfig {
            min_observations: 2,
            volatility_window: 10,
            ..Default::default()
        });
        let mut returns = vec![0.5, -0.5, 0.5, -0.5];
        returns.extend(std::iter::repeat(0.001).take(10));

        assert!(calc.volatility(&returns).unwrap() < 1e-9);
    }

    #[test]
    fn test_max_drawdown() {
        let calc = RiskCalculator::new(CalculatorConfig {
            min_observations: 2,
            ..Default::default()
        });

        // 1.0 -> 1.1 -> 0.88 -> 0.968: peak 1.1, trough 0.88 => -20%
        let dd = calc.max_drawdown(&[0.10, -0.20, 0.10]).unwrap();
        assert!((dd - (-0.20)).abs() < 1e-12);

        // first-day loss counts against the starting value
        let dd = calc.max_drawdown(&[-0.05, 0.01]).unwrap();
        assert!((dd - (-0.05)).abs() < 1e-12);

        assert_eq!(calc.max_drawdown(&[0.01, 0.02, 0.03]).unwrap(), 0.0);
    }

    #[test]
    fn test_beta_against_scaled_benchmark() {
        let calc = RiskCalculator::default();
        let market = sample_returns(50);
        let asset: Vec<f64> = market.iter().map(|r| 1.5 * r).collect();

        let beta = calc.beta(
            &ReturnSeries::from_values(start(), &asset),
            &ReturnSeries::from_values(start(), &market),
        ).unwrap();
        assert!((beta - 1.5).abs() < 1e-9);
    }

    #[test]
    fn test_beta_flat_benchmark() {
        let calc = RiskCalculator::default();
        let err = calc.beta(
            &ReturnSeries::from_values(start(), &sample_returns(40)),
            &ReturnSeries::from_values(start(), &[0.001; 40]),
        ).unwrap_err();
        assert_eq!(err, RiskError::ZeroVariance("beta"));
    }

    #[test]
    fn test_sharpe_ratio_with_risk_free_rate() {
        let returns = sample_returns(60);
        let mean = returns.as_slice().mean();
        let sd = returns.as_slice().std_dev();

        let calc = RiskCalculator::new(CalculatorConfig {
            risk_free_rate: 0.02,
            ..Default::default()
        });
        let sharpe = calc.sharpe_ratio(&returns).unwrap();
        let expected = (mean * 252.0 - 0.02) / (sd * 252f64.sqrt());
        assert!((sharpe - expected).abs() < 1e-9);
    }

    #[test]
    fn test_concentration_single_and_equal() {
        let calc = RiskCalculator::default();
        assert_eq!(calc.concentration_risk(&positions(&[("A", 42.0)])).unwrap(), 1.0);

        let hhi = calc.concentration_risk(&positions(&[
            ("A", 1.0), ("B", 1.0), ("C", 1.0), ("D", 1.0), ("E", 1.0),
        ])).unwrap();
        assert!((hhi - 0.2).abs() < 1e-12);
    }

    #[test]
    fn test_empty_portfolio_fails_loudly() {
        let calc = RiskCalculator::default();
        let err = calc.calculate_portfolio_risk(&Positions::new(), &ReturnsData::new()).unwrap_err();
        assert!(err.is_fatal());
    }

    #[test]
    fn test_missing_returns_do_not_abort_report() {
        let calc = RiskCalculator::default();
        let book = positions(&[("A", 100.0), ("B", 100.0)]);
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &sample_returns(40)));

        let report = calc.calculate_portfolio_risk(&book, &returns).unwrap();

        assert_eq!(report.get(&MetricType::ConcentrationRisk), Some(0.5));
        assert_eq!(report.get(&MetricType::PositionSize), Some(0.5));
        assert!(!report.is_available(&MetricType::Var95));
        assert!(report.unavailable[&MetricType::Var95].contains("B"));
    }

    #[test]
    fn test_missing_benchmark_only_drops_beta() {
        let calc = RiskCalculator::default();
        let book = positions(&[("A", 100.0)]);
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &sample_returns(40)));

        let report = calc.calculate_portfolio_risk(&book, &returns).unwrap();

        assert!(!report.is_available(&MetricType::Beta));
        for metric in [MetricType::Var95, MetricType::Cvar95, MetricType::Volatility, MetricType::MaxDrawdown] {
            assert!(report.is_available(&metric), "{} missing", metric);
        }
    }

    #[test]
    fn test_configured_benchmark_symbol() {
        let calc = RiskCalculator::new(CalculatorConfig {
            benchmark: Some("SPY".into()),
            ..Default::default()
        });
        let book = positions(&[("A", 100.0)]);
        let market = sample_returns(40);
        let asset: Vec<f64> = market.iter().map(|r| 0.5 * r).collect();
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &asset));
        returns.insert("SPY".into(), ReturnSeries::from_values(start(), &market));

        let report = calc.calculate_portfolio_risk(&book, &returns).unwrap();
        assert!((report.get(&MetricType::Beta).unwrap() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_instrument_risk() {
        let calc = RiskCalculator::default();
        let series = ReturnSeries::from_values(start(), &sample_returns(40));

        let report = calc.calculate_instrument_risk(&series, 2000.0, None);
        let var = report.get(&MetricType::Var95).unwrap();
        let amount = report.get(&MetricType::VarAmount95).unwrap();
        assert!((amount - var * 2000.0).abs() < 1e-9);
        assert_eq!(report.observations, 40);
    }

    #[test]
    fn test_closed_position_keeps_return_metrics() {
        let calc = RiskCalculator::default();
        let book = positions(&[("A", 1000.0), ("CLOSED", 0.0)]);
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &sample_returns(40)));

        let report = calc.calculate_portfolio_risk(&book, &returns).unwrap();
        assert!(report.is_available(&MetricType::Var95));
        assert!(report.is_available(&MetricType::MaxDrawdown));
        assert_eq!(report.observations, 40);
    }

    #[test]
    fn test_instrument_risk_independent_of_input_order() {
        let calc = RiskCalculator::default();
        // volatile start, calm tail: a stored-order bug shows up in volatility
        let values: Vec<f64> = (0..300)
            .map(|i| if i < 48 { if i % 2 == 0 { 0.08 } else { -0.08 } } else { 0.001 })
            .collect();
        let sorted = ReturnSeries::from_values(start(), &values);

        let mut reversed: Vec<_> = sorted.points().to_vec();
        reversed.reverse();
        let json = serde_json::to_string(&reversed).unwrap();
        let loaded: ReturnSeries = serde_json::from_str(&json).unwrap();

        let a = calc.calculate_instrument_risk(&sorted, 1000.0, None);
        let b = calc.calculate_instrument_risk(&loaded, 1000.0, None);
        assert_eq!(a.get(&MetricType::Volatility), b.get(&MetricType::Volatility));
        assert_eq!(a.get(&MetricType::MaxDrawdown), b.get(&MetricType::MaxDrawdown));
    }

    #[test]
    fn test_correlated_var_offsetting_positions() {
        let calc = RiskCalculator::default();
        let base = sample_returns(40);
        let mirror: Vec<f64> = base.iter().map(|r| -r).collect();
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &base));
        returns.insert("B".into(), ReturnSeries::from_values(start(), &mirror));

        let result = calc.correlated_var(&positions(&[("A", 1000.0), ("B", 1000.0)]), &returns, 0.95).unwrap();

        assert!(result.portfolio_var.abs() < 1e-9);
        assert!(result.components["A"] < 0.0);
        assert!(result.components["B"] < 0.0);
        assert!(result.diversification_benefit > 0.0);
    }

    #[test]
    fn test_correlated_var_single_instrument() {
        let calc = RiskCalculator::default();
        let values = sample_returns(60);
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &values));

        let result = calc.correlated_var(&positions(&[("A", 1000.0)]), &returns, 0.95).unwrap();

        let expected = -1.6448536269514722 * values.as_slice().std_dev() * 1000.0;
        assert!((result.portfolio_var - expected).abs() < 1e-6);
        let standalone = calc.value_at_risk(&values, 0.95).unwrap() * 1000.0;
        assert!((result.components["A"] - standalone).abs() < 1e-9);
    }

    #[test]
    fn test_correlated_var_short_uses_upper_tail() {
        let calc = RiskCalculator::default();
        let values = sample_returns(40);
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &values));

        let result = calc.correlated_var(&positions(&[("A", -1000.0)]), &returns, 0.95).unwrap();
        let negated: Vec<f64> = values.iter().map(|r| -r).collect();
        let expected = calc.value_at_risk(&negated, 0.95).unwrap() * 1000.0;
        assert!((result.components["A"] - expected).abs() < 1e-9);
    }

    #[test]
    fn test_correlated_var_missing_returns() {
        let calc = RiskCalculator::default();
        let err = calc.correlated_var(&positions(&[("A", 1.0)]), &ReturnsData::new(), 0.95).unwrap_err();
        assert_eq!(err, RiskError::MissingReturns("A".into()));
    }

    proptest! {
        #[test]
        fn prop_cvar_never_above_var(returns in prop::collection::vec(-0.1f64..0.1, 30..120)) {
            let calc = RiskCalculator::default();
            for confidence in [0.95, 0.99] {
                let var = calc.value_at_risk(&returns, confidence).unwrap();
                let cvar = calc.conditional_var(&returns, confidence).unwrap();
                prop_assert!(cvar <= var + 1e-15);
            }
            let var_95 = calc.value_at_risk(&returns, 0.95).unwrap();
            let var_99 = calc.value_at_risk(&returns, 0.99).unwrap();
            prop_assert!(var_99 <= var_95);
        }

        #[test]
        fn prop_concentration_in_unit_interval(values in prop::collection::vec(1.0f64..1e6, 1..20)) {
            let calc = RiskCalculator::default();
            let book: Positions = values.iter()
                .enumerate()
                .map(|(i, v)| (format!("S{}", i), *v))
                .collect();
            let hhi = calc.concentration_risk(&book).unwrap();
            prop_assert!(hhi > 0.0 && hhi <= 1.0 + 1e-12);
            prop_assert!(hhi >= 1.0 / values.len() as f64 - 1e-12);
        }

        #[test]
        fn prop_max_drawdown_non_positive(returns in prop::collection::vec(-0.2f64..0.2, 30..80)) {
            let calc = RiskCalculator::default();
            let dd = calc.max_drawdown(&returns).unwrap();
            prop_assert!(dd <= 0.0 && dd > -1.0);
        }
    }
}
