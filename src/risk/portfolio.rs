use crate::data::{gross_value, Positions, ReturnSeries, ReturnsData};
use crate::error::RiskError;
use chrono::NaiveDate;
use std::collections::{BTreeMap, BTreeSet};

/// Snapshot of a portfolio's position weights.
///
/// Weights are signed notional divided by gross notional, so a long-only
/// book has weights summing to one.
#[derive(Debug, Clone)]
pub struct PortfolioWeights {
    gross_value: f64,
    weights: BTreeMap<String, f64>,
}

impl PortfolioWeights {
    /// Compute weights, failing loudly on an empty or zero-valued book
    pub fn from_positions(positions: &Positions) -> Result<Self, RiskError> {
        if positions.is_empty() {
            return Err(RiskError::EmptyPortfolio);
        }
        if let Some((symbol, _)) = positions.iter().find(|(_, v)| !v.is_finite()) {
            return Err(RiskError::NonFinite(format!("position {}", symbol)));
        }

        let gross = gross_value(positions);
        if gross == 0.0 {
            return Err(RiskError::ZeroPortfolioValue);
        }

        let weights = positions.iter()
            .map(|(symbol, value)| (symbol.clone(), value / gross))
            .collect();

        Ok(Self {
            gross_value: gross,
            weights,
        })
    }

    pub fn gross_value(&self) -> f64 {
        self.gross_value
    }

    pub fn weights(&self) -> &BTreeMap<String, f64> {
        &self.weights
    }

    pub fn weight(&self, symbol: &str) -> Option<f64> {
        self.weights.get(symbol).copied()
    }

    /// Herfindahl-Hirschman index over absolute weights
    pub fn herfindahl_index(&self) -> f64 {
        self.weights.values().map(|w| w * w).sum()
    }

    /// Largest single absolute weight
    pub fn largest_weight(&self) -> f64 {
        self.weights.values()
            .map(|w| w.abs())
            .fold(0.0, f64::max)
    }

    /// Per-instrument returns restricted to the dates common to every held
    /// instrument. Closed (zero-weight) positions need no series.
    pub fn aligned_returns(&self, returns: &ReturnsData) -> Result<AlignedReturns, RiskError> {
        let mut common: Option<BTreeSet<NaiveDate>> = None;
        let mut indexed = Vec::with_capacity(self.weights.len());

        for (symbol, weight) in self.weights.iter().filter(|(_, w)| **w != 0.0) {
            let series = returns.get(symbol)
                .ok_or_else(|| RiskError::MissingReturns(symbol.clone()))?;
            if series.is_empty() {
                return Err(RiskError::EmptyReturns(symbol.clone()));
            }
            if series.points().iter().any(|(_, r)| !r.is_finite()) {
                return Err(RiskError::NonFinite(format!("returns of {}", symbol)));
            }

            let by_date = series.by_date();
            let dates: BTreeSet<NaiveDate> = by_date.keys().copied().collect();
            common = Some(match common {
                None => dates,
                Some(existing) => existing.intersection(&dates).copied().collect(),
            });
            indexed.push((symbol.clone(), *weight, by_date));
        }

        let dates: Vec<NaiveDate> = common.unwrap_or_default().into_iter().collect();
        if dates.is_empty() {
            return Err(RiskError::MisalignedReturns);
        }

        let columns = indexed.into_iter()
            .map(|(symbol, weight, by_date)| AlignedColumn {
                values: dates.iter().map(|d| by_date[d]).collect(),
                symbol,
                weight,
            })
            .collect();

        Ok(AlignedReturns { dates, columns })
    }

    /// Weighted portfolio return series over the dates common to every
    /// held instrument.
    pub fn portfolio_returns(&self, returns: &ReturnsData) -> Result<ReturnSeries, RiskError> {
        let aligned = self.aligned_returns(returns)?;

        let points = aligned.dates.iter()
            .enumerate()
            .map(|(i, date)| {
                let r = aligned.columns.iter()
                    .map(|c| c.weight * c.values[i])
                    .sum();
                (*date, r)
            })
            .collect();

        Ok(ReturnSeries::new(points))
    }
}

/// One instrument's returns on the common dates
#[derive(Debug, Clone)]
pub struct AlignedColumn {
    pub symbol: String,
    pub weight: f64,
    pub values: Vec<f64>,
}

/// Returns of every held instrument on a shared date index
#[derive(Debug, Clone)]
pub struct AlignedReturns {
    pub dates: Vec<NaiveDate>,
    pub columns: Vec<AlignedColumn>,
}

/// Pair two series on their common dates
pub fn align(left: &ReturnSeries, right: &ReturnSeries) -> (Vec<f64>, Vec<f64>) {
    let right_by_date = right.by_date();
    left.points()
        .iter()
        .filter_map(|(date, l)| right_by_date.get(date).map(|r| (*l, *r)))
        .unzip()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn start() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()
    }

    fn positions(entries: &[(&str, f64)]) -> Positions {
        entries.iter().map(|(s, v)| (s.to_string(), *v)).collect()
    }

    #[test]
    fn test_weights_sum_to_one_long_only() {
        let w = PortfolioWeights::from_positions(&positions(&[("A", 150000.0), ("B", 50000.0)])).unwrap();
        assert_eq!(w.gross_value(), 200000.0);
        assert_eq!(w.weight("A"), Some(0.75));
        assert_eq!(w.largest_weight(), 0.75);
        assert!((w.weights().values().sum::<f64>() - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_portfolio_is_fatal() {
        let err = PortfolioWeights::from_positions(&Positions::new()).unwrap_err();
        assert_eq!(err, RiskError::EmptyPortfolio);

        let err = PortfolioWeights::from_positions(&positions(&[("A", 0.0)])).unwrap_err();
        assert_eq!(err, RiskError::ZeroPortfolioValue);
    }

    #[test]
    fn test_herfindahl_equal_weights() {
        let w = PortfolioWeights::from_positions(&positions(&[
            ("A", 10.0), ("B", 10.0), ("C", 10.0), ("D", 10.0),
        ])).unwrap();
        assert!((w.herfindahl_index() - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_portfolio_returns_weighted() {
        let w = PortfolioWeights::from_positions(&positions(&[("A", 300.0), ("B", 100.0)])).unwrap();
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &[0.04, -0.02]));
        returns.insert("B".into(), ReturnSeries::from_values(start(), &[0.00, 0.02]));

        let series = w.portfolio_returns(&returns).unwrap();
        let values = series.values();
        assert!((values[0] - 0.03).abs() < 1e-12);
        assert!((values[1] - (-0.01)).abs() < 1e-12);
    }

    #[test]
    fn test_portfolio_returns_uses_common_dates() {
        let w = PortfolioWeights::from_positions(&positions(&[("A", 1.0), ("B", 1.0)])).unwrap();
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &[0.01, 0.01, 0.01]));
        returns.insert(
            "B".into(),
            ReturnSeries::from_values(start() + chrono::Duration::days(1), &[0.03, 0.03, 0.03]),
        );

        let series = w.portfolio_returns(&returns).unwrap();
        assert_eq!(series.len(), 2);
    }

    #[test]
    fn test_missing_and_misaligned_returns() {
        let w = PortfolioWeights::from_positions(&positions(&[("A", 1.0), ("B", 1.0)])).unwrap();
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &[0.01]));
        assert_eq!(w.portfolio_returns(&returns).unwrap_err(), RiskError::MissingReturns("B".into()));

        returns.insert("B".into(), ReturnSeries::default());
        assert_eq!(w.portfolio_returns(&returns).unwrap_err(), RiskError::EmptyReturns("B".into()));

        returns.insert(
            "B".into(),
            ReturnSeries::from_values(start() + chrono::Duration::days(10), &[0.01]),
        );
        assert_eq!(w.portfolio_returns(&returns).unwrap_err(), RiskError::MisalignedReturns);
    }

    #[test]
    fn test_closed_position_needs_no_returns() {
        let w = PortfolioWeights::from_positions(&positions(&[("A", 1000.0), ("CLOSED", 0.0)])).unwrap();
        let mut returns = ReturnsData::new();
        returns.insert("A".into(), ReturnSeries::from_values(start(), &[0.01, -0.02, 0.03]));

        let series = w.portfolio_returns(&returns).unwrap();
        assert_eq!(series.values(), vec![0.01, -0.02, 0.03]);
        assert_eq!(w.weight("CLOSED"), Some(0.0));
    }

    #[test]
    fn test_align_pairs_common_dates() {
        let a = ReturnSeries::from_values(start(), &[1.0, 2.0, 3.0]);
        let b = ReturnSeries::from_values(start() + chrono::Duration::days(1), &[20.0, 30.0, 40.0]);
        let (left, right) = align(&a, &b);
        assert_eq!(left, vec![2.0, 3.0]);
        assert_eq!(right, vec![20.0, 30.0]);
    }
}
