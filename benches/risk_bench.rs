use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use risk_compliance::compliance::{default_rule_configs, ComplianceChecker};
use risk_compliance::{Positions, ReturnSeries, ReturnsData, RiskCalculator, RiskMonitor, TradeOrder};
use risk_compliance::risk::default_limits;

/// Deterministic daily returns in [-2%, 2%]
fn synthetic_returns(seed: usize, days: usize) -> Vec<f64> {
    (0..days)
        .map(|i| {
            let x = ((seed * 7919 + i) as f64 * 12.9898).sin() * 43758.5453;
            x.fract() * 0.02
        })
        .collect()
}

fn portfolio(instruments: usize, days: usize) -> (Positions, ReturnsData) {
    let start = NaiveDate::from_ymd_opt(2023, 1, 1).unwrap();
    let mut positions = Positions::new();
    let mut returns = ReturnsData::new();

    for i in 0..instruments {
        let symbol = format!("SYM{:03}", i);
        positions.insert(symbol.clone(), 10_000.0 * (1 + i % 5) as f64);
        returns.insert(symbol, ReturnSeries::from_values(start, &synthetic_returns(i, days)));
    }
    (positions, returns)
}

/// Historical VaR sorts the full series on every call
fn bench_value_at_risk(c: &mut Criterion) {
    let calculator = RiskCalculator::default();
    let mut group = c.benchmark_group("value_at_risk");

    for days in [252, 1260, 2520].iter() {
        let returns = synthetic_returns(1, *days);
        group.bench_with_input(BenchmarkId::from_parameter(days), &returns, |b, returns| {
            b.iter(|| {
                black_box(calculator.value_at_risk(black_box(returns), 0.95).unwrap());
            });
        });
    }
    group.finish();
}

/// Full metric set: aggregation, date alignment and every return metric
fn bench_portfolio_risk(c: &mut Criterion) {
    let calculator = RiskCalculator::default();
    let mut group = c.benchmark_group("calculate_portfolio_risk");

    for instruments in [5, 20, 100].iter() {
        let (positions, returns) = portfolio(*instruments, 252);
        group.bench_with_input(
            BenchmarkId::from_parameter(instruments),
            &(positions, returns),
            |b, (positions, returns)| {
                b.iter(|| {
                    black_box(calculator.calculate_portfolio_risk(positions, returns).unwrap());
                });
            },
        );
    }
    group.finish();
}

fn bench_monitor_check(c: &mut Criterion) {
    let monitor = RiskMonitor::new(RiskCalculator::default()).with_limits(default_limits());
    let (positions, returns) = portfolio(20, 252);

    c.bench_function("check_portfolio_risk_default_limits", |b| {
        b.iter(|| {
            black_box(monitor.check_portfolio_risk(&positions, &returns).unwrap());
        });
    });
}

/// Pre-trade gate with the default rule set
fn bench_trade_compliance(c: &mut Criterion) {
    let checker = ComplianceChecker::from_rule_configs(&default_rule_configs()).unwrap();
    let (positions, _) = portfolio(50, 1);
    let trade = TradeOrder::buy("SYM007", 5_000.0);

    c.bench_function("check_trade_compliance_default_rules", |b| {
        b.iter(|| {
            black_box(checker.check_trade_compliance(black_box(&trade), &positions));
        });
    });
}

criterion_group!(
    benches,
    bench_value_at_risk,
    bench_portfolio_risk,
    bench_monitor_check,
    bench_trade_compliance
);
criterion_main!(benches);
