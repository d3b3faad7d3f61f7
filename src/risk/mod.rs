pub mod breaker;
pub mod calculator;
pub mod limits;
pub mod metrics;
pub mod monitor;
pub mod portfolio;
pub mod scheduler;
pub mod sizing;
pub mod stress;

pub use breaker::{BreakerTrip, CircuitBreaker, CircuitBreakerConfig};
pub use calculator::{CalculatorConfig, CorrelatedVar, RiskCalculator};
pub use limits::{default_limits, BreachRecord, LimitState, RiskAlert, RiskLimit};
pub use metrics::{BreachDirection, MetricType, RiskReport};
pub use monitor::{ActiveAlert, AlertCallback, RiskMonitor, RiskSummary, DEFAULT_MAX_ALERTS};
pub use portfolio::{AlignedColumn, AlignedReturns, PortfolioWeights};
pub use scheduler::{run_monitoring, PortfolioSource};
pub use sizing::{PositionSizer, PositionSizing, SizingConfig, TradeRiskCheck};
pub use stress::{run_stress_tests, StressResult, StressScenario};
