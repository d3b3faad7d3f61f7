pub mod compliance;
pub mod data;
pub mod error;
pub mod risk;
pub mod utils;

// Re-export commonly used types
pub use compliance::{
    ComplianceChecker, ComplianceReport, ComplianceRule, ComplianceSnapshot, ComplianceViolation,
    RuleRegistry, RuleResult,
};
pub use data::{ExecutedTrade, Positions, ReturnSeries, ReturnsData, Severity, Side, TradeOrder};
pub use error::{RiskError, RuleError};
pub use risk::{
    CircuitBreaker, MetricType, PositionSizer, RiskAlert, RiskCalculator, RiskLimit, RiskMonitor, RiskReport,
    StressScenario,
};
pub use utils::Config;
