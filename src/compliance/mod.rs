pub mod checker;
pub mod registry;
pub mod rules;
pub mod snapshot;

pub use checker::{
    blocks_trade, ComplianceChecker, ComplianceSummary, ComplianceViolation, TradingHalt, ViolationFilter,
    ViolationRecord, CIRCUIT_BREAKER_RULE, DEFAULT_MAX_VIOLATIONS, KILL_SWITCH_RULE,
};
pub use registry::{ComplianceReport, ComplianceRule, RegisteredRule, RuleRegistry, RuleResult};
pub use rules::{
    default_rule_configs, LeverageRule, PositionSizeRule, RuleConfig, RuleKind, RuleState, SectorConcentrationRule,
    ShortSellingRule, TradingHoursParams, TradingHoursRule, TurnoverRule, WashSaleRule,
};
pub use snapshot::ComplianceSnapshot;
