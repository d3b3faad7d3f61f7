use crate::compliance::registry::{ComplianceRule, ComplianceReport, RegisteredRule, RuleRegistry, RuleResult};
use crate::compliance::rules::{default_rule_configs, RuleConfig, RuleState};
use crate::compliance::snapshot::ComplianceSnapshot;
use crate::data::{Positions, Severity, Side, TradeOrder};
use crate::error::RuleError;
use crate::risk::breaker::CircuitBreaker;
use crate::utils::metrics::Telemetry;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Default bound on the violation history
pub const DEFAULT_MAX_VIOLATIONS: usize = 10_000;
/// Rule id of violations raised while the kill switch is active
pub const KILL_SWITCH_RULE: &str = "kill_switch";
/// Rule id of violations raised while the circuit breaker is tripped
pub const CIRCUIT_BREAKER_RULE: &str = "circuit_breaker";

fn describe_trade(trade: &TradeOrder) -> String {
    let side = match trade.side {
        Side::Buy => "buy",
        Side::Sell => "sell",
    };
    format!("{} {} {}", side, trade.quantity, trade.symbol)
}

/// A failed rule recorded against a trade or portfolio snapshot
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceViolation {
    pub rule_id: String,
    pub description: String,
    pub severity: Severity,
    pub message: String,
    pub symbol: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub resolved: bool,
}

impl ComplianceViolation {
    fn from_result(result: &RuleResult, trade: Option<&TradeOrder>, timestamp: DateTime<Utc>) -> Self {
        let subject = trade.map_or_else(|| "portfolio".to_string(), describe_trade);
        let message = match &result.error {
            Some(e) => format!("Rule '{}' could not be evaluated for {}: {}", result.rule_id, subject, e),
            None => format!("Rule '{}' violated by {}: {}", result.rule_id, subject, result.description),
        };

        Self {
            rule_id: result.rule_id.clone(),
            description: result.description.clone(),
            severity: result.severity,
            message,
            symbol: trade.map(|t| t.symbol.clone()),
            timestamp,
            resolved: false,
        }
    }

    fn halted(rule_id: &str, reason: &str, trade: &TradeOrder, timestamp: DateTime<Utc>) -> Self {
        Self {
            rule_id: rule_id.to_string(),
            description: "Trading halted".to_string(),
            severity: Severity::Critical,
            message: format!("Trade {} blocked: trading halted ({})", describe_trade(trade), reason),
            symbol: Some(trade.symbol.clone()),
            timestamp,
            resolved: false,
        }
    }
}

/// Manual halt of all trading
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingHalt {
    pub reason: String,
    pub activated_by: String,
    pub activated_at: DateTime<Utc>,
}

/// Violation history of one rule
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ViolationRecord {
    pub count: u64,
    pub last_violation: Option<DateTime<Utc>>,
}

/// Whether a set of violations should stop the trade (any ERROR or worse)
pub fn blocks_trade(violations: &[ComplianceViolation]) -> bool {
    violations.iter().any(|v| !v.resolved && v.severity >= Severity::Error)
}

/// Selection over the violation history; unset fields match everything
#[derive(Debug, Clone, Default)]
pub struct ViolationFilter {
    pub severity: Option<Severity>,
    pub rule_id: Option<String>,
    pub resolved: Option<bool>,
}

impl ViolationFilter {
    pub fn unresolved() -> Self {
        Self {
            resolved: Some(false),
            ..Default::default()
        }
    }

    fn matches(&self, violation: &ComplianceViolation) -> bool {
        self.severity.map_or(true, |s| violation.severity == s)
            && self.rule_id.as_ref().map_or(true, |id| &violation.rule_id == id)
            && self.resolved.map_or(true, |r| violation.resolved == r)
    }
}

/// Compliance status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComplianceSummary {
    pub last_check: Option<DateTime<Utc>>,
    pub total_rules: usize,
    pub enabled_rules: usize,
    pub total_violations: usize,
    pub unresolved_violations: usize,
    pub critical_violations: usize,
    pub error_violations: usize,
    pub warning_violations: usize,
    pub violations_by_rule: BTreeMap<String, u64>,
}

/// Owns a rule registry and the violation history it produces.
///
/// Rules are cloned out of the registry before evaluation, so predicates
/// never run under a lock and registration from other threads is not
/// blocked by a slow rule.
///
/// While the kill switch is active or the attached circuit breaker is
/// tripped, every trade fails the pre-trade gate with a CRITICAL violation
/// and no rule is evaluated. Portfolio-only checks are unaffected.
pub struct ComplianceChecker {
    registry: RwLock<RuleRegistry>,
    violations: RwLock<VecDeque<ComplianceViolation>>,
    max_violations: usize,
    violation_records: DashMap<String, ViolationRecord>,
    last_check: RwLock<Option<DateTime<Utc>>>,
    halt: RwLock<Option<TradingHalt>>,
    breaker: Option<Arc<CircuitBreaker>>,
    telemetry: Option<Arc<Telemetry>>,
}

impl Default for ComplianceChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl ComplianceChecker {
    /// Checker with no rules registered
    pub fn new() -> Self {
        Self {
            registry: RwLock::new(RuleRegistry::new()),
            violations: RwLock::new(VecDeque::new()),
            max_violations: DEFAULT_MAX_VIOLATIONS,
            violation_records: DashMap::new(),
            last_check: RwLock::new(None),
            halt: RwLock::new(None),
            breaker: None,
            telemetry: None,
        }
    }

    /// Checker with the built-in default rule set
    pub fn with_default_rules() -> Result<Self, RuleError> {
        Self::from_rule_configs(&default_rule_configs())
    }

    /// Build every supported rule from configuration; unsupported types are
    /// skipped, invalid parameters fail the whole build
    pub fn from_rule_configs(configs: &[RuleConfig]) -> Result<Self, RuleError> {
        let checker = Self::new();
        for config in configs {
            if let Some(rule) = config.build()? {
                checker.register(rule);
            }
        }
        Ok(checker)
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    /// Keep at most `max_violations` violations (at least one). Per-rule
    /// counts are not affected by the bound.
    pub fn with_max_violations(mut self, max_violations: usize) -> Self {
        self.max_violations = max_violations.max(1);
        self
    }

    /// Block trades while `breaker` is tripped
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = Some(breaker);
        self
    }

    /// Halt all trading until `deactivate_kill_switch`
    pub fn activate_kill_switch(&self, activated_by: impl Into<String>, reason: impl Into<String>) {
        let halt = TradingHalt {
            reason: reason.into(),
            activated_by: activated_by.into(),
            activated_at: Utc::now(),
        };
        error!("KILL SWITCH ACTIVATED by {}: {}", halt.activated_by, halt.reason);
        *self.halt.write() = Some(halt);
    }

    pub fn deactivate_kill_switch(&self) -> Option<TradingHalt> {
        let halt = self.halt.write().take();
        if let Some(halt) = &halt {
            info!("Kill switch deactivated (was: {})", halt.reason);
        }
        halt
    }

    pub fn kill_switch_status(&self) -> Option<TradingHalt> {
        self.halt.read().clone()
    }

    /// Rule id and reason of the active halt, kill switch first
    pub fn halt_reason(&self) -> Option<(&'static str, String)> {
        if let Some(halt) = self.halt.read().as_ref() {
            return Some((KILL_SWITCH_RULE, halt.reason.clone()));
        }
        self.breaker
            .as_ref()
            .and_then(|b| b.status())
            .map(|trip| (CIRCUIT_BREAKER_RULE, trip.reason))
    }

    pub fn is_trading_halted(&self) -> bool {
        self.halt_reason().is_some()
    }

    /// Register a predicate with default metadata, overwriting any rule
    /// with the same id
    pub fn register_rule(
        &self,
        id: impl Into<String>,
        predicate: impl ComplianceRule + 'static,
        description: impl Into<String>,
    ) {
        self.register(RegisteredRule::new(id, predicate, description));
    }

    pub fn register(&self, rule: RegisteredRule) {
        info!("Registered compliance rule: {} ({})", rule.id, rule.severity);
        self.registry.write().register(rule);
    }

    pub fn remove_rule(&self, rule_id: &str) -> bool {
        let removed = self.registry.write().remove_rule(rule_id);
        if removed {
            info!("Removed compliance rule: {}", rule_id);
        }
        removed
    }

    pub fn enable_rule(&self, rule_id: &str) -> bool {
        self.registry.write().set_enabled(rule_id, true)
    }

    pub fn disable_rule(&self, rule_id: &str) -> bool {
        self.registry.write().set_enabled(rule_id, false)
    }

    /// Rule ids in evaluation order
    pub fn rule_ids(&self) -> Vec<String> {
        self.registry.read().rules().iter().map(|r| r.id.clone()).collect()
    }

    /// Evaluate every enabled rule against the snapshot
    pub fn check_compliance(&self, data: &ComplianceSnapshot) -> ComplianceReport {
        let registry = self.registry.read().clone();
        let report = registry.check_compliance(data);
        *self.last_check.write() = Some(Utc::now());

        if let Some(telemetry) = &self.telemetry {
            telemetry.record_compliance_check();
            for result in report.results.iter().filter(|r| r.error.is_some()) {
                telemetry.record_rule_failure(&result.rule_id);
            }
        }

        debug!(
            "Compliance check: {} rules, {} failed",
            report.results.len(),
            report.failures().count()
        );
        report
    }

    /// Pre-trade gate: evaluate the rule set against `positions` plus the
    /// proposed trade and record any violations
    pub fn check_trade_compliance(&self, trade: &TradeOrder, positions: &Positions) -> Vec<ComplianceViolation> {
        let snapshot = ComplianceSnapshot::new(positions.clone()).with_trade(trade.clone());
        self.check_snapshot(&snapshot)
    }

    /// Like `check_trade_compliance`, with sector map, history and capital
    /// supplied by the caller
    pub fn check_snapshot(&self, snapshot: &ComplianceSnapshot) -> Vec<ComplianceViolation> {
        if let Some(trade) = &snapshot.trade {
            if let Some((rule_id, reason)) = self.halt_reason() {
                let violations = vec![ComplianceViolation::halted(rule_id, &reason, trade, snapshot.timestamp)];
                self.record_violations(&violations);
                return violations;
            }
        }

        let report = self.check_compliance(snapshot);
        let violations: Vec<ComplianceViolation> = report
            .failures()
            .map(|r| ComplianceViolation::from_result(r, snapshot.trade.as_ref(), snapshot.timestamp))
            .collect();

        self.record_violations(&violations);
        violations
    }

    fn record_violations(&self, violations: &[ComplianceViolation]) {
        for violation in violations {
            warn!("{} [{}]", violation.message, violation.severity);
            let mut record = self.violation_records.entry(violation.rule_id.clone()).or_default();
            record.count += 1;
            record.last_violation = Some(violation.timestamp);
            if let Some(telemetry) = &self.telemetry {
                telemetry.record_violation(violation.severity.as_str());
            }
        }

        let mut history = self.violations.write();
        history.extend(violations.iter().cloned());
        while history.len() > self.max_violations {
            history.pop_front();
        }
    }

    pub fn violations(&self, filter: &ViolationFilter) -> Vec<ComplianceViolation> {
        self.violations
            .read()
            .iter()
            .filter(|v| filter.matches(v))
            .cloned()
            .collect()
    }

    /// Mark the violation at `index` in the full history as resolved
    pub fn resolve_violation(&self, index: usize) -> bool {
        let mut violations = self.violations.write();
        match violations.get_mut(index) {
            Some(violation) => {
                violation.resolved = true;
                info!("Resolved compliance violation: {}", violation.rule_id);
                true
            }
            None => false,
        }
    }

    /// Violations recorded for a rule since startup (or import)
    pub fn violation_count(&self, rule_id: &str) -> u64 {
        self.violation_record(rule_id).count
    }

    pub fn last_violation(&self, rule_id: &str) -> Option<DateTime<Utc>> {
        self.violation_record(rule_id).last_violation
    }

    pub fn violation_record(&self, rule_id: &str) -> ViolationRecord {
        self.violation_records
            .get(rule_id)
            .map(|r| *r)
            .unwrap_or_default()
    }

    /// Configured rules with their violation history. Custom predicates
    /// have no configuration and are left out.
    pub fn export_rules(&self) -> Vec<RuleState> {
        let rules = self.registry.read().rules().to_vec();
        rules
            .iter()
            .filter_map(|rule| match rule.config() {
                Some(config) => Some(config),
                None => {
                    debug!("Rule {} has no configuration; not exported", rule.id);
                    None
                }
            })
            .map(|config| {
                let record = self.violation_record(&config.id);
                RuleState {
                    config,
                    violation_count: record.count,
                    last_violation: record.last_violation,
                }
            })
            .collect()
    }

    /// Build and register every rule, restoring its violation history.
    /// Nothing is registered if any rule fails to build. Returns the number
    /// of rules registered; unsupported types are skipped.
    pub fn import_rules(&self, states: Vec<RuleState>) -> Result<usize, RuleError> {
        let mut built = Vec::with_capacity(states.len());
        for state in states {
            if let Some(rule) = state.config.build()? {
                built.push((rule, state.violation_count, state.last_violation));
            }
        }

        let count = built.len();
        for (rule, violation_count, last_violation) in built {
            self.violation_records.insert(
                rule.id.clone(),
                ViolationRecord {
                    count: violation_count,
                    last_violation,
                },
            );
            self.register(rule);
        }
        info!("Imported {} compliance rules", count);
        Ok(count)
    }

    /// `export_rules` as pretty-printed JSON
    pub fn export_rules_json(&self) -> anyhow::Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_rules())?)
    }

    pub fn import_rules_json(&self, json: &str) -> anyhow::Result<usize> {
        let states: Vec<RuleState> = serde_json::from_str(json)?;
        Ok(self.import_rules(states)?)
    }

    pub fn compliance_summary(&self) -> ComplianceSummary {
        let (total_rules, enabled_rules) = {
            let registry = self.registry.read();
            (registry.len(), registry.rules().iter().filter(|r| r.enabled).count())
        };
        let violations = self.violations.read();
        let unresolved: Vec<&ComplianceViolation> = violations.iter().filter(|v| !v.resolved).collect();
        let count = |s: Severity| unresolved.iter().filter(|v| v.severity == s).count();

        ComplianceSummary {
            last_check: *self.last_check.read(),
            total_rules,
            enabled_rules,
            total_violations: violations.len(),
            unresolved_violations: unresolved.len(),
            critical_violations: count(Severity::Critical),
            error_violations: count(Severity::Error),
            warning_violations: count(Severity::Warning),
            violations_by_rule: self
                .violation_records
                .iter()
                .map(|e| (e.key().clone(), e.value().count))
                .collect(),
        }
    }
}
