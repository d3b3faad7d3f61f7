use crate::compliance::rules::RuleConfig;
use crate::compliance::snapshot::ComplianceSnapshot;
use crate::data::Severity;
use crate::error::{panic_message, RuleError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::error;

/// A compliance predicate.
///
/// `Ok(true)` means compliant. An `Err` (or a panic) marks the rule
/// non-compliant without stopping evaluation of the other rules.
pub trait ComplianceRule: Send + Sync {
    fn evaluate(&self, data: &ComplianceSnapshot) -> Result<bool, RuleError>;
}

impl<F> ComplianceRule for F
where
    F: Fn(&ComplianceSnapshot) -> Result<bool, RuleError> + Send + Sync,
{
    fn evaluate(&self, data: &ComplianceSnapshot) -> Result<bool, RuleError> {
        self(data)
    }
}

/// A predicate plus its metadata
#[derive(Clone)]
pub struct RegisteredRule {
    pub id: String,
    pub description: String,
    pub severity: Severity,
    pub enabled: bool,
    predicate: Arc<dyn ComplianceRule>,
    /// Configuration the rule was built from; `None` for custom predicates
    source: Option<RuleConfig>,
}

impl RegisteredRule {
    pub fn new(
        id: impl Into<String>,
        predicate: impl ComplianceRule + 'static,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            severity: Severity::Error,
            enabled: true,
            predicate: Arc::new(predicate),
            source: None,
        }
    }

    pub fn with_severity(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub(crate) fn with_source(mut self, config: RuleConfig) -> Self {
        self.source = Some(config);
        self
    }

    /// The rule's configuration with its current metadata, if it was built
    /// from one
    pub fn config(&self) -> Option<RuleConfig> {
        self.source.as_ref().map(|config| RuleConfig {
            id: self.id.clone(),
            description: Some(self.description.clone()),
            severity: self.severity,
            enabled: self.enabled,
            ..config.clone()
        })
    }

    /// Run the predicate, turning errors and panics into a failed result
    pub fn evaluate(&self, data: &ComplianceSnapshot) -> RuleResult {
        let outcome = catch_unwind(AssertUnwindSafe(|| self.predicate.evaluate(data)));
        let (compliant, error) = match outcome {
            Ok(Ok(compliant)) => (compliant, None),
            Ok(Err(e)) => (false, Some(e.to_string())),
            Err(panic) => (false, Some(panic_message(panic.as_ref()))),
        };

        if let Some(e) = &error {
            error!("Error checking rule {}: {}", self.id, e);
        }

        RuleResult {
            rule_id: self.id.clone(),
            compliant,
            description: self.description.clone(),
            severity: self.severity,
            error,
        }
    }
}

impl fmt::Debug for RegisteredRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegisteredRule")
            .field("id", &self.id)
            .field("description", &self.description)
            .field("severity", &self.severity)
            .field("enabled", &self.enabled)
            .finish_non_exhaustive()
    }
}

/// Outcome of one rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub rule_id: String,
    pub compliant: bool,
    pub description: String,
    pub severity: Severity,
    /// Set when the predicate failed to evaluate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregate verdict over every evaluated rule
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplianceReport {
    pub overall_compliant: bool,
    /// In rule registration order
    pub results: Vec<RuleResult>,
}

impl ComplianceReport {
    pub fn failures(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter().filter(|r| !r.compliant)
    }
}

/// Ordered set of rules keyed by id
#[derive(Debug, Clone, Default)]
pub struct RuleRegistry {
    rules: Vec<RegisteredRule>,
}

impl RuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a predicate with default metadata (ERROR severity, enabled)
    pub fn register_rule(
        &mut self,
        id: impl Into<String>,
        predicate: impl ComplianceRule + 'static,
        description: impl Into<String>,
    ) {
        self.register(RegisteredRule::new(id, predicate, description));
    }

    /// Store a rule. An existing rule with the same id is overwritten and
    /// keeps its position in evaluation order.
    pub fn register(&mut self, rule: RegisteredRule) {
        match self.rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => *existing = rule,
            None => self.rules.push(rule),
        }
    }

    pub fn remove_rule(&mut self, id: &str) -> bool {
        let before = self.rules.len();
        self.rules.retain(|r| r.id != id);
        self.rules.len() != before
    }

    pub fn set_enabled(&mut self, id: &str, enabled: bool) -> bool {
        match self.rules.iter_mut().find(|r| r.id == id) {
            Some(rule) => {
                rule.enabled = enabled;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<&RegisteredRule> {
        self.rules.iter().find(|r| r.id == id)
    }

    pub fn rules(&self) -> &[RegisteredRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Evaluate every enabled rule in registration order
    pub fn check_compliance(&self, data: &ComplianceSnapshot) -> ComplianceReport {
        let results: Vec<RuleResult> = self.rules
            .iter()
            .filter(|r| r.enabled)
            .map(|r| r.evaluate(data))
            .collect();

        ComplianceReport {
            overall_compliant: results.iter().all(|r| r.compliant),
            results,
        }
    }
}
