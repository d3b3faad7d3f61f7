use prometheus::{Encoder, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};

/// Prometheus counters for risk checks and compliance evaluation.
///
/// Holds its own registry so several monitors can coexist in one process.
pub struct Telemetry {
    registry: Registry,
    risk_checks: IntCounter,
    alerts: IntCounterVec,
    callback_failures: IntCounter,
    compliance_checks: IntCounter,
    rule_failures: IntCounterVec,
    violations: IntCounterVec,
    breaker_trips: IntCounter,
}

impl Telemetry {
    pub fn new() -> prometheus::Result<Self> {
        let registry = Registry::new_custom(Some("risk_compliance".to_string()), None)?;

        let risk_checks = IntCounter::new("risk_checks_total", "Portfolio risk checks run")?;
        let alerts = IntCounterVec::new(
            Opts::new("risk_alerts_total", "Risk limit breaches by severity"),
            &["severity"],
        )?;
        let callback_failures = IntCounter::new(
            "alert_callback_failures_total",
            "Alert callbacks that returned an error or panicked",
        )?;
        let compliance_checks = IntCounter::new("compliance_checks_total", "Compliance evaluations run")?;
        let rule_failures = IntCounterVec::new(
            Opts::new("compliance_rule_failures_total", "Rule predicates that failed to evaluate"),
            &["rule_id"],
        )?;
        let violations = IntCounterVec::new(
            Opts::new("compliance_violations_total", "Compliance violations by severity"),
            &["severity"],
        )?;
        let breaker_trips = IntCounter::new("circuit_breaker_trips_total", "Circuit breaker trips")?;

        registry.register(Box::new(risk_checks.clone()))?;
        registry.register(Box::new(alerts.clone()))?;
        registry.register(Box::new(callback_failures.clone()))?;
        registry.register(Box::new(compliance_checks.clone()))?;
        registry.register(Box::new(rule_failures.clone()))?;
        registry.register(Box::new(violations.clone()))?;
        registry.register(Box::new(breaker_trips.clone()))?;

        Ok(Self {
            registry,
            risk_checks,
            alerts,
            callback_failures,
            compliance_checks,
            rule_failures,
            violations,
            breaker_trips,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    pub fn record_risk_check(&self) {
        self.risk_checks.inc();
    }

    pub fn record_alert(&self, severity: &str) {
        self.alerts.with_label_values(&[severity]).inc();
    }

    pub fn record_callback_failure(&self) {
        self.callback_failures.inc();
    }

    pub fn record_compliance_check(&self) {
        self.compliance_checks.inc();
    }

    pub fn record_rule_failure(&self, rule_id: &str) {
        self.rule_failures.with_label_values(&[rule_id]).inc();
    }

    pub fn record_violation(&self, severity: &str) {
        self.violations.with_label_values(&[severity]).inc();
    }

    pub fn record_breaker_trip(&self) {
        self.breaker_trips.inc();
    }

    /// Text exposition format of everything in the registry
    pub fn gather_text(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}
