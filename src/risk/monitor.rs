use crate::data::{Positions, ReturnsData, Severity};
use crate::error::{panic_message, RiskError};
use crate::risk::breaker::CircuitBreaker;
use crate::risk::calculator::RiskCalculator;
use crate::risk::limits::{BreachRecord, LimitState, RiskAlert, RiskLimit};
use crate::risk::metrics::RiskReport;
use crate::utils::metrics::Telemetry;
use anyhow::Result;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Receives every alert emitted by a risk check
pub trait AlertCallback: Send + Sync {
    fn on_alert(&self, alert: &RiskAlert) -> Result<()>;
}

impl<F> AlertCallback for F
where
    F: Fn(&RiskAlert) -> Result<()> + Send + Sync,
{
    fn on_alert(&self, alert: &RiskAlert) -> Result<()> {
        self(alert)
    }
}

/// Alert kept for operators until acknowledged
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActiveAlert {
    pub alert: RiskAlert,
    pub acknowledged: bool,
}

/// Monitoring status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskSummary {
    pub last_check: Option<DateTime<Utc>>,
    pub active_limits: usize,
    pub total_limits: usize,
    pub active_alerts: usize,
    pub critical_alerts: usize,
    pub error_alerts: usize,
    pub warning_alerts: usize,
}

/// Default bound on the alert history
pub const DEFAULT_MAX_ALERTS: usize = 1000;

/// Compares calculated risk metrics against configured limits.
///
/// Limits, alerts and callbacks sit behind read-write locks and breach
/// counters in a concurrent map, so one monitor can be shared across
/// threads. No lock is held while metrics are calculated or callbacks run.
///
/// A new breach replaces the unacknowledged alert of the same limit, and
/// the alert history is capped at `max_alerts` (oldest dropped first).
pub struct RiskMonitor {
    calculator: RiskCalculator,
    limits: RwLock<Vec<RiskLimit>>,
    breaches: DashMap<String, BreachRecord>,
    alerts: RwLock<VecDeque<ActiveAlert>>,
    max_alerts: usize,
    callbacks: RwLock<Vec<Arc<dyn AlertCallback>>>,
    last_check: RwLock<Option<DateTime<Utc>>>,
    breaker: Arc<CircuitBreaker>,
    telemetry: Option<Arc<Telemetry>>,
}

impl RiskMonitor {
    /// Monitor with no limits configured
    pub fn new(calculator: RiskCalculator) -> Self {
        Self {
            calculator,
            limits: RwLock::new(Vec::new()),
            breaches: DashMap::new(),
            alerts: RwLock::new(VecDeque::new()),
            max_alerts: DEFAULT_MAX_ALERTS,
            callbacks: RwLock::new(Vec::new()),
            last_check: RwLock::new(None),
            breaker: Arc::new(CircuitBreaker::default()),
            telemetry: None,
        }
    }

    /// Keep at most `max_alerts` alerts (at least one)
    pub fn with_max_alerts(mut self, max_alerts: usize) -> Self {
        self.max_alerts = max_alerts.max(1);
        self
    }

    /// Feed check results into a shared circuit breaker
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.breaker = breaker;
        self
    }

    pub fn circuit_breaker(&self) -> Arc<CircuitBreaker> {
        Arc::clone(&self.breaker)
    }

    pub fn with_limits(self, limits: impl IntoIterator<Item = RiskLimit>) -> Self {
        for limit in limits {
            self.add_limit(limit);
        }
        self
    }

    pub fn with_telemetry(mut self, telemetry: Arc<Telemetry>) -> Self {
        self.telemetry = Some(telemetry);
        self
    }

    pub fn calculator(&self) -> &RiskCalculator {
        &self.calculator
    }

    /// Add a limit, replacing any existing limit with the same id in place
    pub fn add_limit(&self, limit: RiskLimit) {
        if !limit.metric_type.is_supported() {
            warn!(
                "Risk limit {} uses unsupported metric type '{}'; it will be skipped",
                limit.id, limit.metric_type
            );
        }

        let mut limits = self.limits.write();
        match limits.iter_mut().find(|l| l.id == limit.id) {
            Some(existing) => {
                info!("Replaced risk limit: {}", limit.id);
                *existing = limit;
            }
            None => {
                info!("Added risk limit: {}", limit.id);
                limits.push(limit);
            }
        }
    }

    /// Remove a limit and its breach history
    pub fn remove_limit(&self, limit_id: &str) -> Option<RiskLimit> {
        let mut limits = self.limits.write();
        let index = limits.iter().position(|l| l.id == limit_id)?;
        let removed = limits.remove(index);
        self.breaches.remove(limit_id);
        info!("Removed risk limit: {}", limit_id);
        Some(removed)
    }

    pub fn enable_limit(&self, limit_id: &str) -> bool {
        self.set_enabled(limit_id, true)
    }

    pub fn disable_limit(&self, limit_id: &str) -> bool {
        self.set_enabled(limit_id, false)
    }

    fn set_enabled(&self, limit_id: &str, enabled: bool) -> bool {
        let mut limits = self.limits.write();
        match limits.iter_mut().find(|l| l.id == limit_id) {
            Some(limit) => {
                limit.enabled = enabled;
                info!("Risk limit {} {}", limit_id, if enabled { "enabled" } else { "disabled" });
                true
            }
            None => false,
        }
    }

    pub fn limits(&self) -> Vec<RiskLimit> {
        self.limits.read().clone()
    }

    pub fn add_alert_callback(&self, callback: impl AlertCallback + 'static) {
        self.callbacks.write().push(Arc::new(callback));
    }

    /// Calculate portfolio metrics and check every enabled limit.
    ///
    /// Fails only when the calculator cannot run at all (empty or
    /// zero-valued position set). Alerts are returned in limit order.
    pub fn check_portfolio_risk(
        &self,
        positions: &Positions,
        returns: &ReturnsData,
    ) -> Result<Vec<RiskAlert>, RiskError> {
        let report = self.calculator.calculate_portfolio_risk(positions, returns)?;
        Ok(self.check_report(&report))
    }

    /// Check already-calculated metrics against every enabled limit
    pub fn check_report(&self, report: &RiskReport) -> Vec<RiskAlert> {
        let limits = self.limits();
        let mut alerts = Vec::new();

        for limit in limits.iter().filter(|l| l.enabled) {
            if !limit.metric_type.is_supported() {
                warn!("Unknown limit type '{}' on limit {}", limit.metric_type, limit.id);
                continue;
            }

            let observed = match report.get(&limit.metric_type) {
                Some(value) => value,
                None => {
                    debug!(
                        "Skipping limit {}: {} unavailable ({})",
                        limit.id,
                        limit.metric_type,
                        report.unavailable
                            .get(&limit.metric_type)
                            .map(String::as_str)
                            .unwrap_or("not calculated")
                    );
                    continue;
                }
            };

            if let Some(alert) = limit.check(observed) {
                warn!("{} [{}]", alert.message, alert.severity);
                self.record_breach(&limit.id, alert.timestamp);
                alerts.push(alert);
            }
        }

        self.store_alerts(&alerts);
        *self.last_check.write() = Some(Utc::now());

        if let Some(trip) = self.breaker.record_check(&alerts) {
            if let Some(telemetry) = &self.telemetry {
                telemetry.record_breaker_trip();
            }
            debug!("Trading halted until {}", trip.cooling_until);
        }

        if let Some(telemetry) = &self.telemetry {
            telemetry.record_risk_check();
            for alert in &alerts {
                telemetry.record_alert(alert.severity.as_str());
            }
        }

        for alert in &alerts {
            self.notify(alert);
        }

        alerts
    }

    /// Count a breach, unless the limit was removed while the check ran
    fn record_breach(&self, limit_id: &str, at: DateTime<Utc>) {
        let limits = self.limits.read();
        if !limits.iter().any(|l| l.id == limit_id) {
            debug!("Limit {} removed during check; breach not counted", limit_id);
            return;
        }
        let mut record = self.breaches.entry(limit_id.to_string()).or_default();
        record.count += 1;
        record.last_breach = Some(at);
    }

    fn store_alerts(&self, alerts: &[RiskAlert]) {
        let mut active = self.alerts.write();
        for alert in alerts {
            if let Some(index) = active
                .iter()
                .position(|a| !a.acknowledged && a.alert.limit_id == alert.limit_id)
            {
                active.remove(index);
            }
            active.push_back(ActiveAlert {
                alert: alert.clone(),
                acknowledged: false,
            });
        }
        while active.len() > self.max_alerts {
            if let Some(dropped) = active.pop_front() {
                debug!("Alert history full; dropped alert for {}", dropped.alert.limit_id);
            }
        }
    }

    /// Invoke every callback; failures are logged and swallowed
    fn notify(&self, alert: &RiskAlert) {
        let callbacks = self.callbacks.read().clone();

        for callback in callbacks {
            let outcome = catch_unwind(AssertUnwindSafe(|| callback.on_alert(alert)));
            let failure = match outcome {
                Ok(Ok(())) => continue,
                Ok(Err(e)) => e.to_string(),
                Err(panic) => panic_message(panic.as_ref()),
            };

            error!("Error in alert callback for {}: {}", alert.limit_id, failure);
            if let Some(telemetry) = &self.telemetry {
                telemetry.record_callback_failure();
            }
        }
    }

    pub fn breach_count(&self, limit_id: &str) -> u64 {
        self.breach_record(limit_id).count
    }

    pub fn breach_record(&self, limit_id: &str) -> BreachRecord {
        self.breaches
            .get(limit_id)
            .map(|r| *r)
            .unwrap_or_default()
    }

    /// Unacknowledged alerts, optionally filtered by severity
    pub fn active_alerts(&self, severity: Option<Severity>) -> Vec<RiskAlert> {
        self.alerts
            .read()
            .iter()
            .filter(|a| !a.acknowledged)
            .filter(|a| severity.map_or(true, |s| a.alert.severity == s))
            .map(|a| a.alert.clone())
            .collect()
    }

    /// Every stored alert, acknowledged or not, oldest first
    pub fn alert_history(&self) -> Vec<ActiveAlert> {
        self.alerts.read().iter().cloned().collect()
    }

    /// Acknowledge the alert at `index` in `alert_history`
    pub fn acknowledge_alert(&self, index: usize) -> bool {
        let mut alerts = self.alerts.write();
        match alerts.get_mut(index) {
            Some(active) => {
                active.acknowledged = true;
                info!("Acknowledged alert: {}", active.alert.limit_id);
                true
            }
            None => false,
        }
    }

    pub fn clear_acknowledged_alerts(&self) {
        self.alerts.write().retain(|a| !a.acknowledged);
    }

    pub fn risk_summary(&self) -> RiskSummary {
        let limits = self.limits.read();
        let count = |s: Severity| self.active_alerts(Some(s)).len();

        RiskSummary {
            last_check: *self.last_check.read(),
            active_limits: limits.iter().filter(|l| l.enabled).count(),
            total_limits: limits.len(),
            active_alerts: self.active_alerts(None).len(),
            critical_alerts: count(Severity::Critical),
            error_alerts: count(Severity::Error),
            warning_alerts: count(Severity::Warning),
        }
    }

    /// Limits with their breach history
    pub fn export_limits(&self) -> Vec<LimitState> {
        self.limits()
            .into_iter()
            .map(|limit| {
                let record = self.breach_record(&limit.id);
                LimitState {
                    limit,
                    breach_count: record.count,
                    last_breach: record.last_breach,
                }
            })
            .collect()
    }

    /// Add or replace limits, restoring their breach history
    pub fn import_limits(&self, states: Vec<LimitState>) {
        let count = states.len();
        for state in states {
            let id = state.limit.id.clone();
            self.add_limit(state.limit);
            self.breaches.insert(
                id,
                BreachRecord {
                    count: state.breach_count,
                    last_breach: state.last_breach,
                },
            );
        }
        info!("Imported {} risk limits", count);
    }

    /// `export_limits` as pretty-printed JSON
    pub fn export_limits_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.export_limits())?)
    }

    pub fn import_limits_json(&self, json: &str) -> Result<()> {
        let states: Vec<LimitState> = serde_json::from_str(json)?;
        self.import_limits(states);
        Ok(())
    }
}
