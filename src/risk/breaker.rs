use crate::data::Severity;
use crate::risk::limits::RiskAlert;
use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

/// Circuit breaker settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    pub enabled: bool,
    /// Alerts at or above this severity count towards tripping
    pub trip_severity: Severity,
    /// Consecutive breaching checks that trip the breaker
    pub max_consecutive_breaches: u32,
    /// How long trading stays halted once tripped
    pub cooling_period_minutes: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            trip_severity: Severity::Error,
            max_consecutive_breaches: 3,
            cooling_period_minutes: 30,
        }
    }
}

/// An active trip
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerTrip {
    pub reason: String,
    pub triggered_at: DateTime<Utc>,
    pub cooling_until: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct BreakerState {
    consecutive: u32,
    trip: Option<BreakerTrip>,
}

/// Halts trading after repeated serious limit breaches.
///
/// Fed by the risk monitor after every check; read by the compliance
/// checker's pre-trade gate. A trip clears itself once the cooling period
/// has elapsed, or manually through `reset`.
#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Feed the alerts of one risk check. Returns the trip if this check
    /// tripped the breaker.
    pub fn record_check(&self, alerts: &[RiskAlert]) -> Option<BreakerTrip> {
        self.record_check_at(alerts, Utc::now())
    }

    pub fn record_check_at(&self, alerts: &[RiskAlert], now: DateTime<Utc>) -> Option<BreakerTrip> {
        if !self.config.enabled {
            return None;
        }

        let serious: Vec<&RiskAlert> = alerts
            .iter()
            .filter(|a| a.severity >= self.config.trip_severity)
            .collect();

        let mut state = self.state.lock();
        Self::expire(&mut state, now);

        if serious.is_empty() {
            state.consecutive = 0;
            return None;
        }

        state.consecutive += 1;
        if state.trip.is_some() || state.consecutive < self.config.max_consecutive_breaches {
            return None;
        }

        let limits: Vec<&str> = serious.iter().map(|a| a.limit_id.as_str()).collect();
        let trip = BreakerTrip {
            reason: format!(
                "{} consecutive checks breached {} limits ({})",
                state.consecutive,
                self.config.trip_severity,
                limits.join(", ")
            ),
            triggered_at: now,
            cooling_until: now + Duration::minutes(self.config.cooling_period_minutes),
        };
        error!("Circuit breaker tripped: {}", trip.reason);
        state.trip = Some(trip.clone());
        Some(trip)
    }

    /// Active trip, if the cooling period has not elapsed
    pub fn status(&self) -> Option<BreakerTrip> {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> Option<BreakerTrip> {
        let mut state = self.state.lock();
        Self::expire(&mut state, now);
        state.trip.clone()
    }

    pub fn is_tripped(&self) -> bool {
        self.status().is_some()
    }

    /// Manual override
    pub fn reset(&self) {
        let mut state = self.state.lock();
        state.consecutive = 0;
        if state.trip.take().is_some() {
            info!("Circuit breaker reset");
        }
    }

    fn expire(state: &mut BreakerState, now: DateTime<Utc>) {
        if state.trip.as_ref().map_or(false, |t| now >= t.cooling_until) {
            info!("Circuit breaker cooling period elapsed");
            state.trip = None;
            state.consecutive = 0;
        }
    }
}
