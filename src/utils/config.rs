use crate::compliance::{default_rule_configs, ComplianceChecker, RuleConfig, DEFAULT_MAX_VIOLATIONS};
use crate::risk::{
    default_limits, run_monitoring, CalculatorConfig, CircuitBreaker, CircuitBreakerConfig, PortfolioSource,
    PositionSizer, RiskCalculator, RiskLimit, RiskMonitor, SizingConfig, StressScenario, DEFAULT_MAX_ALERTS,
};
use crate::utils::metrics::Telemetry;
use anyhow::{ensure, Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// Environment variable naming the configuration file
pub const CONFIG_FILE_ENV: &str = "RISK_CONFIG_FILE";
/// Prefix for `RISK__SECTION__KEY` overrides
pub const ENV_PREFIX: &str = "RISK";
const DEFAULT_CONFIG_PATH: &str = "config/default.toml";

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub logging: LoggingConfig,
    pub calculator: CalculatorConfig,
    pub monitoring: MonitoringConfig,
    pub metrics: MetricsConfig,
    pub compliance: ComplianceConfig,
    pub circuit_breaker: CircuitBreakerConfig,
    pub sizing: SizingConfig,
    pub risk_limits: Vec<RiskLimit>,
    pub stress_scenarios: BTreeMap<String, StressScenario>,
    pub compliance_rules: Vec<RuleConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    /// "json" or "pretty"
    pub output: String,
    /// Empty for stdout
    pub file_path: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitoringConfig {
    /// When false, `spawn_monitoring` starts nothing
    pub enabled: bool,
    pub check_interval_seconds: u64,
    /// Bound on the monitor's alert history
    pub max_alerts: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub enabled: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ComplianceConfig {
    /// Bound on the checker's violation history
    pub max_violations: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            output: "pretty".to_string(),
            file_path: String::new(),
        }
    }
}

impl Default for MonitoringConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            check_interval_seconds: 60,
            max_alerts: DEFAULT_MAX_ALERTS,
        }
    }
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enabled: true }
    }
}

impl Default for ComplianceConfig {
    fn default() -> Self {
        Self {
            max_violations: DEFAULT_MAX_VIOLATIONS,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig::default(),
            calculator: CalculatorConfig::default(),
            monitoring: MonitoringConfig::default(),
            metrics: MetricsConfig::default(),
            compliance: ComplianceConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            sizing: SizingConfig::default(),
            risk_limits: default_limits(),
            stress_scenarios: default_stress_scenarios(),
            compliance_rules: default_rule_configs(),
        }
    }
}

/// Sections that can be overridden from the environment
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct ScalarSettings {
    logging: LoggingConfig,
    calculator: CalculatorConfig,
    monitoring: MonitoringConfig,
    metrics: MetricsConfig,
    compliance: ComplianceConfig,
    circuit_breaker: CircuitBreakerConfig,
    sizing: SizingConfig,
}

fn default_stress_scenarios() -> BTreeMap<String, StressScenario> {
    let mut scenarios = BTreeMap::new();
    scenarios.insert(
        "market_crash".to_string(),
        StressScenario::new("20% market decline").with_shock("*", -0.20),
    );
    scenarios.insert(
        "sector_rotation".to_string(),
        StressScenario::new("Tech down 15%, value up 5%")
            .with_shock("tech", -0.15)
            .with_shock("value", 0.05),
    );
    scenarios
}

impl Config {
    /// Load configuration from TOML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Config = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Layered load: the file named by `RISK_CONFIG_FILE` (or
    /// `config/default.toml`, falling back to built-in defaults when absent),
    /// then `RISK__*` environment overrides of the scalar sections
    pub fn load() -> Result<Self> {
        let mut config = match std::env::var(CONFIG_FILE_ENV) {
            Ok(path) => Self::from_file(path)?,
            Err(_) if Path::new(DEFAULT_CONFIG_PATH).exists() => Self::from_file(DEFAULT_CONFIG_PATH)?,
            Err(_) => Self::default(),
        };

        // the config crate lowercases keys, so only the scalar sections go through it
        let base = ScalarSettings {
            logging: config.logging.clone(),
            calculator: config.calculator.clone(),
            monitoring: config.monitoring.clone(),
            metrics: config.metrics.clone(),
            compliance: config.compliance.clone(),
            circuit_breaker: config.circuit_breaker.clone(),
            sizing: config.sizing.clone(),
        };
        let layered: ScalarSettings = ::config::Config::builder()
            .add_source(::config::Config::try_from(&base)?)
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .context("Failed to apply environment overrides")?
            .try_deserialize()?;

        config.logging = layered.logging;
        config.calculator = layered.calculator;
        config.monitoring = layered.monitoring;
        config.metrics = layered.metrics;
        config.compliance = layered.compliance;
        config.circuit_breaker = layered.circuit_breaker;
        config.sizing = layered.sizing;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.calculator.min_observations >= 2,
            "calculator.min_observations must be at least 2"
        );
        ensure!(self.calculator.periods_per_year > 0, "calculator.periods_per_year must be positive");
        ensure!(
            self.monitoring.check_interval_seconds > 0,
            "monitoring.check_interval_seconds must be positive"
        );
        ensure!(self.monitoring.max_alerts > 0, "monitoring.max_alerts must be positive");
        ensure!(self.compliance.max_violations > 0, "compliance.max_violations must be positive");
        ensure!(
            self.circuit_breaker.max_consecutive_breaches > 0,
            "circuit_breaker.max_consecutive_breaches must be positive"
        );
        ensure!(
            self.circuit_breaker.cooling_period_minutes >= 0,
            "circuit_breaker.cooling_period_minutes must not be negative"
        );
        let sizing = &self.sizing;
        for (name, value) in [
            ("max_position_pct", sizing.max_position_pct),
            ("risk_per_trade", sizing.risk_per_trade),
            ("max_var_contribution", sizing.max_var_contribution),
            ("max_trade_var_pct", sizing.max_trade_var_pct),
            ("fallback_volatility", sizing.fallback_volatility),
        ] {
            ensure!(value.is_finite() && value > 0.0, "sizing.{} must be positive", name);
        }
        ensure!(
            sizing.confidence > 0.0 && sizing.confidence < 1.0,
            "sizing.confidence must lie strictly between 0 and 1"
        );
        for limit in &self.risk_limits {
            ensure!(limit.threshold.is_finite(), "risk limit {} has a non-finite threshold", limit.id);
        }
        for (name, scenario) in &self.stress_scenarios {
            ensure!(
                scenario.shocks.values().all(|s| s.is_finite()),
                "stress scenario {} has a non-finite shock",
                name
            );
        }
        for rule in &self.compliance_rules {
            rule.build()
                .with_context(|| format!("Invalid compliance rule {}", rule.id))?;
        }
        Ok(())
    }

    pub fn monitoring_interval(&self) -> Duration {
        Duration::from_secs(self.monitoring.check_interval_seconds)
    }

    pub fn build_telemetry(&self) -> Result<Option<Arc<Telemetry>>> {
        if !self.metrics.enabled {
            return Ok(None);
        }
        Ok(Some(Arc::new(Telemetry::new()?)))
    }

    pub fn build_calculator(&self) -> RiskCalculator {
        RiskCalculator::new(self.calculator.clone())
    }

    /// Monitor with every configured limit and its own circuit breaker
    pub fn build_monitor(&self, telemetry: Option<Arc<Telemetry>>) -> RiskMonitor {
        let monitor = RiskMonitor::new(self.build_calculator())
            .with_limits(self.risk_limits.iter().cloned())
            .with_max_alerts(self.monitoring.max_alerts)
            .with_circuit_breaker(Arc::new(CircuitBreaker::new(self.circuit_breaker.clone())));
        match telemetry {
            Some(telemetry) => monitor.with_telemetry(telemetry),
            None => monitor,
        }
    }

    /// Checker with every supported configured rule
    pub fn build_compliance_checker(&self, telemetry: Option<Arc<Telemetry>>) -> Result<ComplianceChecker> {
        let checker = ComplianceChecker::from_rule_configs(&self.compliance_rules)?
            .with_max_violations(self.compliance.max_violations);
        Ok(match telemetry {
            Some(telemetry) => checker.with_telemetry(telemetry),
            None => checker,
        })
    }

    pub fn build_position_sizer(&self) -> PositionSizer {
        PositionSizer::new(self.build_calculator(), self.sizing.clone())
    }

    /// Spawn periodic risk checks at the configured interval. Returns
    /// `None` without starting anything when monitoring is disabled.
    pub fn spawn_monitoring<S>(
        &self,
        monitor: Arc<RiskMonitor>,
        source: S,
        shutdown: watch::Receiver<bool>,
    ) -> Option<JoinHandle<usize>>
    where
        S: PortfolioSource + 'static,
    {
        if !self.monitoring.enabled {
            info!("Risk monitoring disabled by configuration");
            return None;
        }
        Some(tokio::spawn(run_monitoring(monitor, source, self.monitoring_interval(), shutdown)))
    }
}
