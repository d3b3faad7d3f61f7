use crate::compliance::registry::{ComplianceRule, RegisteredRule};
use crate::compliance::snapshot::ComplianceSnapshot;
use crate::data::{gross_value, Positions, Severity, Side};
use crate::error::RuleError;
use chrono::{DateTime, Datelike, Duration, FixedOffset, NaiveTime, Utc, Weekday};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use tracing::warn;

/// Built-in rule families selectable by `rule_type` in configuration
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RuleKind {
    PositionSize,
    SectorConcentration,
    Turnover,
    WashSale,
    ShortSelling,
    Leverage,
    TradingHours,
    /// Unrecognized rule type, skipped when building
    Unsupported(String),
}

impl RuleKind {
    pub fn name(&self) -> &str {
        match self {
            RuleKind::PositionSize => "position_size",
            RuleKind::SectorConcentration => "concentration",
            RuleKind::Turnover => "turnover",
            RuleKind::WashSale => "wash_sale",
            RuleKind::ShortSelling => "short_selling",
            RuleKind::Leverage => "leverage",
            RuleKind::TradingHours => "trading_time",
            RuleKind::Unsupported(name) => name,
        }
    }
}

impl FromStr for RuleKind {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_lowercase().as_str() {
            "position_size" => RuleKind::PositionSize,
            "concentration" | "sector_concentration" => RuleKind::SectorConcentration,
            "turnover" => RuleKind::Turnover,
            "wash_sale" => RuleKind::WashSale,
            "short_selling" => RuleKind::ShortSelling,
            "leverage" => RuleKind::Leverage,
            "trading_time" | "trading_hours" => RuleKind::TradingHours,
            _ => RuleKind::Unsupported(s.to_string()),
        })
    }
}

impl From<String> for RuleKind {
    fn from(s: String) -> Self {
        match s.parse() {
            Ok(kind) => kind,
            Err(never) => match never {},
        }
    }
}

impl From<RuleKind> for String {
    fn from(kind: RuleKind) -> Self {
        kind.name().to_string()
    }
}

impl fmt::Display for RuleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One `[[compliance_rules]]` entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleConfig {
    pub id: String,
    pub rule_type: RuleKind,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_rule_severity")]
    pub severity: Severity,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Rule-specific settings, interpreted by the rule family
    #[serde(default)]
    pub parameters: toml::Table,
}

fn default_rule_severity() -> Severity {
    Severity::Error
}

fn default_enabled() -> bool {
    true
}

impl RuleConfig {
    pub fn new(id: impl Into<String>, rule_type: RuleKind, severity: Severity) -> Self {
        Self {
            id: id.into(),
            rule_type,
            description: None,
            severity,
            enabled: true,
            parameters: toml::Table::new(),
        }
    }

    pub fn with_parameter(mut self, key: &str, value: impl Into<toml::Value>) -> Self {
        self.parameters.insert(key.to_string(), value.into());
        self
    }

    fn params<P: DeserializeOwned>(&self) -> Result<P, RuleError> {
        toml::Value::Table(self.parameters.clone())
            .try_into()
            .map_err(|e: toml::de::Error| RuleError::InvalidParameter {
                name: "parameters",
                reason: format!("{} (rule '{}')", e.message(), self.id),
            })
    }

    /// Instantiate the predicate. `Ok(None)` for unsupported rule types.
    pub fn build(&self) -> Result<Option<RegisteredRule>, RuleError> {
        let description = self.description.clone().unwrap_or_else(|| self.rule_type.to_string());

        let rule = match &self.rule_type {
            RuleKind::PositionSize => {
                RegisteredRule::new(&self.id, self.params::<PositionSizeRule>()?.validated()?, description)
            }
            RuleKind::SectorConcentration => RegisteredRule::new(
                &self.id,
                self.params::<SectorConcentrationRule>()?.validated()?,
                description,
            ),
            RuleKind::Turnover => {
                RegisteredRule::new(&self.id, self.params::<TurnoverRule>()?.validated()?, description)
            }
            RuleKind::WashSale => RegisteredRule::new(&self.id, self.params::<WashSaleRule>()?, description),
            RuleKind::ShortSelling => {
                RegisteredRule::new(&self.id, self.params::<ShortSellingRule>()?.validated()?, description)
            }
            RuleKind::Leverage => {
                RegisteredRule::new(&self.id, self.params::<LeverageRule>()?.validated()?, description)
            }
            RuleKind::TradingHours => RegisteredRule::new(
                &self.id,
                TradingHoursRule::try_from(self.params::<TradingHoursParams>()?)?,
                description,
            ),
            RuleKind::Unsupported(name) => {
                warn!("Skipping compliance rule '{}' with unsupported type '{}'", self.id, name);
                return Ok(None);
            }
        };

        Ok(Some(
            rule.with_severity(self.severity)
                .with_enabled(self.enabled)
                .with_source(self.clone()),
        ))
    }
}

/// Rule configuration plus its violation history, used for export/import
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleState {
    #[serde(flatten)]
    pub config: RuleConfig,
    #[serde(default)]
    pub violation_count: u64,
    #[serde(default)]
    pub last_violation: Option<DateTime<Utc>>,
}

/// Default compliance rule set
pub fn default_rule_configs() -> Vec<RuleConfig> {
    vec![
        RuleConfig::new("position_limit", RuleKind::PositionSize, Severity::Error)
            .with_parameter("max_position_pct", 0.05),
        RuleConfig::new("sector_concentration", RuleKind::SectorConcentration, Severity::Warning)
            .with_parameter("max_sector_pct", 0.30),
        RuleConfig::new("daily_turnover_limit", RuleKind::Turnover, Severity::Warning)
            .with_parameter("max_daily_turnover", 0.20),
        RuleConfig::new("wash_sale_detection", RuleKind::WashSale, Severity::Error)
            .with_parameter("lookback_days", 30),
        RuleConfig::new("short_selling_check", RuleKind::ShortSelling, Severity::Error)
            .with_parameter("allow_short", false),
        RuleConfig::new("leverage_limit", RuleKind::Leverage, Severity::Error)
            .with_parameter("max_leverage", 1.0),
        RuleConfig::new("trading_hours", RuleKind::TradingHours, Severity::Warning)
            .with_parameter("market_open", "09:30")
            .with_parameter("market_close", "16:00")
            .with_parameter("utc_offset_minutes", -300),
    ]
}

fn check_fraction(name: &'static str, value: f64) -> Result<(), RuleError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(RuleError::InvalidParameter {
            name,
            reason: format!("must be a non-negative number, got {}", value),
        })
    }
}

/// Gross exposure per sector. Unmapped symbols are ignored.
fn sector_exposure(positions: &Positions, sector_map: &HashMap<String, String>) -> BTreeMap<String, f64> {
    let mut exposure = BTreeMap::new();
    for (symbol, value) in positions {
        if let Some(sector) = sector_map.get(symbol) {
            *exposure.entry(sector.clone()).or_insert(0.0) += value.abs();
        }
    }
    exposure
}

/// Single-position size as a fraction of the portfolio's gross value
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PositionSizeRule {
    pub max_position_pct: f64,
    /// Per-symbol overrides of `max_position_pct`
    pub symbol_specific: HashMap<String, f64>,
}

impl Default for PositionSizeRule {
    fn default() -> Self {
        Self {
            max_position_pct: 0.05,
            symbol_specific: HashMap::new(),
        }
    }
}

impl PositionSizeRule {
    pub fn new(max_position_pct: f64) -> Self {
        Self {
            max_position_pct,
            ..Default::default()
        }
    }

    fn validated(self) -> Result<Self, RuleError> {
        check_fraction("max_position_pct", self.max_position_pct)?;
        for pct in self.symbol_specific.values() {
            check_fraction("symbol_specific", *pct)?;
        }
        Ok(self)
    }

    fn limit_for(&self, symbol: &str) -> f64 {
        self.symbol_specific.get(symbol).copied().unwrap_or(self.max_position_pct)
    }

    fn within_limit(&self, positions: &Positions, symbol: &str) -> bool {
        let gross = gross_value(positions);
        if gross <= 0.0 {
            return true;
        }
        let value = positions.get(symbol).copied().unwrap_or(0.0);
        value.abs() / gross <= self.limit_for(symbol)
    }
}

impl ComplianceRule for PositionSizeRule {
    fn evaluate(&self, data: &ComplianceSnapshot) -> Result<bool, RuleError> {
        match &data.trade {
            Some(trade) => Ok(self.within_limit(&data.positions_after_trade(), &trade.symbol)),
            None => Ok(data.positions.keys().all(|symbol| self.within_limit(&data.positions, symbol))),
        }
    }
}

/// Gross exposure per sector as a fraction of the portfolio
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SectorConcentrationRule {
    pub max_sector_pct: f64,
}

impl Default for SectorConcentrationRule {
    fn default() -> Self {
        Self { max_sector_pct: 0.30 }
    }
}

impl SectorConcentrationRule {
    fn validated(self) -> Result<Self, RuleError> {
        check_fraction("max_sector_pct", self.max_sector_pct)?;
        Ok(self)
    }
}

impl ComplianceRule for SectorConcentrationRule {
    fn evaluate(&self, data: &ComplianceSnapshot) -> Result<bool, RuleError> {
        let positions = data.positions_after_trade();
        let gross = gross_value(&positions);
        if gross <= 0.0 {
            return Ok(true);
        }
        let exposure = sector_exposure(&positions, &data.sector_map);

        match &data.trade {
            // only the traded symbol's sector matters for a trade
            Some(trade) => match data.sector_of(&trade.symbol) {
                Some(sector) => {
                    let sector_value = exposure.get(sector).copied().unwrap_or(0.0);
                    Ok(sector_value / gross <= self.max_sector_pct)
                }
                None => Ok(true),
            },
            None => Ok(exposure.values().all(|value| value / gross <= self.max_sector_pct)),
        }
    }
}

/// Same-day traded notional (history plus the proposed trade) over gross value
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TurnoverRule {
    pub max_daily_turnover: f64,
}

impl Default for TurnoverRule {
    fn default() -> Self {
        Self { max_daily_turnover: 0.20 }
    }
}

impl TurnoverRule {
    fn validated(self) -> Result<Self, RuleError> {
        check_fraction("max_daily_turnover", self.max_daily_turnover)?;
        Ok(self)
    }
}

impl ComplianceRule for TurnoverRule {
    fn evaluate(&self, data: &ComplianceSnapshot) -> Result<bool, RuleError> {
        let today = data.timestamp.date_naive();
        let traded_today: f64 = data
            .trade_history
            .iter()
            .filter(|t| t.timestamp.date_naive() == today)
            .map(|t| t.quantity.abs())
            .sum();
        let proposed = data.trade.as_ref().map(|t| t.quantity.abs()).unwrap_or(0.0);
        let turnover = traded_today + proposed;

        if turnover == 0.0 {
            return Ok(true);
        }
        let gross = data.gross_value();
        if gross <= 0.0 {
            return Err(RuleError::MissingInput("positions"));
        }
        Ok(turnover / gross <= self.max_daily_turnover)
    }
}

/// Rejects buys of a symbol sold at a loss within the lookback window
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WashSaleRule {
    pub lookback_days: u32,
}

impl Default for WashSaleRule {
    fn default() -> Self {
        Self { lookback_days: 30 }
    }
}

impl ComplianceRule for WashSaleRule {
    fn evaluate(&self, data: &ComplianceSnapshot) -> Result<bool, RuleError> {
        let trade = match &data.trade {
            Some(trade) if trade.side == Side::Buy => trade,
            _ => return Ok(true),
        };

        let window_start = data.timestamp - Duration::days(i64::from(self.lookback_days));
        let wash_sale = data.trade_history.iter().any(|t| {
            t.symbol == trade.symbol
                && t.side == Side::Sell
                && t.timestamp >= window_start
                && t.timestamp <= data.timestamp
                && t.realized_pnl.map_or(false, |pnl| pnl < 0.0)
        });

        Ok(!wash_sale)
    }
}

/// Controls whether positions may go (or stay) negative
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ShortSellingRule {
    pub allow_short: bool,
    /// Cap on short gross value over total gross value when shorts are
    /// allowed; zero or absent means uncapped
    pub max_short_pct: Option<f64>,
}

impl ShortSellingRule {
    fn validated(self) -> Result<Self, RuleError> {
        if let Some(pct) = self.max_short_pct {
            check_fraction("max_short_pct", pct)?;
        }
        Ok(self)
    }

    fn within_limit(&self, positions: &Positions) -> bool {
        let short: f64 = positions.values().filter(|v| **v < 0.0).map(|v| v.abs()).sum();
        if short == 0.0 {
            return true;
        }
        if !self.allow_short {
            return false;
        }
        match self.max_short_pct {
            Some(cap) if cap > 0.0 => short / gross_value(positions) <= cap,
            _ => true,
        }
    }
}

impl ComplianceRule for ShortSellingRule {
    fn evaluate(&self, data: &ComplianceSnapshot) -> Result<bool, RuleError> {
        match &data.trade {
            Some(trade) => {
                let after = data.positions_after_trade();
                let resulting = after.get(&trade.symbol).copied().unwrap_or(0.0);
                if resulting >= 0.0 {
                    return Ok(true);
                }
                Ok(self.within_limit(&after))
            }
            None => Ok(self.within_limit(&data.positions)),
        }
    }
}

/// Gross exposure over capital. Without explicit capital the current long
/// market value stands in for it.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LeverageRule {
    pub max_leverage: f64,
}

impl Default for LeverageRule {
    fn default() -> Self {
        Self { max_leverage: 1.0 }
    }
}

impl LeverageRule {
    fn validated(self) -> Result<Self, RuleError> {
        check_fraction("max_leverage", self.max_leverage)?;
        Ok(self)
    }
}

impl ComplianceRule for LeverageRule {
    fn evaluate(&self, data: &ComplianceSnapshot) -> Result<bool, RuleError> {
        let exposure = gross_value(&data.positions_after_trade());
        if exposure == 0.0 {
            return Ok(true);
        }

        let capital = data
            .capital
            .unwrap_or_else(|| data.positions.values().filter(|v| **v > 0.0).sum());
        if capital <= 0.0 {
            return Err(RuleError::MissingInput("capital"));
        }

        Ok(exposure / capital <= self.max_leverage)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TradingHoursParams {
    pub market_open: String,
    pub market_close: String,
    /// Exchange offset from UTC in minutes
    pub utc_offset_minutes: i32,
    pub weekdays_only: bool,
}

impl Default for TradingHoursParams {
    fn default() -> Self {
        Self {
            market_open: "09:30".to_string(),
            market_close: "16:00".to_string(),
            utc_offset_minutes: -300,
            weekdays_only: true,
        }
    }
}

/// Trades are only allowed inside the exchange session (inclusive bounds)
#[derive(Debug, Clone)]
pub struct TradingHoursRule {
    pub market_open: NaiveTime,
    pub market_close: NaiveTime,
    pub offset: FixedOffset,
    pub weekdays_only: bool,
}

impl TryFrom<TradingHoursParams> for TradingHoursRule {
    type Error = RuleError;

    fn try_from(params: TradingHoursParams) -> Result<Self, RuleError> {
        let parse = |name: &'static str, value: &str| {
            NaiveTime::parse_from_str(value, "%H:%M").map_err(|e| RuleError::InvalidParameter {
                name,
                reason: format!("'{}': {}", value, e),
            })
        };
        let market_open = parse("market_open", &params.market_open)?;
        let market_close = parse("market_close", &params.market_close)?;
        if market_close <= market_open {
            return Err(RuleError::InvalidParameter {
                name: "market_close",
                reason: "must be after market_open".to_string(),
            });
        }
        let offset = FixedOffset::east_opt(params.utc_offset_minutes * 60).ok_or_else(|| {
            RuleError::InvalidParameter {
                name: "utc_offset_minutes",
                reason: format!("out of range: {}", params.utc_offset_minutes),
            }
        })?;

        Ok(Self {
            market_open,
            market_close,
            offset,
            weekdays_only: params.weekdays_only,
        })
    }
}

impl ComplianceRule for TradingHoursRule {
    fn evaluate(&self, data: &ComplianceSnapshot) -> Result<bool, RuleError> {
        if data.trade.is_none() {
            return Ok(true);
        }

        let local = data.timestamp.with_timezone(&self.offset);
        if self.weekdays_only && matches!(local.weekday(), Weekday::Sat | Weekday::Sun) {
            return Ok(false);
        }
        let time = local.time();
        Ok(time >= self.market_open && time <= self.market_close)
    }
}
