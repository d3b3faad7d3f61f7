use crate::data::{gross_value, ExecutedTrade, Positions, TradeOrder};
use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Everything a compliance rule may look at.
///
/// A snapshot without a `trade` describes the standing portfolio; with a
/// trade it describes a proposed action against that portfolio.
#[derive(Debug, Clone)]
pub struct ComplianceSnapshot {
    pub positions: Positions,
    pub trade: Option<TradeOrder>,
    /// Instrument symbol -> sector name
    pub sector_map: HashMap<String, String>,
    pub trade_history: Vec<ExecutedTrade>,
    /// Account capital for leverage checks
    pub capital: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

impl ComplianceSnapshot {
    pub fn new(positions: Positions) -> Self {
        Self {
            positions,
            trade: None,
            sector_map: HashMap::new(),
            trade_history: Vec::new(),
            capital: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_trade(mut self, trade: TradeOrder) -> Self {
        self.trade = Some(trade);
        self
    }

    pub fn with_sector_map(mut self, sector_map: HashMap<String, String>) -> Self {
        self.sector_map = sector_map;
        self
    }

    pub fn with_trade_history(mut self, history: Vec<ExecutedTrade>) -> Self {
        self.trade_history = history;
        self
    }

    pub fn with_capital(mut self, capital: f64) -> Self {
        self.capital = Some(capital);
        self
    }

    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Positions as they would stand once the trade (if any) fills
    pub fn positions_after_trade(&self) -> Positions {
        let mut positions = self.positions.clone();
        if let Some(trade) = &self.trade {
            *positions.entry(trade.symbol.clone()).or_insert(0.0) += trade.signed_quantity();
        }
        positions
    }

    pub fn gross_value(&self) -> f64 {
        gross_value(&self.positions)
    }

    pub fn sector_of(&self, symbol: &str) -> Option<&str> {
        self.sector_map.get(symbol).map(String::as_str)
    }
}
