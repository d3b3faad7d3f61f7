pub mod types;

pub use types::{
    gross_value, ExecutedTrade, Positions, ReturnSeries, ReturnsData, Severity, Side, TradeOrder,
};
