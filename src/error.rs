use thiserror::Error;

/// Errors raised by the risk calculator
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RiskError {
    #[error("risk calculation requested for an empty position set")]
    EmptyPortfolio,

    #[error("portfolio gross value is zero")]
    ZeroPortfolioValue,

    #[error("no return series supplied for held instrument {0}")]
    MissingReturns(String),

    #[error("return series for {0} is empty")]
    EmptyReturns(String),

    #[error("return series share no common dates")]
    MisalignedReturns,

    #[error("insufficient data: {actual} observations, at least {required} required")]
    InsufficientData { required: usize, actual: usize },

    #[error("no benchmark return series supplied")]
    MissingBenchmark,

    #[error("{0} is undefined for a zero-variance series")]
    ZeroVariance(&'static str),

    #[error("non-finite value in {0}")]
    NonFinite(String),

    #[error("confidence level {0} must lie strictly between 0 and 1")]
    InvalidConfidence(f64),

    #[error("{0} must be positive")]
    NonPositive(&'static str),
}

impl RiskError {
    /// Fatal errors abort a portfolio calculation; everything else only
    /// makes the affected metric unavailable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, RiskError::EmptyPortfolio | RiskError::ZeroPortfolioValue)
    }
}

/// Failure raised by a compliance predicate while evaluating
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RuleError {
    #[error("missing input: {0}")]
    MissingInput(&'static str),

    #[error("invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("{0}")]
    Failed(String),
}

impl RuleError {
    pub fn failed(msg: impl Into<String>) -> Self {
        RuleError::Failed(msg.into())
    }
}

/// Render a caught panic payload as text
pub(crate) fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        format!("panicked: {}", s)
    } else if let Some(s) = panic.downcast_ref::<String>() {
        format!("panicked: {}", s)
    } else {
        "panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(RiskError::EmptyPortfolio.is_fatal());
        assert!(RiskError::ZeroPortfolioValue.is_fatal());
        assert!(!RiskError::MissingBenchmark.is_fatal());
        assert!(!RiskError::InsufficientData { required: 30, actual: 3 }.is_fatal());
    }

    #[test]
    fn test_error_messages() {
        let err = RiskError::MissingReturns("AAPL".into());
        assert_eq!(err.to_string(), "no return series supplied for held instrument AAPL");

        let err = RuleError::InvalidParameter {
            name: "market_open",
            reason: "bad time".into(),
        };
        assert_eq!(err.to_string(), "invalid parameter market_open: bad time");
    }
}
