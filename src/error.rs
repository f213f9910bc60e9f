//! Error taxonomy for the replication engine.
//!
//! Calculation-stage errors abort a copy before any order is placed.
//! Per-symbol execution failures are not errors here: they are recorded
//! on the batch as [`crate::models::ExecutionStatus`] values.

use rust_decimal::Decimal;
use thiserror::Error;

/// Errors raised by portfolio and market-data collaborators.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DataError {
    #[error("data source unavailable: {0}")]
    Unavailable(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("stale price for {symbol}: {age_secs}s old")]
    Stale { symbol: String, age_secs: i64 },
}

/// Errors raised by the order execution collaborator.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum OrderError {
    #[error("order rejected: {0}")]
    Rejected(String),

    #[error("exchange unavailable: {0}")]
    Unavailable(String),
}

/// Main error type for copy requests.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CopyError {
    #[error("source portfolio has no positions")]
    EmptyPortfolio,

    #[error("non-positive notional value for: {}", symbols.join(", "))]
    InvalidMagnitude { symbols: Vec<String> },

    #[error("symbol listed more than once in source portfolio: {0}")]
    DuplicateSymbol(String),

    #[error("distribution percentages sum to {sum}, not 1")]
    IncompleteDistribution { sum: Decimal },

    #[error("invalid allocation: {0}")]
    InvalidAllocation(String),

    #[error("insufficient balance: required {required}, available {available}, shortfall {shortfall}")]
    InsufficientBalance {
        required: Decimal,
        available: Decimal,
        shortfall: Decimal,
    },

    #[error("no executable positions: all {skipped} entries below platform minimum")]
    NothingToExecute { skipped: usize },

    #[error("no usable price for {0}")]
    MissingPrice(String),

    #[error("balance changed since preview (preview version {expected}, current {current})")]
    StaleBalance { expected: u64, current: u64 },

    #[error("preview assumed balance {previewed}, ledger holds {ledger}")]
    BalanceMismatch { previewed: Decimal, ledger: Decimal },

    #[error("no balance synced for account {0}")]
    Unsynced(String),

    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    #[error("symbol not found: {0}")]
    SymbolNotFound(String),

    #[error("stale price for {symbol}: {age_secs}s old")]
    StalePrice { symbol: String, age_secs: i64 },

    #[error("no target ratio recorded for {account} copying {source_wallet}")]
    NotTracked { account: String, source_wallet: String },

    #[error("storage error: {0}")]
    Storage(String),
}

impl From<DataError> for CopyError {
    fn from(e: DataError) -> Self {
        match e {
            DataError::Unavailable(msg) => CopyError::Unavailable(msg),
            DataError::SymbolNotFound(symbol) => CopyError::SymbolNotFound(symbol),
            DataError::Stale { symbol, age_secs } => CopyError::StalePrice { symbol, age_secs },
        }
    }
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, CopyError>;

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_data_error_maps_into_copy_error() {
        let err: CopyError = DataError::Stale {
            symbol: "BTC".to_string(),
            age_secs: 90,
        }
        .into();
        assert_eq!(
            err,
            CopyError::StalePrice {
                symbol: "BTC".to_string(),
                age_secs: 90
            }
        );
    }

    #[test]
    fn test_shortfall_in_message() {
        let err = CopyError::InsufficientBalance {
            required: dec!(36),
            available: dec!(30),
            shortfall: dec!(6),
        };
        assert!(err.to_string().contains("shortfall 6"));
    }
}
