//! Engine error types.

use rust_decimal::Decimal;
use tenyo_domain::DomainError;
use thiserror::Error;

/// Errors raised by the decision engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    /// Snapshot capture time could not be parsed (aborts the cycle)
    #[error("Malformed snapshot timestamp {value:?}: {reason}")]
    MalformedTimestamp { value: String, reason: String },

    /// Entry price is zero or negative (position skipped)
    #[error("Invalid entry price for {instrument}: {entry_price}")]
    InvalidEntryPrice {
        instrument: String,
        entry_price: Decimal,
    },

    /// A computed target is zero or negative (position skipped)
    #[error("Invalid calculated price for {instrument}: tp={take_profit}, sl={stop_loss}")]
    InvalidCalculatedPrice {
        instrument: String,
        take_profit: Decimal,
        stop_loss: Decimal,
    },

    /// Engine parameters rejected at construction time
    #[error("Invalid engine configuration: {0}")]
    InvalidConfig(String),

    /// Domain validation error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;
