//! Execution layer error types.

use thiserror::Error;

/// Errors that can occur during execution operations.
#[derive(Debug, Error)]
pub enum ExecError {
    /// Network, timeout or HTTP-level failure talking to the venue
    #[error("Transport error: {0}")]
    Transport(String),

    /// Venue rejected the request
    #[error("Rejected by venue: {code} - {msg}")]
    Rejected { code: String, msg: String },

    /// Venue rejected our credentials or signature
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Venue answered with something we could not interpret
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Neither protective leg could be placed
    ///
    /// The position is unprotected. Needs operator attention; the next
    /// cycle retries from scratch.
    #[error("BOTH LEGS UNPROTECTED for {instrument} {side}: take-profit {take_profit}; stop-loss {stop_loss}")]
    BothLegsUnprotected {
        /// Instrument of the position
        instrument: String,
        /// Position side
        side: String,
        /// What happened to the take-profit leg
        take_profit: String,
        /// What happened to the stop-loss leg
        stop_loss: String,
    },

    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] tenyo_domain::DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] tenyo_engine::EngineError),
}

impl ExecError {
    /// Whether this is an authentication failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, ExecError::Authentication(_))
    }
}

/// Result type for execution operations.
pub type ExecResult<T> = Result<T, ExecError>;
