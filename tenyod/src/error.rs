//! Daemon error types.

use tenyo_connectors::OkxRestError;
use tenyo_domain::DomainError;
use tenyo_engine::EngineError;
use tenyo_exec::ExecError;
use tenyo_store::StoreError;
use thiserror::Error;

/// Daemon-level errors.
#[derive(Debug, Error)]
pub enum DaemonError {
    /// Domain error
    #[error("Domain error: {0}")]
    Domain(#[from] DomainError),

    /// Engine error
    #[error("Engine error: {0}")]
    Engine(#[from] EngineError),

    /// Execution error
    #[error("Execution error: {0}")]
    Exec(#[from] ExecError),

    /// Store error
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// OKX client error
    #[error("OKX error: {0}")]
    Okx(#[from] OkxRestError),

    /// Metrics registry error
    #[error("Metrics error: {0}")]
    Metrics(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<prometheus::Error> for DaemonError {
    fn from(err: prometheus::Error) -> Self {
        DaemonError::Metrics(err.to_string())
    }
}

/// Result type for daemon operations.
pub type DaemonResult<T> = Result<T, DaemonError>;
