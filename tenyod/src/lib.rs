//! Tenyo Daemon Library
//!
//! Runtime for the OKX position-protection engine.
//!
//! # Architecture
//!
//! ```text
//! OKX account ──► Account Poller ──► Snapshot Store
//!                                          │
//!                                          ▼
//!             Scheduler ──► Protection Manager ──► Placement ──► OKX algo orders
//!                                          │
//!                                     Event Bus / Metrics ──► API
//! ```
//!
//! # Components
//!
//! - **Daemon**: Main runtime orchestrator
//! - **Account Poller**: Stores balance and position snapshots
//! - **Protection Manager**: One protection cycle over the latest snapshot
//! - **Scheduler**: Runs the protection cycle on a fixed interval
//! - **Gateway**: OKX adapter for the execution ports
//! - **Event Bus**: Internal notifications
//! - **API**: Read-only HTTP endpoints (health, status, metrics)
//! - **Config**: Environment-based configuration
//!
//! # Example
//!
//! ```rust,ignore
//! use tenyod::{Config, Daemon};
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = Config::from_env().expect("Failed to load config");
//!     let daemon = Daemon::new_stub(config).expect("Failed to build daemon");
//!     daemon.run().await.expect("Daemon error");
//! }
//! ```

#![warn(clippy::all)]

pub mod api;
pub mod config;
pub mod daemon;
pub mod error;
pub mod event_bus;
pub mod gateway;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod protection_manager;
pub mod scheduler;

// Re-exports for convenience
pub use api::{create_router, ApiState, ConfigDigest};
pub use config::{
    ApiConfig, Config, Environment, LogFileConfig, LogFormat, LogRotation, LoggingConfig,
    OkxConfig, ProtectionConfig,
};
pub use daemon::Daemon;
pub use error::{DaemonError, DaemonResult};
pub use event_bus::{DaemonEvent, EventBus, EventReceiver, Lagged, PlacementSummary};
pub use gateway::OkxGateway;
pub use metrics::Metrics;
pub use poller::{AccountPoller, PollReport, PollerStats};
pub use protection_manager::{CycleSummary, ProtectionManager};
pub use scheduler::ProtectionScheduler;
