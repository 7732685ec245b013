//! Tenyo Execution Layer
//!
//! Turns engine decisions into venue orders.
//!
//! # Architecture
//!
//! ```text
//! TargetPrices → PlacementOrchestrator → (reconcile) → ExchangeGateway
//! ```
//!
//! # Components
//!
//! - **Ports**: Traits for the exchange gateway and account data
//! - **Placement**: Two-leg placement protocol with degraded mode
//! - **Stub**: In-memory gateway for tests and development
//!
//! # Example
//!
//! ```rust,ignore
//! use tenyo_exec::{PlacementOrchestrator, StubGateway};
//! use std::sync::Arc;
//!
//! let gateway = Arc::new(StubGateway::new(dec!(95000)));
//! let orchestrator = PlacementOrchestrator::new(gateway);
//!
//! let outcome = orchestrator.place_protection(&position, uncovered, &targets).await?;
//! ```

#![warn(clippy::all)]

pub mod error;
pub mod placement;
pub mod ports;
pub mod stub;

// Re-exports for convenience
pub use error::{ExecError, ExecResult};
pub use placement::{LegOutcome, PlacementOrchestrator, PlacementOutcome, PricingMode, ProtectionStatus};
pub use ports::{
    AccountPort, ConditionalOrderRequest, ConditionalTrigger, ExchangeGateway, PlacedOrder,
    ProtectionLeg,
};
pub use stub::StubGateway;
