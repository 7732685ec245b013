//! Tenyo Engine Layer
//!
//! Pure decision logic, deterministic, no I/O.
//! Takes a snapshot, pending orders and a live price; returns what to place.
//!
//! # Pipeline
//!
//! ```text
//! Snapshot → StalenessFilter → analyze_coverage → calculate_targets → reconcile
//! ```

#![warn(clippy::all)]

pub mod coverage;
pub mod error;
pub mod reconcile;
pub mod staleness;
pub mod targets;

pub use coverage::{analyze_coverage, CoverageGap, CoverageResult, CoverageStatus};
pub use error::{EngineError, EngineResult};
pub use reconcile::{reconcile, satisfies_constraint, AdjustedPrices, LegBound, TRIGGER_BUFFER};
pub use staleness::{parse_captured_at, FilteredPositions, Freshness, StalenessFilter};
pub use targets::{calculate_targets, RiskParameters, TargetPrices};
