//! Prometheus metrics.
//!
//! One registry per daemon, rendered in text format by `GET /metrics`.

use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};

use crate::error::DaemonResult;

/// Daemon metrics.
pub struct Metrics {
    registry: Registry,
    /// Cycles started
    pub cycles_total: IntCounter,
    /// Cycles aborted before examining positions
    pub cycle_aborts_total: IntCounter,
    /// Positions examined
    pub positions_checked_total: IntCounter,
    /// Protective orders accepted by the venue, by leg
    pub orders_placed_total: IntCounterVec,
    /// Protective order placements that failed, by leg
    pub placement_failures_total: IntCounterVec,
    /// Positions left with no protective leg after placement
    pub unprotected_positions_total: IntCounter,
    /// Account polls, by result
    pub polls_total: IntCounterVec,
    /// Positions the last cycle left without both legs
    pub uncovered_positions: IntGauge,
    /// Unix time of the last completed cycle
    pub last_cycle_timestamp: IntGauge,
}

impl Metrics {
    /// Create and register all metrics.
    pub fn new() -> DaemonResult<Self> {
        let registry = Registry::new_custom(Some("tenyo".to_string()), None)?;

        let cycles_total = IntCounter::new("cycles_total", "Protection cycles started")?;
        let cycle_aborts_total =
            IntCounter::new("cycle_aborts_total", "Protection cycles aborted")?;
        let positions_checked_total =
            IntCounter::new("positions_checked_total", "Positions examined by the cycle")?;
        let orders_placed_total = IntCounterVec::new(
            Opts::new("orders_placed_total", "Protective orders placed"),
            &["leg"],
        )?;
        let placement_failures_total = IntCounterVec::new(
            Opts::new("placement_failures_total", "Protective order placements that failed"),
            &["leg"],
        )?;
        let unprotected_positions_total = IntCounter::new(
            "unprotected_positions_total",
            "Positions where neither protective leg could be placed",
        )?;
        let polls_total =
            IntCounterVec::new(Opts::new("polls_total", "Account polls"), &["result"])?;
        let uncovered_positions = IntGauge::new(
            "uncovered_positions",
            "Positions the last cycle left without both protective legs",
        )?;
        let last_cycle_timestamp = IntGauge::new(
            "last_cycle_timestamp_seconds",
            "Unix time of the last completed cycle",
        )?;

        registry.register(Box::new(cycles_total.clone()))?;
        registry.register(Box::new(cycle_aborts_total.clone()))?;
        registry.register(Box::new(positions_checked_total.clone()))?;
        registry.register(Box::new(orders_placed_total.clone()))?;
        registry.register(Box::new(placement_failures_total.clone()))?;
        registry.register(Box::new(unprotected_positions_total.clone()))?;
        registry.register(Box::new(polls_total.clone()))?;
        registry.register(Box::new(uncovered_positions.clone()))?;
        registry.register(Box::new(last_cycle_timestamp.clone()))?;

        Ok(Self {
            registry,
            cycles_total,
            cycle_aborts_total,
            positions_checked_total,
            orders_placed_total,
            placement_failures_total,
            unprotected_positions_total,
            polls_total,
            uncovered_positions,
            last_cycle_timestamp,
        })
    }

    /// Render all metrics in the Prometheus text format.
    pub fn render(&self) -> DaemonResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}
