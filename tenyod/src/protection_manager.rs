//! Protection Manager: one protection cycle.
//!
//! A cycle reads the latest stored snapshot, keeps it only if it is fresh,
//! fetches pending conditional orders once, and then walks the positions one
//! at a time:
//!
//! ```text
//! validate → coverage → (fully covered? done) → minimum size → targets → placement
//! ```
//!
//! Each position runs inside its own panic boundary. Whatever goes wrong with
//! one position is counted as a failure and the loop moves on. Only a broken
//! snapshot or a failed pending-order fetch aborts the whole cycle.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::FutureExt;
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use tenyo_domain::{AlgoOrderKind, Position, ProtectiveOrder, Quantity};
use tenyo_engine::{
    analyze_coverage, calculate_targets, CoverageStatus, Freshness, RiskParameters,
    StalenessFilter,
};
use tenyo_exec::{
    ExchangeGateway, ExecError, LegOutcome, PlacementOrchestrator, PlacementOutcome, PricingMode,
    ProtectionStatus,
};
use tenyo_store::SnapshotStore;

use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{DaemonEvent, EventBus, PlacementSummary};
use crate::metrics::Metrics;

// =============================================================================
// Cycle Summary
// =============================================================================

/// Counters for one cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleSummary {
    /// Cycle id (UUID v7, time-ordered)
    pub cycle_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    /// Snapshot verdict, `None` if the snapshot could not be judged
    pub freshness: Option<Freshness>,
    /// Why the cycle stopped before examining positions
    pub aborted: Option<String>,
    pub checked: usize,
    pub fully_covered: usize,
    pub partially_covered: usize,
    pub not_covered: usize,
    /// Both legs placed
    pub protected: usize,
    /// Exactly one leg placed
    pub one_sided: usize,
    pub failures: usize,
    /// Needed protection but nothing was sent (below minimum, protection disabled)
    pub skipped: usize,
}

impl CycleSummary {
    fn start(started_at: DateTime<Utc>) -> Self {
        Self {
            cycle_id: Uuid::now_v7(),
            started_at,
            finished_at: None,
            freshness: None,
            aborted: None,
            checked: 0,
            fully_covered: 0,
            partially_covered: 0,
            not_covered: 0,
            protected: 0,
            one_sided: 0,
            failures: 0,
            skipped: 0,
        }
    }

    /// Whether the cycle was aborted.
    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }

    /// Positions found short of coverage that the cycle did not fully protect.
    pub fn left_uncovered(&self) -> usize {
        (self.partially_covered + self.not_covered).saturating_sub(self.protected)
    }

    fn record_coverage(&mut self, status: CoverageStatus) {
        match status {
            CoverageStatus::Full => self.fully_covered += 1,
            CoverageStatus::Partial => self.partially_covered += 1,
            CoverageStatus::Uncovered => self.not_covered += 1,
        }
    }
}

// =============================================================================
// Protection Manager
// =============================================================================

/// Runs protection cycles against a gateway and a snapshot store.
pub struct ProtectionManager<G: ExchangeGateway, S: SnapshotStore> {
    gateway: Arc<G>,
    store: Arc<S>,
    orchestrator: PlacementOrchestrator<G>,
    staleness: StalenessFilter,
    risk: RiskParameters,
    min_order_size: Option<Decimal>,
    enabled: bool,
    event_bus: Arc<EventBus>,
    metrics: Arc<Metrics>,
    last_summary: RwLock<Option<CycleSummary>>,
}

impl<G: ExchangeGateway + 'static, S: SnapshotStore + 'static> ProtectionManager<G, S> {
    /// Create a new protection manager.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        gateway: Arc<G>,
        store: Arc<S>,
        staleness: StalenessFilter,
        risk: RiskParameters,
        min_order_size: Option<Decimal>,
        enabled: bool,
        event_bus: Arc<EventBus>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            orchestrator: PlacementOrchestrator::new(gateway.clone()),
            gateway,
            store,
            staleness,
            risk,
            min_order_size,
            enabled,
            event_bus,
            metrics,
            last_summary: RwLock::new(None),
        }
    }

    /// Summary of the last finished cycle.
    pub async fn last_summary(&self) -> Option<CycleSummary> {
        self.last_summary.read().await.clone()
    }

    /// Run one protection cycle. Never fails; problems end up in the summary.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> CycleSummary {
        let mut summary = CycleSummary::start(now);
        self.metrics.cycles_total.inc();
        info!(cycle_id = %summary.cycle_id, "Protection cycle started");

        match self.prepare(now, &mut summary).await {
            Ok(Some((positions, orders))) => {
                for position in &positions {
                    let guarded = AssertUnwindSafe(self.protect_position(position, &orders, &mut summary))
                        .catch_unwind()
                        .await;

                    match guarded {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => {
                            summary.failures += 1;
                            self.report_position_error(position, &e);
                        }
                        Err(panic) => {
                            summary.failures += 1;
                            error!(
                                instrument = %position.instrument,
                                side = %position.side,
                                panic = %panic_message(&*panic),
                                "Panic while protecting position"
                            );
                        }
                    }
                }
            }
            Ok(None) => {}
            Err(e) => {
                error!(cycle_id = %summary.cycle_id, error = %e, "Protection cycle aborted");
                summary.aborted = Some(e.to_string());
                self.metrics.cycle_aborts_total.inc();
            }
        }

        self.finish(summary).await
    }

    /// Load and filter the snapshot, then fetch pending orders.
    ///
    /// `Ok(None)` means there is nothing to do this cycle.
    async fn prepare(
        &self,
        now: DateTime<Utc>,
        summary: &mut CycleSummary,
    ) -> DaemonResult<Option<(Vec<Position>, Vec<ProtectiveOrder>)>> {
        let snapshot = self.store.latest_position_snapshot().await?;
        let filtered = self.staleness.filter(snapshot.as_ref(), now)?;
        summary.freshness = Some(filtered.freshness);

        if let Freshness::Stale { age_secs } = filtered.freshness {
            self.event_bus.send(DaemonEvent::SnapshotStale { age_secs });
        }
        if filtered.positions.is_empty() {
            info!("No positions to protect");
            return Ok(None);
        }

        // Coverage is unknown without pending orders; a failed fetch aborts
        let orders = self
            .gateway
            .fetch_open_algo_orders(AlgoOrderKind::Conditional)
            .await?;
        debug!(pending = orders.len(), "Fetched pending conditional orders");

        Ok(Some((filtered.positions, orders)))
    }

    async fn protect_position(
        &self,
        position: &Position,
        orders: &[ProtectiveOrder],
        summary: &mut CycleSummary,
    ) -> DaemonResult<()> {
        summary.checked += 1;
        self.metrics.positions_checked_total.inc();
        position.validate()?;

        let coverage = analyze_coverage(position, orders);
        let status = coverage.status();
        summary.record_coverage(status);

        info!(
            instrument = %position.instrument,
            side = %position.side,
            total = %coverage.total_size,
            covered = %coverage.covered_size,
            uncovered = %coverage.uncovered_size,
            matched_orders = coverage.matched_orders,
            status = ?status,
            "Coverage analysed"
        );

        if let Some(gap) = coverage.gap {
            warn!(
                instrument = %position.instrument,
                side = %position.side,
                gap = ?gap,
                "Pending orders cover only one side"
            );
            self.event_bus.send(DaemonEvent::CoverageGap {
                instrument: position.instrument.clone(),
                side: position.side,
                gap,
                covered_size: coverage.covered_size,
                total_size: coverage.total_size,
            });
        }

        if coverage.is_fully_covered() {
            return Ok(());
        }

        if let Some(min) = self.min_order_size {
            if coverage.uncovered_size < min {
                warn!(
                    instrument = %position.instrument,
                    uncovered = %coverage.uncovered_size,
                    min_order_size = %min,
                    "Uncovered size below minimum order size, skipping"
                );
                summary.skipped += 1;
                return Ok(());
            }
        }

        let uncovered = Quantity::new(coverage.uncovered_size)?;
        let targets = calculate_targets(position, &self.risk)?;
        debug!(
            instrument = %position.instrument,
            entry = %targets.entry_price,
            take_profit = %targets.take_profit,
            stop_loss = %targets.stop_loss,
            "Target prices calculated"
        );

        if !self.enabled {
            info!(
                instrument = %position.instrument,
                size = %uncovered,
                take_profit = %targets.take_profit,
                stop_loss = %targets.stop_loss,
                "Protection disabled, not placing"
            );
            summary.skipped += 1;
            return Ok(());
        }

        let outcome = self
            .orchestrator
            .place_protection(position, uncovered, &targets)
            .await?;
        self.record_outcome(position, &outcome, summary);
        Ok(())
    }

    fn record_outcome(
        &self,
        position: &Position,
        outcome: &PlacementOutcome,
        summary: &mut CycleSummary,
    ) {
        for (leg, result) in [("take_profit", &outcome.take_profit), ("stop_loss", &outcome.stop_loss)] {
            match result {
                LegOutcome::Placed { .. } => {
                    self.metrics.orders_placed_total.with_label_values(&[leg]).inc()
                }
                LegOutcome::Failed { .. } => {
                    self.metrics.placement_failures_total.with_label_values(&[leg]).inc()
                }
                LegOutcome::Skipped => {}
            }
        }

        match outcome.status {
            ProtectionStatus::Protected => summary.protected += 1,
            ProtectionStatus::MissingTakeProfit | ProtectionStatus::UnprotectedRisk => {
                summary.one_sided += 1;
                self.event_bus.send(DaemonEvent::OneSidedProtection {
                    instrument: position.instrument.clone(),
                    side: position.side,
                    status: outcome.status,
                });
            }
        }

        self.event_bus.send(DaemonEvent::ProtectionPlaced(PlacementSummary {
            instrument: outcome.instrument.clone(),
            side: position.side,
            size: outcome.size.as_decimal(),
            take_profit_id: algo_id(&outcome.take_profit),
            stop_loss_id: algo_id(&outcome.stop_loss),
            degraded: matches!(outcome.pricing, PricingMode::Degraded { .. }),
            timestamp: Utc::now(),
        }));
    }

    fn report_position_error(&self, position: &Position, err: &DaemonError) {
        match err {
            DaemonError::Exec(ExecError::BothLegsUnprotected { .. }) => {
                self.metrics.unprotected_positions_total.inc();
                self.event_bus.send(DaemonEvent::PositionUnprotected {
                    instrument: position.instrument.clone(),
                    side: position.side,
                    reason: err.to_string(),
                });
            }
            _ => {
                warn!(
                    instrument = %position.instrument,
                    side = %position.side,
                    error = %err,
                    "Skipping position"
                );
            }
        }
    }

    async fn finish(&self, mut summary: CycleSummary) -> CycleSummary {
        let finished_at = Utc::now();
        summary.finished_at = Some(finished_at);
        self.metrics.last_cycle_timestamp.set(finished_at.timestamp());
        self.metrics
            .uncovered_positions
            .set(summary.left_uncovered() as i64);

        info!(
            cycle_id = %summary.cycle_id,
            checked = summary.checked,
            fully_covered = summary.fully_covered,
            partially_covered = summary.partially_covered,
            not_covered = summary.not_covered,
            protected = summary.protected,
            one_sided = summary.one_sided,
            failures = summary.failures,
            skipped = summary.skipped,
            aborted = summary.is_aborted(),
            "Protection cycle completed"
        );

        self.event_bus.send(DaemonEvent::CycleCompleted(summary.clone()));
        *self.last_summary.write().await = Some(summary.clone());
        summary
    }
}

fn algo_id(leg: &LegOutcome) -> Option<String> {
    match leg {
        LegOutcome::Placed { algo_id, .. } => Some(algo_id.clone()),
        _ => None,
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration as ChronoDuration;
    use rust_decimal_macros::dec;
    use std::time::Duration;
    use tenyo_domain::{AlgoOrderState, InstrumentId, PositionSide};
    use tenyo_exec::{ProtectionLeg, StubGateway};
    use tenyo_store::MemoryStore;

    struct Harness {
        gateway: Arc<StubGateway>,
        store: Arc<MemoryStore>,
        metrics: Arc<Metrics>,
        manager: ProtectionManager<StubGateway, MemoryStore>,
    }

    fn harness_with(min_order_size: Option<Decimal>, enabled: bool) -> Harness {
        let gateway = Arc::new(StubGateway::new(dec!(100)));
        let store = Arc::new(MemoryStore::new());
        let staleness = StalenessFilter::new(
            Duration::from_secs(600),
            Duration::from_secs(60),
            Duration::from_secs(300),
        )
        .unwrap();
        let risk = RiskParameters::new(dec!(0.01), dec!(5)).unwrap();
        let metrics = Arc::new(Metrics::new().unwrap());
        let manager = ProtectionManager::new(
            gateway.clone(),
            store.clone(),
            staleness,
            risk,
            min_order_size,
            enabled,
            Arc::new(EventBus::new(64)),
            metrics.clone(),
        );
        Harness {
            gateway,
            store,
            metrics,
            manager,
        }
    }

    fn harness() -> Harness {
        harness_with(None, true)
    }

    fn btc_long(size: Decimal) -> Position {
        Position::new(
            InstrumentId::new("BTC-USDT-SWAP").unwrap(),
            PositionSide::Long,
            size,
            dec!(100),
        )
    }

    fn pending(size: Decimal, tp: Option<Decimal>, sl: Option<Decimal>) -> ProtectiveOrder {
        ProtectiveOrder {
            algo_id: format!("EXISTING-{}-{:?}-{:?}", size, tp, sl),
            instrument: InstrumentId::new("BTC-USDT-SWAP").unwrap(),
            position_side: PositionSide::Long,
            kind: AlgoOrderKind::Conditional,
            state: AlgoOrderState::Live,
            size,
            tp_trigger: tp,
            sl_trigger: sl,
            created_at: None,
        }
    }

    #[tokio::test]
    async fn test_partial_coverage_places_remainder() {
        let h = harness();
        let now = Utc::now();
        h.store.save_positions(now, &[btc_long(dec!(2))]).await.unwrap();
        h.gateway.add_algo_order(pending(dec!(1), Some(dec!(105)), None));
        h.gateway.add_algo_order(pending(dec!(1), None, Some(dec!(99))));

        let summary = h.manager.run_cycle(now).await;

        assert_eq!(summary.checked, 1);
        assert_eq!(summary.partially_covered, 1);
        assert_eq!(summary.protected, 1);
        let requests = h.gateway.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests.iter().all(|r| r.size.as_decimal() == dec!(1)));
    }

    #[tokio::test]
    async fn test_uncovered_gauge_excludes_positions_protected_this_cycle() {
        let h = harness();
        let now = Utc::now();
        h.store.save_positions(now, &[btc_long(dec!(1))]).await.unwrap();

        let summary = h.manager.run_cycle(now).await;
        assert_eq!(summary.not_covered, 1);
        assert_eq!(summary.protected, 1);
        assert_eq!(h.metrics.uncovered_positions.get(), 0);

        h.gateway.fail_leg(ProtectionLeg::StopLoss, true);
        let mut eth = btc_long(dec!(1));
        eth.instrument = InstrumentId::new("ETH-USDT-SWAP").unwrap();
        h.store.save_positions(now + ChronoDuration::seconds(1), &[eth]).await.unwrap();

        let summary = h.manager.run_cycle(now + ChronoDuration::seconds(1)).await;
        assert_eq!(summary.one_sided, 1);
        assert_eq!(h.metrics.uncovered_positions.get(), 1);
    }

    #[tokio::test]
    async fn test_fully_covered_places_nothing() {
        let h = harness();
        let now = Utc::now();
        h.store.save_positions(now, &[btc_long(dec!(1))]).await.unwrap();
        h.gateway.add_algo_order(pending(dec!(1), Some(dec!(105)), Some(dec!(99))));

        let summary = h.manager.run_cycle(now).await;

        assert_eq!(summary.fully_covered, 1);
        assert!(h.gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_stale_snapshot_touches_nothing() {
        let h = harness();
        let now = Utc::now();
        h.store
            .save_positions(now - ChronoDuration::seconds(601), &[btc_long(dec!(1))])
            .await
            .unwrap();
        h.gateway.fail_order_fetch(true);

        let summary = h.manager.run_cycle(now).await;

        assert!(matches!(summary.freshness, Some(Freshness::Stale { .. })));
        assert!(!summary.is_aborted());
        assert_eq!(summary.checked, 0);
        assert!(h.gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_order_fetch_failure_aborts_cycle() {
        let h = harness();
        let now = Utc::now();
        h.store.save_positions(now, &[btc_long(dec!(1))]).await.unwrap();
        h.gateway.fail_order_fetch(true);

        let summary = h.manager.run_cycle(now).await;

        assert!(summary.is_aborted());
        assert!(h.gateway.requests().is_empty());
        assert!(h.manager.last_summary().await.unwrap().is_aborted());
    }

    #[tokio::test]
    async fn test_below_minimum_is_skipped() {
        let h = harness_with(Some(dec!(0.5)), true);
        let now = Utc::now();
        h.store.save_positions(now, &[btc_long(dec!(0.1))]).await.unwrap();

        let summary = h.manager.run_cycle(now).await;

        assert_eq!(summary.not_covered, 1);
        assert_eq!(summary.skipped, 1);
        assert!(h.gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_disabled_protection_only_reports() {
        let h = harness_with(None, false);
        let now = Utc::now();
        h.store.save_positions(now, &[btc_long(dec!(1))]).await.unwrap();

        let summary = h.manager.run_cycle(now).await;

        assert_eq!(summary.skipped, 1);
        assert!(h.gateway.requests().is_empty());
    }

    #[tokio::test]
    async fn test_invalid_position_does_not_stop_others() {
        let h = harness();
        let now = Utc::now();
        let mut broken = btc_long(dec!(1));
        broken.instrument = InstrumentId::new("ETH-USDT-SWAP").unwrap();
        broken.entry_price = Decimal::ZERO;
        h.store.save_positions(now, &[broken, btc_long(dec!(1))]).await.unwrap();

        let summary = h.manager.run_cycle(now).await;

        assert_eq!(summary.checked, 2);
        assert_eq!(summary.failures, 1);
        assert_eq!(summary.protected, 1);
    }

    #[tokio::test]
    async fn test_both_legs_failing_counts_as_failure() {
        let h = harness();
        let now = Utc::now();
        h.store.save_positions(now, &[btc_long(dec!(1))]).await.unwrap();
        h.gateway.fail_leg(ProtectionLeg::TakeProfit, true);
        h.gateway.fail_leg(ProtectionLeg::StopLoss, true);

        let summary = h.manager.run_cycle(now).await;

        assert_eq!(summary.failures, 1);
        assert_eq!(summary.protected, 0);
        assert_eq!(h.gateway.requests().len(), 2);
    }

    #[tokio::test]
    async fn test_malformed_timestamp_aborts_cycle() {
        struct BrokenStore;

        #[async_trait::async_trait]
        impl SnapshotStore for BrokenStore {
            async fn save_positions(
                &self,
                _: DateTime<Utc>,
                _: &[Position],
            ) -> Result<(), tenyo_store::StoreError> {
                Ok(())
            }
            async fn latest_position_snapshot(
                &self,
            ) -> Result<Option<tenyo_domain::PositionSnapshot>, tenyo_store::StoreError> {
                Ok(Some(tenyo_domain::PositionSnapshot {
                    captured_at: "yesterday-ish".to_string(),
                    positions: vec![btc_long(dec!(1))],
                }))
            }
            async fn save_balances(
                &self,
                _: DateTime<Utc>,
                _: &[tenyo_domain::AccountBalance],
            ) -> Result<(), tenyo_store::StoreError> {
                Ok(())
            }
            async fn latest_balances(
                &self,
            ) -> Result<Option<tenyo_store::BalanceSnapshot>, tenyo_store::StoreError> {
                Ok(None)
            }
            async fn health_check(&self) -> Result<(), tenyo_store::StoreError> {
                Ok(())
            }
        }

        let gateway = Arc::new(StubGateway::new(dec!(100)));
        let manager = ProtectionManager::new(
            gateway.clone(),
            Arc::new(BrokenStore),
            StalenessFilter::new(
                Duration::from_secs(600),
                Duration::from_secs(60),
                Duration::from_secs(300),
            )
            .unwrap(),
            RiskParameters::new(dec!(0.01), dec!(5)).unwrap(),
            None,
            true,
            Arc::new(EventBus::new(8)),
            Arc::new(Metrics::new().unwrap()),
        );

        let summary = manager.run_cycle(Utc::now()).await;

        assert!(summary.is_aborted());
        assert!(summary.freshness.is_none());
        assert!(gateway.requests().is_empty());
    }
}
