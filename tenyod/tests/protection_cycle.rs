//! End-to-end protection cycles against the stub venue.
//!
//! Each test wires a full daemon (poller, store, manager, event bus) and
//! drives polls and cycles by hand instead of waiting on the timers.
//!
//! Run with: `cargo test -p tenyod --test protection_cycle`

use chrono::{Duration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;

use tenyo_domain::{
    AlgoOrderKind, AlgoOrderState, InstrumentId, OrderSide, Position, PositionSide,
    ProtectiveOrder,
};
use tenyo_exec::{ConditionalTrigger, ProtectionLeg, StubGateway};
use tenyo_store::{MemoryStore, SnapshotStore};
use tenyod::{Config, Daemon, DaemonEvent};

const BTC: &str = "BTC-USDT-SWAP";

fn daemon() -> (
    Daemon<StubGateway, MemoryStore>,
    Arc<StubGateway>,
    Arc<MemoryStore>,
) {
    let gateway = Arc::new(StubGateway::new(dec!(100)));
    let store = Arc::new(MemoryStore::new());
    let daemon = Daemon::new(Config::test(), gateway.clone(), store.clone())
        .expect("test config is valid");
    (daemon, gateway, store)
}

fn position(side: PositionSide, size: Decimal) -> Position {
    Position::new(InstrumentId::new(BTC).unwrap(), side, size, dec!(100))
}

fn existing(algo_id: &str, size: Decimal, tp: Option<Decimal>, sl: Option<Decimal>) -> ProtectiveOrder {
    ProtectiveOrder {
        algo_id: algo_id.to_string(),
        instrument: InstrumentId::new(BTC).unwrap(),
        position_side: PositionSide::Long,
        kind: AlgoOrderKind::Conditional,
        state: AlgoOrderState::Live,
        size,
        tp_trigger: tp,
        sl_trigger: sl,
        created_at: None,
    }
}

fn trigger_for(gateway: &StubGateway, leg: ProtectionLeg) -> Decimal {
    gateway
        .requests()
        .iter()
        .find(|r| r.trigger.leg() == leg)
        .map(|r| r.trigger.trigger_price().as_decimal())
        .expect("leg was requested")
}

#[tokio::test]
async fn test_partially_covered_position_gets_the_remainder() -> anyhow::Result<()> {
    let (daemon, gateway, _store) = daemon();
    gateway.set_positions(vec![position(PositionSide::Long, dec!(2))]);
    gateway.add_algo_order(existing("TP-1", dec!(1), Some(dec!(105)), None));
    gateway.add_algo_order(existing("SL-1", dec!(1), None, Some(dec!(99))));

    let now = Utc::now();
    daemon.poller().poll_once(now).await?;
    let summary = daemon.manager().run_cycle(now).await;

    assert_eq!(summary.checked, 1);
    assert_eq!(summary.partially_covered, 1);
    assert_eq!(summary.protected, 1);

    let requests = gateway.requests();
    assert_eq!(requests.len(), 2);
    for request in &requests {
        assert_eq!(request.size.as_decimal(), dec!(1));
        assert_eq!(request.side, OrderSide::Sell);
        assert!(request.reduce_only);
    }
    assert_eq!(trigger_for(&gateway, ProtectionLeg::TakeProfit), dec!(105));
    assert_eq!(trigger_for(&gateway, ProtectionLeg::StopLoss), dec!(99));
    Ok(())
}

#[tokio::test]
async fn test_placed_pair_counts_as_coverage_next_cycle() -> anyhow::Result<()> {
    let (daemon, gateway, _store) = daemon();
    gateway.set_positions(vec![position(PositionSide::Long, dec!(1))]);

    let now = Utc::now();
    daemon.poller().poll_once(now).await?;
    let first = daemon.manager().run_cycle(now).await;
    assert_eq!(first.not_covered, 1);
    assert_eq!(first.protected, 1);

    let second = daemon.manager().run_cycle(now).await;
    assert_eq!(second.fully_covered, 1);
    assert_eq!(gateway.requests().len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_stop_loss_failure_is_unprotected_risk() -> anyhow::Result<()> {
    let (daemon, gateway, _store) = daemon();
    let mut events = daemon.event_bus().subscribe();
    gateway.set_positions(vec![position(PositionSide::Long, dec!(1))]);
    gateway.fail_leg(ProtectionLeg::StopLoss, true);

    let now = Utc::now();
    daemon.poller().poll_once(now).await?;
    let summary = daemon.manager().run_cycle(now).await;

    assert_eq!(summary.one_sided, 1);
    assert_eq!(summary.protected, 0);
    assert_eq!(gateway.requests().len(), 2);
    assert_eq!(gateway.algo_orders().len(), 1);

    let one_sided = events.drain().into_iter().find_map(|e| match e {
        DaemonEvent::OneSidedProtection { status, .. } => Some(status),
        _ => None,
    });
    assert_eq!(one_sided, Some(tenyo_exec::ProtectionStatus::UnprotectedRisk));
    Ok(())
}

#[tokio::test]
async fn test_stale_snapshot_places_nothing() -> anyhow::Result<()> {
    let (daemon, gateway, store) = daemon();
    let mut events = daemon.event_bus().subscribe();
    let now = Utc::now();
    store
        .save_positions(now - Duration::hours(1), &[position(PositionSide::Long, dec!(1))])
        .await?;

    let summary = daemon.manager().run_cycle(now).await;

    assert_eq!(summary.checked, 0);
    assert!(!summary.is_aborted());
    assert!(gateway.requests().is_empty());
    assert!(events
        .drain()
        .iter()
        .any(|e| matches!(e, DaemonEvent::SnapshotStale { age_secs } if *age_secs >= 3600)));
    Ok(())
}

#[tokio::test]
async fn test_order_fetch_failure_aborts_without_placing() -> anyhow::Result<()> {
    let (daemon, gateway, _store) = daemon();
    gateway.set_positions(vec![position(PositionSide::Long, dec!(1))]);
    gateway.fail_order_fetch(true);

    let now = Utc::now();
    daemon.poller().poll_once(now).await?;
    let summary = daemon.manager().run_cycle(now).await;

    assert!(summary.is_aborted());
    assert!(gateway.requests().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_targets_are_moved_past_the_live_price() -> anyhow::Result<()> {
    // Long: TP 105 is already below a 106 market
    let (daemon, gateway, _store) = daemon();
    gateway.set_price(BTC, dec!(106));
    gateway.set_positions(vec![position(PositionSide::Long, dec!(1))]);

    let now = Utc::now();
    daemon.poller().poll_once(now).await?;
    daemon.manager().run_cycle(now).await;

    assert_eq!(trigger_for(&gateway, ProtectionLeg::TakeProfit), dec!(106.106));
    assert_eq!(trigger_for(&gateway, ProtectionLeg::StopLoss), dec!(99));

    // Short: SL 101 is already below a 102 market
    let (daemon, gateway, _store) = daemon_with_short();
    gateway.set_price(BTC, dec!(102));

    daemon.poller().poll_once(now).await?;
    daemon.manager().run_cycle(now).await;

    assert_eq!(trigger_for(&gateway, ProtectionLeg::StopLoss), dec!(102.102));
    assert_eq!(trigger_for(&gateway, ProtectionLeg::TakeProfit), dec!(95));
    let stop = gateway
        .requests()
        .into_iter()
        .find(|r| matches!(r.trigger, ConditionalTrigger::StopLoss { .. }))
        .expect("stop-loss requested");
    assert_eq!(stop.side, OrderSide::Buy);
    Ok(())
}

fn daemon_with_short() -> (
    Daemon<StubGateway, MemoryStore>,
    Arc<StubGateway>,
    Arc<MemoryStore>,
) {
    let (daemon, gateway, store) = daemon();
    gateway.set_positions(vec![position(PositionSide::Short, dec!(1))]);
    (daemon, gateway, store)
}

#[tokio::test]
async fn test_cycle_publishes_events() -> anyhow::Result<()> {
    let (daemon, gateway, _store) = daemon();
    let mut events = daemon.event_bus().subscribe();
    gateway.set_positions(vec![position(PositionSide::Long, dec!(1))]);

    let now = Utc::now();
    daemon.poller().poll_once(now).await?;
    daemon.manager().run_cycle(now).await;

    let events = events.drain();
    assert!(matches!(
        events.first(),
        Some(DaemonEvent::PollCompleted { positions: 1, .. })
    ));
    let placed = events
        .iter()
        .find_map(|e| match e {
            DaemonEvent::ProtectionPlaced(summary) => Some(summary.clone()),
            _ => None,
        })
        .expect("placement event");
    assert!(placed.take_profit_id.is_some());
    assert!(placed.stop_loss_id.is_some());
    assert!(!placed.degraded);
    assert!(matches!(events.last(), Some(DaemonEvent::CycleCompleted(s)) if s.protected == 1));
    Ok(())
}
