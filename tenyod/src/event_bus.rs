//! Event bus for internal daemon communication.
//!
//! The event bus carries what the protection cycle and the poller decide:
//! - Coverage gaps and placement results (per position)
//! - Cycle summaries
//! - Poll results
//!
//! Uses tokio broadcast channels for fan-out to multiple receivers.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::broadcast::{
    self,
    error::{RecvError, TryRecvError},
};
use tracing::{trace, warn};

use tenyo_domain::{InstrumentId, PositionSide};
use tenyo_engine::CoverageGap;
use tenyo_exec::ProtectionStatus;

use crate::protection_manager::CycleSummary;

// =============================================================================
// Event Types
// =============================================================================

/// Events that flow through the daemon event bus.
#[derive(Debug, Clone)]
pub enum DaemonEvent {
    /// Existing orders cover only one kind of trigger
    CoverageGap {
        instrument: InstrumentId,
        side: PositionSide,
        gap: CoverageGap,
        covered_size: Decimal,
        total_size: Decimal,
    },

    /// At least one protective leg was placed
    ProtectionPlaced(PlacementSummary),

    /// Only one leg ended up on the venue
    OneSidedProtection {
        instrument: InstrumentId,
        side: PositionSide,
        status: ProtectionStatus,
    },

    /// Neither leg could be placed
    PositionUnprotected {
        instrument: InstrumentId,
        side: PositionSide,
        reason: String,
    },

    /// The latest snapshot was too old to act on
    SnapshotStale { age_secs: i64 },

    /// A protection cycle finished (including aborted cycles)
    CycleCompleted(CycleSummary),

    /// The poller stored a snapshot
    PollCompleted {
        positions: usize,
        balances: usize,
        captured_at: DateTime<Utc>,
    },

    /// The poller could not read the account
    PollFailed { error: String },

    /// Shutdown signal
    Shutdown,
}

/// Placement result carried by `DaemonEvent::ProtectionPlaced`.
#[derive(Debug, Clone)]
pub struct PlacementSummary {
    /// Instrument protected
    pub instrument: InstrumentId,
    /// Position side protected
    pub side: PositionSide,
    /// Size each leg closes
    pub size: Decimal,
    /// Take-profit algo id, if placed
    pub take_profit_id: Option<String>,
    /// Stop-loss algo id, if placed
    pub stop_loss_id: Option<String>,
    /// Placed without a live price
    pub degraded: bool,
    /// When placement finished
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Event Bus
// =============================================================================

/// A receiver fell behind the channel capacity and lost events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("event receiver lagged, {missed} events lost")]
pub struct Lagged {
    /// Events overwritten before they were read
    pub missed: u64,
}

impl DaemonEvent {
    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            DaemonEvent::CoverageGap { .. } => "coverage_gap",
            DaemonEvent::ProtectionPlaced(_) => "protection_placed",
            DaemonEvent::OneSidedProtection { .. } => "one_sided_protection",
            DaemonEvent::PositionUnprotected { .. } => "position_unprotected",
            DaemonEvent::SnapshotStale { .. } => "snapshot_stale",
            DaemonEvent::CycleCompleted(_) => "cycle_completed",
            DaemonEvent::PollCompleted { .. } => "poll_completed",
            DaemonEvent::PollFailed { .. } => "poll_failed",
            DaemonEvent::Shutdown => "shutdown",
        }
    }
}

/// Fan-out of daemon events over a tokio broadcast channel.
///
/// Publishing never blocks and never fails: with nobody listening the event
/// is dropped, and a slow listener loses the oldest events first.
pub struct EventBus {
    sender: broadcast::Sender<DaemonEvent>,
}

impl EventBus {
    /// Bus buffering up to `capacity` events per receiver.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event; returns how many receivers got it.
    pub fn send(&self, event: DaemonEvent) -> usize {
        let kind = event.kind();
        let delivered = self.sender.send(event).unwrap_or(0);
        trace!(kind, delivered, "Event published");
        delivered
    }

    /// Receiver for events published from now on.
    pub fn subscribe(&self) -> EventReceiver {
        EventReceiver {
            inner: self.sender.subscribe(),
        }
    }

    /// Live receivers.
    pub fn receiver_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1000)
    }
}

/// Subscription to the event bus.
pub struct EventReceiver {
    inner: broadcast::Receiver<DaemonEvent>,
}

impl EventReceiver {
    /// Wait for the next event. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<Result<DaemonEvent, Lagged>> {
        match self.inner.recv().await {
            Ok(event) => Some(Ok(event)),
            Err(RecvError::Lagged(missed)) => Some(Err(Lagged { missed })),
            Err(RecvError::Closed) => None,
        }
    }

    /// Next buffered event, if any.
    pub fn try_recv(&mut self) -> Option<Result<DaemonEvent, Lagged>> {
        match self.inner.try_recv() {
            Ok(event) => Some(Ok(event)),
            Err(TryRecvError::Lagged(missed)) => Some(Err(Lagged { missed })),
            Err(TryRecvError::Empty | TryRecvError::Closed) => None,
        }
    }

    /// Everything buffered right now. Lost events are logged and skipped.
    pub fn drain(&mut self) -> Vec<DaemonEvent> {
        let mut events = Vec::new();
        while let Some(next) = self.try_recv() {
            match next {
                Ok(event) => events.push(event),
                Err(lagged) => warn!(missed = lagged.missed, "Event receiver lagged"),
            }
        }
        events
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn gap_event() -> DaemonEvent {
        DaemonEvent::CoverageGap {
            instrument: InstrumentId::new("BTC-USDT-SWAP").unwrap(),
            side: PositionSide::Long,
            gap: CoverageGap::MissingStopLoss,
            covered_size: dec!(0),
            total_size: dec!(2),
        }
    }

    #[tokio::test]
    async fn test_coverage_gap_reaches_subscriber() {
        let bus = EventBus::new(10);
        let mut receiver = bus.subscribe();

        assert_eq!(bus.send(gap_event()), 1);

        match receiver.recv().await {
            Some(Ok(DaemonEvent::CoverageGap { gap, total_size, .. })) => {
                assert_eq!(gap, CoverageGap::MissingStopLoss);
                assert_eq!(total_size, dec!(2));
            }
            other => panic!("Expected CoverageGap event, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_every_subscriber_sees_stale_snapshot() {
        let bus = EventBus::new(10);
        let mut operators = bus.subscribe();
        let mut alerts = bus.subscribe();
        assert_eq!(bus.receiver_count(), 2);

        bus.send(DaemonEvent::SnapshotStale { age_secs: 900 });

        for receiver in [&mut operators, &mut alerts] {
            assert!(matches!(
                receiver.recv().await,
                Some(Ok(DaemonEvent::SnapshotStale { age_secs: 900 }))
            ));
        }
    }

    #[test]
    fn test_publish_without_subscribers_is_dropped() {
        let bus = EventBus::default();
        assert_eq!(bus.send(DaemonEvent::Shutdown), 0);
    }

    #[test]
    fn test_lagged_receiver_reports_missed_events() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe();

        for age_secs in 0..4 {
            bus.send(DaemonEvent::SnapshotStale { age_secs });
        }

        assert!(matches!(receiver.try_recv(), Some(Err(Lagged { missed: 2 }))));
        let kept: Vec<_> = receiver.drain().iter().map(DaemonEvent::kind).collect();
        assert_eq!(kept, vec!["snapshot_stale", "snapshot_stale"]);
        assert!(receiver.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_recv_ends_when_bus_dropped() {
        let bus = EventBus::new(4);
        let mut receiver = bus.subscribe();
        drop(bus);
        assert!(receiver.recv().await.is_none());
    }
}
