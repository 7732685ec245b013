//! Account Poller
//!
//! Background task that reads balances and open positions from the venue and
//! stores them as snapshots. The protection cycle never talks to the account
//! endpoints itself; it only sees what the poller stored.
//!
//! An account with no open positions stores nothing, so the last stored
//! snapshot can outlive the positions it describes. The staleness filter
//! exists for exactly that case.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use tenyo_domain::Position;
use tenyo_exec::AccountPort;
use tenyo_store::SnapshotStore;

use crate::error::DaemonResult;
use crate::event_bus::{DaemonEvent, EventBus};
use crate::metrics::Metrics;

/// Currencies whose balances are stored
pub const TRACKED_CURRENCIES: &[&str] = &["BTC", "ETH", "USDT"];

// =============================================================================
// Stats
// =============================================================================

/// Poller counters exposed on the status endpoint.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PollerStats {
    /// Polls that stored their snapshot
    pub successes: u64,
    /// Polls that failed
    pub failures: u64,
    /// Time of the last successful poll
    pub last_success: Option<DateTime<Utc>>,
    /// Last error message
    pub last_error: Option<String>,
    /// Open positions seen by the last successful poll
    pub last_position_count: usize,
}

/// What one poll stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollReport {
    /// Capture time shared by every stored row
    pub captured_at: DateTime<Utc>,
    /// Positions stored
    pub positions: usize,
    /// Balances stored
    pub balances: usize,
    /// Positions dropped (zero size or invalid)
    pub skipped: usize,
}

// =============================================================================
// Account Poller
// =============================================================================

/// Periodically snapshots account state into the store.
pub struct AccountPoller<A: AccountPort, S: SnapshotStore> {
    account: Arc<A>,
    store: Arc<S>,
    event_bus: Arc<EventBus>,
    metrics: Arc<Metrics>,
    interval: Duration,
    shutdown_token: CancellationToken,
    stats: RwLock<PollerStats>,
}

impl<A: AccountPort + 'static, S: SnapshotStore + 'static> AccountPoller<A, S> {
    /// Create a poller.
    pub fn new(
        account: Arc<A>,
        store: Arc<S>,
        event_bus: Arc<EventBus>,
        metrics: Arc<Metrics>,
        interval: Duration,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            account,
            store,
            event_bus,
            metrics,
            interval,
            shutdown_token,
            stats: RwLock::new(PollerStats::default()),
        }
    }

    /// Current counters.
    pub async fn stats(&self) -> PollerStats {
        self.stats.read().await.clone()
    }

    /// Start the poller in the background.
    ///
    /// Polls immediately, then every `interval`. An authentication failure
    /// before the first success stops the poller: retrying bad credentials
    /// only gets the key locked.
    pub fn start(self: Arc<Self>) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Account poller started");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown_token.cancelled() => {
                        info!("Account poller received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        if let Err(e) = self.poll_once(Utc::now()).await {
                            let never_succeeded = self.stats.read().await.successes == 0;
                            if never_succeeded && is_auth_failure(&e) {
                                error!(error = %e, "Authentication failed, stopping account poller");
                                break;
                            }
                        }
                    }
                }
            }

            info!("Account poller stopped");
        })
    }

    /// Run one poll and store the result under a single capture time.
    pub async fn poll_once(&self, captured_at: DateTime<Utc>) -> DaemonResult<PollReport> {
        match self.collect_and_store(captured_at).await {
            Ok(report) => {
                {
                    let mut stats = self.stats.write().await;
                    stats.successes += 1;
                    stats.last_success = Some(captured_at);
                    stats.last_error = None;
                    stats.last_position_count = report.positions;
                }
                self.metrics.polls_total.with_label_values(&["success"]).inc();
                self.event_bus.send(DaemonEvent::PollCompleted {
                    positions: report.positions,
                    balances: report.balances,
                    captured_at,
                });
                info!(
                    positions = report.positions,
                    balances = report.balances,
                    skipped = report.skipped,
                    "Account snapshot stored"
                );
                Ok(report)
            }
            Err(e) => {
                {
                    let mut stats = self.stats.write().await;
                    stats.failures += 1;
                    stats.last_error = Some(e.to_string());
                }
                self.metrics.polls_total.with_label_values(&["error"]).inc();
                self.event_bus.send(DaemonEvent::PollFailed {
                    error: e.to_string(),
                });
                warn!(error = %e, "Account poll failed");
                Err(e)
            }
        }
    }

    async fn collect_and_store(&self, captured_at: DateTime<Utc>) -> DaemonResult<PollReport> {
        let balances: Vec<_> = self
            .account
            .fetch_balances()
            .await?
            .into_iter()
            .filter(|b| TRACKED_CURRENCIES.contains(&b.currency.as_str()))
            .collect();

        let fetched = self.account.fetch_positions().await?;
        let total = fetched.len();
        let positions: Vec<Position> = fetched.into_iter().filter(keep_position).collect();

        self.store.save_balances(captured_at, &balances).await?;
        self.store.save_positions(captured_at, &positions).await?;

        if positions.is_empty() {
            debug!("No open positions, nothing stored");
        }

        Ok(PollReport {
            captured_at,
            positions: positions.len(),
            balances: balances.len(),
            skipped: total - positions.len(),
        })
    }
}

fn keep_position(position: &Position) -> bool {
    if position.size == Decimal::ZERO {
        return false;
    }
    match position.validate() {
        Ok(()) => true,
        Err(e) => {
            warn!(
                instrument = %position.instrument,
                side = %position.side,
                error = %e,
                "Dropping invalid position from snapshot"
            );
            false
        }
    }
}

fn is_auth_failure(err: &crate::error::DaemonError) -> bool {
    matches!(err, crate::error::DaemonError::Exec(e) if e.is_auth())
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tenyo_domain::{AccountBalance, InstrumentId, PositionSide};
    use tenyo_exec::StubGateway;
    use tenyo_store::MemoryStore;

    fn poller(stub: Arc<StubGateway>, store: Arc<MemoryStore>) -> AccountPoller<StubGateway, MemoryStore> {
        AccountPoller::new(
            stub,
            store,
            Arc::new(EventBus::new(16)),
            Arc::new(Metrics::new().unwrap()),
            Duration::from_secs(60),
            CancellationToken::new(),
        )
    }

    fn balance(currency: &str) -> AccountBalance {
        AccountBalance {
            currency: currency.to_string(),
            balance: dec!(1),
            available: dec!(1),
            frozen: dec!(0),
            usd_value: dec!(1),
        }
    }

    fn position(inst: &str, size: Decimal) -> Position {
        Position::new(InstrumentId::new(inst).unwrap(), PositionSide::Long, size, dec!(100))
    }

    #[tokio::test]
    async fn test_poll_stores_one_snapshot() {
        let stub = Arc::new(StubGateway::new(dec!(100)));
        let store = Arc::new(MemoryStore::new());
        stub.set_balances(vec![balance("USDT"), balance("DOGE"), balance("BTC")]);
        stub.set_positions(vec![
            position("BTC-USDT-SWAP", dec!(2)),
            position("ETH-USDT-SWAP", dec!(0)),
        ]);

        let poller = poller(stub, store.clone());
        let report = poller.poll_once(Utc::now()).await.unwrap();

        assert_eq!(report.positions, 1);
        assert_eq!(report.balances, 2);
        assert_eq!(report.skipped, 1);

        let snapshot = store.latest_position_snapshot().await.unwrap().unwrap();
        assert_eq!(snapshot.positions.len(), 1);
        let balances = store.latest_balances().await.unwrap().unwrap();
        assert!(balances.balances.iter().all(|b| b.currency != "DOGE"));
        assert_eq!(balances.captured_at, snapshot.captured_at);
    }

    #[tokio::test]
    async fn test_no_positions_stores_nothing() {
        let stub = Arc::new(StubGateway::new(dec!(100)));
        let store = Arc::new(MemoryStore::new());

        let poller = poller(stub, store.clone());
        poller.poll_once(Utc::now()).await.unwrap();

        assert!(store.latest_position_snapshot().await.unwrap().is_none());
        assert_eq!(poller.stats().await.successes, 1);
    }

    #[tokio::test]
    async fn test_failure_is_counted() {
        let stub = Arc::new(StubGateway::new(dec!(100)));
        stub.fail_account(true);

        let poller = poller(stub, Arc::new(MemoryStore::new()));
        assert!(poller.poll_once(Utc::now()).await.is_err());

        let stats = poller.stats().await;
        assert_eq!(stats.failures, 1);
        assert!(stats.last_error.is_some());
        assert!(stats.last_success.is_none());
    }

    #[tokio::test]
    async fn test_start_stops_on_cancel() {
        let stub = Arc::new(StubGateway::new(dec!(100)));
        let token = CancellationToken::new();
        let poller = Arc::new(AccountPoller::new(
            stub,
            Arc::new(MemoryStore::new()),
            Arc::new(EventBus::new(16)),
            Arc::new(Metrics::new().unwrap()),
            Duration::from_secs(3600),
            token.clone(),
        ));

        let handle = poller.clone().start();
        tokio::time::sleep(Duration::from_millis(50)).await;
        token.cancel();
        handle.await.unwrap();

        assert_eq!(poller.stats().await.successes, 1);
    }
}
