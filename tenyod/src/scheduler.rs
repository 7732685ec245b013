//! Protection scheduler.
//!
//! Runs a cycle immediately at start, then every `check_interval`. Ticks
//! missed while a cycle runs long are delayed, not bunched up. The shutdown
//! token is only observed between cycles, so an in-flight cycle completes.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::info;

use tenyo_exec::ExchangeGateway;
use tenyo_store::SnapshotStore;

use crate::protection_manager::ProtectionManager;

/// Periodic driver for `ProtectionManager::run_cycle`.
pub struct ProtectionScheduler<G: ExchangeGateway, S: SnapshotStore> {
    manager: Arc<ProtectionManager<G, S>>,
    interval: Duration,
    shutdown_token: CancellationToken,
}

impl<G: ExchangeGateway + 'static, S: SnapshotStore + 'static> ProtectionScheduler<G, S> {
    /// Create a scheduler.
    pub fn new(
        manager: Arc<ProtectionManager<G, S>>,
        interval: Duration,
        shutdown_token: CancellationToken,
    ) -> Self {
        Self {
            manager,
            interval,
            shutdown_token,
        }
    }

    /// Start the scheduler in the background.
    pub fn start(self) -> JoinHandle<()> {
        tokio::spawn(async move {
            info!(interval_secs = self.interval.as_secs(), "Protection scheduler started");

            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = self.shutdown_token.cancelled() => {
                        info!("Protection scheduler received shutdown signal");
                        break;
                    }
                    _ = ticker.tick() => {
                        self.manager.run_cycle(Utc::now()).await;
                    }
                }
            }

            info!("Protection scheduler stopped");
        })
    }
}
