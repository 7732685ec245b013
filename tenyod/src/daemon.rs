//! Daemon: Main runtime orchestrator.
//!
//! The Daemon ties together all components:
//! - Account Poller (snapshots into the store)
//! - Protection Scheduler (runs protection cycles)
//! - Event Bus (internal communication)
//! - API Server (HTTP endpoints)
//!
//! # Lifecycle
//!
//! 1. Load configuration
//! 2. Initialize components
//! 3. Check venue and store reachability (logged, not fatal)
//! 4. Start API server, poller and scheduler
//! 5. Wait for SIGINT/SIGTERM
//! 6. Cancel the shared token and wait for both tasks

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use tenyo_exec::{AccountPort, ExchangeGateway, StubGateway};
use tenyo_store::{MemoryStore, SnapshotStore};

use crate::api::{create_router, ApiState, ConfigDigest};
use crate::config::Config;
use crate::error::{DaemonError, DaemonResult};
use crate::event_bus::{DaemonEvent, EventBus};
use crate::gateway::OkxGateway;
use crate::metrics::Metrics;
use crate::poller::AccountPoller;
use crate::protection_manager::ProtectionManager;
use crate::scheduler::ProtectionScheduler;

// =============================================================================
// Daemon
// =============================================================================

/// The main Tenyo daemon.
pub struct Daemon<G, S>
where
    G: ExchangeGateway + AccountPort + 'static,
    S: SnapshotStore + 'static,
{
    /// Configuration
    config: Config,
    /// Venue adapter
    gateway: Arc<G>,
    /// Snapshot store
    store: Arc<S>,
    /// Protection cycle
    manager: Arc<ProtectionManager<G, S>>,
    /// Account poller
    poller: Arc<AccountPoller<G, S>>,
    /// Event bus
    event_bus: Arc<EventBus>,
    /// Metrics registry
    metrics: Arc<Metrics>,
    /// Cancels poller and scheduler
    shutdown_token: CancellationToken,
}

impl Daemon<StubGateway, MemoryStore> {
    /// Create a new daemon with stub components (for testing/development).
    pub fn new_stub(config: Config) -> DaemonResult<Self> {
        let gateway = Arc::new(StubGateway::new(rust_decimal_macros::dec!(95000)));
        let store = Arc::new(MemoryStore::new());
        Self::new(config, gateway, store)
    }
}

impl<S: SnapshotStore + 'static> Daemon<OkxGateway, S> {
    /// Create a daemon talking to OKX.
    pub fn new_okx(config: Config, store: Arc<S>) -> DaemonResult<Self> {
        let credentials = config.okx.credentials.clone().ok_or_else(|| {
            DaemonError::Config("OKX credentials are required to talk to the venue".to_string())
        })?;
        let gateway = Arc::new(OkxGateway::connect(credentials, config.okx.client_config()));
        Self::new(config, gateway, store)
    }
}

impl<G, S> Daemon<G, S>
where
    G: ExchangeGateway + AccountPort + 'static,
    S: SnapshotStore + 'static,
{
    /// Create a new daemon with provided components.
    pub fn new(config: Config, gateway: Arc<G>, store: Arc<S>) -> DaemonResult<Self> {
        config.validate()?;

        let event_bus = Arc::new(EventBus::new(1000));
        let metrics = Arc::new(Metrics::new()?);
        let shutdown_token = CancellationToken::new();

        let manager = Arc::new(ProtectionManager::new(
            gateway.clone(),
            store.clone(),
            config.protection.staleness_filter()?,
            config.protection.risk_parameters()?,
            config.protection.min_order_size,
            config.protection.enabled,
            event_bus.clone(),
            metrics.clone(),
        ));

        let poller = Arc::new(AccountPoller::new(
            gateway.clone(),
            store.clone(),
            event_bus.clone(),
            metrics.clone(),
            config.protection.poll_interval(),
            shutdown_token.clone(),
        ));

        Ok(Self {
            config,
            gateway,
            store,
            manager,
            poller,
            event_bus,
            metrics,
            shutdown_token,
        })
    }

    /// Protection manager, for driving cycles directly.
    pub fn manager(&self) -> Arc<ProtectionManager<G, S>> {
        self.manager.clone()
    }

    /// Account poller, for driving polls directly.
    pub fn poller(&self) -> Arc<AccountPoller<G, S>> {
        self.poller.clone()
    }

    /// Event bus.
    pub fn event_bus(&self) -> Arc<EventBus> {
        self.event_bus.clone()
    }

    /// Run the daemon.
    ///
    /// This method blocks until shutdown is requested (SIGINT/SIGTERM).
    pub async fn run(self) -> DaemonResult<()> {
        info!(
            version = env!("CARGO_PKG_VERSION"),
            environment = %self.config.environment,
            okx_api_key = %self.config.okx.masked_key(),
            protection_enabled = self.config.protection.enabled,
            "Starting Tenyo daemon"
        );

        // 1. Reachability
        self.check_dependencies().await;

        // 2. Start API server
        let api_addr = self.start_api_server().await?;
        info!(%api_addr, "API server started");

        // 3. Background tasks
        let poller_handle = self.poller.clone().start();
        let scheduler_handle = ProtectionScheduler::new(
            self.manager.clone(),
            self.config.protection.check_interval(),
            self.shutdown_token.clone(),
        )
        .start();

        // 4. Wait for shutdown
        wait_for_shutdown_signal().await;
        info!("Received shutdown signal");

        // 5. Graceful shutdown
        self.event_bus.send(DaemonEvent::Shutdown);
        self.shutdown_token.cancel();
        for (name, handle) in [("poller", poller_handle), ("scheduler", scheduler_handle)] {
            if let Err(e) = handle.await {
                error!(task = name, error = %e, "Background task ended abnormally");
            }
        }

        info!("Shutdown complete");
        Ok(())
    }

    /// Log whether the venue and the store answer.
    async fn check_dependencies(&self) {
        match self.gateway.health_check().await {
            Ok(()) => info!("Venue reachable"),
            Err(e) if e.is_auth() => error!(error = %e, "Venue rejected credentials"),
            Err(e) => warn!(error = %e, "Venue health check failed"),
        }
        if let Err(e) = self.store.health_check().await {
            warn!(error = %e, "Store health check failed");
        }
    }

    /// Start the API server.
    async fn start_api_server(&self) -> DaemonResult<SocketAddr> {
        let state = Arc::new(ApiState {
            manager: self.manager.clone(),
            poller: self.poller.clone(),
            store: self.store.clone(),
            metrics: self.metrics.clone(),
            config: ConfigDigest::from_config(&self.config),
        });

        let router = create_router(state);
        let addr = format!("{}:{}", self.config.api.host, self.config.api.port);

        let listener = TcpListener::bind(&addr).await.map_err(|e| {
            DaemonError::Config(format!("Failed to bind to {}: {}", addr, e))
        })?;

        let local_addr = listener.local_addr().map_err(|e| {
            DaemonError::Config(format!("Failed to get local address: {}", e))
        })?;

        // Spawn the server task
        tokio::spawn(async move {
            if let Err(e) = axum::serve(listener, router).await {
                error!(error = %e, "API server error");
            }
        });

        Ok(local_addr)
    }
}

/// Resolve on SIGINT, or SIGTERM on unix.
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_daemon_stub_creation() {
        let daemon = Daemon::new_stub(Config::test()).unwrap();

        let summary = daemon.manager().run_cycle(Utc::now()).await;
        assert_eq!(summary.checked, 0);
        assert!(!summary.is_aborted());
    }

    #[tokio::test]
    async fn test_daemon_api_server_start() {
        let daemon = Daemon::new_stub(Config::test()).unwrap();

        let addr = daemon.start_api_server().await.unwrap();

        // Server should be running on a port
        assert!(addr.port() > 0);

        // Can make a health check request
        let client = reqwest::Client::new();
        let response = client
            .get(format!("http://{}/health", addr))
            .send()
            .await
            .unwrap();

        assert!(response.status().is_success());
    }

    #[test]
    fn test_okx_daemon_requires_credentials() {
        let result = Daemon::new_okx(Config::test(), Arc::new(MemoryStore::new()));
        assert!(matches!(result, Err(DaemonError::Config(_))));
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = Config::test();
        config.protection.volatility_pct = rust_decimal::Decimal::ZERO;
        assert!(Daemon::new_stub(config).is_err());
    }
}
