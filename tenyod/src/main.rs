//! Tenyo Daemon
//!
//! Keeps every open OKX position covered by a take-profit and a stop-loss.
//!
//! # Usage
//!
//! ```bash
//! # Development against OKX with the in-memory store
//! OKX_API_KEY=... OKX_API_SECRET=... OKX_PASSPHRASE=... cargo run -p tenyod
//!
//! # Stub venue, no credentials
//! TENYO_ENV=test TENYO_API_PORT=8081 cargo run -p tenyod
//!
//! # PostgreSQL snapshots
//! DATABASE_URL=postgres://... cargo run -p tenyod --features postgres
//! ```
//!
//! # Environment Variables
//!
//! - `TENYO_ENV`: Environment (test, development, production)
//! - `TENYO_API_HOST` / `TENYO_API_PORT`: API bind address (default: 0.0.0.0:8080)
//! - `OKX_API_KEY`, `OKX_API_SECRET`, `OKX_PASSPHRASE`: Venue credentials
//! - `OKX_API_URL`, `OKX_TIMEOUT_SECS`, `OKX_MAX_RETRIES`, `OKX_SIMULATED`
//! - `TENYO_POLL_INTERVAL_SECS`: Account poll interval (default: 60)
//! - `TENYO_CHECK_INTERVAL_SECS`: Protection cycle interval (default: 300)
//! - `TENYO_STALENESS_THRESHOLD_SECS`: Snapshot age limit (default: 600)
//! - `TENYO_VOLATILITY_PCT`: Stop-loss distance (default: 0.01)
//! - `TENYO_PROFIT_LOSS_RATIO`: Take-profit multiple (default: 5)
//! - `TENYO_MIN_ORDER_SIZE`: Smallest uncovered size to protect (optional)
//! - `TENYO_PROTECTION_ENABLED`: Place orders (default: true)
//! - `TENYO_LOG_FORMAT`: text or json (default: text)
//! - `TENYO_LOG_CONSOLE`: Log to stdout (default: true)
//! - `TENYO_LOG_FILE`: Rolling log file path (optional)
//! - `TENYO_LOG_ROTATION`: daily, hourly or never (default: daily)
//! - `TENYO_LOG_MAX_FILES`: Rotated files kept (default: 7)
//! - `DATABASE_URL`: PostgreSQL URL (requires the `postgres` feature)

use std::sync::Arc;

use tenyod::{logging, Config, Daemon, Environment};
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load configuration (reads .env first)
    let config = Config::from_env()?;

    // Initialize tracing; the guard flushes the log file on exit
    let _log_guard = logging::init(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        environment = %config.environment,
        api_host = %config.api.host,
        api_port = config.api.port,
        log_file = ?config.logging.file.as_ref().map(|f| f.directory.join(&f.file_name)),
        "Tenyo Daemon"
    );

    if config.environment == Environment::Test {
        Daemon::new_stub(config)?.run().await?;
        return Ok(());
    }

    match config.database_url.clone() {
        Some(url) => run_with_postgres(config, &url).await?,
        None => {
            info!("DATABASE_URL not set, snapshots are kept in memory");
            let store = Arc::new(tenyo_store::MemoryStore::new());
            Daemon::new_okx(config, store)?.run().await?;
        }
    }

    Ok(())
}

#[cfg(feature = "postgres")]
async fn run_with_postgres(config: Config, url: &str) -> anyhow::Result<()> {
    let store = tenyo_store::PgSnapshotStore::connect(url).await?;
    store.init_schema().await?;
    info!("Connected to PostgreSQL");

    Daemon::new_okx(config, Arc::new(store))?.run().await?;
    Ok(())
}

#[cfg(not(feature = "postgres"))]
async fn run_with_postgres(_config: Config, _url: &str) -> anyhow::Result<()> {
    anyhow::bail!("DATABASE_URL is set but tenyod was built without the `postgres` feature")
}
