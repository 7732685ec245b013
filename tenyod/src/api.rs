//! HTTP API for the Tenyo daemon.
//!
//! Read-only operator surface:
//! - Health check
//! - Status (last cycle, poller counters, configuration digest)
//! - Prometheus metrics
//!
//! No endpoint places or cancels orders.

use axum::{
    extract::State,
    http::{header, StatusCode},
    response::{IntoResponse, Response},
    routing::get,
    Json, Router,
};
use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use tenyo_exec::{AccountPort, ExchangeGateway};
use tenyo_store::SnapshotStore;

use crate::config::{Config, Environment};
use crate::metrics::Metrics;
use crate::poller::{AccountPoller, PollerStats};
use crate::protection_manager::{CycleSummary, ProtectionManager};

// =============================================================================
// API State
// =============================================================================

/// Shared state for API handlers.
pub struct ApiState<G, S>
where
    G: ExchangeGateway + AccountPort + 'static,
    S: SnapshotStore + 'static,
{
    pub manager: Arc<ProtectionManager<G, S>>,
    pub poller: Arc<AccountPoller<G, S>>,
    pub store: Arc<S>,
    pub metrics: Arc<Metrics>,
    pub config: ConfigDigest,
}

// =============================================================================
// Response Types
// =============================================================================

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Status response.
#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub last_cycle: Option<CycleSummary>,
    pub poller: PollerStats,
    pub store_healthy: bool,
    pub config: ConfigDigest,
}

/// Configuration as shown to operators; secrets are masked.
#[derive(Debug, Clone, Serialize)]
pub struct ConfigDigest {
    pub environment: Environment,
    pub okx_base_url: String,
    pub okx_api_key: String,
    pub okx_simulated: bool,
    pub poll_interval_secs: u64,
    pub check_interval_secs: u64,
    pub staleness_threshold_secs: u64,
    pub volatility_pct: Decimal,
    pub profit_loss_ratio: Decimal,
    pub min_order_size: Option<Decimal>,
    pub protection_enabled: bool,
    pub store: &'static str,
}

impl ConfigDigest {
    /// Digest of a resolved configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            environment: config.environment,
            okx_base_url: config.okx.base_url.clone(),
            okx_api_key: config.okx.masked_key(),
            okx_simulated: config.okx.simulated,
            poll_interval_secs: config.protection.poll_interval_secs,
            check_interval_secs: config.protection.check_interval_secs,
            staleness_threshold_secs: config.protection.staleness_threshold_secs,
            volatility_pct: config.protection.volatility_pct,
            profit_loss_ratio: config.protection.profit_loss_ratio,
            min_order_size: config.protection.min_order_size,
            protection_enabled: config.protection.enabled,
            store: if config.database_url.is_some() {
                "postgres"
            } else {
                "memory"
            },
        }
    }
}

// =============================================================================
// Router
// =============================================================================

/// Create the API router.
pub fn create_router<G, S>(state: Arc<ApiState<G, S>>) -> Router
where
    G: ExchangeGateway + AccountPort + 'static,
    S: SnapshotStore + 'static,
{
    Router::new()
        .route("/health", get(health_handler))
        .route("/status", get(status_handler::<G, S>))
        .route("/metrics", get(metrics_handler::<G, S>))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// =============================================================================
// Handlers
// =============================================================================

/// Health check endpoint.
async fn health_handler() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Last cycle, poller counters and configuration.
async fn status_handler<G, S>(State(state): State<Arc<ApiState<G, S>>>) -> Json<StatusResponse>
where
    G: ExchangeGateway + AccountPort + 'static,
    S: SnapshotStore + 'static,
{
    Json(StatusResponse {
        last_cycle: state.manager.last_summary().await,
        poller: state.poller.stats().await,
        store_healthy: state.store.health_check().await.is_ok(),
        config: state.config.clone(),
    })
}

/// Prometheus text exposition.
async fn metrics_handler<G, S>(State(state): State<Arc<ApiState<G, S>>>) -> Response
where
    G: ExchangeGateway + AccountPort + 'static,
    S: SnapshotStore + 'static,
{
    match state.metrics.render() {
        Ok(body) => (
            StatusCode::OK,
            [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()).into_response(),
    }
}

// =============================================================================
// Tests
// =============================================================================
