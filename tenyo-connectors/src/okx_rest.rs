//! OKX v5 REST API Client
//!
//! Provides REST API integration for:
//! - Account balances and open positions
//! - Pending algo orders and conditional order placement
//! - Last traded price and server time
//!
//! # Authentication
//!
//! Private endpoints carry four headers:
//! - `OK-ACCESS-KEY`
//! - `OK-ACCESS-SIGN`: base64(HMAC-SHA256(secret, timestamp + METHOD + requestPath + body))
//! - `OK-ACCESS-TIMESTAMP`: ISO 8601 UTC with milliseconds
//! - `OK-ACCESS-PASSPHRASE`
//!
//! # Retries
//!
//! Transport errors, timeouts, HTTP 429 and other non-2xx statuses are retried
//! up to `max_retries` times, waiting `2^(n-1)` seconds before retry `n`.
//! An envelope with `code != "0"` is a definitive answer and is not retried.

use std::future::Future;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::Utc;
use hmac::{Hmac, Mac};
use reqwest::{Client, Method};
use rust_decimal::Decimal;
use serde::de::DeserializeOwned;
use sha2::Sha256;
use thiserror::Error;
use tokio::time::timeout;
use tracing::{debug, warn};

use tenyo_domain::OkxCredentials;

use crate::okx_types::{
    OkxAccountBalance, OkxAlgoOrder, OkxAlgoOrderAck, OkxAlgoOrderRequest, OkxBalanceDetail,
    OkxEnvelope, OkxPosition, OkxServerTime, OkxTicker,
};

// =============================================================================
// Constants
// =============================================================================

/// OKX REST API base URL
pub const OKX_API_URL: &str = "https://www.okx.com";

/// Page size limit of the pending algo orders endpoint
const ALGO_PAGE_LIMIT: usize = 100;

/// Upper bound on pages fetched in one call
const MAX_ALGO_PAGES: usize = 50;

/// Error codes OKX uses for key, passphrase, timestamp and signature problems
const AUTH_ERROR_CODES: std::ops::RangeInclusive<u32> = 50100..=50114;

type HmacSha256 = Hmac<Sha256>;

// =============================================================================
// Errors
// =============================================================================

/// Errors that can occur in the OKX REST client.
#[derive(Debug, Clone, Error)]
pub enum OkxRestError {
    /// Failed to build request signature
    #[error("Failed to build signature: {0}")]
    SignatureError(String),

    /// HTTP request failed before a response arrived
    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    /// Non-success HTTP status
    #[error("HTTP {status}: {body}")]
    HttpStatus { status: u16, body: String },

    /// API returned an error code
    #[error("OKX API error: {code} - {msg}")]
    ApiError { code: String, msg: String },

    /// Failed to parse response
    #[error("Failed to parse response: {0}")]
    ParseError(String),

    /// Request timed out
    #[error("Request timed out")]
    Timeout,

    /// Invalid parameter
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// The venue still had pages left when the page limit was reached
    #[error("Pagination limit of {pages} pages reached after {fetched} orders")]
    PaginationLimit { pages: usize, fetched: usize },
}

impl OkxRestError {
    /// Whether another attempt may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            OkxRestError::RequestFailed(_) | OkxRestError::HttpStatus { .. } | OkxRestError::Timeout
        )
    }

    /// Whether the venue rejected our credentials.
    pub fn is_auth_error(&self) -> bool {
        match self {
            OkxRestError::HttpStatus { status, .. } => *status == 401,
            OkxRestError::ApiError { code, .. } => code
                .parse::<u32>()
                .map(|c| AUTH_ERROR_CODES.contains(&c))
                .unwrap_or(false),
            _ => false,
        }
    }
}

// =============================================================================
// Configuration
// =============================================================================

/// Connection settings for the OKX client.
#[derive(Debug, Clone)]
pub struct OkxClientConfig {
    /// Base URL (no trailing slash)
    pub base_url: String,
    /// Per-attempt timeout
    pub timeout: Duration,
    /// Retries after the first attempt
    pub max_retries: u32,
    /// Send `x-simulated-trading: 1` (demo trading accounts)
    pub simulated: bool,
}

impl Default for OkxClientConfig {
    fn default() -> Self {
        Self {
            base_url: OKX_API_URL.to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            simulated: false,
        }
    }
}

// =============================================================================
// OKX REST Client
// =============================================================================

/// OKX v5 REST API client.
pub struct OkxRestClient {
    /// HTTP client
    client: Client,
    /// API credentials
    credentials: OkxCredentials,
    /// Connection settings
    config: OkxClientConfig,
}

impl OkxRestClient {
    /// Create a new OKX REST client.
    pub fn new(credentials: OkxCredentials, config: OkxClientConfig) -> Self {
        Self {
            client: Client::new(),
            credentials,
            config,
        }
    }

    /// Connection settings in use.
    pub fn config(&self) -> &OkxClientConfig {
        &self.config
    }

    // =========================================================================
    // Account API
    // =========================================================================

    /// Get per-currency balance details.
    ///
    /// # Endpoint
    ///
    /// `GET /api/v5/account/balance`
    pub async fn get_balances(&self) -> Result<Vec<OkxBalanceDetail>, OkxRestError> {
        let accounts: Vec<OkxAccountBalance> =
            self.request(Method::GET, "/api/v5/account/balance", None).await?;

        Ok(accounts.into_iter().flat_map(|a| a.details).collect())
    }

    /// Get all open positions.
    ///
    /// # Endpoint
    ///
    /// `GET /api/v5/account/positions`
    pub async fn get_positions(&self) -> Result<Vec<OkxPosition>, OkxRestError> {
        self.request(Method::GET, "/api/v5/account/positions", None).await
    }

    // =========================================================================
    // Trade API
    // =========================================================================

    /// Get pending algo orders of one type, following pagination.
    ///
    /// Fails with `PaginationLimit` rather than returning a partial list.
    ///
    /// # Endpoint
    ///
    /// `GET /api/v5/trade/orders-algo-pending?ordType=...`
    pub async fn get_pending_algo_orders(
        &self,
        ord_type: &str,
    ) -> Result<Vec<OkxAlgoOrder>, OkxRestError> {
        if ord_type.is_empty() {
            return Err(OkxRestError::InvalidParameter("ordType must be set".to_string()));
        }

        collect_algo_pages(MAX_ALGO_PAGES, |after| {
            let mut path = format!("/api/v5/trade/orders-algo-pending?ordType={}", ord_type);
            if let Some(cursor) = after {
                path.push_str(&format!("&after={}", cursor));
            }
            async move { self.request(Method::GET, &path, None).await }
        })
        .await
        .map_err(|e| {
            if let OkxRestError::PaginationLimit { fetched, .. } = &e {
                warn!(ord_type, fetched, "Pending algo order pagination limit reached");
            }
            e
        })
    }

    /// Place an algo order.
    ///
    /// # Endpoint
    ///
    /// `POST /api/v5/trade/order-algo`
    pub async fn place_algo_order(
        &self,
        request: &OkxAlgoOrderRequest,
    ) -> Result<OkxAlgoOrderAck, OkxRestError> {
        let body = serde_json::to_string(request)
            .map_err(|e| OkxRestError::InvalidParameter(e.to_string()))?;

        let acks: Vec<OkxAlgoOrderAck> = self
            .request(Method::POST, "/api/v5/trade/order-algo", Some(body))
            .await?;

        let ack = acks
            .into_iter()
            .next()
            .ok_or_else(|| OkxRestError::ParseError("Empty order-algo response".to_string()))?;

        if !ack.s_code.is_empty() && ack.s_code != "0" {
            return Err(OkxRestError::ApiError {
                code: ack.s_code,
                msg: ack.s_msg,
            });
        }

        Ok(ack)
    }

    // =========================================================================
    // Market / Public API
    // =========================================================================

    /// Get the ticker of one instrument.
    ///
    /// # Endpoint
    ///
    /// `GET /api/v5/market/ticker?instId=...`
    pub async fn get_ticker(&self, inst_id: &str) -> Result<OkxTicker, OkxRestError> {
        let path = format!("/api/v5/market/ticker?instId={}", inst_id);
        let tickers: Vec<OkxTicker> = self.request(Method::GET, &path, None).await?;

        tickers
            .into_iter()
            .next()
            .ok_or_else(|| OkxRestError::ParseError(format!("No ticker for {}", inst_id)))
    }

    /// Get server time in milliseconds. Used as a health check.
    ///
    /// # Endpoint
    ///
    /// `GET /api/v5/public/time`
    pub async fn get_server_time(&self) -> Result<i64, OkxRestError> {
        let times: Vec<OkxServerTime> =
            self.request(Method::GET, "/api/v5/public/time", None).await?;

        times
            .first()
            .and_then(|t| t.ts.parse::<i64>().ok())
            .ok_or_else(|| OkxRestError::ParseError("Missing server time".to_string()))
    }

    // =========================================================================
    // Transport
    // =========================================================================

    /// Send a signed request with retries and unwrap the envelope.
    async fn request<T: DeserializeOwned>(
        &self,
        method: Method,
        request_path: &str,
        body: Option<String>,
    ) -> Result<Vec<T>, OkxRestError> {
        let mut attempt = 0;

        loop {
            match self.send_once(method.clone(), request_path, body.as_deref()).await {
                Ok(text) => return parse_envelope(&text),
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    attempt += 1;
                    let delay = retry_delay(attempt);
                    warn!(
                        %method,
                        path = request_path,
                        attempt,
                        max_retries = self.config.max_retries,
                        delay_secs = delay.as_secs(),
                        error = %e,
                        "OKX request failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Send one attempt and return the body of a 2xx response.
    async fn send_once(
        &self,
        method: Method,
        request_path: &str,
        body: Option<&str>,
    ) -> Result<String, OkxRestError> {
        let timestamp = okx_timestamp();
        let body_str = body.unwrap_or("");
        let signature = sign_request(
            self.credentials.api_secret(),
            &timestamp,
            method.as_str(),
            request_path,
            body_str,
        )?;

        let url = format!("{}{}", self.config.base_url, request_path);
        let mut builder = self
            .client
            .request(method.clone(), &url)
            .header("OK-ACCESS-KEY", self.credentials.api_key())
            .header("OK-ACCESS-SIGN", signature)
            .header("OK-ACCESS-TIMESTAMP", &timestamp)
            .header("OK-ACCESS-PASSPHRASE", self.credentials.passphrase())
            .header("Content-Type", "application/json");

        if self.config.simulated {
            builder = builder.header("x-simulated-trading", "1");
        }
        if let Some(body) = body {
            builder = builder.body(body.to_string());
        }

        debug!(%method, path = request_path, "OKX request");

        let response = timeout(self.config.timeout, builder.send())
            .await
            .map_err(|_| OkxRestError::Timeout)?
            .map_err(|e| OkxRestError::RequestFailed(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| OkxRestError::RequestFailed(e.to_string()))?;

        if !status.is_success() {
            // Auth failures come back as 401 with an envelope; surface the code
            if status.as_u16() == 401 {
                if let Ok(envelope) = serde_json::from_str::<OkxEnvelope<serde_json::Value>>(&text) {
                    return Err(OkxRestError::ApiError {
                        code: envelope.code,
                        msg: envelope.msg,
                    });
                }
            }
            return Err(OkxRestError::HttpStatus {
                status: status.as_u16(),
                body: text,
            });
        }

        Ok(text)
    }
}

// =============================================================================
// Helpers
// =============================================================================

/// Compute the `OK-ACCESS-SIGN` header value.
pub fn sign_request(
    secret: &str,
    timestamp: &str,
    method: &str,
    request_path: &str,
    body: &str,
) -> Result<String, OkxRestError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| OkxRestError::SignatureError(format!("HMAC error: {}", e)))?;

    mac.update(timestamp.as_bytes());
    mac.update(method.to_uppercase().as_bytes());
    mac.update(request_path.as_bytes());
    mac.update(body.as_bytes());

    Ok(BASE64.encode(mac.finalize().into_bytes()))
}

/// Delay before retry `attempt` (1-based): 1s, 2s, 4s, ...
pub fn retry_delay(attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(16);
    Duration::from_secs(1u64 << exponent)
}

/// Format a decimal for OKX: at most 8 fractional digits, no trailing zeros.
pub fn format_decimal(value: Decimal) -> String {
    value.round_dp(8).normalize().to_string()
}

/// Follow `after=<algoId>` cursors until a short page.
async fn collect_algo_pages<F, Fut>(
    max_pages: usize,
    mut fetch_page: F,
) -> Result<Vec<OkxAlgoOrder>, OkxRestError>
where
    F: FnMut(Option<String>) -> Fut,
    Fut: Future<Output = Result<Vec<OkxAlgoOrder>, OkxRestError>>,
{
    let mut orders = Vec::new();
    let mut after: Option<String> = None;

    for _ in 0..max_pages {
        let page = fetch_page(after.take()).await?;
        let full_page = page.len() >= ALGO_PAGE_LIMIT;
        after = page.last().map(|o| o.algo_id.clone());
        orders.extend(page);

        if !full_page || after.is_none() {
            return Ok(orders);
        }
    }

    Err(OkxRestError::PaginationLimit {
        pages: max_pages,
        fetched: orders.len(),
    })
}

fn okx_timestamp() -> String {
    Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string()
}

fn parse_envelope<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, OkxRestError> {
    let envelope: OkxEnvelope<T> =
        serde_json::from_str(text).map_err(|e| OkxRestError::ParseError(e.to_string()))?;

    if envelope.code != "0" {
        return Err(OkxRestError::ApiError {
            code: envelope.code,
            msg: envelope.msg,
        });
    }

    Ok(envelope.data)
}

// =============================================================================
// Tests
// =============================================================================
