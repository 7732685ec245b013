//! OKX adapter for the execution ports.
//!
//! Wraps `OkxRestClient` and maps its wire types and errors onto
//! `ExchangeGateway` and `AccountPort`.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;
use std::sync::Arc;

use tenyo_connectors::{
    format_decimal, OkxAlgoOrderRequest, OkxClientConfig, OkxRestClient, OkxRestError,
};
use tenyo_domain::{
    AccountBalance, AlgoOrderKind, InstrumentId, OkxCredentials, Position, PositionSide, Price,
    ProtectiveOrder,
};
use tenyo_exec::{
    AccountPort, ConditionalOrderRequest, ConditionalTrigger, ExchangeGateway, ExecError,
    PlacedOrder,
};

/// Order price meaning "execute at market once triggered"
const MARKET_ORDER_PRICE: &str = "-1";

/// `ExchangeGateway` and `AccountPort` backed by OKX REST v5.
pub struct OkxGateway {
    client: Arc<OkxRestClient>,
}

impl OkxGateway {
    /// Wrap an existing client.
    pub fn new(client: Arc<OkxRestClient>) -> Self {
        Self { client }
    }

    /// Build a client from credentials and settings.
    pub fn connect(credentials: OkxCredentials, config: OkxClientConfig) -> Self {
        Self::new(Arc::new(OkxRestClient::new(credentials, config)))
    }
}

/// Map a connector error onto the execution taxonomy.
pub fn map_okx_error(err: OkxRestError) -> ExecError {
    if err.is_auth_error() {
        return ExecError::Authentication(err.to_string());
    }
    match err {
        OkxRestError::ApiError { code, msg } => ExecError::Rejected { code, msg },
        OkxRestError::ParseError(msg) | OkxRestError::InvalidParameter(msg) => {
            ExecError::InvalidResponse(msg)
        }
        limit @ OkxRestError::PaginationLimit { .. } => {
            ExecError::InvalidResponse(limit.to_string())
        }
        other => ExecError::Transport(other.to_string()),
    }
}

/// Translate a conditional order request into the OKX body.
///
/// Exactly one of the TP or SL groups is filled; both execute at market.
pub fn to_okx_request(request: &ConditionalOrderRequest) -> OkxAlgoOrderRequest {
    let pos_side = match request.position_side {
        PositionSide::Net => None,
        side => Some(side.as_str().to_string()),
    };
    let trigger_px = format_decimal(request.trigger.trigger_price().as_decimal());
    let px_type = request.trigger_price_type.as_str().to_string();

    let mut body = OkxAlgoOrderRequest {
        inst_id: request.instrument.as_str().to_string(),
        td_mode: request.trade_mode.as_str().to_string(),
        side: request.side.as_str().to_string(),
        pos_side,
        ord_type: AlgoOrderKind::Conditional.as_str().to_string(),
        sz: format_decimal(request.size.as_decimal()),
        reduce_only: request.reduce_only.then_some(true),
        ..Default::default()
    };

    match request.trigger {
        ConditionalTrigger::TakeProfit { .. } => {
            body.tp_trigger_px = Some(trigger_px);
            body.tp_ord_px = Some(MARKET_ORDER_PRICE.to_string());
            body.tp_trigger_px_type = Some(px_type);
        }
        ConditionalTrigger::StopLoss { .. } => {
            body.sl_trigger_px = Some(trigger_px);
            body.sl_ord_px = Some(MARKET_ORDER_PRICE.to_string());
            body.sl_trigger_px_type = Some(px_type);
        }
    }

    body
}

#[async_trait]
impl ExchangeGateway for OkxGateway {
    async fn fetch_open_algo_orders(
        &self,
        kind: AlgoOrderKind,
    ) -> Result<Vec<ProtectiveOrder>, ExecError> {
        let orders = self
            .client
            .get_pending_algo_orders(kind.as_str())
            .await
            .map_err(map_okx_error)?;

        // One unreadable order would understate coverage, so fail the whole fetch
        orders
            .iter()
            .map(|o| o.to_domain().map_err(map_okx_error))
            .collect()
    }

    async fn fetch_last_price(&self, instrument: &InstrumentId) -> Result<Price, ExecError> {
        let ticker = self
            .client
            .get_ticker(instrument.as_str())
            .await
            .map_err(map_okx_error)?;

        let last = Decimal::from_str(ticker.last.trim()).map_err(|e| {
            ExecError::InvalidResponse(format!("ticker last {:?}: {}", ticker.last, e))
        })?;
        Ok(Price::new(last)?)
    }

    async fn place_conditional_order(
        &self,
        request: &ConditionalOrderRequest,
    ) -> Result<PlacedOrder, ExecError> {
        let ack = self
            .client
            .place_algo_order(&to_okx_request(request))
            .await
            .map_err(map_okx_error)?;

        Ok(PlacedOrder {
            algo_id: ack.algo_id,
        })
    }

    async fn health_check(&self) -> Result<(), ExecError> {
        self.client
            .get_server_time()
            .await
            .map(|_| ())
            .map_err(map_okx_error)
    }
}

#[async_trait]
impl AccountPort for OkxGateway {
    async fn fetch_positions(&self) -> Result<Vec<Position>, ExecError> {
        let positions = self.client.get_positions().await.map_err(map_okx_error)?;

        positions
            .iter()
            .map(|p| p.to_domain().map_err(map_okx_error))
            .collect()
    }

    async fn fetch_balances(&self) -> Result<Vec<AccountBalance>, ExecError> {
        let details = self.client.get_balances().await.map_err(map_okx_error)?;

        details
            .iter()
            .map(|d| d.to_domain().map_err(map_okx_error))
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
