//! OKX v5 wire types.
//!
//! OKX encodes every number as a string and uses `""` for absent values.
//! The `to_domain` conversions parse those strings and reject anything the
//! domain cannot represent.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use tenyo_domain::{
    AccountBalance, AlgoOrderKind, AlgoOrderState, InstrumentId, MarginMode, Position,
    PositionSide, ProtectiveOrder,
};

use crate::okx_rest::OkxRestError;

// =============================================================================
// Envelope
// =============================================================================

/// Standard response envelope: `{"code":"0","msg":"","data":[...]}`.
#[derive(Debug, Deserialize)]
pub(crate) struct OkxEnvelope<T> {
    pub code: String,
    #[serde(default)]
    pub msg: String,
    #[serde(default = "Vec::new")]
    pub data: Vec<T>,
}

// =============================================================================
// Account
// =============================================================================

/// One entry of `GET /api/v5/account/balance`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct OkxAccountBalance {
    #[serde(default)]
    pub details: Vec<OkxBalanceDetail>,
}

/// Per-currency balance detail.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxBalanceDetail {
    pub ccy: String,
    #[serde(default)]
    pub eq: String,
    #[serde(default)]
    pub avail_bal: String,
    #[serde(default)]
    pub frozen_bal: String,
    #[serde(default)]
    pub eq_usd: String,
}

impl OkxBalanceDetail {
    /// Convert to a domain balance.
    pub fn to_domain(&self) -> Result<AccountBalance, OkxRestError> {
        Ok(AccountBalance {
            currency: self.ccy.clone(),
            balance: parse_decimal_or_zero("eq", &self.eq)?,
            available: parse_decimal_or_zero("availBal", &self.avail_bal)?,
            frozen: parse_decimal_or_zero("frozenBal", &self.frozen_bal)?,
            usd_value: parse_decimal_or_zero("eqUsd", &self.eq_usd)?,
        })
    }
}

/// One entry of `GET /api/v5/account/positions`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxPosition {
    pub inst_id: String,
    #[serde(default)]
    pub pos_side: String,
    #[serde(default)]
    pub pos: String,
    #[serde(default)]
    pub avg_px: String,
    #[serde(default)]
    pub upl: String,
    #[serde(default)]
    pub margin: String,
    #[serde(default)]
    pub lever: String,
    #[serde(default)]
    pub mgn_mode: String,
}

impl OkxPosition {
    /// Convert to a domain position. An empty `posSide` means net mode.
    pub fn to_domain(&self) -> Result<Position, OkxRestError> {
        let instrument = InstrumentId::new(self.inst_id.as_str())
            .map_err(|e| OkxRestError::ParseError(e.to_string()))?;
        let side = PositionSide::from_str(&self.pos_side)
            .map_err(|e| OkxRestError::ParseError(e.to_string()))?;
        let margin_mode = if self.mgn_mode.trim().is_empty() {
            None
        } else {
            Some(
                MarginMode::from_str(&self.mgn_mode)
                    .map_err(|e| OkxRestError::ParseError(e.to_string()))?,
            )
        };

        Ok(Position {
            instrument,
            side,
            size: parse_decimal_or_zero("pos", &self.pos)?,
            entry_price: parse_decimal_or_zero("avgPx", &self.avg_px)?,
            margin_mode,
            leverage: parse_decimal_or_zero("lever", &self.lever)?,
            unrealized_pnl: parse_decimal_or_zero("upl", &self.upl)?,
            margin: parse_decimal_or_zero("margin", &self.margin)?,
        })
    }
}

// =============================================================================
// Market
// =============================================================================

/// One entry of `GET /api/v5/market/ticker`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxTicker {
    pub inst_id: String,
    pub last: String,
}

/// One entry of `GET /api/v5/public/time`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct OkxServerTime {
    pub ts: String,
}

// =============================================================================
// Algo orders
// =============================================================================

/// One entry of `GET /api/v5/trade/orders-algo-pending`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxAlgoOrder {
    pub algo_id: String,
    pub inst_id: String,
    #[serde(default)]
    pub pos_side: String,
    #[serde(default)]
    pub side: String,
    #[serde(default)]
    pub sz: String,
    pub ord_type: String,
    pub state: String,
    #[serde(default)]
    pub tp_trigger_px: String,
    #[serde(default)]
    pub sl_trigger_px: String,
    #[serde(default)]
    pub c_time: String,
}

impl OkxAlgoOrder {
    /// Convert to a domain protective order.
    pub fn to_domain(&self) -> Result<ProtectiveOrder, OkxRestError> {
        let instrument = InstrumentId::new(self.inst_id.as_str())
            .map_err(|e| OkxRestError::ParseError(e.to_string()))?;
        let position_side = PositionSide::from_str(&self.pos_side)
            .map_err(|e| OkxRestError::ParseError(e.to_string()))?;

        Ok(ProtectiveOrder {
            algo_id: self.algo_id.clone(),
            instrument,
            position_side,
            kind: AlgoOrderKind::from_wire(&self.ord_type),
            state: AlgoOrderState::from_wire(&self.state),
            size: parse_decimal_or_zero("sz", &self.sz)?,
            tp_trigger: parse_optional_decimal("tpTriggerPx", &self.tp_trigger_px)?,
            sl_trigger: parse_optional_decimal("slTriggerPx", &self.sl_trigger_px)?,
            created_at: parse_millis(&self.c_time),
        })
    }
}

/// Body of `POST /api/v5/trade/order-algo`.
///
/// Only one of the TP or SL groups is ever set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxAlgoOrderRequest {
    pub inst_id: String,
    pub td_mode: String,
    pub side: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pos_side: Option<String>,
    pub ord_type: String,
    pub sz: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_trigger_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_ord_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp_trigger_px_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_trigger_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_ord_px: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sl_trigger_px_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reduce_only: Option<bool>,
}

/// One entry of the order-algo response.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OkxAlgoOrderAck {
    pub algo_id: String,
    #[serde(default)]
    pub s_code: String,
    #[serde(default)]
    pub s_msg: String,
}

// =============================================================================
// Parsing helpers
// =============================================================================

fn parse_decimal_or_zero(field: &str, value: &str) -> Result<Decimal, OkxRestError> {
    Ok(parse_optional_decimal(field, value)?.unwrap_or(Decimal::ZERO))
}

fn parse_optional_decimal(field: &str, value: &str) -> Result<Option<Decimal>, OkxRestError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    Decimal::from_str(value)
        .or_else(|_| Decimal::from_scientific(value))
        .map(Some)
        .map_err(|e| OkxRestError::ParseError(format!("{} = {:?}: {}", field, value, e)))
}

fn parse_millis(value: &str) -> Option<DateTime<Utc>> {
    value
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
}

// =============================================================================
// Tests
// =============================================================================
