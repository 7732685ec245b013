//! Execution layer port definitions.
//!
//! Ports define the interfaces for external services (exchange, account data).
//! Adapters implement these ports for specific venues (OKX, stub, etc.).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;

use tenyo_domain::{
    AccountBalance, AlgoOrderKind, InstrumentId, MarginMode, OrderSide, Position, PositionSide,
    Price, ProtectiveOrder, Quantity, TriggerPriceType,
};

use crate::error::ExecError;

// =============================================================================
// Exchange Gateway
// =============================================================================

/// Port for the order-side operations the protection cycle needs.
///
/// Implementations:
/// - `StubGateway` - For testing (in-memory order book, injectable failures)
/// - `OkxGateway` - OKX v5 REST (in the daemon)
#[async_trait]
pub trait ExchangeGateway: Send + Sync {
    /// Fetch pending algo orders of one kind across all instruments.
    ///
    /// An empty list means nothing is protected.
    async fn fetch_open_algo_orders(
        &self,
        kind: AlgoOrderKind,
    ) -> Result<Vec<ProtectiveOrder>, ExecError>;

    /// Last traded price of an instrument.
    async fn fetch_last_price(&self, instrument: &InstrumentId) -> Result<Price, ExecError>;

    /// Place a single conditional order.
    ///
    /// Transport errors and venue rejections are both failures of this leg.
    async fn place_conditional_order(
        &self,
        request: &ConditionalOrderRequest,
    ) -> Result<PlacedOrder, ExecError>;

    /// Check if the venue is reachable.
    async fn health_check(&self) -> Result<(), ExecError>;
}

// =============================================================================
// Account Port
// =============================================================================

/// Port for account state read by the poller.
#[async_trait]
pub trait AccountPort: Send + Sync {
    /// All open positions.
    async fn fetch_positions(&self) -> Result<Vec<Position>, ExecError>;

    /// Per-currency balances.
    async fn fetch_balances(&self) -> Result<Vec<AccountBalance>, ExecError>;
}

// =============================================================================
// Requests
// =============================================================================

/// One of the two protective legs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionLeg {
    /// Take-profit leg
    TakeProfit,
    /// Stop-loss leg
    StopLoss,
}

impl fmt::Display for ProtectionLeg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProtectionLeg::TakeProfit => f.write_str("take_profit"),
            ProtectionLeg::StopLoss => f.write_str("stop_loss"),
        }
    }
}

/// The single trigger a conditional order carries.
///
/// A request never carries both: combined orders on the venue execute only
/// the stop-loss logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "leg", rename_all = "snake_case")]
pub enum ConditionalTrigger {
    /// Take-profit trigger
    TakeProfit { trigger_price: Price },
    /// Stop-loss trigger
    StopLoss { trigger_price: Price },
}

impl ConditionalTrigger {
    /// Build the trigger for a leg.
    pub fn for_leg(leg: ProtectionLeg, trigger_price: Price) -> Self {
        match leg {
            ProtectionLeg::TakeProfit => ConditionalTrigger::TakeProfit { trigger_price },
            ProtectionLeg::StopLoss => ConditionalTrigger::StopLoss { trigger_price },
        }
    }

    /// Which leg this trigger belongs to.
    pub fn leg(&self) -> ProtectionLeg {
        match self {
            ConditionalTrigger::TakeProfit { .. } => ProtectionLeg::TakeProfit,
            ConditionalTrigger::StopLoss { .. } => ProtectionLeg::StopLoss,
        }
    }

    /// Trigger price.
    pub fn trigger_price(&self) -> Price {
        match self {
            ConditionalTrigger::TakeProfit { trigger_price }
            | ConditionalTrigger::StopLoss { trigger_price } => *trigger_price,
        }
    }
}

/// A reduce-only conditional order closing (part of) a position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConditionalOrderRequest {
    /// Instrument
    pub instrument: InstrumentId,
    /// Trade mode, taken from the position's margin mode
    pub trade_mode: MarginMode,
    /// Closing side
    pub side: OrderSide,
    /// Position side being closed
    pub position_side: PositionSide,
    /// Size to close
    pub size: Quantity,
    /// TP or SL trigger
    pub trigger: ConditionalTrigger,
    /// Only ever reduce the position
    pub reduce_only: bool,
    /// Price series the trigger watches
    pub trigger_price_type: TriggerPriceType,
}

/// Venue acknowledgement of a placed order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlacedOrder {
    /// Venue algo id
    pub algo_id: String,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_trigger_leg_roundtrip() {
        let price = Price::new(dec!(99)).unwrap();
        let tp = ConditionalTrigger::for_leg(ProtectionLeg::TakeProfit, price);
        let sl = ConditionalTrigger::for_leg(ProtectionLeg::StopLoss, price);

        assert_eq!(tp.leg(), ProtectionLeg::TakeProfit);
        assert_eq!(sl.leg(), ProtectionLeg::StopLoss);
        assert_eq!(sl.trigger_price(), price);
    }

    #[test]
    fn test_request_serializes_single_trigger() {
        let request = ConditionalOrderRequest {
            instrument: InstrumentId::new("BTC-USDT-SWAP").unwrap(),
            trade_mode: MarginMode::Isolated,
            side: OrderSide::Sell,
            position_side: PositionSide::Long,
            size: Quantity::new(dec!(1)).unwrap(),
            trigger: ConditionalTrigger::StopLoss {
                trigger_price: Price::new(dec!(99)).unwrap(),
            },
            reduce_only: true,
            trigger_price_type: TriggerPriceType::Last,
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["trigger"]["leg"], "stop_loss");
        assert_eq!(json["trade_mode"], "isolated");
        assert_eq!(json["side"], "sell");
    }
}
