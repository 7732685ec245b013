//! Domain Entities
//!
//! Positions and protective orders as the venue reports them, plus the
//! snapshot the poller records. None of these are mutated by the
//! protection cycle; they are recomputed from the venue every time.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::value_objects::{Direction, DomainError, InstrumentId, MarginMode, PositionSide};

// =============================================================================
// Position
// =============================================================================

/// An open derivatives position.
///
/// `size` is kept exactly as reported: positive for long/short mode legs,
/// signed in net mode (negative means short).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// Instrument the position is held in
    pub instrument: InstrumentId,
    /// Reported position side
    pub side: PositionSide,
    /// Reported size (signed in net mode)
    pub size: Decimal,
    /// Average entry price
    pub entry_price: Decimal,
    /// Margin mode, `None` when the snapshot did not record one
    pub margin_mode: Option<MarginMode>,
    /// Leverage multiplier
    pub leverage: Decimal,
    /// Unrealized profit and loss
    pub unrealized_pnl: Decimal,
    /// Margin allocated to the position
    pub margin: Decimal,
}

impl Position {
    /// Create a position with zeroed optional metrics.
    pub fn new(
        instrument: InstrumentId,
        side: PositionSide,
        size: Decimal,
        entry_price: Decimal,
    ) -> Self {
        Self {
            instrument,
            side,
            size,
            entry_price,
            margin_mode: None,
            leverage: Decimal::ZERO,
            unrealized_pnl: Decimal::ZERO,
            margin: Decimal::ZERO,
        }
    }

    /// Set the margin mode (builder style).
    pub fn with_margin_mode(mut self, mode: MarginMode) -> Self {
        self.margin_mode = Some(mode);
        self
    }

    /// Resolve the economic direction.
    ///
    /// Explicit long/short sides are authoritative. Net positions are long
    /// when size > 0 and short otherwise.
    pub fn direction(&self) -> Direction {
        match self.side {
            PositionSide::Long => Direction::Long,
            PositionSide::Short => Direction::Short,
            PositionSide::Net => {
                if self.size > Decimal::ZERO {
                    Direction::Long
                } else {
                    Direction::Short
                }
            }
        }
    }

    /// Unsigned size used for coverage.
    pub fn abs_size(&self) -> Decimal {
        self.size.abs()
    }

    /// Check structural validity.
    ///
    /// Entry price positivity is not checked here; the target calculator
    /// reports that case with its own error.
    ///
    /// # Errors
    /// Returns `DomainError::InvalidPosition` when:
    /// - an explicit long/short leg has a negative size
    /// - leverage or margin is negative
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.side != PositionSide::Net && self.size < Decimal::ZERO {
            return Err(DomainError::InvalidPosition(format!(
                "{} {} has negative size {}",
                self.instrument, self.side, self.size
            )));
        }
        if self.leverage < Decimal::ZERO {
            return Err(DomainError::InvalidPosition(format!(
                "{} has negative leverage {}",
                self.instrument, self.leverage
            )));
        }
        if self.margin < Decimal::ZERO {
            return Err(DomainError::InvalidPosition(format!(
                "{} has negative margin {}",
                self.instrument, self.margin
            )));
        }
        Ok(())
    }
}

// =============================================================================
// Algo order kind / state
// =============================================================================

/// Kind of a venue algo order.
///
/// Kinds the venue introduces later land in `Other` rather than failing
/// deserialization.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgoOrderKind {
    /// One-shot TP and/or SL trigger
    Conditional,
    /// One-cancels-the-other
    Oco,
    /// Plain trigger order
    Trigger,
    /// Trailing stop
    MoveOrderStop,
    /// Iceberg
    Iceberg,
    /// Time-weighted average price
    Twap,
    /// Anything else
    #[serde(other)]
    Other,
}

impl AlgoOrderKind {
    /// Wire representation as used by `ordType`.
    pub fn as_str(&self) -> &'static str {
        match self {
            AlgoOrderKind::Conditional => "conditional",
            AlgoOrderKind::Oco => "oco",
            AlgoOrderKind::Trigger => "trigger",
            AlgoOrderKind::MoveOrderStop => "move_order_stop",
            AlgoOrderKind::Iceberg => "iceberg",
            AlgoOrderKind::Twap => "twap",
            AlgoOrderKind::Other => "other",
        }
    }

    /// Parse the wire representation, mapping unknown kinds to `Other`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "conditional" => AlgoOrderKind::Conditional,
            "oco" => AlgoOrderKind::Oco,
            "trigger" => AlgoOrderKind::Trigger,
            "move_order_stop" => AlgoOrderKind::MoveOrderStop,
            "iceberg" => AlgoOrderKind::Iceberg,
            "twap" => AlgoOrderKind::Twap,
            _ => AlgoOrderKind::Other,
        }
    }
}

/// Lifecycle state of a venue algo order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlgoOrderState {
    /// Waiting for its trigger
    Live,
    /// Paused
    Pause,
    /// Triggered and executed
    Effective,
    /// Partially executed
    PartiallyEffective,
    /// Cancelled
    Canceled,
    /// Triggered but the resulting order failed
    OrderFailed,
    /// Anything else
    #[serde(other)]
    Other,
}

impl AlgoOrderState {
    /// Parse the wire representation, mapping unknown states to `Other`.
    pub fn from_wire(s: &str) -> Self {
        match s {
            "live" => AlgoOrderState::Live,
            "pause" => AlgoOrderState::Pause,
            "effective" => AlgoOrderState::Effective,
            "partially_effective" => AlgoOrderState::PartiallyEffective,
            "canceled" => AlgoOrderState::Canceled,
            "order_failed" => AlgoOrderState::OrderFailed,
            _ => AlgoOrderState::Other,
        }
    }
}

// =============================================================================
// ProtectiveOrder
// =============================================================================

/// A pending algo order that may protect a position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectiveOrder {
    /// Venue algo id
    pub algo_id: String,
    /// Instrument
    pub instrument: InstrumentId,
    /// Position side the order closes
    pub position_side: PositionSide,
    /// Order kind
    pub kind: AlgoOrderKind,
    /// Order state
    pub state: AlgoOrderState,
    /// Order size
    pub size: Decimal,
    /// Take-profit trigger price, if any
    pub tp_trigger: Option<Decimal>,
    /// Stop-loss trigger price, if any
    pub sl_trigger: Option<Decimal>,
    /// Venue creation time
    pub created_at: Option<DateTime<Utc>>,
}

impl ProtectiveOrder {
    /// Whether a non-zero take-profit trigger is present.
    pub fn has_take_profit(&self) -> bool {
        self.tp_trigger.is_some_and(|p| !p.is_zero())
    }

    /// Whether a non-zero stop-loss trigger is present.
    pub fn has_stop_loss(&self) -> bool {
        self.sl_trigger.is_some_and(|p| !p.is_zero())
    }

    /// Whether this order can count toward a position's coverage.
    ///
    /// Same instrument and side, conditional kind, live state.
    pub fn protects(&self, position: &Position) -> bool {
        self.instrument == position.instrument
            && self.position_side == position.side
            && self.kind == AlgoOrderKind::Conditional
            && self.state == AlgoOrderState::Live
    }
}

// =============================================================================
// Snapshots
// =============================================================================

/// The most recent set of positions the poller recorded.
///
/// `captured_at` is kept as the stored text; parsing it is the staleness
/// filter's job so a malformed value surfaces there.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionSnapshot {
    /// Capture time as recorded by the store
    pub captured_at: String,
    /// Positions captured at that instant
    pub positions: Vec<Position>,
}

/// Account balance for a single currency.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountBalance {
    /// Currency code (e.g., `USDT`)
    pub currency: String,
    /// Total equity in this currency
    pub balance: Decimal,
    /// Available balance
    pub available: Decimal,
    /// Frozen balance
    pub frozen: Decimal,
    /// Equity valued in USD
    pub usd_value: Decimal,
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn btc() -> InstrumentId {
        InstrumentId::new("BTC-USDT-SWAP").unwrap()
    }

    fn order(side: PositionSide, kind: AlgoOrderKind, state: AlgoOrderState) -> ProtectiveOrder {
        ProtectiveOrder {
            algo_id: "1".to_string(),
            instrument: btc(),
            position_side: side,
            kind,
            state,
            size: dec!(1),
            tp_trigger: Some(dec!(110)),
            sl_trigger: None,
            created_at: None,
        }
    }

    #[test]
    fn test_net_direction_follows_sign() {
        let long = Position::new(btc(), PositionSide::Net, dec!(0.5), dec!(100));
        let short = Position::new(btc(), PositionSide::Net, dec!(-0.5), dec!(100));
        let flat = Position::new(btc(), PositionSide::Net, dec!(0), dec!(100));

        assert_eq!(long.direction(), Direction::Long);
        assert_eq!(short.direction(), Direction::Short);
        assert_eq!(flat.direction(), Direction::Short);
        assert_eq!(short.abs_size(), dec!(0.5));
    }

    #[test]
    fn test_explicit_side_is_authoritative() {
        let pos = Position::new(btc(), PositionSide::Short, dec!(2), dec!(100));
        assert_eq!(pos.direction(), Direction::Short);
    }

    #[test]
    fn test_validate_rejects_negative_leg_size() {
        let pos = Position::new(btc(), PositionSide::Long, dec!(-1), dec!(100));
        assert!(pos.validate().is_err());

        let net = Position::new(btc(), PositionSide::Net, dec!(-1), dec!(100));
        assert!(net.validate().is_ok());
    }

    #[test]
    fn test_trigger_presence_ignores_zero() {
        let mut o = order(PositionSide::Long, AlgoOrderKind::Conditional, AlgoOrderState::Live);
        assert!(o.has_take_profit());
        assert!(!o.has_stop_loss());

        o.sl_trigger = Some(Decimal::ZERO);
        assert!(!o.has_stop_loss());
    }

    #[test]
    fn test_protects_requires_all_match_criteria() {
        let pos = Position::new(btc(), PositionSide::Long, dec!(1), dec!(100));

        assert!(order(PositionSide::Long, AlgoOrderKind::Conditional, AlgoOrderState::Live)
            .protects(&pos));
        assert!(!order(PositionSide::Short, AlgoOrderKind::Conditional, AlgoOrderState::Live)
            .protects(&pos));
        assert!(!order(PositionSide::Long, AlgoOrderKind::Oco, AlgoOrderState::Live)
            .protects(&pos));
        assert!(!order(PositionSide::Long, AlgoOrderKind::Conditional, AlgoOrderState::Effective)
            .protects(&pos));

        let mut other_inst = order(PositionSide::Long, AlgoOrderKind::Conditional, AlgoOrderState::Live);
        other_inst.instrument = InstrumentId::new("ETH-USDT-SWAP").unwrap();
        assert!(!other_inst.protects(&pos));
    }

    #[test]
    fn test_unknown_wire_values_map_to_other() {
        assert_eq!(AlgoOrderKind::from_wire("chase"), AlgoOrderKind::Other);
        assert_eq!(AlgoOrderState::from_wire("mystery"), AlgoOrderState::Other);
        assert_eq!(AlgoOrderKind::from_wire("conditional"), AlgoOrderKind::Conditional);

        let kind: AlgoOrderKind = serde_json::from_str("\"chase\"").unwrap();
        assert_eq!(kind, AlgoOrderKind::Other);
    }
}
