//! Coverage analysis.
//!
//! Decides how much of a position is already protected by pending
//! conditional orders. Only the size protected on *both* sides counts:
//! a position with a take-profit and no stop-loss is not covered at all.

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use tenyo_domain::{Position, ProtectiveOrder};

/// Which leg is absent when only one kind of trigger was found.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageGap {
    /// Stop-loss orders exist, no take-profit
    MissingTakeProfit,
    /// Take-profit orders exist, no stop-loss
    MissingStopLoss,
}

/// Coarse classification used for logs and cycle counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CoverageStatus {
    /// Nothing left to protect
    Full,
    /// Some size covered on both sides, some not
    Partial,
    /// No size covered on both sides
    Uncovered,
}

/// Result of matching a position against pending orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CoverageResult {
    /// Absolute position size
    pub total_size: Decimal,
    /// Largest size among matching take-profit orders
    pub max_tp_size: Decimal,
    /// Largest size among matching stop-loss orders
    pub max_sl_size: Decimal,
    /// Size protected on both sides
    pub covered_size: Decimal,
    /// Size still needing protection (never negative)
    pub uncovered_size: Decimal,
    /// Number of orders that matched the position
    pub matched_orders: usize,
    /// Set when exactly one kind of trigger was seen
    pub gap: Option<CoverageGap>,
}

impl CoverageResult {
    /// Whether nothing remains to be placed.
    pub fn is_fully_covered(&self) -> bool {
        self.uncovered_size <= Decimal::ZERO
    }

    /// Classify the result.
    pub fn status(&self) -> CoverageStatus {
        if self.is_fully_covered() {
            CoverageStatus::Full
        } else if self.covered_size > Decimal::ZERO {
            CoverageStatus::Partial
        } else {
            CoverageStatus::Uncovered
        }
    }
}

/// Compute coverage of `position` by `orders`.
///
/// An order matches when it is on the same instrument and position side, is
/// a conditional order and is live. Per kind the maximum size is taken, not
/// the sum; an order carrying both triggers counts toward both kinds.
pub fn analyze_coverage(position: &Position, orders: &[ProtectiveOrder]) -> CoverageResult {
    let total_size = position.abs_size();
    let mut max_tp_size = Decimal::ZERO;
    let mut max_sl_size = Decimal::ZERO;
    let mut has_tp = false;
    let mut has_sl = false;
    let mut matched_orders = 0;

    for order in orders.iter().filter(|o| o.protects(position)) {
        matched_orders += 1;
        debug!(
            instrument = %position.instrument,
            side = %position.side,
            algo_id = %order.algo_id,
            size = %order.size,
            tp_trigger = ?order.tp_trigger,
            sl_trigger = ?order.sl_trigger,
            "Matching protective order"
        );

        if order.has_take_profit() {
            has_tp = true;
            max_tp_size = max_tp_size.max(order.size);
        }
        if order.has_stop_loss() {
            has_sl = true;
            max_sl_size = max_sl_size.max(order.size);
        }
    }

    let covered_size = if has_tp && has_sl {
        max_tp_size.min(max_sl_size)
    } else {
        Decimal::ZERO
    };
    let uncovered_size = (total_size - covered_size).max(Decimal::ZERO);

    let gap = match (has_tp, has_sl) {
        (true, false) => Some(CoverageGap::MissingStopLoss),
        (false, true) => Some(CoverageGap::MissingTakeProfit),
        _ => None,
    };

    CoverageResult {
        total_size,
        max_tp_size,
        max_sl_size,
        covered_size,
        uncovered_size,
        matched_orders,
        gap,
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use tenyo_domain::{AlgoOrderKind, AlgoOrderState, InstrumentId, PositionSide};

    fn btc() -> InstrumentId {
        InstrumentId::new("BTC-USDT-SWAP").unwrap()
    }

    fn position(size: Decimal) -> Position {
        Position::new(btc(), PositionSide::Long, size, dec!(100))
    }

    fn order(size: Decimal, tp: Option<Decimal>, sl: Option<Decimal>) -> ProtectiveOrder {
        ProtectiveOrder {
            algo_id: format!("algo-{}", size),
            instrument: btc(),
            position_side: PositionSide::Long,
            kind: AlgoOrderKind::Conditional,
            state: AlgoOrderState::Live,
            size,
            tp_trigger: tp,
            sl_trigger: sl,
            created_at: None,
        }
    }

    #[test]
    fn test_no_orders_leaves_full_size_uncovered() {
        let result = analyze_coverage(&position(dec!(2)), &[]);

        assert_eq!(result.uncovered_size, dec!(2));
        assert_eq!(result.covered_size, Decimal::ZERO);
        assert_eq!(result.gap, None);
        assert_eq!(result.status(), CoverageStatus::Uncovered);
    }

    #[test]
    fn test_equal_tp_and_sl_cover_their_size() {
        let orders = vec![
            order(dec!(1), Some(dec!(110)), None),
            order(dec!(1), None, Some(dec!(95))),
        ];
        let result = analyze_coverage(&position(dec!(2)), &orders);

        assert_eq!(result.covered_size, dec!(1));
        assert_eq!(result.uncovered_size, dec!(1));
        assert_eq!(result.status(), CoverageStatus::Partial);
    }

    #[test]
    fn test_one_sided_protection_is_never_credited() {
        let tp_only = analyze_coverage(&position(dec!(2)), &[order(dec!(2), Some(dec!(110)), None)]);
        assert_eq!(tp_only.covered_size, Decimal::ZERO);
        assert_eq!(tp_only.uncovered_size, dec!(2));
        assert_eq!(tp_only.gap, Some(CoverageGap::MissingStopLoss));

        let sl_only = analyze_coverage(&position(dec!(2)), &[order(dec!(2), None, Some(dec!(90)))]);
        assert_eq!(sl_only.covered_size, Decimal::ZERO);
        assert_eq!(sl_only.gap, Some(CoverageGap::MissingTakeProfit));
    }

    #[test]
    fn test_maxima_not_sums() {
        let orders = vec![
            order(dec!(0.5), Some(dec!(110)), None),
            order(dec!(0.7), Some(dec!(120)), None),
            order(dec!(1.5), None, Some(dec!(90))),
        ];
        let result = analyze_coverage(&position(dec!(3)), &orders);

        assert_eq!(result.max_tp_size, dec!(0.7));
        assert_eq!(result.max_sl_size, dec!(1.5));
        assert_eq!(result.covered_size, dec!(0.7));
        assert_eq!(result.uncovered_size, dec!(2.3));
    }

    #[test]
    fn test_combined_order_counts_for_both_kinds() {
        let orders = vec![order(dec!(1), Some(dec!(110)), Some(dec!(90)))];
        let result = analyze_coverage(&position(dec!(1)), &orders);

        assert!(result.is_fully_covered());
        assert_eq!(result.status(), CoverageStatus::Full);
    }

    #[test]
    fn test_over_coverage_clamps_to_zero() {
        let orders = vec![
            order(dec!(5), Some(dec!(110)), None),
            order(dec!(5), None, Some(dec!(90))),
        ];
        let result = analyze_coverage(&position(dec!(2)), &orders);
        assert_eq!(result.uncovered_size, Decimal::ZERO);
    }

    #[test]
    fn test_non_matching_orders_are_ignored() {
        let mut wrong_side = order(dec!(1), Some(dec!(110)), Some(dec!(90)));
        wrong_side.position_side = PositionSide::Short;
        let mut wrong_state = order(dec!(1), Some(dec!(110)), Some(dec!(90)));
        wrong_state.state = AlgoOrderState::Canceled;
        let mut wrong_kind = order(dec!(1), Some(dec!(110)), Some(dec!(90)));
        wrong_kind.kind = AlgoOrderKind::Oco;

        let result = analyze_coverage(&position(dec!(1)), &[wrong_side, wrong_state, wrong_kind]);
        assert_eq!(result.matched_orders, 0);
        assert_eq!(result.uncovered_size, dec!(1));
    }

    #[test]
    fn test_zero_trigger_is_not_a_leg() {
        let orders = vec![order(dec!(1), Some(dec!(110)), Some(Decimal::ZERO))];
        let result = analyze_coverage(&position(dec!(1)), &orders);
        assert_eq!(result.gap, Some(CoverageGap::MissingStopLoss));
        assert_eq!(result.covered_size, Decimal::ZERO);
    }

    #[test]
    fn test_net_short_uses_absolute_size() {
        let pos = Position::new(btc(), PositionSide::Net, dec!(-2), dec!(100));
        let result = analyze_coverage(&pos, &[]);
        assert_eq!(result.total_size, dec!(2));
        assert_eq!(result.uncovered_size, dec!(2));
    }
}
