//! Live-price reconciliation of trigger prices.
//!
//! The venue rejects a conditional order whose trigger sits on the wrong
//! side of the current price:
//!
//! | Direction | Take-profit     | Stop-loss       |
//! |-----------|-----------------|-----------------|
//! | Long      | above current   | below current   |
//! | Short     | below current   | above current   |
//!
//! When the market already moved past a target, the trigger is moved to just
//! beyond the current price so the order is accepted and fires on the next
//! tick. The stop-loss is always moved, never dropped: an emergency stop
//! with a slightly larger loss beats an unprotected position.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use tracing::{debug, warn};

use tenyo_domain::{Direction, Price};

use crate::error::{EngineError, EngineResult};
use crate::targets::TargetPrices;

/// Distance from the current price for a moved trigger (0.1%).
pub const TRIGGER_BUFFER: Decimal = dec!(0.001);

/// Side of the current price a trigger must sit on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LegBound {
    /// Strictly above current price
    Above,
    /// Strictly below current price
    Below,
}

impl LegBound {
    fn take_profit(direction: Direction) -> Self {
        match direction {
            Direction::Long => LegBound::Above,
            Direction::Short => LegBound::Below,
        }
    }

    fn stop_loss(direction: Direction) -> Self {
        match direction {
            Direction::Long => LegBound::Below,
            Direction::Short => LegBound::Above,
        }
    }

    fn buffered(&self, current: Decimal) -> Decimal {
        match self {
            LegBound::Above => current * (Decimal::ONE + TRIGGER_BUFFER),
            LegBound::Below => current * (Decimal::ONE - TRIGGER_BUFFER),
        }
    }
}

/// Whether `trigger` is acceptable relative to `current` for `bound`.
pub fn satisfies_constraint(bound: LegBound, trigger: Decimal, current: Decimal) -> bool {
    match bound {
        LegBound::Above => trigger > current,
        LegBound::Below => trigger < current,
    }
}

/// Trigger prices ready for placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AdjustedPrices {
    pub take_profit: Price,
    pub stop_loss: Price,
    /// Take-profit was moved next to the current price
    pub tp_adjusted: bool,
    /// Stop-loss was moved next to the current price (emergency stop)
    pub sl_adjusted: bool,
    /// Do not place the take-profit leg
    pub skip_tp: bool,
    /// Do not place the stop-loss leg
    pub skip_sl: bool,
    /// Extra loss of an emergency stop beyond the planned one, as a fraction
    /// of entry price
    pub sl_excess_pct: Option<Decimal>,
}

impl AdjustedPrices {
    /// Targets used as-is, for when no live price is available.
    pub fn unreconciled(targets: &TargetPrices) -> Self {
        Self {
            take_profit: targets.take_profit,
            stop_loss: targets.stop_loss,
            tp_adjusted: false,
            sl_adjusted: false,
            skip_tp: false,
            skip_sl: false,
            sl_excess_pct: None,
        }
    }
}

/// Reconcile `targets` against `current_price`.
///
/// # Errors
///
/// `EngineError::InvalidCalculatedPrice` if a moved trigger is not a valid
/// price.
pub fn reconcile(targets: &TargetPrices, current_price: Price) -> EngineResult<AdjustedPrices> {
    let direction = targets.direction;
    let current = current_price.as_decimal();

    let (take_profit, tp_adjusted) = adjust_leg(
        LegBound::take_profit(direction),
        targets.take_profit,
        current,
        targets,
    )?;
    let (stop_loss, sl_adjusted) = adjust_leg(
        LegBound::stop_loss(direction),
        targets.stop_loss,
        current,
        targets,
    )?;

    if tp_adjusted {
        warn!(
            instrument = %targets.instrument,
            %direction,
            planned = %targets.take_profit,
            adjusted = %take_profit,
            %current_price,
            "Market already past take-profit, moving trigger next to current price"
        );
    }

    let sl_excess_pct = if sl_adjusted {
        let excess = (stop_loss.as_decimal() - targets.stop_loss.as_decimal()).abs()
            / targets.entry_price.as_decimal();
        warn!(
            instrument = %targets.instrument,
            %direction,
            planned = %targets.stop_loss,
            emergency = %stop_loss,
            %current_price,
            excess_pct = %excess.round_dp(6),
            "Market already past stop-loss, placing emergency stop"
        );
        Some(excess)
    } else {
        None
    };

    debug!(
        %direction,
        %current_price,
        take_profit = %take_profit,
        stop_loss = %stop_loss,
        tp_adjusted,
        sl_adjusted,
        "Reconciled trigger prices"
    );

    Ok(AdjustedPrices {
        take_profit,
        stop_loss,
        tp_adjusted,
        sl_adjusted,
        skip_tp: false,
        skip_sl: false,
        sl_excess_pct,
    })
}

fn adjust_leg(
    bound: LegBound,
    planned: Price,
    current: Decimal,
    targets: &TargetPrices,
) -> EngineResult<(Price, bool)> {
    if satisfies_constraint(bound, planned.as_decimal(), current) {
        return Ok((planned, false));
    }

    let moved = bound.buffered(current);
    let price = Price::new(moved).map_err(|_| EngineError::InvalidCalculatedPrice {
        instrument: targets.instrument.to_string(),
        take_profit: targets.take_profit.as_decimal(),
        stop_loss: targets.stop_loss.as_decimal(),
    })?;
    Ok((price, true))
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn targets(direction: Direction) -> TargetPrices {
        let (tp, sl) = match direction {
            Direction::Long => (dec!(105), dec!(99)),
            Direction::Short => (dec!(95), dec!(101)),
        };
        TargetPrices {
            instrument: tenyo_domain::InstrumentId::new("BTC-USDT-SWAP").unwrap(),
            direction,
            entry_price: Price::new(dec!(100)).unwrap(),
            take_profit: Price::new(tp).unwrap(),
            stop_loss: Price::new(sl).unwrap(),
        }
    }

    fn price(value: Decimal) -> Price {
        Price::new(value).unwrap()
    }

    #[test]
    fn test_long_past_take_profit() {
        let adjusted = reconcile(&targets(Direction::Long), price(dec!(106))).unwrap();

        assert_eq!(adjusted.take_profit.as_decimal(), dec!(106.106));
        assert!(adjusted.tp_adjusted);
        assert_eq!(adjusted.stop_loss.as_decimal(), dec!(99));
        assert!(!adjusted.sl_adjusted);
        assert_eq!(adjusted.sl_excess_pct, None);
    }

    #[test]
    fn test_short_past_stop_loss_gets_emergency_stop() {
        let adjusted = reconcile(&targets(Direction::Short), price(dec!(102))).unwrap();

        assert_eq!(adjusted.stop_loss.as_decimal(), dec!(102.102));
        assert!(adjusted.sl_adjusted);
        assert!(!adjusted.skip_sl);
        assert_eq!(adjusted.take_profit.as_decimal(), dec!(95));
        assert_eq!(adjusted.sl_excess_pct, Some(dec!(0.01102)));
    }

    #[test]
    fn test_targets_within_range_are_untouched() {
        let long = reconcile(&targets(Direction::Long), price(dec!(100))).unwrap();
        assert_eq!(long, AdjustedPrices::unreconciled(&targets(Direction::Long)));

        let short = reconcile(&targets(Direction::Short), price(dec!(100))).unwrap();
        assert_eq!(short, AdjustedPrices::unreconciled(&targets(Direction::Short)));
    }

    #[test]
    fn test_trigger_equal_to_current_is_moved() {
        let adjusted = reconcile(&targets(Direction::Long), price(dec!(99))).unwrap();
        assert!(adjusted.sl_adjusted);
        assert_eq!(adjusted.stop_loss.as_decimal(), dec!(98.901));
    }

    #[test]
    fn test_adjusted_prices_always_satisfy_constraint() {
        let currents = [dec!(90), dec!(94), dec!(99), dec!(100), dec!(101), dec!(105), dec!(110)];

        for direction in [Direction::Long, Direction::Short] {
            for current in currents {
                let adjusted = reconcile(&targets(direction), price(current)).unwrap();
                assert!(
                    satisfies_constraint(
                        LegBound::take_profit(direction),
                        adjusted.take_profit.as_decimal(),
                        current
                    ),
                    "{direction} tp at {current}"
                );
                assert!(
                    satisfies_constraint(
                        LegBound::stop_loss(direction),
                        adjusted.stop_loss.as_decimal(),
                        current
                    ),
                    "{direction} sl at {current}"
                );
                assert!(!adjusted.skip_sl);
            }
        }
    }
}
