//! Take-profit and stop-loss target calculation.
//!
//! Distances are flat fractions of the entry price and do not depend on
//! leverage:
//!
//! ```text
//! sl_distance = entry × volatility_pct
//! tp_distance = entry × volatility_pct × profit_loss_ratio
//! ```

use rust_decimal::Decimal;
use serde::Serialize;
use tracing::debug;

use tenyo_domain::{Direction, InstrumentId, Position, Price};

use crate::error::{EngineError, EngineResult};

/// Risk parameters shared by every position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RiskParameters {
    volatility_pct: Decimal,
    profit_loss_ratio: Decimal,
}

impl RiskParameters {
    /// Create risk parameters.
    ///
    /// # Errors
    ///
    /// `EngineError::InvalidConfig` unless both values are > 0.
    pub fn new(volatility_pct: Decimal, profit_loss_ratio: Decimal) -> EngineResult<Self> {
        if volatility_pct <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "volatility_pct must be positive, got {}",
                volatility_pct
            )));
        }
        if profit_loss_ratio <= Decimal::ZERO {
            return Err(EngineError::InvalidConfig(format!(
                "profit_loss_ratio must be positive, got {}",
                profit_loss_ratio
            )));
        }
        Ok(Self {
            volatility_pct,
            profit_loss_ratio,
        })
    }

    /// Stop distance as a fraction of entry price.
    pub fn volatility_pct(&self) -> Decimal {
        self.volatility_pct
    }

    /// Take-profit distance as a multiple of the stop distance.
    pub fn profit_loss_ratio(&self) -> Decimal {
        self.profit_loss_ratio
    }
}

/// Target trigger prices for one position.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TargetPrices {
    pub instrument: InstrumentId,
    pub direction: Direction,
    pub entry_price: Price,
    pub take_profit: Price,
    pub stop_loss: Price,
}

/// Compute raw targets from the entry price.
///
/// # Errors
///
/// - `EngineError::InvalidEntryPrice` if entry ≤ 0
/// - `EngineError::InvalidCalculatedPrice` if either target ≤ 0
pub fn calculate_targets(position: &Position, params: &RiskParameters) -> EngineResult<TargetPrices> {
    let entry = position.entry_price;
    let entry_price = Price::new(entry).map_err(|_| EngineError::InvalidEntryPrice {
        instrument: position.instrument.to_string(),
        entry_price: entry,
    })?;

    let sl_distance = entry * params.volatility_pct;
    let tp_distance = sl_distance * params.profit_loss_ratio;
    let direction = position.direction();

    let (tp, sl) = match direction {
        Direction::Long => (entry + tp_distance, entry - sl_distance),
        Direction::Short => (entry - tp_distance, entry + sl_distance),
    };

    let invalid = || EngineError::InvalidCalculatedPrice {
        instrument: position.instrument.to_string(),
        take_profit: tp,
        stop_loss: sl,
    };
    let take_profit = Price::new(tp).map_err(|_| invalid())?;
    let stop_loss = Price::new(sl).map_err(|_| invalid())?;

    debug!(
        instrument = %position.instrument,
        %direction,
        entry = %entry,
        take_profit = %take_profit,
        stop_loss = %stop_loss,
        "Calculated protection targets"
    );

    Ok(TargetPrices {
        instrument: position.instrument.clone(),
        direction,
        entry_price,
        take_profit,
        stop_loss,
    })
}

// =============================================================================
// Tests
// =============================================================================
