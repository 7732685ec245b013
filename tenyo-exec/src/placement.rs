//! Placement orchestrator.
//!
//! Places the missing protection for one position as two independent
//! reduce-only conditional orders:
//!
//! 1. Fetch the last price. If that fails, continue in degraded mode with
//!    the raw targets and let the venue reject whatever is already crossed.
//! 2. Reconcile targets against the live price.
//! 3. Place the take-profit leg. A failure here does not stop step 4.
//! 4. Place the stop-loss leg.
//!
//! Nothing is retried within a cycle; the next cycle starts from scratch.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use tenyo_domain::{Direction, InstrumentId, MarginMode, Position, Price, Quantity, TriggerPriceType};
use tenyo_engine::{reconcile, AdjustedPrices, TargetPrices};

use crate::error::{ExecError, ExecResult};
use crate::ports::{ConditionalOrderRequest, ConditionalTrigger, ExchangeGateway, ProtectionLeg};

// =============================================================================
// Outcome types
// =============================================================================

/// Where the trigger prices came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum PricingMode {
    /// Reconciled against a live price
    Live { current_price: Price },
    /// Raw targets, live price unavailable
    Degraded { reason: String },
}

/// Result of one leg.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum LegOutcome {
    /// Accepted by the venue
    Placed { algo_id: String, trigger_price: Price },
    /// Placement attempted and failed
    Failed { trigger_price: Price, error: String },
    /// Not attempted
    Skipped,
}

impl LegOutcome {
    /// Whether the leg is on the venue.
    pub fn is_placed(&self) -> bool {
        matches!(self, LegOutcome::Placed { .. })
    }

    fn describe(&self) -> String {
        match self {
            LegOutcome::Placed { algo_id, .. } => format!("placed ({})", algo_id),
            LegOutcome::Failed { error, .. } => format!("failed ({})", error),
            LegOutcome::Skipped => "skipped".to_string(),
        }
    }
}

/// Overall protection after placement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProtectionStatus {
    /// Both legs placed
    Protected,
    /// Stop-loss placed, take-profit missing
    MissingTakeProfit,
    /// Take-profit placed, stop-loss missing: the position can lose without bound
    UnprotectedRisk,
}

/// What happened when protecting one position.
#[derive(Debug, Clone, Serialize)]
pub struct PlacementOutcome {
    pub instrument: InstrumentId,
    pub direction: Direction,
    pub size: Quantity,
    pub pricing: PricingMode,
    pub prices: AdjustedPrices,
    pub take_profit: LegOutcome,
    pub stop_loss: LegOutcome,
    pub status: ProtectionStatus,
}

impl PlacementOutcome {
    /// Number of legs the venue accepted.
    pub fn placed_legs(&self) -> usize {
        [&self.take_profit, &self.stop_loss]
            .iter()
            .filter(|leg| leg.is_placed())
            .count()
    }
}

// =============================================================================
// Orchestrator
// =============================================================================

/// Places TP and SL legs for uncovered position size.
pub struct PlacementOrchestrator<G: ExchangeGateway> {
    gateway: Arc<G>,
    trigger_price_type: TriggerPriceType,
}

impl<G: ExchangeGateway> PlacementOrchestrator<G> {
    /// Create an orchestrator triggering on the last traded price.
    pub fn new(gateway: Arc<G>) -> Self {
        Self {
            gateway,
            trigger_price_type: TriggerPriceType::Last,
        }
    }

    /// Use a different trigger price series.
    pub fn with_trigger_price_type(mut self, trigger_price_type: TriggerPriceType) -> Self {
        self.trigger_price_type = trigger_price_type;
        self
    }

    /// Protect `uncovered` of `position` using `targets`.
    ///
    /// # Errors
    ///
    /// - `ExecError::BothLegsUnprotected` if neither leg ends up on the venue
    /// - `ExecError::Engine` if reconciliation produced no valid price
    pub async fn place_protection(
        &self,
        position: &Position,
        uncovered: Quantity,
        targets: &TargetPrices,
    ) -> ExecResult<PlacementOutcome> {
        let instrument = &position.instrument;

        let (pricing, prices) = match self.gateway.fetch_last_price(instrument).await {
            Ok(current_price) => {
                let prices = reconcile(targets, current_price)?;
                (PricingMode::Live { current_price }, prices)
            }
            Err(e) => {
                warn!(
                    %instrument,
                    error = %e,
                    "Live price unavailable, placing protection with unreconciled targets"
                );
                (
                    PricingMode::Degraded {
                        reason: e.to_string(),
                    },
                    AdjustedPrices::unreconciled(targets),
                )
            }
        };

        let direction = targets.direction;
        let side = direction.exit_action();
        let trade_mode = position.margin_mode.unwrap_or(MarginMode::Cross);

        let request = |leg: ProtectionLeg, trigger_price: Price| ConditionalOrderRequest {
            instrument: instrument.clone(),
            trade_mode,
            side,
            position_side: position.side,
            size: uncovered,
            trigger: ConditionalTrigger::for_leg(leg, trigger_price),
            reduce_only: true,
            trigger_price_type: self.trigger_price_type,
        };

        let take_profit = if prices.skip_tp {
            LegOutcome::Skipped
        } else {
            self.place_leg(request(ProtectionLeg::TakeProfit, prices.take_profit))
                .await
        };

        let stop_loss = if prices.skip_sl {
            LegOutcome::Skipped
        } else {
            self.place_leg(request(ProtectionLeg::StopLoss, prices.stop_loss))
                .await
        };

        let status = match (take_profit.is_placed(), stop_loss.is_placed()) {
            (true, true) => ProtectionStatus::Protected,
            (false, true) => {
                warn!(
                    %instrument,
                    side = %position.side,
                    take_profit = %take_profit.describe(),
                    "Stop-loss placed but take-profit missing"
                );
                ProtectionStatus::MissingTakeProfit
            }
            (true, false) => {
                error!(
                    %instrument,
                    side = %position.side,
                    size = %uncovered,
                    stop_loss = %stop_loss.describe(),
                    "UNPROTECTED RISK: take-profit placed but stop-loss failed"
                );
                ProtectionStatus::UnprotectedRisk
            }
            (false, false) => {
                error!(
                    %instrument,
                    side = %position.side,
                    size = %uncovered,
                    take_profit = %take_profit.describe(),
                    stop_loss = %stop_loss.describe(),
                    "Both protective legs failed, position is unprotected"
                );
                return Err(ExecError::BothLegsUnprotected {
                    instrument: instrument.to_string(),
                    side: position.side.to_string(),
                    take_profit: take_profit.describe(),
                    stop_loss: stop_loss.describe(),
                });
            }
        };

        Ok(PlacementOutcome {
            instrument: instrument.clone(),
            direction,
            size: uncovered,
            pricing,
            prices,
            take_profit,
            stop_loss,
            status,
        })
    }

    async fn place_leg(&self, request: ConditionalOrderRequest) -> LegOutcome {
        let leg = request.trigger.leg();
        let trigger_price = request.trigger.trigger_price();

        match self.gateway.place_conditional_order(&request).await {
            Ok(placed) => {
                info!(
                    instrument = %request.instrument,
                    %leg,
                    algo_id = %placed.algo_id,
                    side = %request.side,
                    size = %request.size,
                    %trigger_price,
                    trade_mode = %request.trade_mode,
                    "Protective order placed"
                );
                LegOutcome::Placed {
                    algo_id: placed.algo_id,
                    trigger_price,
                }
            }
            Err(e) => {
                warn!(
                    instrument = %request.instrument,
                    %leg,
                    %trigger_price,
                    error = %e,
                    "Protective order placement failed"
                );
                LegOutcome::Failed {
                    trigger_price,
                    error: e.to_string(),
                }
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
