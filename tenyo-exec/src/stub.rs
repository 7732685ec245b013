//! Stub implementations for testing.
//!
//! `StubGateway` keeps an in-memory venue: prices, pending algo orders,
//! positions and balances. Placed orders are added to the pending book as
//! live conditional orders, so a second cycle sees them as coverage.

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use tenyo_domain::{
    AccountBalance, AlgoOrderKind, AlgoOrderState, InstrumentId, Position, Price, ProtectiveOrder,
};

use crate::error::ExecError;
use crate::ports::{
    AccountPort, ConditionalOrderRequest, ConditionalTrigger, ExchangeGateway, PlacedOrder,
    ProtectionLeg,
};

/// Failure switches. Each stays on until cleared.
#[derive(Debug, Default, Clone, Copy)]
struct Failures {
    price: bool,
    order_fetch: bool,
    take_profit: bool,
    stop_loss: bool,
    account: bool,
}

// =============================================================================
// Stub Gateway
// =============================================================================

/// Stub venue for testing.
pub struct StubGateway {
    /// Last prices by instrument
    prices: Mutex<HashMap<String, Decimal>>,
    /// Price for instruments without an explicit one
    default_price: Decimal,
    /// Pending algo orders
    algo_orders: Mutex<Vec<ProtectiveOrder>>,
    /// Every placement request received, including failed ones
    requests: Mutex<Vec<ConditionalOrderRequest>>,
    /// Open positions reported to the poller
    positions: Mutex<Vec<Position>>,
    /// Balances reported to the poller
    balances: Mutex<Vec<AccountBalance>>,
    /// Order counter for generating IDs
    order_counter: Mutex<u64>,
    /// Injected failures
    failures: Mutex<Failures>,
}

impl StubGateway {
    /// Create a stub venue quoting `default_price` for every instrument.
    pub fn new(default_price: Decimal) -> Self {
        Self {
            prices: Mutex::new(HashMap::new()),
            default_price,
            algo_orders: Mutex::new(Vec::new()),
            requests: Mutex::new(Vec::new()),
            positions: Mutex::new(Vec::new()),
            balances: Mutex::new(Vec::new()),
            order_counter: Mutex::new(0),
            failures: Mutex::new(Failures::default()),
        }
    }

    /// Set the last price for an instrument.
    pub fn set_price(&self, instrument: &str, price: Decimal) {
        lock(&self.prices).insert(instrument.to_string(), price);
    }

    /// Add a pending algo order.
    pub fn add_algo_order(&self, order: ProtectiveOrder) {
        lock(&self.algo_orders).push(order);
    }

    /// Replace the reported positions.
    pub fn set_positions(&self, positions: Vec<Position>) {
        *lock(&self.positions) = positions;
    }

    /// Replace the reported balances.
    pub fn set_balances(&self, balances: Vec<AccountBalance>) {
        *lock(&self.balances) = balances;
    }

    /// Make price lookups fail.
    pub fn fail_price(&self, fail: bool) {
        lock(&self.failures).price = fail;
    }

    /// Make pending-order fetches fail.
    pub fn fail_order_fetch(&self, fail: bool) {
        lock(&self.failures).order_fetch = fail;
    }

    /// Make placements of one leg fail.
    pub fn fail_leg(&self, leg: ProtectionLeg, fail: bool) {
        let mut failures = lock(&self.failures);
        match leg {
            ProtectionLeg::TakeProfit => failures.take_profit = fail,
            ProtectionLeg::StopLoss => failures.stop_loss = fail,
        }
    }

    /// Make account reads fail.
    pub fn fail_account(&self, fail: bool) {
        lock(&self.failures).account = fail;
    }

    /// All placement requests received so far.
    pub fn requests(&self) -> Vec<ConditionalOrderRequest> {
        lock(&self.requests).clone()
    }

    /// Pending algo orders, including ones placed through this stub.
    pub fn algo_orders(&self) -> Vec<ProtectiveOrder> {
        lock(&self.algo_orders).clone()
    }

    fn next_algo_id(&self) -> String {
        let mut counter = lock(&self.order_counter);
        *counter += 1;
        format!("STUB-{}", *counter)
    }

    fn failures(&self) -> Failures {
        *lock(&self.failures)
    }
}

#[async_trait]
impl ExchangeGateway for StubGateway {
    async fn fetch_open_algo_orders(
        &self,
        kind: AlgoOrderKind,
    ) -> Result<Vec<ProtectiveOrder>, ExecError> {
        if self.failures().order_fetch {
            return Err(ExecError::Transport("Simulated order fetch failure".to_string()));
        }
        Ok(lock(&self.algo_orders)
            .iter()
            .filter(|o| o.kind == kind)
            .cloned()
            .collect())
    }

    async fn fetch_last_price(&self, instrument: &InstrumentId) -> Result<Price, ExecError> {
        if self.failures().price {
            return Err(ExecError::Transport("Simulated price fetch failure".to_string()));
        }
        let price = lock(&self.prices)
            .get(instrument.as_str())
            .copied()
            .unwrap_or(self.default_price);
        Ok(Price::new(price)?)
    }

    async fn place_conditional_order(
        &self,
        request: &ConditionalOrderRequest,
    ) -> Result<PlacedOrder, ExecError> {
        lock(&self.requests).push(request.clone());

        let failures = self.failures();
        let fail = match request.trigger.leg() {
            ProtectionLeg::TakeProfit => failures.take_profit,
            ProtectionLeg::StopLoss => failures.stop_loss,
        };
        if fail {
            return Err(ExecError::Rejected {
                code: "51000".to_string(),
                msg: format!("Simulated {} rejection", request.trigger.leg()),
            });
        }

        let algo_id = self.next_algo_id();
        let (tp_trigger, sl_trigger) = match request.trigger {
            ConditionalTrigger::TakeProfit { trigger_price } => (Some(trigger_price.as_decimal()), None),
            ConditionalTrigger::StopLoss { trigger_price } => (None, Some(trigger_price.as_decimal())),
        };

        lock(&self.algo_orders).push(ProtectiveOrder {
            algo_id: algo_id.clone(),
            instrument: request.instrument.clone(),
            position_side: request.position_side,
            kind: AlgoOrderKind::Conditional,
            state: AlgoOrderState::Live,
            size: request.size.as_decimal(),
            tp_trigger,
            sl_trigger,
            created_at: Some(Utc::now()),
        });

        tracing::debug!(%algo_id, leg = %request.trigger.leg(), "Stub: conditional order placed");
        Ok(PlacedOrder { algo_id })
    }

    async fn health_check(&self) -> Result<(), ExecError> {
        Ok(())
    }
}

#[async_trait]
impl AccountPort for StubGateway {
    async fn fetch_positions(&self) -> Result<Vec<Position>, ExecError> {
        if self.failures().account {
            return Err(ExecError::Transport("Simulated account failure".to_string()));
        }
        Ok(lock(&self.positions).clone())
    }

    async fn fetch_balances(&self) -> Result<Vec<AccountBalance>, ExecError> {
        if self.failures().account {
            return Err(ExecError::Transport("Simulated account failure".to_string()));
        }
        Ok(lock(&self.balances).clone())
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// =============================================================================
// Tests
// =============================================================================
