//! In-memory store implementation
//!
//! Used for development without a database and in tests.
//! Thread-safe using RwLock for concurrent access.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use tenyo_domain::{AccountBalance, Position, PositionSnapshot};

use crate::error::StoreError;
use crate::repository::{format_captured_at, BalanceSnapshot, SnapshotStore};

/// Snapshots kept per table; older ones are dropped first.
const MAX_SNAPSHOTS: usize = 1_000;

/// In-memory snapshot store
pub struct MemoryStore {
    positions: RwLock<BTreeMap<DateTime<Utc>, Vec<Position>>>,
    balances: RwLock<BTreeMap<DateTime<Utc>, Vec<AccountBalance>>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store
    pub fn new() -> Self {
        Self {
            positions: RwLock::new(BTreeMap::new()),
            balances: RwLock::new(BTreeMap::new()),
        }
    }

    /// Number of distinct position capture times held
    pub fn position_snapshot_count(&self) -> usize {
        self.positions.read().map(|p| p.len()).unwrap_or(0)
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn read<T>(lock: &RwLock<T>) -> Result<RwLockReadGuard<'_, T>, StoreError> {
    lock.read()
        .map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
}

fn write<T>(lock: &RwLock<T>) -> Result<RwLockWriteGuard<'_, T>, StoreError> {
    lock.write()
        .map_err(|_| StoreError::Database("memory store lock poisoned".to_string()))
}

fn append<T: Clone>(
    table: &mut BTreeMap<DateTime<Utc>, Vec<T>>,
    captured_at: DateTime<Utc>,
    rows: &[T],
) {
    table.entry(captured_at).or_default().extend_from_slice(rows);
    while table.len() > MAX_SNAPSHOTS {
        table.pop_first();
    }
}

// =============================================================================
// SnapshotStore Implementation
// =============================================================================

#[async_trait]
impl SnapshotStore for MemoryStore {
    async fn save_positions(
        &self,
        captured_at: DateTime<Utc>,
        positions: &[Position],
    ) -> Result<(), StoreError> {
        if positions.is_empty() {
            return Ok(());
        }
        append(&mut *write(&self.positions)?, captured_at, positions);
        Ok(())
    }

    async fn latest_position_snapshot(&self) -> Result<Option<PositionSnapshot>, StoreError> {
        let positions = read(&self.positions)?;
        Ok(positions
            .last_key_value()
            .map(|(captured_at, rows)| PositionSnapshot {
                captured_at: format_captured_at(*captured_at),
                positions: rows.clone(),
            }))
    }

    async fn save_balances(
        &self,
        captured_at: DateTime<Utc>,
        balances: &[AccountBalance],
    ) -> Result<(), StoreError> {
        if balances.is_empty() {
            return Ok(());
        }
        append(&mut *write(&self.balances)?, captured_at, balances);
        Ok(())
    }

    async fn latest_balances(&self) -> Result<Option<BalanceSnapshot>, StoreError> {
        let balances = read(&self.balances)?;
        Ok(balances
            .last_key_value()
            .map(|(captured_at, rows)| BalanceSnapshot {
                captured_at: format_captured_at(*captured_at),
                balances: rows.clone(),
            }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        read(&self.positions).map(|_| ())
    }
}

// =============================================================================
// Tests
// =============================================================================
