//! Storage port
//!
//! The poller writes snapshots, the protection cycle reads the latest one.
//! A snapshot is the set of rows sharing one capture time.

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use tenyo_domain::{AccountBalance, Position, PositionSnapshot};

use crate::error::StoreError;

/// Balances captured at one instant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BalanceSnapshot {
    /// Capture time as recorded by the store
    pub captured_at: String,
    /// Per-currency balances
    pub balances: Vec<AccountBalance>,
}

/// Snapshot storage used by the poller and the protection cycle.
#[async_trait]
pub trait SnapshotStore: Send + Sync {
    /// Store positions captured at `captured_at`. An empty slice writes nothing.
    async fn save_positions(
        &self,
        captured_at: DateTime<Utc>,
        positions: &[Position],
    ) -> Result<(), StoreError>;

    /// Positions sharing the most recent capture time, if any were ever stored.
    async fn latest_position_snapshot(&self) -> Result<Option<PositionSnapshot>, StoreError>;

    /// Store balances captured at `captured_at`. An empty slice writes nothing.
    async fn save_balances(
        &self,
        captured_at: DateTime<Utc>,
        balances: &[AccountBalance],
    ) -> Result<(), StoreError>;

    /// Balances sharing the most recent capture time.
    async fn latest_balances(&self) -> Result<Option<BalanceSnapshot>, StoreError>;

    /// Check that the backend is reachable.
    async fn health_check(&self) -> Result<(), StoreError>;
}

/// Text form of a capture time: RFC 3339, UTC, millisecond precision.
pub fn format_captured_at(captured_at: DateTime<Utc>) -> String {
    captured_at.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_format_captured_at() {
        let ts = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        assert_eq!(format_captured_at(ts), "2024-05-01T12:00:00.000Z");
    }
}
