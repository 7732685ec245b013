//! PostgreSQL snapshot store.
//!
//! This module uses dynamic queries (sqlx::query) instead of compile-time
//! checked macros (sqlx::query!) to allow compilation without DATABASE_URL.
//!
//! Rows written by one `save_*` call share a `captured_at` value and are
//! inserted in a single transaction, so a reader sees either the whole
//! snapshot or none of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info};

use tenyo_domain::{
    AccountBalance, InstrumentId, MarginMode, Position, PositionSide, PositionSnapshot,
};

use crate::error::StoreError;
use crate::repository::{format_captured_at, BalanceSnapshot, SnapshotStore};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS position_snapshots (
    id              BIGSERIAL PRIMARY KEY,
    captured_at     TIMESTAMPTZ NOT NULL,
    inst_id         TEXT NOT NULL,
    pos_side        TEXT NOT NULL,
    size            NUMERIC NOT NULL,
    entry_price     NUMERIC NOT NULL,
    margin_mode     TEXT,
    leverage        NUMERIC NOT NULL DEFAULT 0,
    unrealized_pnl  NUMERIC NOT NULL DEFAULT 0,
    margin          NUMERIC NOT NULL DEFAULT 0
);
CREATE INDEX IF NOT EXISTS idx_position_snapshots_captured_at
    ON position_snapshots (captured_at DESC);

CREATE TABLE IF NOT EXISTS balance_snapshots (
    id              BIGSERIAL PRIMARY KEY,
    captured_at     TIMESTAMPTZ NOT NULL,
    currency        TEXT NOT NULL,
    balance         NUMERIC NOT NULL,
    available       NUMERIC NOT NULL,
    frozen          NUMERIC NOT NULL,
    usd_value       NUMERIC NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_balance_snapshots_captured_at
    ON balance_snapshots (captured_at DESC);
"#;

/// PostgreSQL adapter for the snapshot tables.
pub struct PgSnapshotStore {
    /// PostgreSQL connection pool
    pool: Arc<PgPool>,
}

impl PgSnapshotStore {
    /// Create a new store over an existing pool.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Connect to `database_url`.
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| StoreError::Connection(e.to_string()))?;
        Ok(Self::new(Arc::new(pool)))
    }

    /// Create the snapshot tables if they do not exist. Idempotent.
    pub async fn init_schema(&self) -> Result<(), StoreError> {
        sqlx::raw_sql(SCHEMA).execute(self.pool.as_ref()).await?;
        info!("Snapshot schema ready");
        Ok(())
    }
}

fn parse_position_row(row: &PgRow) -> Result<Position, StoreError> {
    let inst_id: String = row.try_get("inst_id")?;
    let pos_side: String = row.try_get("pos_side")?;
    let margin_mode: Option<String> = row.try_get("margin_mode")?;

    Ok(Position {
        instrument: InstrumentId::new(inst_id)?,
        side: PositionSide::from_str(&pos_side)?,
        size: row.try_get("size")?,
        entry_price: row.try_get("entry_price")?,
        margin_mode: margin_mode.as_deref().map(MarginMode::from_str).transpose()?,
        leverage: row.try_get("leverage")?,
        unrealized_pnl: row.try_get("unrealized_pnl")?,
        margin: row.try_get("margin")?,
    })
}

fn parse_balance_row(row: &PgRow) -> Result<AccountBalance, StoreError> {
    Ok(AccountBalance {
        currency: row.try_get("currency")?,
        balance: row.try_get::<Decimal, _>("balance")?,
        available: row.try_get("available")?,
        frozen: row.try_get("frozen")?,
        usd_value: row.try_get("usd_value")?,
    })
}

#[async_trait]
impl SnapshotStore for PgSnapshotStore {
    async fn save_positions(
        &self,
        captured_at: DateTime<Utc>,
        positions: &[Position],
    ) -> Result<(), StoreError> {
        if positions.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await?;
        for position in positions {
            sqlx::query(
                r#"
                INSERT INTO position_snapshots (
                    captured_at, inst_id, pos_side, size, entry_price,
                    margin_mode, leverage, unrealized_pnl, margin
                ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(captured_at)
            .bind(position.instrument.as_str())
            .bind(position.side.as_str())
            .bind(position.size)
            .bind(position.entry_price)
            .bind(position.margin_mode.map(|m| m.as_str()))
            .bind(position.leverage)
            .bind(position.unrealized_pnl)
            .bind(position.margin)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = positions.len(), captured_at = %captured_at, "Position snapshot stored");
        Ok(())
    }

    async fn latest_position_snapshot(&self) -> Result<Option<PositionSnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT captured_at, inst_id, pos_side, size, entry_price,
                   margin_mode, leverage, unrealized_pnl, margin
            FROM position_snapshots
            WHERE captured_at = (SELECT MAX(captured_at) FROM position_snapshots)
            ORDER BY id
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let captured_at: DateTime<Utc> = first.try_get("captured_at")?;

        let positions = rows
            .iter()
            .map(parse_position_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(PositionSnapshot {
            captured_at: format_captured_at(captured_at),
            positions,
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

        let mut tx = self.pool.begin().await?;
        for balance in balances {
            sqlx::query(
                r#"
                INSERT INTO balance_snapshots (
                    captured_at, currency, balance, available, frozen, usd_value
                ) VALUES ($1, $2, $3, $4, $5, $6)
                "#,
            )
            .bind(captured_at)
            .bind(&balance.currency)
            .bind(balance.balance)
            .bind(balance.available)
            .bind(balance.frozen)
            .bind(balance.usd_value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;

        debug!(count = balances.len(), captured_at = %captured_at, "Balance snapshot stored");
        Ok(())
    }

    async fn latest_balances(&self) -> Result<Option<BalanceSnapshot>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT captured_at, currency, balance, available, frozen, usd_value
            FROM balance_snapshots
            WHERE captured_at = (SELECT MAX(captured_at) FROM balance_snapshots)
            ORDER BY id
            "#,
        )
        .fetch_all(self.pool.as_ref())
        .await?;

        let Some(first) = rows.first() else {
            return Ok(None);
        };
        let captured_at: DateTime<Utc> = first.try_get("captured_at")?;

        let balances = rows
            .iter()
            .map(parse_balance_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(BalanceSnapshot {
            captured_at: format_captured_at(captured_at),
            balances,
        }))
    }

    async fn health_check(&self) -> Result<(), StoreError> {
        let result: i32 = sqlx::query_scalar("SELECT 1").fetch_one(self.pool.as_ref()).await?;
        if result != 1 {
            return Err(StoreError::Connection("Database connectivity check failed".to_string()));
        }
        Ok(())
    }
}
