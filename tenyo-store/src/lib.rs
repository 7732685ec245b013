//! Tenyo Snapshot Store
//!
//! Persists what the account poller observes so the protection cycle can
//! read it back later.
//!
//! # Architecture
//!
//! - **`SnapshotStore` trait**: the storage port
//! - **In-memory store**: default, also used in tests
//! - **PostgreSQL store**: production implementation (feature `postgres`)
//!
//! # Usage
//!
//! ```rust
//! use chrono::Utc;
//! use rust_decimal_macros::dec;
//! use tenyo_domain::{InstrumentId, Position, PositionSide};
//! use tenyo_store::{MemoryStore, SnapshotStore};
//!
//! #[tokio::main]
//! async fn main() {
//!     let store = MemoryStore::new();
//!     let position = Position::new(
//!         InstrumentId::new("BTC-USDT-SWAP").unwrap(),
//!         PositionSide::Long,
//!         dec!(1),
//!         dec!(64000),
//!     );
//!     store.save_positions(Utc::now(), &[position]).await.unwrap();
//!
//!     let snapshot = store.latest_position_snapshot().await.unwrap();
//!     println!("Positions: {}", snapshot.map(|s| s.positions.len()).unwrap_or(0));
//! }
//! ```

#![warn(clippy::all)]

mod error;
mod memory;
#[cfg(feature = "postgres")]
mod postgres;
mod repository;

pub use error::StoreError;
pub use memory::MemoryStore;
#[cfg(feature = "postgres")]
pub use postgres::PgSnapshotStore;
pub use repository::{format_captured_at, BalanceSnapshot, SnapshotStore};
