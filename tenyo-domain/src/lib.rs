//! Tenyo Domain Layer
//!
//! Pure domain types with zero I/O dependencies.
//! Contains positions, protective orders, snapshots and the value objects
//! they are built from. Every venue-reported category (side, margin mode,
//! order kind, order state) is a closed enum.

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod credentials;
pub mod entities;
pub mod value_objects;

// Re-export commonly used types
pub use credentials::{mask, OkxCredentials};
pub use entities::{
    AccountBalance, AlgoOrderKind, AlgoOrderState, Position, PositionSnapshot, ProtectiveOrder,
};
pub use value_objects::{
    Direction, DomainError, InstrumentId, MarginMode, OrderSide, PositionSide, Price, Quantity,
    TriggerPriceType,
};
