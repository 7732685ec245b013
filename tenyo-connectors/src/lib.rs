//! Tenyo Exchange Connectors
//!
//! Adapters for the OKX v5 REST API.
//! Normalizes exchange-specific types to domain types.

#![warn(clippy::all)]

// Public modules
pub mod okx_rest;
pub mod okx_types;

// Re-exports
pub use okx_rest::{format_decimal, retry_delay, sign_request, OkxClientConfig, OkxRestClient, OkxRestError};
pub use okx_types::{
    OkxAlgoOrder, OkxAlgoOrderAck, OkxAlgoOrderRequest, OkxBalanceDetail, OkxPosition, OkxTicker,
};
