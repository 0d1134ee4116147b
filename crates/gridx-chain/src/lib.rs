//! gridx-chain
//!
//! Uniform adapters over external chain daemons, one per currency.
//!
//! An adapter either speaks JSON-RPC to a real daemon or returns
//! deterministic stub values for development.
//! The escrow state machine never touches this crate directly: callers obtain
//! a `tx_hash` here first and hand it to the state machine afterwards.

pub mod adapter;
pub mod backoff;
pub mod registry;

pub use adapter::{ChainAdapter, JsonRpcAdapter, StubAdapter, TxRecord};
pub use backoff::retry_with_backoff;
pub use registry::AdapterRegistry;
