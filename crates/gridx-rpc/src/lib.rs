//! gridx-rpc
//!
//! JSON-RPC 2.0 surface over the coordination core: registry, task, and
//! escrow operations for presentation layers and node workers. A thin
//! wrapper — every method validates inputs, calls one core service, and
//! converts records to wire DTOs.

pub mod api;
pub mod server;
pub mod types;

pub use api::GridxApiServer;
pub use server::{RpcServer, RpcServerState};
pub use types::*;
