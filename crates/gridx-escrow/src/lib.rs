//! gridx-escrow
//!
//! The escrow contract state machine and settlement accounting.
//!
//! Transitions are serialized per contract through the store's transactional
//! combinators: concurrent `complete` and `dispute` race cleanly — whichever
//! commits first wins and the loser gets a conflict. Fund movement on chain
//! happens elsewhere; callers pass in the resulting `tx_hash`, which keeps
//! this crate deterministic and unit-testable without a live daemon.

pub mod service;

pub use service::{EscrowService, EscrowStats};
