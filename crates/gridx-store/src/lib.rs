//! gridx-store
//!
//! Durable persistence for the coordination plane, backed by sled
//! (pure-Rust, no C dependencies).
//!
//! The store exclusively owns the canonical record of every entity. In-memory
//! views (capability index, P2P peer table) are rebuilt from it on restart.

pub mod store;

pub use store::Store;
