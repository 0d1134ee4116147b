//! gridx-registry
//!
//! Node lifecycle for the marketplace: registration, heartbeats, liveness,
//! reputation, and capability lookup.
//!
//! The registry owns the only mutable node record (persisted through
//! gridx-store); the capability index is a derived in-memory view rebuilt on
//! open, and reputation application is a pure function over a lockable rule
//! table.

pub mod auth;
pub mod capability;
pub mod registry;
pub mod reputation;

pub use auth::{AuthData, AuthLevel, NodeAuthService};
pub use capability::{CapabilityIndex, CapabilityMatch, CapabilityStats, CapabilityValidation};
pub use registry::{NodeQuery, NodeRegistry, ReputationUpdate};
pub use reputation::ReputationEngine;
