//! gridx-p2p
//!
//! UDP presence protocol for node discovery and health gossip.
//!
//! Every node broadcasts a `hello` on a fixed interval and listens for its
//! peers' datagrams. Delivery is unordered and lossy by design; the network
//! view converges through repeated broadcasts. Message-id history drops
//! looped duplicates, and peers silent past the expiry window are evicted
//! from the in-memory view (the registry applies its own, longer, offline
//! policy).

pub mod config;
pub mod message;
pub mod peers;
pub mod protocol;

pub use config::P2pConfig;
pub use message::{HelloPayload, MessageType, PresenceMessage};
pub use peers::{NetworkStats, PeerInfo, PeerTable};
pub use protocol::PresenceProtocol;
