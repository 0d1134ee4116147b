//! ─── GridX Protocol Constants ───────────────────────────────────────────────
//!
//! Defaults for the coordination plane. Anything here that also appears in
//! `GridxConfig` is a default only; the config value wins at runtime.

use crate::types::Timestamp;

// ── Reputation ───────────────────────────────────────────────────────────────

/// Reputation scores are clamped to [floor, ceiling] after every event.
pub const REPUTATION_FLOOR: f64 = 0.0;
pub const REPUTATION_CEILING: f64 = 100.0;

// ── Settlement ───────────────────────────────────────────────────────────────

/// Community fund share of every completed escrow, in basis points.
pub const DEFAULT_COMMUNITY_SHARE_BP: u32 = 500; // 5%

pub const BASIS_POINT_DENOM: u128 = 10_000;

/// Destination label for the community share of settlements.
pub const DEFAULT_COMMUNITY_FUND_DESTINATION: &str = "community_fund";

// ── P2P presence ─────────────────────────────────────────────────────────────

pub const DEFAULT_P2P_LISTEN_PORT: u16 = 9334;
pub const DEFAULT_P2P_BROADCAST_PORT: u16 = 9335;

/// How often a node announces itself with a `hello`.
pub const PRESENCE_INTERVAL_SECS: u64 = 30;

/// Peers silent for longer than this are evicted from the P2P view.
/// (The registry keeps them; it has its own, much longer, offline policy.)
pub const PEER_EXPIRY_SECS: i64 = 300;

/// Message-id history and peer-expiry sweep cadence.
pub const P2P_CLEANUP_INTERVAL_SECS: u64 = 60;

/// Maximum UDP datagram accepted or produced.
pub const MAX_DATAGRAM_BYTES: usize = 4096;

/// UDP recv poll timeout; bounds shutdown latency of the listener.
pub const UDP_POLL_TIMEOUT_SECS: u64 = 1;

// ── Registry liveness ────────────────────────────────────────────────────────

/// A node with no heartbeat for this long is marked offline.
pub const OFFLINE_THRESHOLD_SECS: Timestamp = 3_600;

/// Cadence of the background liveness reconciler.
pub const LIVENESS_SWEEP_SECS: u64 = 300;

// ── Scheduler ────────────────────────────────────────────────────────────────

/// Cadence of the watchdog sweep over running tasks.
pub const WATCHDOG_PERIOD_SECS: u64 = 10;

/// Slack added to `max_execution_time` before the watchdog declares timeout.
pub const WATCHDOG_GRACE_SECS: i64 = 5;

// ── Sandbox ──────────────────────────────────────────────────────────────────

pub const DEFAULT_SANDBOX_CPU_CORES: u32 = 1;
pub const DEFAULT_SANDBOX_MEMORY_MIB: u64 = 512;

// ── Chain adapters ───────────────────────────────────────────────────────────

/// Timeout for a single chain-daemon RPC call.
pub const CHAIN_RPC_TIMEOUT_SECS: u64 = 10;

/// Exponential backoff for chain-RPC retries: base 1 s, doubling, cap 300 s.
pub const BACKOFF_BASE_SECS: u64 = 1;
pub const BACKOFF_CAP_SECS: u64 = 300;
pub const BACKOFF_MAX_RETRIES: u32 = 5;

// ── Capabilities ─────────────────────────────────────────────────────────────

/// The standard capability vocabulary. Tags outside this list are accepted as
/// custom capabilities.
pub const STANDARD_CAPABILITIES: [&str; 12] = [
    "compute",
    "storage",
    "gpu",
    "network",
    "security",
    "ai_ml",
    "blockchain",
    "database",
    "web_server",
    "file_sharing",
    "media_processing",
    "scientific_computing",
];
