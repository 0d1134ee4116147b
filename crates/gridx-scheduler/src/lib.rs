//! gridx-scheduler
//!
//! Task lifecycle for the marketplace: submission, capability-matched
//! selection, CAS-guarded assignment and execution transitions, the watchdog
//! sweep over overdue work, and the completion cascade into escrow
//! settlement and reputation.
//!
//! Sandbox execution runs in child processes; the coordination plane itself
//! never does CPU-bound work.

pub mod sandbox;
pub mod scheduler;
pub mod worker;

pub use sandbox::{MockSandbox, ProcessSandbox, Sandbox, SandboxOutcome};
pub use scheduler::{TaskScheduler, TaskStats};
pub use worker::run_worker;
