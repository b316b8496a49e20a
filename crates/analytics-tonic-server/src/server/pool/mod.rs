//! Dispatch threads and the server that owns them.
//!
//! - [`manager`] - [`QueueServer`](manager::QueueServer) lifecycle and the
//!   round-robin [`CallRouter`](manager::CallRouter).
//! - [`worker`] - The per-queue dispatch loop.
//! - [`stats`] - Per-queue creation/destruction and acceptor counters.

pub mod manager;
pub mod stats;
pub mod worker;

pub use manager::{CallRouter, QueueServer, ServerState};
pub use stats::QueueStats;
pub use worker::{LoopReport, dispatch_loop};
