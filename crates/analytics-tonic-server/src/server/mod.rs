//! Server internals for the `analytics-tonic-server` binary.
//!
//! ## Structure
//!
//! - [`config`] - Command-line and environment configuration.
//! - [`telemetry`] - Logging, tracing and metrics setup.
//! - [`service`] - tonic handlers for both service variants.
//! - [`serve`] - Server assembly and shutdown ordering.
//! - [`queue`] - Completion queues between tonic and the dispatch threads.
//! - [`call`] - Per-call state machines and their arena.
//! - [`pool`] - Dispatch threads and the queue server that owns them.

pub mod call;
pub mod config;
pub mod pool;
pub mod queue;
pub mod serve;
pub mod service;
pub mod telemetry;
#[cfg(test)]
mod tests;
