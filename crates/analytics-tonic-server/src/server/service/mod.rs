//! tonic handlers for `AnalyticsService/AggregateOrders`.
//!
//! Both variants answer the same RPC with the same aggregation; they differ
//! only in where the call is executed.
//!
//! ## Structure
//!
//! - [`handler`] - Callback variant ([`InlineAnalyticsService`]): the tonic
//!   runtime runs the aggregation inside the handler future.
//! - [`queued`] - Completion-queue variant ([`QueuedAnalyticsService`]): the
//!   handler hands the call to a dispatch thread and awaits its reply.

pub mod handler;
pub mod queued;

pub use handler::InlineAnalyticsService;
pub use queued::QueuedAnalyticsService;
