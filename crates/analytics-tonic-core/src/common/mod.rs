//! Shared protocol, aggregation and error definitions.
//!
//! ## Submodules
//!
//! - [`aggregate`] - Order aggregation used by every server variant.
//! - [`error`] - Centralized service error type.
//! - [`types`] - Header names and service constants.
//! - [`proto`] - Generated protobuf messages and gRPC service bindings.

pub mod aggregate;
pub mod error;
pub mod types;

pub use error::{Error, Result};

/// gRPC service and message definitions generated from
/// `proto/analytics.proto`.
///
/// ## Service
///
/// - `AnalyticsService/AggregateOrders` - unary call taking an
///   [`AnalyticsRequest`] and answering with an [`AggregateResult`].
///
/// [`AnalyticsRequest`]: crate::proto::AnalyticsRequest
/// [`AggregateResult`]: crate::proto::AggregateResult
pub mod proto {
    tonic::include_proto!("_");
    pub const FILE_DESCRIPTOR_SET: &[u8] =
        tonic::include_file_descriptor_set!("analytics_descriptor");
}
