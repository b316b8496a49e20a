//! # Shared Constants
//!
//! Names that client and server must agree on outside of the protobuf schema.

/// Request metadata key whose value is echoed back in
/// `AggregateResult::echoed_client_id`.
///
/// gRPC metadata keys are lowercase on the wire; lookups through
/// [`tonic::metadata::MetadataMap`] are case-insensitive.
pub const CLIENT_ID_HEADER: &str = "x-client-id";

/// Fully-qualified gRPC service name, as reported to the health service.
pub const SERVICE_NAME: &str = "AnalyticsService";

/// Default listening port when `PORT` is not set.
pub const DEFAULT_PORT: u16 = 8080;
