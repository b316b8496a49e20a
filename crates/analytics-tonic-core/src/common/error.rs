//! Error types for the order analytics service.
//!
//! This module defines the central `Error` enum shared by both server
//! variants. It implements `From<Error>` for `tonic::Status` so that failures
//! inside the call pipeline surface to clients with an appropriate status code.
//!
//! ## Error Cases
//! - `ServiceShutdown`: A call arrived after the completion queues shut down.
//! - `CallAbandoned`: The call was dropped before a reply was produced (queue
//!   teardown or transport failure).
//! - `ChannelError`: An internal communication failure between the transport
//!   and a dispatch thread.
//! - `InvalidConfig`: Startup configuration was rejected.
//! - `Bind`: The listening address could not be bound.

use tonic::Status;

pub type Result<T> = core::result::Result<T, Error>;

/// Unified error type for the analytics service.
#[derive(Clone, thiserror::Error, Debug)]
pub enum Error {
    /// The completion queues no longer accept calls.
    #[error("Service is shutting down")]
    ServiceShutdown,

    /// The call was dropped before its reply was written.
    #[error("Call abandoned before completion")]
    CallAbandoned,

    /// Internal channel or thread failure.
    #[error("Channel error: {context}")]
    ChannelError { context: String },

    /// Startup configuration was invalid.
    #[error("Invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    /// The listener could not be bound.
    #[error("Failed to bind {addr}: {reason}")]
    Bind { addr: String, reason: String },
}

impl From<Error> for Status {
    fn from(err: Error) -> Self {
        match err {
            Error::ServiceShutdown => Status::unavailable("Service is shutting down"),
            Error::CallAbandoned => Status::aborted("Call abandoned before completion"),
            Error::ChannelError { context } => {
                Status::internal(format!("Channel error: {}", context))
            }
            Error::InvalidConfig { reason } => Status::invalid_argument(reason),
            Error::Bind { addr, reason } => {
                Status::internal(format!("Failed to bind {}: {}", addr, reason))
            }
        }
    }
}
