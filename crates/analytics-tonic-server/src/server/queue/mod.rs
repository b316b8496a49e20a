//! Completion queues connecting the tonic transport to dispatch threads.
//!
//! - [`completion`] - The blocking event queue, its [`Event`]s, and the
//!   [`Responder`] used to hand replies back to the transport.

pub mod completion;

pub use completion::{CompletionQueue, Event, IncomingCall, ReplyReceiver, Responder};
