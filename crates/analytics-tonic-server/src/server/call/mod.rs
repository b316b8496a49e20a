//! Per-call state machines and the arena that owns them.
//!
//! - [`arena`] - Generational slab; slot index plus generation is the
//!   completion-queue [`Tag`](arena::Tag).
//! - [`context`] - The CREATE → PROCESSING → FINISHED state machine.

pub mod arena;
pub mod context;

pub use arena::{CallArena, Tag};
pub use context::{Acceptors, CallContext, CallState, Step};
