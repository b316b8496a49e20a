//! Per-call state machine driven by completion-queue events.
//!
//! A [`CallContext`] starts life as the acceptor of its queue. When the queue
//! binds an incoming call to it, [`CallContext::advance`] arms a replacement
//! acceptor, aggregates the request, and hands the reply to the transport.
//! The transport's confirmation is the second and last event the context ever
//! sees; after it the dispatch loop releases the context's slot.
//!
//! ```text
//!   CREATE --(call bound, ok)--> PROCESSING --(reply taken, ok)--> FINISHED
//!      |                              |
//!      +-----------(ok == false)------+------> abandoned (slot released)
//! ```

use crate::server::{
    call::arena::{CallArena, Tag},
    pool::stats::QueueStats,
    queue::{CompletionQueue, Event, IncomingCall, Responder},
    telemetry::{increment_acceptors_armed, increment_orders_processed},
};
use analytics_tonic_core::{
    aggregate::{aggregate_into, client_id},
    proto::{AggregateResult, AnalyticsRequest},
};
use std::sync::Arc;
use tonic::metadata::MetadataMap;

/// Lifecycle position of a call. Transitions only move forward.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum CallState {
    Create,
    Processing,
    Finished,
}

/// What the dispatch loop must do with a context after advancing it.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Another event is expected; keep the context under its tag.
    Pending,
    /// The call completed; destroy the context.
    Finished,
    /// The transport gave up on the call; destroy the context without any
    /// further transport operation.
    Abandoned,
}

/// Arms new acceptors on the queue currently being dispatched.
pub struct Acceptors<'a> {
    arena: &'a mut CallArena<CallContext>,
    stats: &'a QueueStats,
}

impl<'a> Acceptors<'a> {
    pub fn new(arena: &'a mut CallArena<CallContext>, stats: &'a QueueStats) -> Self {
        Self { arena, stats }
    }

    /// Stores a fresh context in CREATE state and registers it with `queue`.
    pub fn arm(&mut self, queue: &Arc<CompletionQueue>) -> Tag {
        let tag = self.arena.insert(CallContext::new(Arc::clone(queue)));
        self.stats.acceptor_armed();
        increment_acceptors_armed(queue.id());
        queue.request_call(tag);
        tag
    }

    pub fn stats(&self) -> &QueueStats {
        self.stats
    }
}

/// Per-call record: lifecycle state, request and reply buffers, metadata,
/// and the responder bound to the call.
pub struct CallContext {
    state: CallState,
    queue: Arc<CompletionQueue>,
    metadata: MetadataMap,
    request: AnalyticsRequest,
    reply: AggregateResult,
    responder: Option<Responder>,
}

impl CallContext {
    /// Creates an unbound context in CREATE state for `queue`.
    pub fn new(queue: Arc<CompletionQueue>) -> Self {
        Self {
            state: CallState::Create,
            queue,
            metadata: MetadataMap::new(),
            request: AnalyticsRequest::default(),
            reply: AggregateResult::default(),
            responder: None,
        }
    }

    #[cfg(test)]
    pub const fn state(&self) -> CallState {
        self.state
    }

    /// Drives the state machine with the event delivered for its tag.
    pub fn advance(&mut self, event: Event, acceptors: &mut Acceptors<'_>) -> Step {
        let Event { tag, ok, call } = event;
        match self.state {
            CallState::Create => match call {
                Some(call) if ok => self.accept(tag, call, acceptors),
                _ => {
                    acceptors.stats().acceptor_cancelled();
                    Step::Abandoned
                }
            },
            CallState::Processing if ok => {
                self.state = CallState::Finished;
                Step::Finished
            }
            CallState::Processing => {
                #[cfg(feature = "tracing")]
                tracing::debug!("Call {:?} on queue {} lost its peer", tag, self.queue.id());
                Step::Abandoned
            }
            CallState::Finished => {
                #[cfg(feature = "tracing")]
                tracing::warn!("Event for finished call {:?} on queue {}", tag, self.queue.id());
                Step::Abandoned
            }
        }
    }

    fn accept(&mut self, tag: Tag, call: IncomingCall, acceptors: &mut Acceptors<'_>) -> Step {
        // The replacement must be waiting before this call does any work.
        acceptors.arm(&self.queue);
        acceptors.stats().acceptor_bound();

        let IncomingCall {
            metadata,
            request,
            responder,
        } = call;
        self.metadata = metadata;
        self.request = request;
        self.responder = Some(responder);

        if let Some(id) = client_id(&self.metadata) {
            self.reply.echoed_client_id = id;
        }
        aggregate_into(&self.request.orders, &mut self.reply);
        increment_orders_processed(self.reply.processed_orders.max(0) as u64);

        self.state = CallState::Processing;
        let delivered = self
            .responder
            .take()
            .is_some_and(|responder| responder.finish(core::mem::take(&mut self.reply)));
        self.queue.post(tag, delivered);
        Step::Pending
    }
}
