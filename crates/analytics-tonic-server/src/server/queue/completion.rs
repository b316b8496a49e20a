//! Completion queue: the event source each dispatch thread polls.
//!
//! The queue sits between the tonic transport and one dispatch thread. The
//! transport hands it new calls ([`CompletionQueue::deliver`]); the dispatch
//! thread registers acceptors ([`CompletionQueue::request_call`]) and reports
//! finished replies ([`CompletionQueue::post`]). Whenever an operation becomes
//! ready, an [`Event`] carrying the operation's [`Tag`] is queued and one
//! blocked [`CompletionQueue::next`] caller is woken.
//!
//! Calls that arrive while no acceptor is registered are kept in a backlog and
//! bound as soon as the next acceptor is registered, so no call is dropped for
//! lack of a waiting slot.

use crate::server::call::arena::Tag;
use analytics_tonic_core::proto::{AggregateResult, AnalyticsRequest};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use tokio::sync::oneshot;
use tonic::metadata::MetadataMap;

/// Reply channel back to the tonic handler that owns the client stream.
pub type ReplyReceiver = oneshot::Receiver<AggregateResult>;

/// Transport-side handle through which the reply of one call is sent.
#[derive(Debug)]
pub struct Responder {
    tx: oneshot::Sender<AggregateResult>,
}

impl Responder {
    /// Creates a responder and the receiver the transport awaits.
    pub fn channel() -> (Self, ReplyReceiver) {
        let (tx, rx) = oneshot::channel();
        (Self { tx }, rx)
    }

    /// Hands the final reply to the transport.
    ///
    /// Returns `false` if the transport side is gone (client cancelled or the
    /// connection closed), in which case the reply is discarded.
    pub fn finish(self, reply: AggregateResult) -> bool {
        self.tx.send(reply).is_ok()
    }

    /// Returns `true` once the transport side has stopped waiting.
    #[cfg(test)]
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// A call accepted by the transport but not yet processed.
#[derive(Debug)]
pub struct IncomingCall {
    pub metadata: MetadataMap,
    pub request: AnalyticsRequest,
    pub responder: Responder,
}

/// A ready notification for one tag.
///
/// `call` is set when the event reports a new call bound to an acceptor.
/// `ok == false` means the operation could not complete (queue shutdown or a
/// vanished peer); the owner of the tag must not issue further operations.
#[derive(Debug)]
pub struct Event {
    pub tag: Tag,
    pub ok: bool,
    pub call: Option<IncomingCall>,
}

impl Event {
    fn accepted(tag: Tag, call: IncomingCall) -> Self {
        Self {
            tag,
            ok: true,
            call: Some(call),
        }
    }

    fn completed(tag: Tag, ok: bool) -> Self {
        Self { tag, ok, call: None }
    }
}

#[derive(Default)]
struct QueueState {
    events: VecDeque<Event>,
    acceptors: VecDeque<Tag>,
    backlog: VecDeque<IncomingCall>,
    shutdown: bool,
}

/// Blocking multi-producer event queue polled by exactly one dispatch thread.
pub struct CompletionQueue {
    id: usize,
    state: Mutex<QueueState>,
    ready: Condvar,
}

impl CompletionQueue {
    pub fn new(id: usize) -> Self {
        Self {
            id,
            state: Mutex::new(QueueState::default()),
            ready: Condvar::new(),
        }
    }

    pub const fn id(&self) -> usize {
        self.id
    }

    /// Registers `tag` as the acceptor for the next incoming call.
    ///
    /// A backlogged call is bound immediately. After shutdown the tag is
    /// completed with `ok == false` so its owner can release it.
    pub fn request_call(&self, tag: Tag) {
        let mut state = self.state.lock();
        if state.shutdown {
            state.events.push_back(Event::completed(tag, false));
        } else if let Some(call) = state.backlog.pop_front() {
            state.events.push_back(Event::accepted(tag, call));
        } else {
            state.acceptors.push_back(tag);
            return;
        }
        drop(state);
        self.ready.notify_one();
    }

    /// Binds a call arriving from the transport to a waiting acceptor.
    ///
    /// Without a waiting acceptor the call is backlogged. Once the queue has
    /// shut down the call is handed back to the caller.
    pub fn deliver(&self, call: IncomingCall) -> Result<(), IncomingCall> {
        let mut state = self.state.lock();
        if state.shutdown {
            return Err(call);
        }
        match state.acceptors.pop_front() {
            Some(tag) => state.events.push_back(Event::accepted(tag, call)),
            None => {
                state.backlog.push_back(call);
                return Ok(());
            }
        }
        drop(state);
        self.ready.notify_one();
        Ok(())
    }

    /// Reports completion of an operation already started under `tag`.
    ///
    /// Completions are accepted after shutdown: the operation was issued
    /// before the queue started draining and its owner is waiting for it.
    pub fn post(&self, tag: Tag, ok: bool) {
        self.state.lock().events.push_back(Event::completed(tag, ok));
        self.ready.notify_one();
    }

    /// Blocks until an event is ready.
    ///
    /// Returns `None` once the queue has been shut down and every pending
    /// event has been handed out; the caller must stop polling.
    pub fn next(&self) -> Option<Event> {
        let mut state = self.state.lock();
        loop {
            if let Some(event) = state.events.pop_front() {
                return Some(event);
            }
            if state.shutdown {
                return None;
            }
            self.ready.wait(&mut state);
        }
    }

    /// Shuts the queue down. Idempotent.
    ///
    /// Waiting acceptors are completed with `ok == false`, backlogged calls
    /// are dropped (their clients observe a closed reply channel), and every
    /// blocked [`CompletionQueue::next`] is woken.
    pub fn shutdown(&self) {
        let mut state = self.state.lock();
        if state.shutdown {
            return;
        }
        state.shutdown = true;

        while let Some(tag) = state.acceptors.pop_front() {
            state.events.push_back(Event::completed(tag, false));
        }
        let backlog = core::mem::take(&mut state.backlog);
        drop(state);

        #[cfg(feature = "tracing")]
        if !backlog.is_empty() {
            tracing::warn!(
                "Queue {} dropped {} unmatched calls on shutdown",
                self.id,
                backlog.len()
            );
        }
        drop(backlog);

        self.ready.notify_all();
    }

    pub fn is_shutdown(&self) -> bool {
        self.state.lock().shutdown
    }

    /// Number of calls waiting for an acceptor.
    #[cfg(test)]
    pub fn backlog_len(&self) -> usize {
        self.state.lock().backlog.len()
    }

    /// Number of registered acceptors not yet bound to a call.
    #[cfg(test)]
    pub fn waiting_acceptors(&self) -> usize {
        self.state.lock().acceptors.len()
    }
}
