use crate::server::{
    call::{Acceptors, CallArena, CallContext, Step},
    pool::stats::QueueStats,
    queue::CompletionQueue,
};
use std::sync::Arc;

/// Outcome of one dispatch loop, returned when its queue has drained.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoopReport {
    pub queue_id: usize,
    pub calls_completed: u64,
    pub calls_abandoned: u64,
    /// State machines created over the loop's lifetime, acceptors included.
    pub calls_created: u64,
    /// State machines destroyed over the loop's lifetime.
    pub calls_destroyed: u64,
    /// Lowest number of waiting acceptors seen right after a call was bound.
    /// `None` if the queue never received a call.
    pub min_acceptors: Option<usize>,
    /// Contexts still held by the arena when the loop exited.
    pub leaked: usize,
}

impl LoopReport {
    /// `true` if every state machine the loop created was destroyed and the
    /// queue never ran without a waiting acceptor.
    pub fn is_clean(&self) -> bool {
        self.leaked == 0
            && self.calls_created == self.calls_destroyed
            && self.min_acceptors.is_none_or(|n| n >= 1)
    }
}

/// Dispatch loop for one completion queue.
///
/// Runs on a dedicated OS thread for the lifetime of the server. The queue is
/// seeded with one acceptor before the first poll; afterwards every call
/// arms its own replacement, so one acceptor is always waiting.
///
/// Each ready event is resolved through the arena: the context is checked
/// out, advanced, and then either checked back in or destroyed. The loop
/// returns once [`CompletionQueue::next`] reports the queue shut down and
/// drained.
///
/// Contexts never leave this thread, so no synchronization is needed between
/// loops: each owns a disjoint queue and a disjoint arena.
pub fn dispatch_loop(queue: Arc<CompletionQueue>, stats: Arc<QueueStats>) -> LoopReport {
    let queue_id = queue.id();
    #[cfg(feature = "tracing")]
    tracing::debug!("Dispatch loop {queue_id} started");

    let mut arena = CallArena::with_capacity(64);
    Acceptors::new(&mut arena, &stats).arm(&queue);

    let mut calls_completed = 0;
    let mut calls_abandoned = 0;

    while let Some(event) = queue.next() {
        let tag = event.tag;
        let Some(mut call) = arena.checkout(tag) else {
            #[cfg(feature = "tracing")]
            tracing::warn!("Queue {queue_id} dropped event for stale {tag:?}");
            continue;
        };

        let step = call.advance(event, &mut Acceptors::new(&mut arena, &stats));
        match step {
            Step::Pending => {
                if arena.checkin(tag, call).is_err() {
                    #[cfg(feature = "tracing")]
                    tracing::error!("Queue {queue_id} lost the slot of {tag:?}");
                }
            }
            Step::Finished | Step::Abandoned => {
                drop::<CallContext>(call);
                arena.release(tag);
                let completed = step == Step::Finished;
                stats.call_destroyed(completed);
                if completed {
                    calls_completed += 1;
                } else {
                    calls_abandoned += 1;
                }
            }
        }
    }

    #[cfg(feature = "tracing")]
    if !arena.is_empty() {
        tracing::warn!(
            "Dispatch loop {queue_id} exited with {} live calls",
            arena.len()
        );
    }
    #[cfg(feature = "tracing")]
    tracing::debug!(
        "Dispatch loop {queue_id} stopped ({calls_completed} completed, {calls_abandoned} abandoned)"
    );

    LoopReport {
        queue_id,
        calls_completed,
        calls_abandoned,
        calls_created: stats.created(),
        calls_destroyed: stats.destroyed(),
        min_acceptors: stats.min_acceptors(),
        leaked: arena.len(),
    }
}
