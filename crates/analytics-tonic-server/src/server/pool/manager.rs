//! Completion-queue server: one queue and one dispatch thread per core.
//!
//! [`QueueServer`] owns the queues and the dispatch threads and moves through
//! `Stopped → Running → Stopped`. [`CallRouter`] is the transport-facing half:
//! it spreads incoming calls over the queues in round-robin order.
//!
//! Shutdown ordering is the caller's listener first, then
//! [`QueueServer::stop`], which shuts every queue down before joining the
//! threads so each loop observes the end of its queue and exits.

use crate::server::{
    pool::{
        stats::QueueStats,
        worker::{LoopReport, dispatch_loop},
    },
    queue::{CompletionQueue, IncomingCall},
};
use analytics_tonic_core::Error;
use core::time::Duration;
use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    thread::{self, JoinHandle},
    time::Instant,
};

/// Lifecycle of a [`QueueServer`].
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ServerState {
    Stopped,
    Running,
}

/// Transport-side entry point distributing calls across completion queues.
pub struct CallRouter {
    queues: Vec<Arc<CompletionQueue>>,
    next_queue: AtomicUsize,
}

impl CallRouter {
    const fn new(queues: Vec<Arc<CompletionQueue>>) -> Self {
        Self {
            queues,
            next_queue: AtomicUsize::new(0),
        }
    }

    /// Returns the index of the next queue to receive a call (round-robin).
    pub fn next_queue_index(&self) -> usize {
        self.next_queue.fetch_add(1, Ordering::Relaxed) % self.queues.len()
    }

    /// Hands `call` to the next queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ServiceShutdown`] once the queues have shut down. The
    /// call (and with it its responder) is dropped.
    pub fn route(&self, call: IncomingCall) -> Result<(), Error> {
        let queue = &self.queues[self.next_queue_index()];
        queue.deliver(call).map_err(|_call| Error::ServiceShutdown)
    }

    #[cfg(test)]
    pub fn num_queues(&self) -> usize {
        self.queues.len()
    }

    /// Returns `true` once the queues no longer accept calls.
    pub fn is_shutdown(&self) -> bool {
        self.queues.iter().any(|queue| queue.is_shutdown())
    }
}

/// Owns the completion queues, their statistics, and the dispatch threads.
pub struct QueueServer {
    num_queues: usize,
    drain_timeout: Duration,
    queues: Vec<Arc<CompletionQueue>>,
    stats: Vec<Arc<QueueStats>>,
    loops: Vec<JoinHandle<LoopReport>>,
    state: ServerState,
}

impl QueueServer {
    /// Creates a stopped server that will run `num_queues` queues (at least
    /// one).
    pub fn new(num_queues: usize, drain_timeout: Duration) -> Self {
        Self {
            num_queues: num_queues.max(1),
            drain_timeout,
            queues: Vec::new(),
            stats: Vec::new(),
            loops: Vec::new(),
            state: ServerState::Stopped,
        }
    }

    #[cfg(test)]
    pub const fn state(&self) -> ServerState {
        self.state
    }

    #[cfg(test)]
    pub const fn num_queues(&self) -> usize {
        self.num_queues
    }

    /// Per-queue statistics of the current or most recent run.
    #[cfg(test)]
    pub fn stats(&self) -> &[Arc<QueueStats>] {
        &self.stats
    }

    /// Allocates the queues and starts one dispatch thread per queue.
    ///
    /// Every thread seeds its queue with an acceptor before polling, so calls
    /// routed before a thread is scheduled wait in the queue's backlog.
    ///
    /// # Errors
    ///
    /// Fails if the server is already running or a thread cannot be spawned;
    /// in the latter case the threads already started are stopped again.
    pub fn start(&mut self) -> Result<CallRouter, Error> {
        if self.state == ServerState::Running {
            return Err(Error::InvalidConfig {
                reason: "queue server is already running".to_string(),
            });
        }

        self.queues = (0..self.num_queues)
            .map(|id| Arc::new(CompletionQueue::new(id)))
            .collect();
        self.stats = (0..self.num_queues)
            .map(|_| Arc::new(QueueStats::new()))
            .collect();
        self.state = ServerState::Running;

        for id in 0..self.num_queues {
            let queue = Arc::clone(&self.queues[id]);
            let stats = Arc::clone(&self.stats[id]);
            let spawned = thread::Builder::new()
                .name(format!("analytics-cq-{id}"))
                .spawn(move || dispatch_loop(queue, stats));

            match spawned {
                Ok(handle) => self.loops.push(handle),
                Err(e) => {
                    self.stop_logged("rolling back a failed start");
                    return Err(Error::ChannelError {
                        context: format!("failed to spawn dispatch thread {id}: {e}"),
                    });
                }
            }
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Started {} completion queues", self.num_queues);

        Ok(CallRouter::new(self.queues.clone()))
    }

    /// Shuts every queue down and joins every dispatch thread.
    ///
    /// Loops drain their queues before exiting: calls already bound to a
    /// context complete, waiting acceptors are cancelled. A loop still running
    /// after the drain timeout is reported and then joined regardless.
    ///
    /// Calling `stop` on a stopped server returns an empty report.
    ///
    /// # Errors
    ///
    /// Returns an error if a dispatch thread panicked.
    pub fn stop(&mut self) -> Result<Vec<LoopReport>, Error> {
        if self.state == ServerState::Stopped {
            return Ok(Vec::new());
        }

        #[cfg(feature = "tracing")]
        tracing::info!("Shutting down {} completion queues", self.queues.len());
        for queue in &self.queues {
            queue.shutdown();
        }

        let deadline = Instant::now() + self.drain_timeout;
        while Instant::now() < deadline && self.loops.iter().any(|h| !h.is_finished()) {
            thread::sleep(Duration::from_millis(10));
        }
        let _stalled = self.loops.iter().filter(|h| !h.is_finished()).count();
        if _stalled > 0 {
            #[cfg(feature = "tracing")]
            tracing::warn!(
                "{_stalled} dispatch loops still draining after {:?}; waiting for them",
                self.drain_timeout
            );
        }

        let mut reports = Vec::with_capacity(self.loops.len());
        let mut panicked = 0;
        for handle in self.loops.drain(..) {
            match handle.join() {
                Ok(report) => reports.push(report),
                Err(_) => panicked += 1,
            }
        }
        self.queues.clear();
        self.state = ServerState::Stopped;

        #[cfg(feature = "tracing")]
        tracing::info!(
            "Completion queues stopped ({} calls completed)",
            reports.iter().map(|r| r.calls_completed).sum::<u64>()
        );

        if panicked > 0 {
            return Err(Error::ChannelError {
                context: format!("{panicked} dispatch threads panicked"),
            });
        }
        Ok(reports)
    }

    /// Stops the server where no caller can take the error, logging it
    /// instead. Returns `true` if every dispatch thread was joined cleanly.
    fn stop_logged(&mut self, _during: &str) -> bool {
        match self.stop() {
            Ok(_) => true,
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Error stopping completion queues while {_during}: {_e}");
                false
            }
        }
    }
}

impl Drop for QueueServer {
    fn drop(&mut self) {
        if self.state == ServerState::Running {
            self.stop_logged("dropping the queue server");
        }
    }
}
