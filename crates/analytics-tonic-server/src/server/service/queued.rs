//! Transport glue for the completion-queue variant.
//!
//! The tonic handler does no aggregation itself. It splits the request into
//! metadata and message, wraps them with a fresh [`Responder`] into an
//! [`IncomingCall`], routes the call to a completion queue, and awaits the
//! reply the queue's dispatch thread sends back. Everything between routing
//! and the reply is driven by the call's state machine on that thread.

use crate::server::{
    pool::CallRouter,
    queue::{IncomingCall, Responder},
    telemetry::{
        decrement_calls_inflight, increment_call_errors, increment_calls_inflight,
        increment_requests, record_call_duration, record_orders_per_request,
    },
};
use analytics_tonic_core::{
    Error,
    proto::{AggregateResult, AnalyticsRequest, analytics_service_server::AnalyticsService},
};
use std::{sync::Arc, time::Instant};
use tonic::{Request, Response, Status};

/// Completion-queue variant of the analytics service.
///
/// Cloning is cheap; every clone routes through the same [`CallRouter`].
#[derive(Clone)]
pub struct QueuedAnalyticsService {
    router: Arc<CallRouter>,
}

impl QueuedAnalyticsService {
    pub fn new(router: CallRouter) -> Self {
        Self {
            router: Arc::new(router),
        }
    }

    async fn dispatch(&self, req: Request<AnalyticsRequest>) -> Result<AggregateResult, Error> {
        let (metadata, _extensions, request) = req.into_parts();
        record_orders_per_request(request.orders.len() as f64);

        let (responder, reply) = Responder::channel();
        self.router.route(IncomingCall {
            metadata,
            request,
            responder,
        })?;

        match reply.await {
            Ok(reply) => Ok(reply),
            // The responder was dropped unanswered: either the queue shut
            // down with the call still in its backlog, or the dispatch
            // thread died.
            Err(_) if self.router.is_shutdown() => Err(Error::ServiceShutdown),
            Err(_) => Err(Error::CallAbandoned),
        }
    }
}

#[tonic::async_trait]
impl AnalyticsService for QueuedAnalyticsService {
    /// Routes the call to a completion queue and waits for its reply.
    ///
    /// Calls arriving after the queues shut down, and calls dropped from a
    /// queue's backlog at shutdown, fail with `UNAVAILABLE`.
    #[cfg_attr(
        feature = "tracing",
        tracing::instrument(skip_all, fields(orders = req.get_ref().orders.len()))
    )]
    async fn aggregate_orders(
        &self,
        req: Request<AnalyticsRequest>,
    ) -> Result<Response<AggregateResult>, Status> {
        let start = Instant::now();
        increment_requests();
        increment_calls_inflight();

        let result = self.dispatch(req).await;

        decrement_calls_inflight();
        match result {
            Ok(reply) => {
                record_call_duration(start.elapsed().as_secs_f64() * 1000.0);
                Ok(Response::new(reply))
            }
            Err(e) => {
                increment_call_errors();
                #[cfg(feature = "tracing")]
                tracing::debug!("AggregateOrders failed: {e}");
                Err(e.into())
            }
        }
    }
}
