use crate::server::telemetry::{
    decrement_calls_inflight, increment_calls_inflight, increment_orders_processed,
    increment_requests, record_call_duration, record_orders_per_request,
};
use analytics_tonic_core::{
    aggregate::{aggregate, client_id},
    proto::{AggregateResult, AnalyticsRequest, analytics_service_server::AnalyticsService},
};
use std::time::Instant;
use tonic::{Request, Response, Status};

/// Callback variant of the analytics service.
///
/// tonic polls one handler future per call; the aggregation runs inside that
/// future and the reply is returned directly. There is no state to share, so
/// the service is a unit struct.
#[derive(Clone, Copy, Debug, Default)]
pub struct InlineAnalyticsService;

#[tonic::async_trait]
impl AnalyticsService for InlineAnalyticsService {
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

        let (metadata, _extensions, request) = req.into_parts();
        record_orders_per_request(request.orders.len() as f64);

        let mut reply = aggregate(&request.orders);
        if let Some(id) = client_id(&metadata) {
            reply.echoed_client_id = id;
        }
        increment_orders_processed(reply.processed_orders.max(0) as u64);

        decrement_calls_inflight();
        record_call_duration(start.elapsed().as_secs_f64() * 1000.0);
        Ok(Response::new(reply))
    }
}
