use crate::server::{
    config::{LogFormat, ServeMode, ServerConfig},
    serve::{bind, run},
};
use analytics_tonic_core::{
    proto::{
        AggregateResult, AnalyticsRequest, Order, OrderItem, OrderStatus,
        analytics_service_client::AnalyticsServiceClient,
    },
    types::{CLIENT_ID_HEADER, SERVICE_NAME},
};
use core::time::Duration;
use std::net::SocketAddr;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;
use tonic::{Code, Request, codec::CompressionEncoding, transport::Channel};
use tonic_health::pb::{
    HealthCheckRequest, health_check_response::ServingStatus, health_client::HealthClient,
};

struct TestServer {
    addr: SocketAddr,
    shutdown: CancellationToken,
    handle: JoinHandle<anyhow::Result<()>>,
}

impl TestServer {
    async fn start(mode: ServeMode) -> Self {
        let config = ServerConfig {
            server_addr: "127.0.0.1:0".parse().unwrap(),
            mode,
            num_queues: 2,
            drain_timeout: Duration::from_secs(2),
            stream_window_bytes: 1024 * 1024,
            connection_window_bytes: 10 * 1024 * 1024,
            max_concurrent_streams: 256,
            log_format: LogFormat::Compact,
        };

        let listener = bind(config.server_addr).unwrap();
        let addr = listener.local_addr().unwrap();
        let shutdown = CancellationToken::new();
        let token = shutdown.clone();
        let handle = tokio::spawn(async move {
            run(TcpListenerStream::new(listener), &config, token).await
        });

        Self {
            addr,
            shutdown,
            handle,
        }
    }

    async fn channel(&self) -> Channel {
        Channel::from_shared(format!("http://{}", self.addr))
            .unwrap()
            .connect()
            .await
            .unwrap()
    }

    async fn stop(self) {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("server did not shut down")
            .unwrap()
            .unwrap();
    }
}

fn scenario_request(status: OrderStatus) -> AnalyticsRequest {
    AnalyticsRequest {
        orders: vec![Order {
            id: "o-1".to_string(),
            status: status as i32,
            country: "US".to_string(),
            items: vec![
                OrderItem {
                    category: "A".to_string(),
                    price_cents: 100,
                    quantity: 2,
                },
                OrderItem {
                    category: "B".to_string(),
                    price_cents: 50,
                    quantity: 1,
                },
            ],
        }],
    }
}

fn with_client_id(message: AnalyticsRequest, client: &str) -> Request<AnalyticsRequest> {
    let mut request = Request::new(message);
    request
        .metadata_mut()
        .insert(CLIENT_ID_HEADER, client.parse().unwrap());
    request
}

fn assert_scenario_reply(reply: &AggregateResult, client: &str) {
    assert_eq!(reply.processed_orders, 1);
    assert_eq!(reply.amount_by_country.len(), 1);
    assert_eq!(reply.amount_by_country["US"], 250);
    assert_eq!(reply.quantity_by_category.len(), 2);
    assert_eq!(reply.quantity_by_category["A"], 2);
    assert_eq!(reply.quantity_by_category["B"], 1);
    assert_eq!(reply.echoed_client_id, client);
}

async fn answers_completed_order(mode: ServeMode) {
    let server = TestServer::start(mode).await;
    let mut client = AnalyticsServiceClient::new(server.channel().await);

    let reply = client
        .aggregate_orders(with_client_id(
            scenario_request(OrderStatus::Completed),
            "client-42",
        ))
        .await
        .unwrap()
        .into_inner();
    assert_scenario_reply(&reply, "client-42");

    let reply = client
        .aggregate_orders(with_client_id(
            scenario_request(OrderStatus::Cancelled),
            "client-43",
        ))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.processed_orders, 0);
    assert!(reply.amount_by_country.is_empty());
    assert!(reply.quantity_by_category.is_empty());
    assert_eq!(reply.echoed_client_id, "client-43");

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn callback_mode_aggregates_orders() {
    answers_completed_order(ServeMode::Callback).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_mode_aggregates_orders() {
    answers_completed_order(ServeMode::Queue).await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_mode_leaves_echo_empty_without_header() {
    let server = TestServer::start(ServeMode::Queue).await;
    let mut client = AnalyticsServiceClient::new(server.channel().await);

    let reply = client
        .aggregate_orders(Request::new(scenario_request(OrderStatus::Completed)))
        .await
        .unwrap()
        .into_inner();
    assert_eq!(reply.processed_orders, 1);
    assert!(reply.echoed_client_id.is_empty());

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn queue_mode_never_cross_assigns_concurrent_replies() {
    let server = TestServer::start(ServeMode::Queue).await;
    let channel = server.channel().await;

    let tasks: Vec<_> = (0..500)
        .map(|i| {
            let mut client = AnalyticsServiceClient::new(channel.clone());
            tokio::spawn(async move {
                let id = format!("client-{i}");
                let reply = client
                    .aggregate_orders(with_client_id(
                        scenario_request(OrderStatus::Completed),
                        &id,
                    ))
                    .await
                    .unwrap()
                    .into_inner();
                assert_scenario_reply(&reply, &id);
            })
        })
        .collect();

    for task in tasks {
        task.await.unwrap();
    }

    server.stop().await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn compressed_calls_are_accepted() {
    for encoding in [CompressionEncoding::Gzip, CompressionEncoding::Zstd] {
        let server = TestServer::start(ServeMode::Queue).await;
        let mut client = AnalyticsServiceClient::new(server.channel().await)
            .send_compressed(encoding)
            .accept_compressed(encoding);

        let reply = client
            .aggregate_orders(with_client_id(
                scenario_request(OrderStatus::Completed),
                "zipped",
            ))
            .await
            .unwrap()
            .into_inner();
        assert_scenario_reply(&reply, "zipped");

        server.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn health_reports_serving_for_both_names() {
    for mode in [ServeMode::Queue, ServeMode::Callback] {
        let server = TestServer::start(mode).await;
        let mut health = HealthClient::new(server.channel().await);

        for service in ["", SERVICE_NAME] {
            let status = health
                .check(HealthCheckRequest {
                    service: service.to_string(),
                })
                .await
                .unwrap()
                .into_inner()
                .status;
            assert_eq!(status, ServingStatus::Serving as i32, "service {service:?}");
        }

        let unknown = health
            .check(HealthCheckRequest {
                service: "NoSuchService".to_string(),
            })
            .await
            .unwrap_err();
        assert_eq!(unknown.code(), Code::NotFound);

        server.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn shutdown_without_traffic_completes() {
    for mode in [ServeMode::Queue, ServeMode::Callback] {
        let server = TestServer::start(mode).await;
        server.stop().await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn bind_conflict_is_reported() {
    // Occupied by a socket that does not opt into port sharing.
    let first = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = first.local_addr().unwrap();

    let err = bind(addr).unwrap_err();
    assert!(err.to_string().contains(&addr.to_string()));
}

#[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn listeners_share_a_port() {
    let first = bind("127.0.0.1:0".parse().unwrap()).unwrap();
    let addr = first.local_addr().unwrap();

    let second = bind(addr).unwrap();
    assert_eq!(second.local_addr().unwrap(), addr);
}
