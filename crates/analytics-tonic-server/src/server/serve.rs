//! tonic server assembly and lifecycle for both service variants.
//!
//! [`serve`] mounts one `AnalyticsService` implementation next to the health
//! and reflection services and runs it until the shutdown token is cancelled.
//! [`run_queue_mode`] wraps it with the completion-queue server so that the
//! listener is shut down first and the queues second.

use crate::server::{
    config::{ServeMode, ServerConfig},
    pool::QueueServer,
    service::{InlineAnalyticsService, QueuedAnalyticsService},
};
use analytics_tonic_core::{
    Error,
    proto::{
        FILE_DESCRIPTOR_SET,
        analytics_service_server::{AnalyticsService, AnalyticsServiceServer},
    },
};
use futures::Stream;
use std::net::SocketAddr;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    net::{TcpListener, TcpSocket},
    signal,
};
use tokio_util::sync::CancellationToken;
use tonic::{
    codec::CompressionEncoding,
    transport::{Server, server::Connected},
};
use tonic_health::ServingStatus;
use tonic_web::GrpcWebLayer;
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};

/// Pending-connection queue length passed to `listen(2)`.
const LISTEN_BACKLOG: u32 = 1024;

/// Binds the listening socket.
///
/// On unix both `SO_REUSEADDR` and `SO_REUSEPORT` are set, so several server
/// processes can share one port and the kernel balances new connections
/// between them.
///
/// # Errors
///
/// Returns [`Error::Bind`] if the address is in use or not permitted. The
/// binary treats this as fatal.
pub fn bind(addr: SocketAddr) -> Result<TcpListener, Error> {
    let bind_error = |e: std::io::Error| Error::Bind {
        addr: addr.to_string(),
        reason: e.to_string(),
    };

    let socket = if addr.is_ipv4() {
        TcpSocket::new_v4()
    } else {
        TcpSocket::new_v6()
    }
    .map_err(bind_error)?;

    #[cfg(unix)]
    socket.set_reuseaddr(true).map_err(bind_error)?;
    #[cfg(all(unix, not(any(target_os = "solaris", target_os = "illumos"))))]
    socket.set_reuseport(true).map_err(bind_error)?;

    socket.bind(addr).map_err(bind_error)?;
    socket.listen(LISTEN_BACKLOG).map_err(bind_error)
}

/// Runs the variant selected by `config.mode` until `shutdown` is cancelled.
pub async fn run<I, IO, IE>(
    incoming: I,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    match config.mode {
        ServeMode::Queue => run_queue_mode(incoming, config, shutdown).await,
        ServeMode::Callback => serve(InlineAnalyticsService, incoming, config, shutdown).await,
    }
}

/// Serves the completion-queue variant.
///
/// Starts one dispatch thread per configured queue, serves until `shutdown`
/// is cancelled and the listener has drained its connections, then stops the
/// queues and joins their threads.
pub async fn run_queue_mode<I, IO, IE>(
    incoming: I,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let mut queues = QueueServer::new(config.num_queues, config.drain_timeout);
    let router = queues.start()?;

    let served = serve(
        QueuedAnalyticsService::new(router),
        incoming,
        config,
        shutdown,
    )
    .await;

    // Joining blocks, so keep it off the runtime's worker threads.
    let reports = tokio::task::spawn_blocking(move || queues.stop()).await??;
    for _report in &reports {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Queue {}: {} completed, {} abandoned, {} created, {} destroyed, {} leaked, min acceptors {:?}",
            _report.queue_id,
            _report.calls_completed,
            _report.calls_abandoned,
            _report.calls_created,
            _report.calls_destroyed,
            _report.leaked,
            _report.min_acceptors
        );
        if !_report.is_clean() {
            #[cfg(feature = "tracing")]
            tracing::warn!("Queue {} did not shut down cleanly", _report.queue_id);
        }
    }

    served
}

/// Serves `service` with health, reflection, compression and gRPC-Web
/// support until `shutdown` is cancelled.
///
/// Both the empty service name and `AnalyticsService` report `SERVING` while
/// the server runs and `NOT_SERVING` once shutdown begins.
pub async fn serve<S, I, IO, IE>(
    service: S,
    incoming: I,
    config: &ServerConfig,
    shutdown: CancellationToken,
) -> anyhow::Result<()>
where
    S: AnalyticsService,
    I: Stream<Item = Result<IO, IE>>,
    IO: AsyncRead + AsyncWrite + Connected + Unpin + Send + 'static,
    IE: Into<tower::BoxError>,
{
    let (health_reporter, health_service) = tonic_health::server::health_reporter();
    health_reporter
        .set_serving::<AnalyticsServiceServer<S>>()
        .await;
    health_reporter
        .set_service_status("", ServingStatus::Serving)
        .await;

    let reflection = tonic_reflection::server::Builder::configure()
        .register_encoded_file_descriptor_set(FILE_DESCRIPTOR_SET)
        .build_v1()?;

    let signal = async move {
        shutdown.cancelled().await;
        #[cfg(feature = "tracing")]
        tracing::info!("Shutting down listener");
        health_reporter
            .set_not_serving::<AnalyticsServiceServer<S>>()
            .await;
        health_reporter
            .set_service_status("", ServingStatus::NotServing)
            .await;
    };

    Server::builder()
        .accept_http1(true)
        .initial_stream_window_size(config.stream_window_bytes)
        .initial_connection_window_size(config.connection_window_bytes)
        .max_concurrent_streams(config.max_concurrent_streams)
        .concurrency_limit_per_connection(config.max_concurrent_streams as usize)
        .layer(
            ServiceBuilder::new()
                .layer(
                    CorsLayer::new()
                        .allow_origin(Any)
                        .allow_methods(Any)
                        .allow_headers(Any),
                )
                .layer(GrpcWebLayer::new()),
        )
        .add_service(health_service)
        .add_service(reflection)
        .add_service(build_analytics_service(service))
        .serve_with_incoming_shutdown(incoming, signal)
        .await?;

    #[cfg(feature = "tracing")]
    tracing::info!("Listener shut down");
    Ok(())
}

fn build_analytics_service<S: AnalyticsService>(service: S) -> AnalyticsServiceServer<S> {
    AnalyticsServiceServer::new(service)
        .send_compressed(CompressionEncoding::Zstd)
        .send_compressed(CompressionEncoding::Gzip)
        .accept_compressed(CompressionEncoding::Zstd)
        .accept_compressed(CompressionEncoding::Gzip)
}

/// Waits for Ctrl+C or SIGTERM and cancels `token`.
///
/// Returns early, without cancelling anything, if `token` is cancelled by
/// someone else first.
pub async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(_e) = signal::ctrl_c().await {
            #[cfg(feature = "tracing")]
            tracing::error!("Failed to install Ctrl+C handler: {_e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(_e) => {
                #[cfg(feature = "tracing")]
                tracing::error!("Failed to install SIGTERM handler: {_e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received Ctrl+C signal");
        },
        () = terminate => {
            #[cfg(feature = "tracing")]
            tracing::info!("Received SIGTERM signal");
        },
        () = token.cancelled() => return,
    }

    token.cancel();
}
