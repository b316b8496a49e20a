#![doc = include_str!("../README.md")]

mod server;

use clap::Parser;
use server::config::{CliArgs, ServerConfig};
use server::serve::{bind, run, shutdown_signal};
use server::telemetry::init_telemetry;
use tokio_stream::wrappers::TcpListenerStream;
use tokio_util::sync::CancellationToken;

// Using mimalloc for better performance under contention, especially in musl
// environments.
#[global_allocator]
static GLOBAL: mimalloc::MiMalloc = mimalloc::MiMalloc;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load from .env
    let _ = dotenvy::dotenv();
    let args = CliArgs::parse();
    let config = ServerConfig::try_from(args)?;

    let providers = init_telemetry(config.log_format)?;

    let listener = match bind(config.server_addr) {
        Ok(listener) => listener,
        Err(e) => {
            #[cfg(feature = "tracing")]
            tracing::error!("{e}");
            providers.shutdown();
            return Err(e.into());
        }
    };
    log_startup_info(&config);

    let shutdown = CancellationToken::new();
    tokio::spawn(shutdown_signal(shutdown.clone()));

    let result = run(TcpListenerStream::new(listener), &config, shutdown).await;

    #[cfg(feature = "tracing")]
    match &result {
        Ok(()) => tracing::info!("Server shut down successfully"),
        Err(e) => tracing::error!("Server failed: {e:#}"),
    }

    providers.shutdown();
    result
}

fn log_startup_info(_config: &ServerConfig) {
    if cfg!(debug_assertions) {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting AnalyticsService on {} with full config: {:#?}",
            _config.server_addr,
            _config
        );
    } else {
        #[cfg(feature = "tracing")]
        tracing::info!(
            "Starting AnalyticsService on {} in {:?} mode ({} queues)",
            _config.server_addr,
            _config.mode,
            _config.num_queues
        );
    }
}
