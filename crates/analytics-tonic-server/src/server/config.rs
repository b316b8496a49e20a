use analytics_tonic_core::types::DEFAULT_PORT;
use anyhow::bail;
use clap::{Parser, ValueEnum};
use core::time::Duration;
use std::net::{Ipv4Addr, SocketAddr};

/// How incoming calls are executed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum ServeMode {
    /// One completion queue and dispatch thread per core; each call is driven
    /// by an explicit state machine.
    Queue,
    /// The tonic runtime invokes a handler that completes the call inline.
    Callback,
}

/// Console log layout.
#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    Pretty,
    Compact,
    Json,
}

/// Runtime configuration for the `analytics-tonic-server` binary.
///
/// Every option can be given on the command line or through the environment
/// (a `.env` file is loaded first). Defaults mirror the other benchmark
/// implementations.
#[derive(Parser, Debug, Clone)]
#[command(
    name = "analytics-tonic-server",
    version,
    about = "A gRPC order analytics benchmark server"
)]
pub struct CliArgs {
    /// Port to listen on. The server always binds all interfaces.
    ///
    /// Environment variable: `PORT`
    #[arg(long, env = "PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Execution model for `AggregateOrders` calls.
    ///
    /// Environment variable: `SERVER_MODE`
    #[arg(long, env = "SERVER_MODE", value_enum, default_value_t = ServeMode::Queue)]
    pub mode: ServeMode,

    /// Number of completion queues (and dispatch threads) in queue mode.
    ///
    /// `0` uses the number of logical cores.
    ///
    /// Environment variable: `NUM_QUEUES`
    #[arg(long, env = "NUM_QUEUES", default_value_t = 0)]
    pub num_queues: usize,

    /// Seconds to wait for dispatch threads to drain before reporting a
    /// stalled shutdown. Threads are always joined.
    ///
    /// Environment variable: `DRAIN_TIMEOUT`
    #[arg(long, env = "DRAIN_TIMEOUT", default_value_t = 5)]
    pub drain_timeout: u64,

    /// HTTP/2 per-stream flow-control window in bytes.
    ///
    /// Environment variable: `STREAM_WINDOW_BYTES`
    #[arg(long, env = "STREAM_WINDOW_BYTES", default_value_t = 1024 * 1024)]
    pub stream_window_bytes: u32,

    /// HTTP/2 per-connection flow-control window in bytes.
    ///
    /// Environment variable: `CONNECTION_WINDOW_BYTES`
    #[arg(long, env = "CONNECTION_WINDOW_BYTES", default_value_t = 10 * 1024 * 1024)]
    pub connection_window_bytes: u32,

    /// Maximum concurrent HTTP/2 streams per connection.
    ///
    /// Environment variable: `MAX_CONCURRENT_STREAMS`
    #[arg(long, env = "MAX_CONCURRENT_STREAMS", default_value_t = 256)]
    pub max_concurrent_streams: u32,

    /// Console log layout.
    ///
    /// Environment variable: `LOG_FORMAT`
    #[arg(long, env = "LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub server_addr: SocketAddr,
    pub mode: ServeMode,
    pub num_queues: usize,
    pub drain_timeout: Duration,
    pub stream_window_bytes: u32,
    pub connection_window_bytes: u32,
    pub max_concurrent_streams: u32,
    pub log_format: LogFormat,
}

impl TryFrom<CliArgs> for ServerConfig {
    type Error = anyhow::Error;

    fn try_from(args: CliArgs) -> Result<Self, Self::Error> {
        if args.max_concurrent_streams == 0 {
            bail!("MAX_CONCURRENT_STREAMS must be greater than 0");
        }

        if args.stream_window_bytes > args.connection_window_bytes {
            bail!(
                "STREAM_WINDOW_BYTES ({}) exceeds CONNECTION_WINDOW_BYTES ({})",
                args.stream_window_bytes,
                args.connection_window_bytes
            );
        }

        let num_queues = match args.num_queues {
            0 => num_cpus::get().max(1),
            n => n,
        };

        Ok(Self {
            server_addr: SocketAddr::from((Ipv4Addr::UNSPECIFIED, args.port)),
            mode: args.mode,
            num_queues,
            drain_timeout: Duration::from_secs(args.drain_timeout),
            stream_window_bytes: args.stream_window_bytes,
            connection_window_bytes: args.connection_window_bytes,
            max_concurrent_streams: args.max_concurrent_streams,
            log_format: args.log_format,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> CliArgs {
        CliArgs::try_parse_from(core::iter::once("analytics-tonic-server").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn explicit_values_are_carried_over() {
        let config = ServerConfig::try_from(parse(&[
            "--port",
            "9090",
            "--mode",
            "callback",
            "--num-queues",
            "4",
            "--drain-timeout",
            "2",
        ]))
        .unwrap();

        assert_eq!(config.server_addr, "0.0.0.0:9090".parse().unwrap());
        assert_eq!(config.mode, ServeMode::Callback);
        assert_eq!(config.num_queues, 4);
        assert_eq!(config.drain_timeout, Duration::from_secs(2));
    }

    #[test]
    fn zero_queues_means_one_per_core() {
        let config = ServerConfig::try_from(parse(&["--num-queues", "0"])).unwrap();
        assert_eq!(config.num_queues, num_cpus::get().max(1));
    }

    #[test]
    fn listen_address_is_all_interfaces() {
        let config = ServerConfig::try_from(parse(&["--port", "8081"])).unwrap();
        assert!(config.server_addr.ip().is_unspecified());
        assert_eq!(config.server_addr.port(), 8081);
    }

    #[test]
    fn rejects_stream_window_larger_than_connection_window() {
        let args = parse(&[
            "--stream-window-bytes",
            "2048",
            "--connection-window-bytes",
            "1024",
        ]);
        assert!(ServerConfig::try_from(args).is_err());
    }

    #[test]
    fn rejects_zero_concurrent_streams() {
        let args = parse(&["--max-concurrent-streams", "0"]);
        assert!(ServerConfig::try_from(args).is_err());
    }
}
