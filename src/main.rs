use std::net::SocketAddr;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;

use quicproxy::config::load_config;
use quicproxy::ports::HttpServer;
use quicproxy::{
    http3, FallbackServer, GracefulShutdown, HealthChecker, HyperHttpClient, MetricsServer,
    ProxyHandler, ProxyService,
};

/// QUIC/HTTP-3-terminating reverse proxy.
#[derive(Debug, Parser)]
#[command(name = "quicproxy", version)]
struct Args {
    /// Path to the YAML configuration file.
    #[arg(short = 'c', long = "config", default_value = "configs/proxy.yaml")]
    config: String,

    /// Force debug-level logging regardless of configured log level.
    #[arg(short = 'd', long = "debug")]
    debug: bool,
}

const SHUTDOWN_DRAIN: Duration = Duration::from_secs(30);

fn main() -> ExitCode {
    let args = Args::parse();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start async runtime: {e}");
            return ExitCode::from(1);
        }
    };

    runtime.block_on(run(args))
}

async fn run(args: Args) -> ExitCode {
    let config = match load_config(&args.config).await {
        Ok(config) => config,
        Err(e) => {
            eprintln!("failed to load config from '{}': {e}", args.config);
            return ExitCode::from(1);
        }
    };

    let log_level = if args.debug {
        Some("debug")
    } else {
        config.telemetry.log_level.as_deref()
    };
    if let Err(e) = quicproxy::init_tracing(config.telemetry.log_format, log_level) {
        eprintln!("failed to initialize tracing: {e}");
        return ExitCode::from(1);
    }

    tracing::info!(config_path = %args.config, "configuration loaded");

    let listen_addr: SocketAddr = match config.server.listen_addr.parse() {
        Ok(addr) => addr,
        Err(e) => {
            tracing::error!(error = %e, "invalid listen address");
            return ExitCode::from(2);
        }
    };

    let config = Arc::new(config);

    let proxy_service = match ProxyService::new(config.clone()) {
        Ok(service) => Arc::new(service),
        Err(e) => {
            tracing::error!(error = %e, "failed to build proxy service from config");
            return ExitCode::from(1);
        }
    };

    let http_client = match HyperHttpClient::new() {
        Ok(client) => Arc::new(client),
        Err(e) => {
            tracing::error!(error = %e, "failed to build upstream HTTP client");
            return ExitCode::from(1);
        }
    };

    let handler = Arc::new(ProxyHandler::new(proxy_service.clone(), http_client.clone()));

    // The UDP bind and the TLS/quiche config build are kept as two separate
    // fallible steps so a bad listen address (exit 2) and a bad certificate
    // (exit 3) surface as distinct, synchronous startup failures.
    let udp_socket = match tokio::net::UdpSocket::bind(listen_addr).await {
        Ok(socket) => socket,
        Err(e) => {
            tracing::error!(error = %e, addr = %listen_addr, "failed to bind HTTP/3 UDP socket");
            return ExitCode::from(2);
        }
    };
    tracing::info!(addr = %listen_addr, "HTTP/3 listener bound");

    let quiche_config = match http3::QuicheConfig::new(&config.server.quic, &config.server.tls).build() {
        Ok(config) => config,
        Err(e) => {
            tracing::error!(error = %e, "failed to load TLS certificate/key for HTTP/3 listener");
            return ExitCode::from(3);
        }
    };

    let http3_server = Arc::new(http3::Http3Server::new(udp_socket, listen_addr, handler.clone()));

    let shutdown = Arc::new(GracefulShutdown::with_timeout(SHUTDOWN_DRAIN));
    let signal_handle = tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            if let Err(e) = shutdown.run_signal_handler().await {
                tracing::error!(error = %e, "signal handler exited with error");
            }
        }
    });

    let health_checker = HealthChecker::new(proxy_service.clone(), http_client.clone());
    let health_handles = health_checker.spawn_all(shutdown.shutdown_token());

    let mut tasks = tokio::task::JoinSet::new();

    tasks.spawn({
        let http3_server = http3_server.clone();
        let shutdown_token = shutdown.shutdown_token();
        let keep_alive_period = config.server.quic.keep_alive_period;
        async move {
            http3_server
                .run(quiche_config, shutdown_token, SHUTDOWN_DRAIN, keep_alive_period)
                .await
        }
    });

    if let Some(fallback_addr) = config.server.fallback_addr.clone() {
        let fallback_addr: SocketAddr = match fallback_addr.parse() {
            Ok(addr) => addr,
            Err(e) => {
                tracing::error!(error = %e, "invalid fallback address");
                return ExitCode::from(2);
            }
        };

        let fallback_server =
            FallbackServer::new(fallback_addr, handler.clone(), shutdown.shutdown_token());
        tasks.spawn(async move { fallback_server.run().await });
    }

    match MetricsServer::install(&config.telemetry.metrics_addr, &config.telemetry.metrics_path) {
        Ok(metrics_server) => {
            tasks.spawn(async move { metrics_server.run().await });
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to install metrics server");
            return ExitCode::from(2);
        }
    }

    let reason = shutdown.wait_for_shutdown_signal().await;
    tracing::info!(?reason, "shutdown signal received, draining in-flight work");

    // Listeners stop accepting new connections as soon as their shutdown
    // token fires; give already-accepted work up to the drain deadline to
    // finish on its own before forcing anything closed. Health tasks are
    // cancelled only after the drain completes, so in-flight requests can
    // still observe up-to-date backend health while they finish.
    let drain_deadline = tokio::time::sleep(SHUTDOWN_DRAIN);
    tokio::pin!(drain_deadline);
    loop {
        tokio::select! {
            biased;
            _ = &mut drain_deadline => {
                tracing::warn!("drain deadline elapsed, forcing remaining listeners closed");
                break;
            }
            joined = tasks.join_next() => {
                match joined {
                    Some(Ok(Ok(()))) => {}
                    Some(Ok(Err(e))) => tracing::warn!(error = %e, "listener task exited with error during drain"),
                    Some(Err(e)) => tracing::warn!(error = %e, "listener task panicked during drain"),
                    None => break,
                }
            }
        }
    }
    tasks.abort_all();

    for handle in health_handles {
        handle.abort();
    }
    signal_handle.abort();

    quicproxy::shutdown_tracing();
    ExitCode::from(0)
}
