//! quicproxy - a QUIC/HTTP-3-terminating reverse proxy.
//!
//! This crate provides:
//! - QUIC/HTTP-3 listening with TLS 1.3 termination
//! - Priority-ordered, rule-based routing
//! - Load balancing (round robin, least connections, weighted)
//! - Active and passive backend health checking

pub mod config;
pub mod ports;

// Implementation details, not meant to be used directly outside the binary.
pub(crate) mod adapters;
pub(crate) mod core;
pub(crate) mod metrics;
pub(crate) mod tracing_setup;
pub(crate) mod upstream;
pub(crate) mod utils;

pub use crate::adapters::health_checker::HealthChecker;
pub use crate::adapters::http::server::FallbackServer;
pub use crate::adapters::http3;
pub use crate::adapters::http_client::HyperHttpClient;
pub use crate::adapters::metrics_server::MetricsServer;
pub use crate::adapters::request_handler::ProxyHandler;
pub use crate::core::ProxyService;
pub use crate::tracing_setup::{init_tracing, shutdown_tracing};
pub use crate::utils::graceful_shutdown::{GracefulShutdown, ShutdownReason, ShutdownToken};
