pub mod body;
pub mod health_checker;
pub mod http;
pub mod http3;
pub mod http_client;
pub mod metrics_server;
pub mod request_handler;

pub use health_checker::HealthChecker;
pub use http_client::HyperHttpClient;
pub use request_handler::ProxyHandler;
