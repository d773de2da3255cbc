use std::net::SocketAddr;

use anyhow::Context;
use axum::extract::State;
use axum::routing::get;
use axum::Router;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Standalone Prometheus text-exposition endpoint, bound to its own address
/// so scraping it is never subject to the same TLS/QUIC listener as proxied
/// traffic.
pub struct MetricsServer {
    addr: SocketAddr,
    path: String,
    handle: PrometheusHandle,
}

impl MetricsServer {
    /// Installs the process-wide Prometheus recorder. Must be called
    /// exactly once, before any `metrics::counter!`/`gauge!`/`histogram!`
    /// call runs.
    pub fn install(listen_addr: &str, path: &str) -> anyhow::Result<Self> {
        let addr: SocketAddr = listen_addr
            .parse()
            .with_context(|| format!("invalid metrics address '{listen_addr}'"))?;

        let handle = PrometheusBuilder::new()
            .install_recorder()
            .context("installing Prometheus metrics recorder")?;

        crate::metrics::init();

        Ok(Self {
            addr,
            path: path.to_string(),
            handle,
        })
    }

    pub async fn run(self) -> anyhow::Result<()> {
        let path = self.path.clone();
        let app = Router::new()
            .route(path.as_str(), get(render_metrics))
            .with_state(self.handle);

        let listener = tokio::net::TcpListener::bind(self.addr)
            .await
            .with_context(|| format!("binding metrics listener on {}", self.addr))?;

        tracing::info!(addr = %self.addr, path = %path, "metrics endpoint listening");
        axum::serve(listener, app)
            .await
            .context("metrics server error")?;
        Ok(())
    }
}

async fn render_metrics(State(handle): State<PrometheusHandle>) -> String {
    handle.render()
}
