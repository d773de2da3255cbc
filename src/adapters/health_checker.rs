use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio::time::sleep;

use crate::adapters::http_client::HyperHttpClient;
use crate::core::backend::Backend;
use crate::core::ProxyService;
use crate::ports::http_client::HttpClient;
use crate::utils::graceful_shutdown::ShutdownToken;

/// Spawns and supervises one probe task per backend, across every
/// configured group. Each backend's health transitions independently: a
/// slow or down backend in one group never delays probing in another.
pub struct HealthChecker {
    proxy_service: Arc<ProxyService>,
    http_client: Arc<HyperHttpClient>,
}

impl HealthChecker {
    pub fn new(proxy_service: Arc<ProxyService>, http_client: Arc<HyperHttpClient>) -> Self {
        Self {
            proxy_service,
            http_client,
        }
    }

    /// Spawns one task per enabled backend. Callers keep the returned
    /// handles so they can be awaited (or aborted) during shutdown.
    pub fn spawn_all(&self, shutdown: ShutdownToken) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for group in self.proxy_service.groups() {
            if !group.health_check.enabled {
                tracing::info!(group = %group.name, "health checking disabled for group");
                continue;
            }

            for backend in &group.backends {
                crate::metrics::set_backend_health_status(backend.url.as_str(), backend.is_healthy());

                let backend = Arc::clone(backend);
                let http_client = Arc::clone(&self.http_client);
                let group_name = group.name.clone();
                let health_check = group.health_check.clone();
                let mut shutdown = shutdown.clone();

                handles.push(tokio::spawn(async move {
                    probe_loop(group_name, backend, http_client, health_check, &mut shutdown)
                        .await;
                }));
            }
        }

        handles
    }
}

async fn probe_loop(
    group_name: String,
    backend: Arc<Backend>,
    http_client: Arc<HyperHttpClient>,
    health_check: crate::config::HealthCheckSpecConfig,
    shutdown: &mut ShutdownToken,
) {
    let probe_url = format!("{}{}", backend.url.as_str(), health_check.path);

    loop {
        tokio::select! {
            _ = sleep(health_check.interval) => {}
            _ = shutdown.cancelled() => {
                tracing::debug!(group = %group_name, backend = %backend.url, "health probe loop stopping");
                return;
            }
        }

        let result = http_client
            .health_check(&probe_url, health_check.timeout.as_secs())
            .await;

        match &result {
            Ok(true) => {
                let transitioned = backend.record_probe_success(health_check.healthy_threshold);
                if transitioned {
                    tracing::info!(
                        group = %group_name,
                        backend = %backend.url,
                        "backend is now healthy"
                    );
                    crate::metrics::set_backend_health_status(backend.url.as_str(), true);
                }
            }
            Ok(false) | Err(_) => {
                let transitioned = backend.record_probe_failure(health_check.unhealthy_threshold);
                if transitioned {
                    tracing::warn!(
                        group = %group_name,
                        backend = %backend.url,
                        "backend is now unhealthy"
                    );
                    crate::metrics::set_backend_health_status(backend.url.as_str(), false);
                }
                if let Err(e) = &result {
                    tracing::debug!(group = %group_name, backend = %backend.url, error = %e, "health probe error");
                }
            }
        }
    }
}
