use std::collections::HashMap;
use std::sync::Arc;

use http::{HeaderMap, Method};

use crate::config::ServerConfig;
use crate::core::group::BackendGroup;
use crate::core::router::{Matched, Router, RouterError};

/// Aggregate health counts across every configured backend group, used to
/// synthesize the `/health` response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HealthSummary {
    pub healthy_backends: usize,
    pub total_backends: usize,
}

impl HealthSummary {
    pub fn status(&self) -> &'static str {
        if self.total_backends == 0 || self.healthy_backends == 0 {
            "unhealthy"
        } else if self.healthy_backends == self.total_backends {
            "healthy"
        } else {
            "degraded"
        }
    }
}

/// Owns the compiled router and the runtime backend groups built from
/// configuration. Shared read-only across every connection and request:
/// config is immutable once loaded, so nothing here needs interior
/// mutability beyond what `BackendGroup`/`Backend` already hold in atomics.
pub struct ProxyService {
    config: Arc<ServerConfig>,
    router: Router,
    groups: HashMap<String, Arc<BackendGroup>>,
}

impl ProxyService {
    pub fn new(config: Arc<ServerConfig>) -> anyhow::Result<Self> {
        let mut groups = HashMap::with_capacity(config.backend_groups.len());
        for group_config in &config.backend_groups {
            let group = BackendGroup::from_config(group_config)
                .map_err(|e| anyhow::anyhow!("backend group '{}': {e}", group_config.name))?;
            groups.insert(group_config.name.clone(), Arc::new(group));
        }

        let router =
            Router::new(&config.routing).map_err(|e: RouterError| anyhow::anyhow!(e))?;

        Ok(Self {
            config,
            router,
            groups,
        })
    }

    pub fn config(&self) -> &Arc<ServerConfig> {
        &self.config
    }

    pub fn route(
        &self,
        method: &Method,
        path: &str,
        host: Option<&str>,
        headers: &HeaderMap,
    ) -> Option<Matched> {
        self.router.route(method, path, host, headers)
    }

    pub fn group(&self, name: &str) -> Option<Arc<BackendGroup>> {
        self.groups.get(name).cloned()
    }

    pub fn groups(&self) -> impl Iterator<Item = &Arc<BackendGroup>> {
        self.groups.values()
    }

    pub fn health_summary(&self) -> HealthSummary {
        let mut healthy_backends = 0;
        let mut total_backends = 0;
        for group in self.groups.values() {
            healthy_backends += group.healthy_count();
            total_backends += group.total_count();
        }
        HealthSummary {
            healthy_backends,
            total_backends,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use std::time::Duration;

    fn config() -> ServerConfig {
        ServerConfig {
            server: ServerSection {
                listen_addr: "0.0.0.0:4433".to_string(),
                fallback_addr: None,
                tls: TlsConfig {
                    cert_path: "cert.pem".to_string(),
                    key_path: "key.pem".to_string(),
                },
                quic: QuicConfig::default(),
            },
            backend_groups: vec![BackendGroupConfig {
                name: "api".to_string(),
                targets: vec![TargetConfig {
                    url: "http://127.0.0.1:9001".to_string(),
                    weight: 1,
                }],
                strategy: Strategy::RoundRobin,
                health_check: HealthCheckSpecConfig::default(),
                timeout: Duration::from_secs(10),
                retries: 0,
            }],
            routing: RoutingConfig {
                rules: vec![],
                default_backend: Some("api".to_string()),
            },
            telemetry: TelemetryConfig::default(),
        }
    }

    #[test]
    fn health_summary_reports_healthy_when_all_backends_up() {
        let service = ProxyService::new(Arc::new(config())).unwrap();
        let summary = service.health_summary();
        assert_eq!(summary.healthy_backends, 1);
        assert_eq!(summary.total_backends, 1);
        assert_eq!(summary.status(), "healthy");
    }

    #[test]
    fn health_summary_reports_unhealthy_when_all_backends_down() {
        let service = ProxyService::new(Arc::new(config())).unwrap();
        let group = service.group("api").unwrap();
        for backend in &group.backends {
            backend.record_probe_failure(1);
        }
        assert_eq!(service.health_summary().status(), "unhealthy");
    }
}
