use std::sync::Arc;
use std::time::Duration;

use crate::config::{BackendGroupConfig, HealthCheckSpecConfig, Strategy};
use crate::core::backend::{Backend, BackendUrl};
use crate::core::load_balancer::{BalancerError, LoadBalancerFactory, LoadBalancingStrategy};

/// A named collection of upstream backends sharing one load-balancing
/// strategy, health-check spec and per-request timeout.
pub struct BackendGroup {
    pub name: String,
    pub backends: Vec<Arc<Backend>>,
    pub health_check: HealthCheckSpecConfig,
    pub timeout: Duration,
    pub retries: u32,
    strategy: Box<dyn LoadBalancingStrategy>,
}

impl BackendGroup {
    pub fn from_config(config: &BackendGroupConfig) -> Result<Self, crate::core::backend::BackendError> {
        let backends = config
            .targets
            .iter()
            .map(|target| {
                BackendUrl::new(&target.url).map(|url| Arc::new(Backend::new(url, target.weight)))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            name: config.name.clone(),
            backends,
            health_check: config.health_check.clone(),
            timeout: config.timeout,
            retries: config.retries,
            strategy: LoadBalancerFactory::create_strategy(config.strategy),
        })
    }

    pub fn strategy_kind(&self) -> Strategy {
        self.strategy.kind()
    }

    /// Selects the next backend to send a request to. Returns
    /// `BalancerError::NoneAvailable` when every backend in the group is
    /// unhealthy (or the group has no backends at all).
    pub fn pick(&self) -> Result<Arc<Backend>, BalancerError> {
        self.strategy.select(&self.backends)
    }

    pub fn healthy_count(&self) -> usize {
        self.backends.iter().filter(|b| b.is_healthy()).count()
    }

    pub fn total_count(&self) -> usize {
        self.backends.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{HealthCheckSpecConfig, TargetConfig};

    fn group_config() -> BackendGroupConfig {
        BackendGroupConfig {
            name: "api".to_string(),
            targets: vec![
                TargetConfig {
                    url: "http://127.0.0.1:9001".to_string(),
                    weight: 1,
                },
                TargetConfig {
                    url: "http://127.0.0.1:9002".to_string(),
                    weight: 1,
                },
            ],
            strategy: Strategy::RoundRobin,
            health_check: HealthCheckSpecConfig::default(),
            timeout: Duration::from_secs(10),
            retries: 0,
        }
    }

    #[test]
    fn builds_backends_from_config() {
        let group = BackendGroup::from_config(&group_config()).unwrap();
        assert_eq!(group.total_count(), 2);
        assert_eq!(group.healthy_count(), 2);
    }

    #[test]
    fn pick_fails_when_all_unhealthy() {
        let group = BackendGroup::from_config(&group_config()).unwrap();
        for backend in &group.backends {
            backend.record_probe_failure(1);
        }
        assert!(matches!(group.pick(), Err(BalancerError::NoneAvailable)));
    }
}
