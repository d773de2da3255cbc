use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use thiserror::Error;

use crate::config::Strategy;
use crate::core::backend::Backend;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BalancerError {
    #[error("no healthy backend available")]
    NoneAvailable,
}

/// Interface shared by all load-balancing strategies. Implementations pick
/// one backend out of a group's full member list, restricting themselves to
/// the currently-healthy subset.
pub trait LoadBalancingStrategy: Send + Sync + 'static {
    fn select(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, BalancerError>;

    fn kind(&self) -> Strategy;

    fn boxed(self) -> Box<dyn LoadBalancingStrategy>
    where
        Self: Sized,
    {
        Box::new(self)
    }
}

fn healthy<'a>(backends: &'a [Arc<Backend>]) -> Vec<&'a Arc<Backend>> {
    backends.iter().filter(|b| b.is_healthy()).collect()
}

/// Cycles through healthy backends in order, using a shared cursor so
/// concurrent callers still see a roughly even distribution.
pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancingStrategy for RoundRobinStrategy {
    fn select(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, BalancerError> {
        let candidates = healthy(backends);
        if candidates.is_empty() {
            return Err(BalancerError::NoneAvailable);
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
        Ok(Arc::clone(candidates[index]))
    }

    fn kind(&self) -> Strategy {
        Strategy::RoundRobin
    }
}

/// Always picks the healthy backend with the fewest in-flight requests.
/// Ties broken by the backend's position in the group's declared order.
pub struct LeastConnectionsStrategy;

impl LeastConnectionsStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl LoadBalancingStrategy for LeastConnectionsStrategy {
    fn select(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, BalancerError> {
        backends
            .iter()
            .filter(|b| b.is_healthy())
            .min_by_key(|b| b.in_flight())
            .map(Arc::clone)
            .ok_or(BalancerError::NoneAvailable)
    }

    fn kind(&self) -> Strategy {
        Strategy::LeastConnections
    }
}

/// Draws a healthy backend with probability proportional to its configured
/// weight. Falls back to uniform round-robin-style selection when every
/// healthy backend has weight zero (which `ConfigValidator` otherwise
/// prevents, since weights must be >= 1, but defends the invariant anyway).
pub struct WeightedStrategy {
    counter: AtomicUsize,
}

impl WeightedStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl LoadBalancingStrategy for WeightedStrategy {
    fn select(&self, backends: &[Arc<Backend>]) -> Result<Arc<Backend>, BalancerError> {
        let candidates = healthy(backends);
        if candidates.is_empty() {
            return Err(BalancerError::NoneAvailable);
        }

        let total_weight: u64 = candidates.iter().map(|b| b.weight as u64).sum();
        if total_weight == 0 {
            let index = self.counter.fetch_add(1, Ordering::Relaxed) % candidates.len();
            return Ok(Arc::clone(candidates[index]));
        }

        let mut draw = rand::random::<u64>() % total_weight;
        for backend in &candidates {
            let weight = backend.weight as u64;
            if draw < weight {
                return Ok(Arc::clone(backend));
            }
            draw -= weight;
        }

        // Unreachable given the loop invariant, but keeps the function total.
        Ok(Arc::clone(candidates[candidates.len() - 1]))
    }

    fn kind(&self) -> Strategy {
        Strategy::Weighted
    }
}

pub struct LoadBalancerFactory;

impl LoadBalancerFactory {
    pub fn create_strategy(strategy: Strategy) -> Box<dyn LoadBalancingStrategy> {
        match strategy {
            Strategy::RoundRobin => RoundRobinStrategy::new().boxed(),
            Strategy::LeastConnections => LeastConnectionsStrategy::new().boxed(),
            Strategy::Weighted => WeightedStrategy::new().boxed(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::backend::BackendUrl;

    fn backend(url: &str, weight: u32) -> Arc<Backend> {
        Arc::new(Backend::new(BackendUrl::new(url).unwrap(), weight))
    }

    #[test]
    fn round_robin_cycles_through_healthy_backends() {
        let backends = vec![
            backend("http://a", 1),
            backend("http://b", 1),
            backend("http://c", 1),
        ];
        let strategy = RoundRobinStrategy::new();
        let picks: Vec<String> = (0..6)
            .map(|_| strategy.select(&backends).unwrap().url.as_str().to_string())
            .collect();
        assert_eq!(
            picks,
            vec!["http://a", "http://b", "http://c", "http://a", "http://b", "http://c"]
        );
    }

    #[test]
    fn round_robin_skips_unhealthy_backends() {
        let backends = vec![backend("http://a", 1), backend("http://b", 1)];
        backends[0].record_probe_failure(1);
        let strategy = RoundRobinStrategy::new();
        for _ in 0..4 {
            assert_eq!(strategy.select(&backends).unwrap().url.as_str(), "http://b");
        }
    }

    #[test]
    fn round_robin_errors_when_all_unhealthy() {
        let backends = vec![backend("http://a", 1)];
        backends[0].record_probe_failure(1);
        let strategy = RoundRobinStrategy::new();
        assert_eq!(strategy.select(&backends), Err(BalancerError::NoneAvailable));
    }

    #[test]
    fn least_connections_picks_the_lowest_in_flight_backend() {
        let backends = vec![backend("http://a", 1), backend("http://b", 1)];
        let _guard_a1 = backends[0].begin_request();
        let _guard_a2 = backends[0].begin_request();
        let strategy = LeastConnectionsStrategy::new();
        assert_eq!(strategy.select(&backends).unwrap().url.as_str(), "http://b");
    }

    #[test]
    fn weighted_never_picks_unhealthy_backends() {
        let backends = vec![backend("http://a", 10), backend("http://b", 1)];
        backends[0].record_probe_failure(1);
        let strategy = WeightedStrategy::new();
        for _ in 0..20 {
            assert_eq!(strategy.select(&backends).unwrap().url.as_str(), "http://b");
        }
    }
}
