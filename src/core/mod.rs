pub mod backend;
pub mod group;
pub mod load_balancer;
pub mod proxy;
pub mod router;

pub use group::BackendGroup;
pub use load_balancer::{BalancerError, LoadBalancerFactory};
pub use proxy::ProxyService;
pub use router::Router;
