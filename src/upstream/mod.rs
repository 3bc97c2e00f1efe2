pub mod circuit_breaker;
pub mod loadbalance;
pub mod picker;

pub use circuit_breaker::{build_breaker_map, BreakerMap, BreakerSettings, CircuitBreaker};
pub use loadbalance::{LoadBalancer, RoundRobin, WeightedRoundRobin};
pub use picker::pick_healthy_server;
