use crate::config::UpstreamConfig;
use crate::error::GatewayError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, OnceLock};

/// Enum-based load balancer — static dispatch, exhaustive match.
///
/// Each variant owns the state its policy needs. Constructed once per route
/// at config load, never per request.
pub enum LoadBalancer {
    RoundRobin(RoundRobin),
    WeightedRoundRobin(WeightedRoundRobin),
}

type BalancerCtor = fn(&[UpstreamConfig]) -> LoadBalancer;

/// Policy-name registry. Populated at first use; unknown names fall back to
/// round-robin so a typo in config degrades instead of failing the route.
fn registry() -> &'static HashMap<&'static str, BalancerCtor> {
    static REGISTRY: OnceLock<HashMap<&'static str, BalancerCtor>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m: HashMap<&'static str, BalancerCtor> = HashMap::new();
        m.insert("round_robin", |ups| {
            LoadBalancer::RoundRobin(RoundRobin::new(server_urls(ups)))
        });
        m.insert("weighted_round_robin", |ups| {
            LoadBalancer::WeightedRoundRobin(WeightedRoundRobin::new(
                server_urls(ups),
                server_weights(ups),
            ))
        });
        m
    })
}

fn server_urls(upstreams: &[UpstreamConfig]) -> Vec<String> {
    upstreams.iter().map(|u| u.url.clone()).collect()
}

fn server_weights(upstreams: &[UpstreamConfig]) -> Vec<i64> {
    // Weight below 1 is a config mistake; clamp rather than divide by zero
    // the WRR rotation.
    upstreams.iter().map(|u| u.weight.max(1) as i64).collect()
}

impl LoadBalancer {
    pub fn new(policy: &str, upstreams: &[UpstreamConfig]) -> Self {
        match registry().get(policy) {
            Some(ctor) => ctor(upstreams),
            None => {
                if !policy.is_empty() {
                    tracing::warn!(
                        "loadbalance: unknown policy {:?}, falling back to round_robin",
                        policy
                    );
                }
                LoadBalancer::RoundRobin(RoundRobin::new(server_urls(upstreams)))
            }
        }
    }

    pub fn next_server(&self) -> Result<String, GatewayError> {
        match self {
            LoadBalancer::RoundRobin(lb) => lb.next_server(),
            LoadBalancer::WeightedRoundRobin(lb) => lb.next_server(),
        }
    }

    pub fn servers(&self) -> &[String] {
        match self {
            LoadBalancer::RoundRobin(lb) => &lb.servers,
            LoadBalancer::WeightedRoundRobin(lb) => &lb.servers,
        }
    }
}

/// Lock-free round-robin: a monotonically increasing counter taken modulo
/// the pool size. Concurrent callers never observe the same increment twice.
pub struct RoundRobin {
    servers: Vec<String>,
    counter: AtomicU64,
}

impl RoundRobin {
    pub fn new(servers: Vec<String>) -> Self {
        Self {
            servers,
            counter: AtomicU64::new(0),
        }
    }

    pub fn next_server(&self) -> Result<String, GatewayError> {
        if self.servers.is_empty() {
            return Err(GatewayError::EmptyPool);
        }
        let i = self.counter.fetch_add(1, Ordering::Relaxed);
        Ok(self.servers[(i % self.servers.len() as u64) as usize].clone())
    }
}

/// Smooth weighted round-robin.
///
/// On each call every upstream's current weight grows by its static weight,
/// the maximum current weight wins (ties broken by the later index), and the
/// winner pays back the total static weight. Over any window of
/// `sum(weights)` calls each upstream is selected exactly `weight` times.
pub struct WeightedRoundRobin {
    servers: Vec<String>,
    weights: Vec<i64>,
    current: Mutex<Vec<i64>>,
}

impl WeightedRoundRobin {
    pub fn new(servers: Vec<String>, weights: Vec<i64>) -> Self {
        let n = servers.len();
        Self {
            servers,
            weights,
            current: Mutex::new(vec![0; n]),
        }
    }

    pub fn next_server(&self) -> Result<String, GatewayError> {
        if self.servers.is_empty() || self.servers.len() != self.weights.len() {
            return Err(GatewayError::EmptyPool);
        }

        let mut current = self.current.lock().unwrap();

        let total: i64 = self.weights.iter().sum();
        let mut best = 0usize;
        let mut best_weight = i64::MIN;
        for i in 0..self.servers.len() {
            current[i] += self.weights[i];
            if current[i] >= best_weight {
                best_weight = current[i];
                best = i;
            }
        }
        current[best] -= total;

        Ok(self.servers[best].clone())
    }
}
