use crate::cache::ResponseCache;
use crate::config::{RetryConfig, RouteConfig};
use crate::error::GatewayError;
use crate::ratelimit::{self, RateLimiter};
use crate::routing::{normalize_path, PathPattern};
use crate::upstream::LoadBalancer;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, OnceLock, RwLock};
use std::time::Instant;

/// Per-identity limiters idle longer than this are swept.
const LIMITER_IDLE_SECS: u64 = 300;
/// How often the background sweep runs.
const SWEEP_INTERVAL_SECS: u64 = 60;

/// The live counterpart of `RouteConfig`: the declarative record plus the
/// runtime state derived from it at load time — balancer, limiters, cache.
pub struct Route {
    pub config: RouteConfig,
    pub pattern: PathPattern,
    pub balancer: LoadBalancer,
    pub route_limiter: Option<RateLimiter>,
    pub cache: Option<ResponseCache>,
    pub retry: RetryConfig,
    /// Lazily populated per-identity limiters, keyed by the extracted
    /// identity string. Load-or-store creation is racy by design — a lost
    /// duplicate starts from the same full bucket, so last-writer-wins is
    /// harmless.
    user_limiters: DashMap<String, Arc<UserLimiter>>,
    user_limit_enabled: bool,
}

struct UserLimiter {
    limiter: RateLimiter,
    /// Microseconds since process start, updated outside the bucket lock.
    last_access: AtomicU64,
}

fn now_us() -> u64 {
    static START: OnceLock<Instant> = OnceLock::new();
    let start = START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

impl Route {
    fn compile(cfg: &RouteConfig) -> Result<Self, GatewayError> {
        let pattern = PathPattern::compile(&cfg.path)?;

        for upstream in &cfg.upstreams {
            url::Url::parse(&upstream.url).map_err(|e| {
                GatewayError::Config(format!("invalid upstream url {:?}: {}", upstream.url, e))
            })?;
        }

        let mut config = cfg.clone();
        config.method = config.method.to_uppercase();

        let balancer = LoadBalancer::new(&config.load_balancing, &config.upstreams);
        let route_limiter = ratelimit::from_config(&config.route_rate_limit);
        let user_limit_enabled =
            ratelimit::from_config(&config.user_rate_limit).is_some();
        let cache = if config.cache.enabled {
            Some(ResponseCache::new(config.cache.max_entry))
        } else {
            None
        };
        let retry = config.retry.clone();

        Ok(Self {
            config,
            pattern,
            balancer,
            route_limiter,
            cache,
            retry,
            user_limiters: DashMap::new(),
            user_limit_enabled,
        })
    }

    pub fn method(&self) -> &str {
        &self.config.method
    }

    /// Admit or reject one request for `identity` against this route's
    /// per-user limit. Creates the identity's bucket on first sight.
    pub fn allow_user(&self, identity: &str) -> bool {
        if !self.user_limit_enabled {
            return true;
        }

        // Fast path: bucket already exists — no allocation.
        let entry = if let Some(entry) = self.user_limiters.get(identity) {
            entry.value().clone()
        } else {
            self.user_limiters
                .entry(identity.to_string())
                .or_insert_with(|| {
                    let limiter = ratelimit::from_config(&self.config.user_rate_limit)
                        .expect("user_limit_enabled implies a constructible limiter");
                    Arc::new(UserLimiter {
                        limiter,
                        last_access: AtomicU64::new(now_us()),
                    })
                })
                .clone()
        };

        entry.last_access.store(now_us(), Ordering::Relaxed);
        entry.limiter.allow()
    }

    /// Drop per-identity buckets that have not been used recently. Keeps the
    /// map bounded under identity churn (every distinct API key / IP creates
    /// an entry).
    fn sweep_idle_limiters(&self) {
        let now = now_us();
        let expire_us = LIMITER_IDLE_SECS * 1_000_000;
        self.user_limiters
            .retain(|_, v| now.saturating_sub(v.last_access.load(Ordering::Relaxed)) < expire_us);
    }

    #[cfg(test)]
    pub fn user_limiter_count(&self) -> usize {
        self.user_limiters.len()
    }
}

/// Tenant-partitioned route tables.
///
/// Readers (request matching) share the lock; writers (config load /
/// replace / delete) take it exclusively. Compiled routes are handed out as
/// `Arc` so an in-flight request keeps its route alive across a reload.
pub struct ConfigStore {
    tenants: RwLock<HashMap<String, Vec<Arc<Route>>>>,
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ConfigStore {
    pub fn new() -> Self {
        Self {
            tenants: RwLock::new(HashMap::new()),
        }
    }

    /// Compile and install a tenant's route table, replacing any previous
    /// one. Derived state (limiters, caches, balancer counters) of the old
    /// table is dropped with it.
    pub fn load_tenant(&self, tenant: &str, routes: &[RouteConfig]) -> Result<(), GatewayError> {
        let compiled: Result<Vec<Arc<Route>>, GatewayError> =
            routes.iter().map(|r| Route::compile(r).map(Arc::new)).collect();
        let compiled = compiled?;

        let count = compiled.len();
        self.tenants
            .write()
            .unwrap()
            .insert(tenant.to_string(), compiled);
        tracing::info!("config: tenant loaded, tenant={}, routes={}", tenant, count);
        Ok(())
    }

    pub fn remove_tenant(&self, tenant: &str) -> bool {
        let removed = self.tenants.write().unwrap().remove(tenant).is_some();
        if removed {
            tracing::info!("config: tenant removed, tenant={}", tenant);
        }
        removed
    }

    /// The declarative route records of one tenant, for the admin API.
    pub fn tenant_config(&self, tenant: &str) -> Option<Vec<RouteConfig>> {
        self.tenants
            .read()
            .unwrap()
            .get(tenant)
            .map(|routes| routes.iter().map(|r| r.config.clone()).collect())
    }

    pub fn tenant_count(&self) -> usize {
        self.tenants.read().unwrap().len()
    }

    pub fn route_count(&self) -> usize {
        self.tenants.read().unwrap().values().map(Vec::len).sum()
    }

    /// Resolve (tenant, path, method) to the best-scoring route.
    ///
    /// Holds the read lock for the duration of matching. Among routes whose
    /// method matches, the highest segment score wins; ties resolve to
    /// configuration order.
    pub fn match_route(&self, tenant: &str, path: &str, method: &str) -> Option<Arc<Route>> {
        let tenants = self.tenants.read().unwrap();
        let routes = tenants.get(tenant)?;

        let normalized = normalize_path(path);
        let method = method.to_uppercase();

        let mut best: Option<(&Arc<Route>, u32)> = None;
        for route in routes {
            if route.method() != method {
                continue;
            }
            if let Some(score) = route.pattern.score(&normalized) {
                match best {
                    // Strict greater-than keeps the first configured route on ties.
                    Some((_, best_score)) if score <= best_score => {}
                    _ => best = Some((route, score)),
                }
            }
        }
        best.map(|(route, _)| route.clone())
    }

    /// Every (upstream URL, breaker config) pair across all tenants, for
    /// breaker-map construction at gateway build time.
    pub fn for_each_upstream<F>(&self, mut f: F)
    where
        F: FnMut(&str, &crate::config::CircuitBreakerConfig),
    {
        let tenants = self.tenants.read().unwrap();
        for routes in tenants.values() {
            for route in routes {
                for upstream in &route.config.upstreams {
                    f(&upstream.url, &upstream.circuit_breaker);
                }
            }
        }
    }

    /// Spawn the background task that sweeps idle per-identity limiters.
    pub fn start_limiter_sweeper(self: &Arc<Self>) {
        let store = Arc::clone(self);
        tokio::spawn(async move {
            let mut interval =
                tokio::time::interval(std::time::Duration::from_secs(SWEEP_INTERVAL_SECS));
            loop {
                interval.tick().await;
                store.sweep_all();
            }
        });
    }

    fn sweep_all(&self) {
        let routes: Vec<Arc<Route>> = {
            let tenants = self.tenants.read().unwrap();
            tenants.values().flatten().cloned().collect()
        };
        for route in routes {
            route.sweep_idle_limiters();
        }
    }
}
