use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashMap;

/// Deserialize a `T` that implements `Default` — treats JSON `null` the same
/// as a missing field (returns `T::default()`). Use with:
///   `#[serde(default, deserialize_with = "deserialize_null_default")]`
fn deserialize_null_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// Top-level gateway configuration document: one route table per tenant.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayFileConfig {
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub tenants: HashMap<String, Vec<RouteConfig>>,
}

/// One configured route: a (path pattern, method) pair plus the policies
/// applied to traffic it matches.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteConfig {
    /// URI pattern: literal segments, `:name` / `{name}` params, terminal `*`.
    pub path: String,

    #[serde(default = "default_method")]
    pub method: String,

    /// "round_robin" (default) or "weighted_round_robin".
    #[serde(default = "default_load_balancing")]
    pub load_balancing: String,

    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub upstreams: Vec<UpstreamConfig>,

    /// Admission shared by every caller of this route.
    #[serde(default)]
    pub route_rate_limit: RateLimitConfig,

    /// Admission applied per extracted identity.
    #[serde(default)]
    pub user_rate_limit: RateLimitConfig,

    /// Identity-key priority list: `source:name` entries (`header`, `query`,
    /// `cookie`, `form`, `basic`, `jwt`) or the literal `ip`.
    #[serde(default, deserialize_with = "deserialize_null_default")]
    pub user_id_key: Vec<String>,

    #[serde(default)]
    pub cache: CacheConfig,

    #[serde(default)]
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub url: String,

    #[serde(default = "default_weight")]
    pub weight: u32,

    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
}

/// State machine tuning: Closed → Open → HalfOpen → Closed/Open.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_cb_failure_threshold")]
    pub failure_threshold: u32,

    /// Failures older than this window roll off the counter.
    #[serde(default = "default_cb_window")]
    pub window_seconds: u64,

    #[serde(default = "default_cb_open")]
    pub open_seconds: u64,

    /// Concurrent trials admitted while half-open.
    #[serde(default = "default_cb_half_open")]
    pub half_open_requests: u32,

    #[serde(default = "default_cb_success_threshold")]
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            failure_threshold: default_cb_failure_threshold(),
            window_seconds: default_cb_window(),
            open_seconds: default_cb_open(),
            half_open_requests: default_cb_half_open(),
            success_threshold: default_cb_success_threshold(),
        }
    }
}

/// Token-bucket admission. `type: "none"` (or absent) disables the tier.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(rename = "type", default)]
    pub kind: String,

    #[serde(default)]
    pub capacity: f64,

    #[serde(default)]
    pub refill_rate: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub ttl_ms: u64,

    #[serde(default = "default_cache_entries")]
    pub max_entry: usize,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub max_tries: u32,

    /// Backoff base: attempt i sleeps `base_time_ms · 2^i` plus jitter.
    #[serde(default)]
    pub base_time_ms: u64,
}

fn default_method() -> String {
    "GET".to_string()
}

fn default_load_balancing() -> String {
    "round_robin".to_string()
}

fn default_weight() -> u32 {
    1
}

fn default_cb_failure_threshold() -> u32 {
    5
}

fn default_cb_window() -> u64 {
    60
}

fn default_cb_open() -> u64 {
    30
}

fn default_cb_half_open() -> u32 {
    1
}

fn default_cb_success_threshold() -> u32 {
    2
}

fn default_cache_entries() -> usize {
    128
}
