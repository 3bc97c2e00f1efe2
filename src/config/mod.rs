pub mod store;
pub mod types;

pub use store::{ConfigStore, Route};
pub use types::{
    CacheConfig, CircuitBreakerConfig, GatewayFileConfig, RateLimitConfig, RetryConfig,
    RouteConfig, UpstreamConfig,
};

use anyhow::Context;
use std::path::Path;

impl GatewayFileConfig {
    /// Load the gateway configuration document from a JSON file.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let cfg: GatewayFileConfig = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(cfg)
    }
}
