use crate::config::{ConfigStore, GatewayFileConfig};
use crate::metrics::{Metrics, RollingMetrics};
use crate::proxy::{build_http_client, HttpClient};
use crate::upstream::{build_breaker_map, BreakerMap};
use anyhow::Result;
use std::sync::Arc;
use tracing::info;

/// Shared gateway state, cheaply cloneable.
///
/// Built once at bootstrap. The config store accepts runtime tenant
/// replacement through the admin API; the breaker map is deliberately
/// frozen at construction (see DESIGN.md) so the hot path reads it without
/// synchronization.
#[derive(Clone)]
pub struct GatewayState {
    pub store: Arc<ConfigStore>,
    pub breakers: Arc<BreakerMap>,
    pub client: HttpClient,
    pub rolling: Arc<RollingMetrics>,
    pub metrics: Metrics,
}

impl GatewayState {
    pub fn new(file_config: GatewayFileConfig) -> Result<Self> {
        let store = Arc::new(ConfigStore::new());
        for (tenant, routes) in &file_config.tenants {
            store.load_tenant(tenant, routes)?;
        }
        info!(
            "config: loaded, tenants={}, routes={}",
            store.tenant_count(),
            store.route_count()
        );

        // One breaker per distinct upstream URL, shared across every route
        // and tenant that references it.
        let mut pairs = Vec::new();
        store.for_each_upstream(|url, cb| pairs.push((url.to_string(), cb.clone())));
        let breakers = build_breaker_map(pairs.iter().map(|(url, cb)| (url.as_str(), cb)));

        let metrics = Metrics::install();
        metrics::gauge!("gateway_config_routes_total").set(store.route_count() as f64);

        Ok(Self {
            store,
            breakers: Arc::new(breakers),
            client: build_http_client(),
            rolling: Arc::new(RollingMetrics::new()),
            metrics,
        })
    }
}
