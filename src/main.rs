#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use aegis_gateway::server;
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "aegis-gateway", about = "Multi-tenant HTTP API gateway")]
struct Cli {
    /// Path to the gateway config file (JSON route tables per tenant)
    #[arg(short, long, default_value = "config.json")]
    config: PathBuf,

    /// Listen address for proxied traffic
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    listen: String,

    /// Admin API listen address (health/metrics/tenant config)
    #[arg(long, default_value = "0.0.0.0:9091")]
    admin_listen: String,

    /// Telemetry output file (one JSON line per flushed second)
    #[arg(long, default_value = "gateway_metrics.jsonl")]
    telemetry: PathBuf,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let rt = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    rt.block_on(server::bootstrap::run(server::bootstrap::BootstrapArgs {
        config_path: cli.config,
        listen: cli.listen,
        admin_listen: cli.admin_listen,
        telemetry_path: cli.telemetry,
    }))
}
