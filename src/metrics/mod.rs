pub mod registry;
pub mod rolling;

pub use registry::Metrics;
pub use rolling::{start_flusher, FlushedMetrics, RollingMetrics, LATENCY_BUCKETS_MS};
