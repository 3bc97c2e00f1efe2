use serde::Serialize;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::AsyncWriteExt;

/// Latency histogram upper bounds in milliseconds. A sample lands in the
/// first bucket whose bound is >= the sample; anything above the top bound
/// counts in the top bucket.
pub const LATENCY_BUCKETS_MS: [u64; 17] = [
    1, 2, 3, 4, 5, 10, 25, 50, 75, 100, 200, 300, 400, 800, 1000, 1200, 1600,
];

/// One flush interval between snapshot swaps.
const FLUSH_TICK_MS: u64 = 100;

struct Snapshot {
    second: i64,
    total_requests: u64,
    cache_hits: u64,
    cache_misses: u64,
    latency_counts: [u64; LATENCY_BUCKETS_MS.len()],
}

impl Snapshot {
    fn new(second: i64) -> Self {
        Self {
            second,
            total_requests: 0,
            cache_hits: 0,
            cache_misses: 0,
            latency_counts: [0; LATENCY_BUCKETS_MS.len()],
        }
    }
}

/// One JSON line of the telemetry stream.
#[derive(Debug, Clone, Serialize)]
pub struct FlushedMetrics {
    pub second: i64,
    pub p95_latency_ms: u64,
    pub cache_hit_ratio: f64,
    pub total_requests: u64,
}

/// Rolling per-second request telemetry.
///
/// The active snapshot is mutated in place under a mutex; `flush` swaps in
/// a fresh snapshot stamped with the current second and derives the summary
/// line from the old one.
pub struct RollingMetrics {
    current: Mutex<Snapshot>,
}

impl Default for RollingMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl RollingMetrics {
    pub fn new() -> Self {
        Self {
            current: Mutex::new(Snapshot::new(epoch_second())),
        }
    }

    /// Count one finished request and bucket its latency.
    pub fn record_latency(&self, ms: u64) {
        let mut cur = self.current.lock().unwrap();
        cur.total_requests += 1;
        let idx = LATENCY_BUCKETS_MS
            .iter()
            .position(|&bound| ms <= bound)
            .unwrap_or(LATENCY_BUCKETS_MS.len() - 1);
        cur.latency_counts[idx] += 1;
    }

    pub fn record_cache_hit(&self) {
        self.current.lock().unwrap().cache_hits += 1;
    }

    pub fn record_cache_miss(&self) {
        self.current.lock().unwrap().cache_misses += 1;
    }

    /// Swap the active snapshot for a fresh one and summarize the old.
    /// Returns `None` when the old snapshot saw no requests.
    pub fn flush(&self) -> Option<FlushedMetrics> {
        let old = {
            let mut cur = self.current.lock().unwrap();
            std::mem::replace(&mut *cur, Snapshot::new(epoch_second()))
        };

        if old.total_requests == 0 {
            return None;
        }

        let target = (0.95 * old.total_requests as f64).ceil() as u64;
        let mut cum = 0u64;
        let mut p95 = 0u64;
        for (i, &count) in old.latency_counts.iter().enumerate() {
            cum += count;
            if cum >= target {
                p95 = LATENCY_BUCKETS_MS[i];
                break;
            }
        }

        let total_cache = old.cache_hits + old.cache_misses;
        let cache_hit_ratio = if total_cache > 0 {
            old.cache_hits as f64 / total_cache as f64
        } else {
            0.0
        };

        Some(FlushedMetrics {
            second: old.second,
            p95_latency_ms: p95,
            cache_hit_ratio,
            total_requests: old.total_requests,
        })
    }
}

fn epoch_second() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Spawn the background flusher: every 100 ms the current snapshot is
/// swapped out and, if it saw traffic, appended as one JSON line to the
/// telemetry file. This task is the only writer of the stream.
pub fn start_flusher(rolling: Arc<RollingMetrics>, path: PathBuf) {
    tokio::spawn(async move {
        let mut file = match tokio::fs::File::create(&path).await {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(
                    "metrics: failed to create telemetry file {}: {}",
                    path.display(),
                    e
                );
                return;
            }
        };

        let mut interval =
            tokio::time::interval(std::time::Duration::from_millis(FLUSH_TICK_MS));
        loop {
            interval.tick().await;
            let Some(line) = rolling.flush() else {
                continue;
            };
            let mut buf = match serde_json::to_vec(&line) {
                Ok(b) => b,
                Err(_) => continue,
            };
            buf.push(b'\n');
            if let Err(e) = file.write_all(&buf).await {
                tracing::error!("metrics: telemetry write failed: {}", e);
            }
        }
    });
}
