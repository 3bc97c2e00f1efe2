use crate::config::CircuitBreakerConfig;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Map from upstream URL to its breaker. Built once at gateway construction
/// by scanning every tenant's routes and shared across all routes that
/// reference the same URL; read-only thereafter.
pub type BreakerMap = HashMap<String, Arc<CircuitBreaker>>;

/// Immutable breaker tuning, converted from config at build time.
#[derive(Debug, Clone)]
pub struct BreakerSettings {
    pub failure_threshold: u32,
    pub window: Duration,
    pub open_timeout: Duration,
    pub half_open_limit: u32,
    pub success_threshold: u32,
}

impl From<&CircuitBreakerConfig> for BreakerSettings {
    fn from(cfg: &CircuitBreakerConfig) -> Self {
        Self {
            failure_threshold: cfg.failure_threshold,
            window: Duration::from_secs(cfg.window_seconds),
            open_timeout: Duration::from_secs(cfg.open_seconds),
            half_open_limit: cfg.half_open_requests,
            success_threshold: cfg.success_threshold,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Closed,
    Open,
    HalfOpen,
}

struct Inner {
    state: State,
    failures: u32,
    successes: u32,
    trials_in_flight: u32,
    last_failure: Option<Instant>,
    open_until: Option<Instant>,
}

/// Per-upstream health gate: Closed → Open → HalfOpen → Closed/Open.
///
/// All transitions happen under one mutex and every operation is O(1).
/// Counters are fully reset on every state change so trials observed late
/// never leak into the new state's bookkeeping.
pub struct CircuitBreaker {
    inner: Mutex<Inner>,
    settings: BreakerSettings,
}

impl CircuitBreaker {
    pub fn new(settings: BreakerSettings) -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: State::Closed,
                failures: 0,
                successes: 0,
                trials_in_flight: 0,
                last_failure: None,
                open_until: None,
            }),
            settings,
        }
    }

    /// Whether a request may be sent to this upstream right now.
    ///
    /// In HalfOpen a `true` consumes one trial slot; the caller must settle
    /// the attempt with `on_success` / `on_failure` (or `update`).
    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();

        match inner.state {
            State::Closed => {
                // Sliding-window rolloff: failures older than the window no
                // longer count toward the threshold.
                if let Some(last) = inner.last_failure {
                    if now.duration_since(last) > self.settings.window {
                        inner.failures = 0;
                    }
                }
                true
            }
            State::Open => {
                match inner.open_until {
                    Some(until) if now > until => {
                        inner.state = State::HalfOpen;
                        inner.failures = 0;
                        inner.successes = 0;
                        inner.trials_in_flight = 0;
                        tracing::info!("circuit_breaker: half-open, probing upstream");
                        Self::allow_half_open(&mut inner, &self.settings)
                    }
                    _ => false,
                }
            }
            State::HalfOpen => Self::allow_half_open(&mut inner, &self.settings),
        }
    }

    fn allow_half_open(inner: &mut Inner, settings: &BreakerSettings) -> bool {
        if inner.trials_in_flight >= settings.half_open_limit {
            return false;
        }
        inner.trials_in_flight += 1;
        true
    }

    pub fn on_success(&self) {
        let mut inner = self.inner.lock().unwrap();
        if inner.state == State::HalfOpen {
            inner.successes += 1;
            inner.trials_in_flight = inner.trials_in_flight.saturating_sub(1);
            if inner.successes >= self.settings.success_threshold {
                inner.state = State::Closed;
                inner.failures = 0;
                inner.successes = 0;
                inner.trials_in_flight = 0;
                tracing::info!("circuit_breaker: closed (upstream recovered)");
            }
        }
        // Closed: nothing to do. Success never rewinds the failure counter;
        // only the window rolloff in `allow` does.
    }

    pub fn on_failure(&self) {
        let mut inner = self.inner.lock().unwrap();
        let now = Instant::now();
        inner.last_failure = Some(now);

        match inner.state {
            State::HalfOpen => {
                // A single failed trial re-opens.
                inner.state = State::Open;
                inner.open_until = Some(now + self.settings.open_timeout);
                inner.failures = 0;
                inner.successes = 0;
                inner.trials_in_flight = 0;
                tracing::warn!("circuit_breaker: re-opened (probe failed)");
            }
            _ => {
                inner.failures += 1;
                if inner.failures >= self.settings.failure_threshold {
                    inner.state = State::Open;
                    inner.open_until = Some(now + self.settings.open_timeout);
                    tracing::warn!(
                        "circuit_breaker: opened (after {} failures)",
                        inner.failures
                    );
                }
            }
        }
    }

    /// Settle an attempt by response status: 5xx (and transport errors
    /// surfaced as 502/504) count as failure, anything else as success.
    /// A missing status is treated as 200.
    pub fn update(&self, status: u16) {
        let status = if status == 0 { 200 } else { status };
        if status >= 500 {
            self.on_failure();
        } else {
            self.on_success();
        }
    }
}

/// Scan every tenant's routes and create one breaker per distinct upstream
/// URL whose circuit breaker is enabled. Routes that reuse a URL share the
/// breaker so failure history follows the origin, not the route.
pub fn build_breaker_map<'a, I>(upstreams: I) -> BreakerMap
where
    I: IntoIterator<Item = (&'a str, &'a CircuitBreakerConfig)>,
{
    let mut breakers = BreakerMap::new();
    for (url, cfg) in upstreams {
        if !cfg.enabled {
            continue;
        }
        breakers
            .entry(url.to_string())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(BreakerSettings::from(cfg))));
    }
    tracing::info!("circuit_breaker: built breaker map, upstreams={}", breakers.len());
    breakers
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    fn settings(
        failure_threshold: u32,
        window_ms: u64,
        open_ms: u64,
        half_open_limit: u32,
        success_threshold: u32,
    ) -> BreakerSettings {
        BreakerSettings {
            failure_threshold,
            window: Duration::from_millis(window_ms),
            open_timeout: Duration::from_millis(open_ms),
            half_open_limit,
            success_threshold,
        }
    }

    #[test]
    fn test_starts_closed() {
        let cb = CircuitBreaker::new(settings(2, 60_000, 1_000, 1, 1));
        assert!(cb.allow());
    }

    #[test]
    fn test_opens_after_threshold_failures() {
        let cb = CircuitBreaker::new(settings(2, 60_000, 60_000, 1, 1));
        cb.on_failure();
        assert!(cb.allow());
        cb.on_failure();
        assert!(!cb.allow());
    }

    #[test]
    fn test_window_rolloff_resets_failures() {
        let cb = CircuitBreaker::new(settings(2, 50, 60_000, 1, 1));
        cb.on_failure();
        sleep(Duration::from_millis(80));
        // The stale failure rolls off on this allow...
        assert!(cb.allow());
        // ...so one more failure is not enough to open.
        cb.on_failure();
        assert!(cb.allow());
    }

    #[test]
    fn test_open_to_half_open_after_timeout() {
        let cb = CircuitBreaker::new(settings(1, 60_000, 50, 1, 1));
        cb.on_failure();
        assert!(!cb.allow());
        sleep(Duration::from_millis(80));
        // First allow after the timeout is the probe trial.
        assert!(cb.allow());
        // Trial slot consumed: a second concurrent probe is rejected.
        assert!(!cb.allow());
    }

    #[test]
    fn test_half_open_success_closes() {
        let cb = CircuitBreaker::new(settings(1, 60_000, 10, 1, 1));
        cb.on_failure();
        sleep(Duration::from_millis(30));
        assert!(cb.allow());
        cb.on_success();
        assert!(cb.allow());
        assert!(cb.allow());
    }

    #[test]
    fn test_half_open_failure_reopens() {
        let cb = CircuitBreaker::new(settings(1, 60_000, 50, 1, 1));
        cb.on_failure();
        sleep(Duration::from_millis(80));
        assert!(cb.allow());
        cb.on_failure();
        assert!(!cb.allow());
    }

    #[test]
    fn test_half_open_needs_success_threshold() {
        let cb = CircuitBreaker::new(settings(1, 60_000, 10, 2, 2));
        cb.on_failure();
        sleep(Duration::from_millis(30));
        assert!(cb.allow());
        cb.on_success();
        // One success of two: still probing.
        assert!(cb.allow());
        cb.on_success();
        // Closed now: unlimited admission.
        assert!(cb.allow());
        assert!(cb.allow());
        assert!(cb.allow());
    }

    #[test]
    fn test_half_open_limit_bounds_trials() {
        let cb = CircuitBreaker::new(settings(1, 60_000, 10, 2, 3));
        cb.on_failure();
        sleep(Duration::from_millis(30));
        assert!(cb.allow());
        assert!(cb.allow());
        assert!(!cb.allow());
        // Settling one trial frees a slot.
        cb.on_success();
        assert!(cb.allow());
    }

    #[test]
    fn test_update_maps_status() {
        let cb = CircuitBreaker::new(settings(1, 60_000, 60_000, 1, 1));
        cb.update(200);
        assert!(cb.allow());
        cb.update(502);
        assert!(!cb.allow());
    }

    #[test]
    fn test_update_missing_status_is_success() {
        let cb = CircuitBreaker::new(settings(1, 60_000, 60_000, 1, 1));
        cb.update(0);
        assert!(cb.allow());
    }

    #[test]
    fn test_build_breaker_map_shares_by_url() {
        let cfg = CircuitBreakerConfig {
            enabled: true,
            failure_threshold: 1,
            window_seconds: 60,
            open_seconds: 60,
            half_open_requests: 1,
            success_threshold: 1,
        };
        let map = build_breaker_map(vec![
            ("http://a:1", &cfg),
            ("http://a:1", &cfg),
            ("http://b:2", &cfg),
        ]);
        assert_eq!(map.len(), 2);
        map["http://a:1"].on_failure();
        assert!(!map["http://a:1"].allow());
        assert!(map["http://b:2"].allow());
    }

    #[test]
    fn test_build_breaker_map_skips_disabled() {
        let cfg = CircuitBreakerConfig {
            enabled: false,
            ..Default::default()
        };
        let map = build_breaker_map(vec![("http://a:1", &cfg)]);
        assert!(map.is_empty());
    }
}
