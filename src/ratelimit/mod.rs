pub mod token_bucket;

pub use token_bucket::TokenBucket;

use crate::config::RateLimitConfig;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Enum-based rate limiter — one variant per admission algorithm.
pub enum RateLimiter {
    TokenBucket(TokenBucket),
}

impl RateLimiter {
    pub fn allow(&self) -> bool {
        match self {
            RateLimiter::TokenBucket(tb) => tb.allow(),
        }
    }
}

type LimiterCtor = fn(f64, f64) -> RateLimiter;

fn registry() -> &'static HashMap<&'static str, LimiterCtor> {
    static REGISTRY: OnceLock<HashMap<&'static str, LimiterCtor>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut m: HashMap<&'static str, LimiterCtor> = HashMap::new();
        m.insert("token_bucket", |capacity, refill_rate| {
            RateLimiter::TokenBucket(TokenBucket::new(capacity, refill_rate))
        });
        m
    })
}

/// Build a limiter from config. Type `"none"` (or empty) disables admission
/// entirely — callers treat `None` as "always allow". Unknown type names are
/// logged and disabled rather than failing the route load.
pub fn from_config(cfg: &RateLimitConfig) -> Option<RateLimiter> {
    if cfg.kind.is_empty() || cfg.kind == "none" {
        return None;
    }
    match registry().get(cfg.kind.as_str()) {
        Some(ctor) => Some(ctor(cfg.capacity, cfg.refill_rate)),
        None => {
            tracing::warn!("ratelimit: unknown limiter type {:?}, disabled", cfg.kind);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_none_type_disables() {
        let cfg = RateLimitConfig {
            kind: "none".to_string(),
            capacity: 10.0,
            refill_rate: 1.0,
        };
        assert!(from_config(&cfg).is_none());

        let empty = RateLimitConfig::default();
        assert!(from_config(&empty).is_none());
    }

    #[test]
    fn test_token_bucket_constructed() {
        let cfg = RateLimitConfig {
            kind: "token_bucket".to_string(),
            capacity: 2.0,
            refill_rate: 1.0,
        };
        let limiter = from_config(&cfg).unwrap();
        assert!(limiter.allow());
        assert!(limiter.allow());
        assert!(!limiter.allow());
    }

    #[test]
    fn test_unknown_type_disables() {
        let cfg = RateLimitConfig {
            kind: "leaky_bucket".to_string(),
            capacity: 1.0,
            refill_rate: 1.0,
        };
        assert!(from_config(&cfg).is_none());
    }
}
