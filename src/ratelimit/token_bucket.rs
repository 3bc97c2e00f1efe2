use std::sync::Mutex;
use std::time::Instant;

struct Inner {
    tokens: f64,
    last_refill: Instant,
}

/// Classic token bucket: starts full, refills continuously at
/// `refill_rate` tokens per second, each admission costs one token.
///
/// Capacity and tokens are floats so fractional refill accumulates between
/// calls instead of being truncated away. `tokens` always stays within
/// `[0, capacity]`.
pub struct TokenBucket {
    capacity: f64,
    refill_rate: f64,
    inner: Mutex<Inner>,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            inner: Mutex::new(Inner {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub fn allow(&self) -> bool {
        let mut inner = self.inner.lock().unwrap();

        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_refill).as_secs_f64();
        inner.tokens = (inner.tokens + elapsed * self.refill_rate).min(self.capacity);
        inner.last_refill = now;

        if inner.tokens >= 1.0 {
            inner.tokens -= 1.0;
            true
        } else {
            false
        }
    }
}
