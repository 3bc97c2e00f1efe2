use crate::error::GatewayError;
use crate::upstream::{BreakerMap, LoadBalancer};

/// Pick the next upstream whose breaker admits traffic.
///
/// Asks the balancer for at most `servers().len()` candidates and returns
/// the first one that is not gated. An upstream with no breaker entry is
/// treated as allowed. A HalfOpen admission consumes a trial slot, so the
/// caller must settle the attempt via the breaker's `update`.
pub fn pick_healthy_server(
    lb: &LoadBalancer,
    breakers: &BreakerMap,
) -> Result<String, GatewayError> {
    let pool_size = lb.servers().len();
    if pool_size == 0 {
        return Err(GatewayError::EmptyPool);
    }

    for _ in 0..pool_size {
        let server = lb.next_server()?;
        match breakers.get(&server) {
            Some(cb) if !cb.allow() => {
                tracing::debug!("picker: circuit open, skipping upstream={}", server);
                continue;
            }
            _ => return Ok(server),
        }
    }

    Err(GatewayError::NoHealthyUpstream)
}
