use crate::cache::{CacheEntry, ResponseCache};
use crate::config::Route;
use crate::proxy::context::{full_body, BoxBody, CapturedResponse, RequestContext};
use crate::proxy::{forward, identity};
use crate::server::GatewayState;
use crate::upstream::pick_healthy_server;
use bytes::Bytes;
use http::header::HOST;
use http::{HeaderMap, Response, StatusCode};
use http_body_util::BodyExt;
use hyper::Request;
use rand::Rng;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Request header carrying the tenant identity.
const TENANT_HEADER: &str = "x-user-id";
/// Upper bound (exclusive) of the random backoff jitter.
const RETRY_JITTER_MS: u64 = 25;

/// Handle one inbound request through the phased pipeline:
///
/// 1. TENANT      — extract and require `X-User-ID`
/// 2. ROUTE_MATCH — resolve (tenant, path, method) against the store
/// 3. CACHE       — may short-circuit with a stored response
/// 4. ADMISSION   — route-level then per-identity token buckets
/// 5. UPSTREAM    — healthy-node pick + forward, retry loop, breaker updates
/// 6. LOG         — access log + telemetry
///
/// `/health` answers directly and bypasses the pipeline and its telemetry.
pub async fn handle_request<B>(
    req: Request<B>,
    state: GatewayState,
    peer_addr: SocketAddr,
) -> Result<Response<BoxBody>, hyper::Error>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    if req.uri().path() == "/health" {
        return Ok(Response::builder()
            .status(StatusCode::OK)
            .body(full_body("ok"))
            .unwrap());
    }

    let start = Instant::now();
    let resp = handle_inner(req, &state, peer_addr).await;
    state
        .rolling
        .record_latency(start.elapsed().as_millis() as u64);
    Ok(resp)
}

async fn handle_inner<B>(
    req: Request<B>,
    state: &GatewayState,
    peer_addr: SocketAddr,
) -> Response<BoxBody>
where
    B: hyper::body::Body,
    B::Error: std::fmt::Display,
{
    let method = req.method().as_str().to_string();
    let uri_path = req.uri().path().to_string();
    let raw_query = req.uri().query().unwrap_or("").to_string();
    let host = req
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let peer_ip = peer_addr.ip().to_string();
    let client_ip = identity::real_client_ip(req.headers(), &peer_ip);

    let tenant = req
        .headers()
        .get(TENANT_HEADER)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let mut ctx = RequestContext::new(tenant, method, uri_path, raw_query, client_ip, host);

    if ctx.tenant.is_empty() {
        return ctx.error_response(StatusCode::BAD_REQUEST, "missing tenant header");
    }

    // Route match
    let route = match state.store.match_route(&ctx.tenant, &ctx.uri_path, &ctx.method) {
        Some(r) => r,
        None => {
            debug!(
                "proxy: no route matched, tenant={}, path={}, method={}",
                ctx.tenant, ctx.uri_path, ctx.method
            );
            return ctx.error_response(StatusCode::BAD_REQUEST, "no matching route");
        }
    };
    ctx.route = Some(route.clone());

    let req_headers = req.headers().clone();

    // Buffer the body once: identity extraction may read it as a form and
    // the retry loop replays it per attempt.
    let body = match req.into_body().collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            warn!("proxy: failed to read request body, route={}, error={}", ctx.route_path(), e);
            return ctx.error_response(StatusCode::BAD_REQUEST, "bad request");
        }
    };

    // Cache lookup
    let cache_key = ResponseCache::key(&ctx.method, &ctx.uri_path, &ctx.raw_query);
    if let Some(resp) = phase_cache_lookup(&ctx, &route, &cache_key, state) {
        return resp;
    }

    // Admission
    if let Some(resp) = phase_admission(&ctx, &route, &req_headers, &body) {
        return resp;
    }

    // Upstream forward with retry
    let captured = phase_upstream(&mut ctx, &route, &req_headers, body, state).await;

    // Fill the cache on the way out. Only clean 200s are stored.
    if let Some(cache) = &route.cache {
        if captured.status == StatusCode::OK {
            cache.set(
                &cache_key,
                CacheEntry {
                    body: captured.body.clone(),
                    headers: captured.headers.clone(),
                    expires_at: Instant::now() + Duration::from_millis(route.config.cache.ttl_ms),
                },
            );
        }
    }

    phase_log(&ctx, &captured);
    captured.into_response()
}

/// Cache phase: a hit replays the stored response without invoking any
/// inner stage; a miss is recorded and falls through.
fn phase_cache_lookup(
    ctx: &RequestContext,
    route: &Arc<Route>,
    cache_key: &str,
    state: &GatewayState,
) -> Option<Response<BoxBody>> {
    let cache = route.cache.as_ref()?;

    if let Some(entry) = cache.get(cache_key) {
        state.rolling.record_cache_hit();
        metrics::counter!(
            "gateway_cache_hits_total",
            "route" => ctx.route_path().to_owned(),
        )
        .increment(1);

        let mut builder = Response::builder().status(StatusCode::OK);
        for (name, value) in &entry.headers {
            builder = builder.header(name, value);
        }
        ctx.finalize_metrics(StatusCode::OK.as_u16());
        return Some(builder.body(full_body(entry.body)).unwrap());
    }

    state.rolling.record_cache_miss();
    metrics::counter!(
        "gateway_cache_misses_total",
        "route" => ctx.route_path().to_owned(),
    )
    .increment(1);
    None
}

/// Admission phase: the shared route bucket first, then the per-identity
/// bucket. Rejections name the tier so callers can tell them apart.
fn phase_admission(
    ctx: &RequestContext,
    route: &Arc<Route>,
    req_headers: &HeaderMap,
    body: &Bytes,
) -> Option<Response<BoxBody>> {
    if let Some(limiter) = &route.route_limiter {
        if !limiter.allow() {
            debug!("proxy: route limit exceeded, route={}", ctx.route_path());
            metrics::counter!(
                "gateway_rate_limit_rejected_total",
                "route" => ctx.route_path().to_owned(),
                "tier" => "route",
            )
            .increment(1);
            return Some(ctx.error_response(StatusCode::TOO_MANY_REQUESTS, "route limit exceeded"));
        }
    }

    let who = identity::identify(
        &route.config.user_id_key,
        req_headers,
        &ctx.raw_query,
        body,
        &ctx.client_ip,
    );

    if !route.allow_user(&who) {
        debug!(
            "proxy: user limit exceeded, route={}, identity={}",
            ctx.route_path(),
            who
        );
        metrics::counter!(
            "gateway_rate_limit_rejected_total",
            "route" => ctx.route_path().to_owned(),
            "tier" => "user",
        )
        .increment(1);
        return Some(ctx.error_response(StatusCode::TOO_MANY_REQUESTS, "user limit exceeded"));
    }

    None
}

/// Upstream phase.
///
/// With retries disabled a single healthy upstream is picked and forwarded
/// to once, breaker untouched. With retries enabled each attempt settles
/// the selected upstream's breaker, and 5xx (including transport failures
/// surfaced as 502/504) trigger exponential backoff with jitter before the
/// next attempt against a freshly picked upstream.
async fn phase_upstream(
    ctx: &mut RequestContext,
    route: &Arc<Route>,
    req_headers: &HeaderMap,
    body: Bytes,
    state: &GatewayState,
) -> CapturedResponse {
    let retry = &route.retry;

    if !retry.enabled || retry.max_tries == 0 {
        let upstream = match pick_healthy_server(&route.balancer, &state.breakers) {
            Ok(u) => u,
            Err(e) => {
                warn!("proxy: no upstream available, route={}, error={}", ctx.route_path(), e);
                return CapturedResponse::gateway_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "no healthy upstreams",
                );
            }
        };
        ctx.upstream = upstream.clone();
        return forward::forward(&state.client, ctx, &upstream, req_headers, body).await;
    }

    let base_delay = Duration::from_millis(retry.base_time_ms);

    for attempt in 0..retry.max_tries {
        let upstream = match pick_healthy_server(&route.balancer, &state.breakers) {
            Ok(u) => u,
            Err(e) => {
                warn!("proxy: no upstream available, route={}, error={}", ctx.route_path(), e);
                metrics::counter!(
                    "gateway_circuit_breaker_rejected_total",
                    "route" => ctx.route_path().to_owned(),
                )
                .increment(1);
                return CapturedResponse::gateway_error(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "no healthy upstreams",
                );
            }
        };
        ctx.upstream = upstream.clone();

        let captured =
            forward::forward(&state.client, ctx, &upstream, req_headers, body.clone()).await;
        let status = captured.status.as_u16();

        if let Some(cb) = state.breakers.get(&upstream) {
            cb.update(status);
        }

        if status < 500 {
            return captured;
        }

        if attempt + 1 < retry.max_tries {
            debug!(
                "proxy: retryable status {}, route={}, upstream={}, attempt={}/{}",
                status,
                ctx.route_path(),
                upstream,
                attempt + 1,
                retry.max_tries
            );
            metrics::counter!(
                "gateway_upstream_retries_total",
                "route" => ctx.route_path().to_owned(),
            )
            .increment(1);

            let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..RETRY_JITTER_MS));
            tokio::time::sleep(base_delay * 2u32.pow(attempt) + jitter).await;
        }
    }

    CapturedResponse::gateway_error(StatusCode::BAD_GATEWAY, "Bad Gateway")
}

fn phase_log(ctx: &RequestContext, captured: &CapturedResponse) {
    let status = captured.status.as_u16();
    ctx.finalize_metrics(status);

    tracing::info!(
        client_ip = %ctx.client_ip,
        tenant = %ctx.tenant,
        method = %ctx.method,
        path = %ctx.uri_path,
        status = status,
        route = %ctx.route_path(),
        upstream = %ctx.upstream,
        latency_ms = %ctx.start.elapsed().as_millis(),
        "access"
    );
}
