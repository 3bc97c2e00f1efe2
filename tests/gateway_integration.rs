use aegis_gateway::config::{
    CacheConfig, CircuitBreakerConfig, GatewayFileConfig, RateLimitConfig, RetryConfig,
    RouteConfig, UpstreamConfig,
};
use aegis_gateway::proxy::handle_request;
use aegis_gateway::server::GatewayState;
use bytes::Bytes;
use http::{HeaderMap, Request, Response, StatusCode};
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;

type UpstreamHandler = Arc<dyn Fn(u32, &HeaderMap) -> (StatusCode, String) + Send + Sync>;

/// Start a throwaway upstream on a random port. The handler receives the
/// 1-based call number and the request headers; the returned counter tracks
/// how many requests actually reached the origin.
async fn spawn_upstream<F>(handler: F) -> (String, Arc<AtomicU32>)
where
    F: Fn(u32, &HeaderMap) -> (StatusCode, String) + Send + Sync + 'static,
{
    let handler: UpstreamHandler = Arc::new(handler);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("http://{}", listener.local_addr().unwrap());
    let calls = Arc::new(AtomicU32::new(0));
    let calls_srv = calls.clone();

    tokio::spawn(async move {
        loop {
            let Ok((stream, _)) = listener.accept().await else {
                break;
            };
            let handler = handler.clone();
            let calls = calls_srv.clone();
            tokio::spawn(async move {
                let io = TokioIo::new(stream);
                let svc = service_fn(move |req: Request<Incoming>| {
                    let handler = handler.clone();
                    let calls = calls.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                        let (status, body) = handler(n, req.headers());
                        Ok::<_, hyper::Error>(
                            Response::builder()
                                .status(status)
                                .header("content-type", "application/json")
                                .body(Full::new(Bytes::from(body)))
                                .unwrap(),
                        )
                    }
                });
                let _ = http1::Builder::new().serve_connection(io, svc).await;
            });
        }
    });

    (url, calls)
}

fn base_route(path: &str, upstream_url: &str) -> RouteConfig {
    RouteConfig {
        path: path.to_string(),
        method: "GET".to_string(),
        load_balancing: "round_robin".to_string(),
        upstreams: vec![UpstreamConfig {
            url: upstream_url.to_string(),
            weight: 1,
            circuit_breaker: CircuitBreakerConfig::default(),
        }],
        route_rate_limit: RateLimitConfig::default(),
        user_rate_limit: RateLimitConfig::default(),
        user_id_key: vec!["header:X-User-ID".to_string()],
        cache: CacheConfig::default(),
        retry: RetryConfig::default(),
    }
}

fn state_with(routes: Vec<RouteConfig>) -> GatewayState {
    let cfg = GatewayFileConfig {
        tenants: [("demo".to_string(), routes)].into_iter().collect(),
    };
    GatewayState::new(cfg).unwrap()
}

fn gw_request(method: &str, path: &str, tenant: Option<&str>) -> Request<Full<Bytes>> {
    let mut builder = Request::builder().method(method).uri(path);
    if let Some(t) = tenant {
        builder = builder.header("X-User-ID", t);
    }
    builder.body(Full::new(Bytes::new())).unwrap()
}

fn peer() -> SocketAddr {
    "127.0.0.1:54321".parse().unwrap()
}

async fn send(
    state: &GatewayState,
    req: Request<Full<Bytes>>,
) -> (StatusCode, String) {
    let resp = handle_request(req, state.clone(), peer()).await.unwrap();
    let status = resp.status();
    let body = resp.into_body().collect().await.unwrap().to_bytes();
    (status, String::from_utf8_lossy(&body).to_string())
}

#[tokio::test]
async fn test_health_endpoint() {
    let state = state_with(vec![]);
    let (status, body) = send(&state, gw_request("GET", "/health", None)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "ok");
}

#[tokio::test]
async fn test_missing_tenant_header_is_400() {
    let state = state_with(vec![]);
    let (status, body) = send(&state, gw_request("GET", "/anything", None)).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("missing tenant header"));
}

#[tokio::test]
async fn test_unmatched_route_is_400() {
    let state = state_with(vec![]);
    let (status, body) = send(&state, gw_request("GET", "/nope", Some("demo"))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body.contains("no matching route"));
}

#[tokio::test]
async fn test_passthrough_and_forwarded_headers() {
    let (url, calls) = spawn_upstream(|_, headers: &HeaderMap| {
        let xff = headers
            .get("x-forwarded-for")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        let proto = headers
            .get("x-forwarded-proto")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();
        (StatusCode::OK, format!(r#"{{"xff":"{}","proto":"{}"}}"#, xff, proto))
    })
    .await;

    let state = state_with(vec![base_route("/echo", &url)]);
    let (status, body) = send(&state, gw_request("GET", "/echo", Some("demo"))).await;

    assert_eq!(status, StatusCode::OK);
    assert!(body.contains(r#""xff":"127.0.0.1""#));
    assert!(body.contains(r#""proto":"http""#));
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_upstream_status_passed_through() {
    let (url, _) = spawn_upstream(|_, _| {
        (StatusCode::NOT_FOUND, r#"{"missing":true}"#.to_string())
    })
    .await;

    let state = state_with(vec![base_route("/api", &url)]);
    let (status, body) = send(&state, gw_request("GET", "/api", Some("demo"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(body.contains("missing"));
}

#[tokio::test]
async fn test_cache_hit_suppresses_upstream() {
    let (url, calls) = spawn_upstream(|_, _| {
        (StatusCode::OK, r#"{"ok":true}"#.to_string())
    })
    .await;

    let mut route = base_route("/cache", &url);
    route.cache = CacheConfig {
        enabled: true,
        ttl_ms: 500,
        max_entry: 10,
    };
    let state = state_with(vec![route]);

    for i in 0..2 {
        let (status, _) = send(&state, gw_request("GET", "/cache", Some("demo"))).await;
        assert_eq!(status, StatusCode::OK, "request {} should be 200", i + 1);
    }

    assert_eq!(calls.load(Ordering::SeqCst), 1, "second request must come from cache");
}

#[tokio::test]
async fn test_cache_entry_expires() {
    let (url, calls) = spawn_upstream(|_, _| {
        (StatusCode::OK, r#"{"ok":true}"#.to_string())
    })
    .await;

    let mut route = base_route("/cache", &url);
    route.cache = CacheConfig {
        enabled: true,
        ttl_ms: 50,
        max_entry: 10,
    };
    let state = state_with(vec![route]);

    send(&state, gw_request("GET", "/cache", Some("demo"))).await;
    tokio::time::sleep(std::time::Duration::from_millis(120)).await;
    send(&state, gw_request("GET", "/cache", Some("demo"))).await;

    assert_eq!(calls.load(Ordering::SeqCst), 2, "expired entry must refetch");
}

#[tokio::test]
async fn test_non_200_not_cached() {
    let (url, calls) = spawn_upstream(|_, _| {
        (StatusCode::NOT_FOUND, "{}".to_string())
    })
    .await;

    let mut route = base_route("/cache", &url);
    route.cache = CacheConfig {
        enabled: true,
        ttl_ms: 60_000,
        max_entry: 10,
    };
    let state = state_with(vec![route]);

    send(&state, gw_request("GET", "/cache", Some("demo"))).await;
    send(&state, gw_request("GET", "/cache", Some("demo"))).await;
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_retry_recovers_after_transient_failure() {
    let (url, calls) = spawn_upstream(|n, _| {
        if n == 1 {
            (StatusCode::INTERNAL_SERVER_ERROR, "fail once".to_string())
        } else {
            (StatusCode::OK, r#"{"ok":true}"#.to_string())
        }
    })
    .await;

    let mut route = base_route("/retry", &url);
    route.retry = RetryConfig {
        enabled: true,
        max_tries: 3,
        base_time_ms: 1,
    };
    route.upstreams[0].circuit_breaker = CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 5,
        window_seconds: 60,
        open_seconds: 2,
        half_open_requests: 1,
        success_threshold: 1,
    };
    let state = state_with(vec![route]);

    let (status, _) = send(&state, gw_request("GET", "/retry", Some("demo"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 2, "fail once then succeed");
}

#[tokio::test]
async fn test_retry_exhaustion_returns_502() {
    let (url, calls) = spawn_upstream(|_, _| {
        (StatusCode::INTERNAL_SERVER_ERROR, "always fail".to_string())
    })
    .await;

    let mut route = base_route("/retry-fail", &url);
    route.retry = RetryConfig {
        enabled: true,
        max_tries: 2,
        base_time_ms: 1,
    };
    let state = state_with(vec![route]);

    let (status, body) = send(&state, gw_request("GET", "/retry-fail", Some("demo"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.contains("Bad Gateway"));
    assert_eq!(calls.load(Ordering::SeqCst), 2, "exactly max_tries attempts");
}

#[tokio::test]
async fn test_breaker_opens_then_rejects_with_503() {
    let (url, calls) = spawn_upstream(|_, _| {
        (StatusCode::INTERNAL_SERVER_ERROR, "down".to_string())
    })
    .await;

    let mut route = base_route("/flaky", &url);
    route.retry = RetryConfig {
        enabled: true,
        max_tries: 2,
        base_time_ms: 1,
    };
    route.upstreams[0].circuit_breaker = CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 2,
        window_seconds: 60,
        open_seconds: 60,
        half_open_requests: 1,
        success_threshold: 1,
    };
    let state = state_with(vec![route]);

    // Two failed attempts trip the breaker.
    let (status, _) = send(&state, gw_request("GET", "/flaky", Some("demo"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(calls.load(Ordering::SeqCst), 2);

    // Breaker now open: no upstream is contacted at all.
    let (status, body) = send(&state, gw_request("GET", "/flaky", Some("demo"))).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(body.contains("no healthy upstreams"));
    assert_eq!(calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_breaker_half_open_probe_recovers() {
    let (url, calls) = spawn_upstream(|n, _| {
        if n <= 2 {
            (StatusCode::INTERNAL_SERVER_ERROR, "warming up".to_string())
        } else {
            (StatusCode::OK, r#"{"ok":true}"#.to_string())
        }
    })
    .await;

    let mut route = base_route("/recover", &url);
    route.retry = RetryConfig {
        enabled: true,
        max_tries: 2,
        base_time_ms: 1,
    };
    route.upstreams[0].circuit_breaker = CircuitBreakerConfig {
        enabled: true,
        failure_threshold: 2,
        window_seconds: 60,
        open_seconds: 1,
        half_open_requests: 1,
        success_threshold: 1,
    };
    let state = state_with(vec![route]);

    let (status, _) = send(&state, gw_request("GET", "/recover", Some("demo"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);

    // Past the open timeout the next request is admitted as a probe and the
    // recovered upstream closes the breaker.
    tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;
    let (status, _) = send(&state, gw_request("GET", "/recover", Some("demo"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_route_rate_limit_rejects_with_429() {
    let (url, calls) = spawn_upstream(|_, _| {
        (StatusCode::OK, "{}".to_string())
    })
    .await;

    let mut route = base_route("/limited", &url);
    route.route_rate_limit = RateLimitConfig {
        kind: "token_bucket".to_string(),
        capacity: 2.0,
        refill_rate: 0.0,
    };
    let state = state_with(vec![route]);

    for _ in 0..2 {
        let (status, _) = send(&state, gw_request("GET", "/limited", Some("demo"))).await;
        assert_eq!(status, StatusCode::OK);
    }
    let (status, body) = send(&state, gw_request("GET", "/limited", Some("demo"))).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body.contains("route limit exceeded"));
    assert_eq!(calls.load(Ordering::SeqCst), 2, "rejected request never reaches upstream");
}

#[tokio::test]
async fn test_user_rate_limit_is_per_identity() {
    let (url, _) = spawn_upstream(|_, _| (StatusCode::OK, "{}".to_string())).await;

    let mut route = base_route("/per-user", &url);
    route.user_rate_limit = RateLimitConfig {
        kind: "token_bucket".to_string(),
        capacity: 1.0,
        refill_rate: 0.0,
    };
    route.user_id_key = vec!["header:X-API-Key".to_string()];
    let state = state_with(vec![route]);

    let with_key = |key: &str| {
        Request::builder()
            .method("GET")
            .uri("/per-user")
            .header("X-User-ID", "demo")
            .header("X-API-Key", key)
            .body(Full::new(Bytes::new()))
            .unwrap()
    };

    let (status, _) = send(&state, with_key("alice")).await;
    assert_eq!(status, StatusCode::OK);
    let (status, body) = send(&state, with_key("alice")).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert!(body.contains("user limit exceeded"));

    // A different identity has its own bucket.
    let (status, _) = send(&state, with_key("bob")).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_route_specificity_param_beats_shorter_literal() {
    let (users_url, users_calls) =
        spawn_upstream(|_, _| (StatusCode::OK, "users".to_string())).await;
    let (detail_url, detail_calls) =
        spawn_upstream(|_, _| (StatusCode::OK, "detail".to_string())).await;

    let list = base_route("/api/users", &users_url);
    let detail = base_route("/api/users/:id", &detail_url);
    let state = state_with(vec![list, detail]);

    let (status, body) = send(&state, gw_request("GET", "/api/users/123", Some("demo"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, "detail");
    assert_eq!(detail_calls.load(Ordering::SeqCst), 1);
    assert_eq!(users_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_round_robin_alternates_upstreams() {
    let (a_url, a_calls) =
        spawn_upstream(|_, _| (StatusCode::OK, "a".to_string())).await;
    let (b_url, b_calls) =
        spawn_upstream(|_, _| (StatusCode::OK, "b".to_string())).await;

    let mut route = base_route("/lb", &a_url);
    route.upstreams.push(UpstreamConfig {
        url: b_url.clone(),
        weight: 1,
        circuit_breaker: CircuitBreakerConfig::default(),
    });
    let state = state_with(vec![route]);

    for _ in 0..4 {
        let (status, _) = send(&state, gw_request("GET", "/lb", Some("demo"))).await;
        assert_eq!(status, StatusCode::OK);
    }
    assert_eq!(a_calls.load(Ordering::SeqCst), 2);
    assert_eq!(b_calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_dead_upstream_maps_to_502() {
    // A port nothing listens on: connect fails, no retry configured.
    let state = state_with(vec![base_route("/dead", "http://127.0.0.1:1")]);
    let (status, body) = send(&state, gw_request("GET", "/dead", Some("demo"))).await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert!(body.contains("bad gateway"));
}
