use super::GatewayState;
use crate::config::RouteConfig;
use crate::proxy::context::{full_body, BoxBody};
use http_body_util::BodyExt;
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};

/// Admin surface: liveness, readiness, Prometheus exposition, and runtime
/// tenant route-table management.
///
/// Tenant CRUD replaces a whole tenant's table at once; there is no
/// per-route patching. Upstream URLs first introduced here run without a
/// circuit breaker until restart (the breaker map is frozen at build).
pub async fn handle_admin(
    req: Request<Incoming>,
    state: GatewayState,
) -> Result<Response<BoxBody>, hyper::Error> {
    let path = req.uri().path().to_string();

    match path.as_str() {
        "/health" | "/healthz" => Ok(json(StatusCode::OK, r#"{"status":"ok"}"#.to_string())),

        "/ready" | "/readyz" => Ok(json(
            StatusCode::OK,
            format!(
                r#"{{"status":"ready","tenants":{},"routes":{}}}"#,
                state.store.tenant_count(),
                state.store.route_count(),
            ),
        )),

        "/metrics" => Ok(Response::builder()
            .status(StatusCode::OK)
            .header("content-type", "text/plain; version=0.0.4; charset=utf-8")
            .body(full_body(state.metrics.render()))
            .unwrap()),

        _ => match path.strip_prefix("/tenants/") {
            Some(tenant) if !tenant.is_empty() && !tenant.contains('/') => {
                handle_tenant(req, state, tenant.to_string()).await
            }
            _ => Ok(json(
                StatusCode::NOT_FOUND,
                r#"{"error":"not found"}"#.to_string(),
            )),
        },
    }
}

async fn handle_tenant(
    req: Request<Incoming>,
    state: GatewayState,
    tenant: String,
) -> Result<Response<BoxBody>, hyper::Error> {
    match *req.method() {
        Method::GET => match state.store.tenant_config(&tenant) {
            Some(routes) => {
                let body = serde_json::to_string_pretty(&routes).unwrap_or_default();
                Ok(json(StatusCode::OK, body))
            }
            None => Ok(json(
                StatusCode::NOT_FOUND,
                format!(r#"{{"error":"no config found for tenant: {}"}}"#, tenant),
            )),
        },

        Method::PUT | Method::POST => {
            let body = req.into_body().collect().await?.to_bytes();
            let routes: Vec<RouteConfig> = match serde_json::from_slice(&body) {
                Ok(r) => r,
                Err(e) => {
                    return Ok(json(
                        StatusCode::BAD_REQUEST,
                        format!(r#"{{"error":"invalid route config: {}"}}"#, e),
                    ))
                }
            };
            match state.store.load_tenant(&tenant, &routes) {
                Ok(()) => {
                    metrics::gauge!("gateway_config_routes_total")
                        .set(state.store.route_count() as f64);
                    Ok(json(
                        StatusCode::OK,
                        format!(r#"{{"status":"loaded","routes":{}}}"#, routes.len()),
                    ))
                }
                Err(e) => Ok(json(
                    StatusCode::BAD_REQUEST,
                    format!(r#"{{"error":"{}"}}"#, e),
                )),
            }
        }

        Method::DELETE => {
            if state.store.remove_tenant(&tenant) {
                metrics::gauge!("gateway_config_routes_total")
                    .set(state.store.route_count() as f64);
                Ok(json(StatusCode::OK, r#"{"status":"deleted"}"#.to_string()))
            } else {
                Ok(json(
                    StatusCode::NOT_FOUND,
                    format!(r#"{{"error":"no config found for tenant: {}"}}"#, tenant),
                ))
            }
        }

        _ => Ok(json(
            StatusCode::METHOD_NOT_ALLOWED,
            r#"{"error":"method not allowed"}"#.to_string(),
        )),
    }
}

fn json(status: StatusCode, body: String) -> Response<BoxBody> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(full_body(body))
        .unwrap()
}
