use crate::config::Route;
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use std::sync::Arc;
use std::time::Instant;

pub type BoxBody = http_body_util::combinators::BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> BoxBody {
    Full::new(data.into())
        .map_err(|never| match never {})
        .boxed()
}

pub fn empty_body() -> BoxBody {
    Full::new(Bytes::new())
        .map_err(|never| match never {})
        .boxed()
}

/// Per-request state threaded explicitly through the pipeline phases:
/// the route set before entry, the selected upstream set by the retry
/// phase before each proxy attempt.
pub struct RequestContext {
    pub tenant: String,
    pub method: String,
    pub uri_path: String,
    pub raw_query: String,
    /// Real client IP: first `X-Forwarded-For` element, else the TCP peer.
    pub client_ip: String,
    pub host: String,
    pub start: Instant,
    pub route: Option<Arc<Route>>,
    pub upstream: String,
}

impl RequestContext {
    pub fn new(
        tenant: String,
        method: String,
        uri_path: String,
        raw_query: String,
        client_ip: String,
        host: String,
    ) -> Self {
        Self {
            tenant,
            method,
            uri_path,
            raw_query,
            client_ip,
            host,
            start: Instant::now(),
            route: None,
            upstream: String::new(),
        }
    }

    pub fn route_path(&self) -> &str {
        self.route
            .as_ref()
            .map(|r| r.pattern.raw())
            .unwrap_or("")
    }

    /// Build a JSON error response and record request metrics in one place —
    /// the single exit point for all error paths.
    pub fn error_response(&self, status: StatusCode, msg: &str) -> hyper::Response<BoxBody> {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(status.as_u16());

        metrics::counter!(
            "gateway_http_requests_total",
            "route" => self.route_path().to_owned(),
            "method" => self.method.clone(),
            "status_code" => status_str.to_owned(),
        )
        .increment(1);

        metrics::histogram!(
            "gateway_http_request_duration_seconds",
            "route" => self.route_path().to_owned(),
        )
        .record(self.start.elapsed().as_secs_f64());

        hyper::Response::builder()
            .status(status)
            .header("content-type", "application/json")
            .body(full_body(format!(r#"{{"error":"{}"}}"#, msg)))
            .unwrap()
    }

    /// Record final metrics for a response that ran the full pipeline.
    pub fn finalize_metrics(&self, resp_status: u16) {
        let mut buf = itoa::Buffer::new();
        let status_str = buf.format(resp_status);

        metrics::counter!(
            "gateway_http_requests_total",
            "route" => self.route_path().to_owned(),
            "method" => self.method.clone(),
            "status_code" => status_str.to_owned(),
        )
        .increment(1);

        metrics::histogram!(
            "gateway_http_request_duration_seconds",
            "route" => self.route_path().to_owned(),
        )
        .record(self.start.elapsed().as_secs_f64());
    }
}

/// A fully buffered response interposed between pipeline stages, so the
/// retry phase can inspect status before replaying and the cache phase can
/// store the body. Status defaults to 200 for handlers that produce a body
/// without setting one.
#[derive(Debug, Clone)]
pub struct CapturedResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
}

impl Default for CapturedResponse {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: HeaderMap::new(),
            body: Bytes::new(),
        }
    }
}

impl CapturedResponse {
    pub fn gateway_error(status: StatusCode, msg: &str) -> Self {
        let mut headers = HeaderMap::new();
        headers.insert(
            http::header::CONTENT_TYPE,
            http::HeaderValue::from_static("application/json"),
        );
        Self {
            status,
            headers,
            body: Bytes::from(format!(r#"{{"error":"{}"}}"#, msg)),
        }
    }

    /// Replay the capture to the outbound writer.
    pub fn into_response(self) -> hyper::Response<BoxBody> {
        let mut builder = hyper::Response::builder().status(self.status);
        for (name, value) in &self.headers {
            builder = builder.header(name, value);
        }
        builder.body(full_body(self.body)).unwrap()
    }
}
