use crate::proxy::context::{full_body, BoxBody, CapturedResponse, RequestContext};
use bytes::Bytes;
use http::header::{CONNECTION, HOST, TRANSFER_ENCODING};
use http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use http_body_util::BodyExt;
use hyper::Request;
use hyper_rustls::HttpsConnector;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use std::time::Duration;
use tracing::warn;

pub type HttpClient = Client<HttpsConnector<HttpConnector>, BoxBody>;

/// Wall-clock budget for a single upstream attempt.
const UPSTREAM_TIMEOUT: Duration = Duration::from_secs(5);
/// Connection pool sizing for the process-wide upstream client.
const POOL_MAX_IDLE_PER_HOST: usize = 100;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const TLS_HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

/// Build the process-wide pooled upstream client. Both `http://` and
/// `https://` origins are supported (TLS via rustls, webpki roots).
pub fn build_http_client() -> HttpClient {
    let mut http = HttpConnector::new();
    http.set_nodelay(true);
    http.set_keepalive(Some(POOL_IDLE_TIMEOUT));
    http.set_connect_timeout(Some(TLS_HANDSHAKE_TIMEOUT));
    http.enforce_http(false);

    let https = hyper_rustls::HttpsConnectorBuilder::new()
        .with_webpki_roots()
        .https_or_http()
        .enable_http1()
        .enable_http2()
        .wrap_connector(http);

    Client::builder(TokioExecutor::new())
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .build(https)
}

/// Forward one attempt to `upstream_url` and buffer the result.
///
/// The outbound request carries the inbound method, path and query, the
/// inbound headers minus hop-by-hop ones, and the standard `X-Forwarded-*`
/// trio. Transport failure maps to a 502 capture, the 5 s deadline to 504;
/// the attempt/retry policy lives entirely in the caller.
pub async fn forward(
    client: &HttpClient,
    ctx: &RequestContext,
    upstream_url: &str,
    req_headers: &HeaderMap,
    body: Bytes,
) -> CapturedResponse {
    let uri = build_upstream_uri(upstream_url, &ctx.uri_path, &ctx.raw_query);

    let mut headers = req_headers.clone();
    remove_hop_headers(&mut headers);
    inject_forwarded_headers(&mut headers, ctx);

    let mut builder = Request::builder().method(ctx.method.as_str()).uri(&uri);
    for (name, value) in &headers {
        builder = builder.header(name, value);
    }

    let upstream_req = match builder.body(full_body(body)) {
        Ok(r) => r,
        Err(e) => {
            warn!("proxy: failed to build upstream request, url={}, error={}", uri, e);
            return CapturedResponse::gateway_error(StatusCode::BAD_GATEWAY, "bad gateway");
        }
    };

    match tokio::time::timeout(UPSTREAM_TIMEOUT, client.request(upstream_req)).await {
        Ok(Ok(resp)) => {
            let (parts, body) = resp.into_parts();
            let body = match body.collect().await {
                Ok(collected) => collected.to_bytes(),
                Err(e) => {
                    warn!("proxy: failed to read upstream body, url={}, error={}", uri, e);
                    return CapturedResponse::gateway_error(StatusCode::BAD_GATEWAY, "bad gateway");
                }
            };
            CapturedResponse {
                status: parts.status,
                headers: parts.headers,
                body,
            }
        }
        Ok(Err(e)) => {
            warn!("proxy: upstream error, url={}, error={}", uri, e);
            CapturedResponse::gateway_error(StatusCode::BAD_GATEWAY, "bad gateway")
        }
        Err(_) => {
            warn!("proxy: upstream timeout, url={}", uri);
            CapturedResponse::gateway_error(StatusCode::GATEWAY_TIMEOUT, "gateway timeout")
        }
    }
}

fn build_upstream_uri(upstream_url: &str, path: &str, raw_query: &str) -> String {
    let base = upstream_url.trim_end_matches('/');
    let mut uri = String::with_capacity(base.len() + path.len() + raw_query.len() + 1);
    uri.push_str(base);
    uri.push_str(path);
    if !raw_query.is_empty() {
        uri.push('?');
        uri.push_str(raw_query);
    }
    uri
}

fn remove_hop_headers(headers: &mut HeaderMap) {
    let hop_headers: &[HeaderName] = &[
        CONNECTION,
        HOST,
        HeaderName::from_static("keep-alive"),
        HeaderName::from_static("proxy-authenticate"),
        HeaderName::from_static("proxy-authorization"),
        HeaderName::from_static("te"),
        HeaderName::from_static("trailers"),
        TRANSFER_ENCODING,
        HeaderName::from_static("upgrade"),
    ];
    for h in hop_headers {
        headers.remove(h);
    }
}

/// Standard forwarding trio so upstream services can identify the original
/// client and protocol.
fn inject_forwarded_headers(headers: &mut HeaderMap, ctx: &RequestContext) {
    static XFF: HeaderName = HeaderName::from_static("x-forwarded-for");
    static XFH: HeaderName = HeaderName::from_static("x-forwarded-host");
    static XFP: HeaderName = HeaderName::from_static("x-forwarded-proto");

    if let Ok(v) = HeaderValue::from_str(&ctx.client_ip) {
        headers.insert(XFF.clone(), v);
    }
    if !ctx.host.is_empty() {
        if let Ok(v) = HeaderValue::from_str(&ctx.host) {
            headers.insert(XFH.clone(), v);
        }
    }
    if !headers.contains_key(&XFP) {
        headers.insert(XFP.clone(), HeaderValue::from_static("http"));
    }
}
