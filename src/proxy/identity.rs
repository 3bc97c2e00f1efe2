use base64::Engine;
use http::header::{AUTHORIZATION, CONTENT_TYPE, COOKIE};
use http::HeaderMap;

/// Resolve the rate-limiting identity for a request.
///
/// Walks the route's identity-key list in priority order and returns the
/// first key that yields a non-empty value, tagged with its source so that
/// e.g. a header value and a cookie value with the same text stay distinct
/// bucket keys. Falls back to the client IP when nothing matches.
pub fn identify(
    keys: &[String],
    headers: &HeaderMap,
    raw_query: &str,
    body: &[u8],
    client_ip: &str,
) -> String {
    for key in keys {
        if key == "ip" {
            return format!("ip:{}", client_ip);
        }

        let Some((source, name)) = key.split_once(':') else {
            continue;
        };

        let value = match source {
            "header" => header_value(headers, name),
            "query" => urlencoded_value(raw_query.as_bytes(), name),
            "cookie" => cookie_value(headers, name),
            "form" => form_value(headers, body, name),
            "basic" => basic_username(headers),
            "jwt" => bearer_token(headers),
            _ => None,
        };

        if let Some(v) = value {
            return match source {
                "header" => format!("hdr:{}", v),
                "query" => format!("qry:{}", v),
                _ => format!("{}:{}", source, v),
            };
        }
    }

    format!("ip:{}", client_ip)
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

fn urlencoded_value(encoded: &[u8], name: &str) -> Option<String> {
    url::form_urlencoded::parse(encoded)
        .find(|(k, v)| k == name && !v.is_empty())
        .map(|(_, v)| v.into_owned())
}

fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let raw = headers.get(COOKIE)?.to_str().ok()?;
    for pair in raw.split(';') {
        let Some((k, v)) = pair.trim().split_once('=') else {
            continue;
        };
        if k == name && !v.is_empty() {
            return Some(v.to_string());
        }
    }
    None
}

/// Form identity only applies to urlencoded bodies; anything else (JSON,
/// multipart) is not parsed.
fn form_value(headers: &HeaderMap, body: &[u8], name: &str) -> Option<String> {
    let ct = headers.get(CONTENT_TYPE)?.to_str().ok()?;
    if !ct.starts_with("application/x-www-form-urlencoded") {
        return None;
    }
    urlencoded_value(body, name)
}

/// Username half of HTTP Basic credentials. The password is never used.
fn basic_username(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let encoded = raw.strip_prefix("Basic ")?;
    let decoded = base64::engine::general_purpose::STANDARD
        .decode(encoded.trim())
        .ok()?;
    let decoded = String::from_utf8(decoded).ok()?;
    let username = decoded.split(':').next().unwrap_or("");
    if username.is_empty() {
        None
    } else {
        Some(username.to_string())
    }
}

/// The raw bearer token string. Deliberately not validated — it is only a
/// bucket key, not an authentication decision.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    let raw = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let token = raw.strip_prefix("Bearer ").unwrap_or(raw);
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// First element of `X-Forwarded-For` when the request arrived through a
/// chain, otherwise the transport peer address.
pub fn real_client_ip(headers: &HeaderMap, peer_ip: &str) -> String {
    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| peer_ip.to_string())
}
