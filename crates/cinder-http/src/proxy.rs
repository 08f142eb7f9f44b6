//! Proxy short-circuit. Requests forwarded to the configured upstream carry
//! a loopback sentinel header; a request that already has it came back to
//! us from the upstream and must not be proxied again.

use std::time::Duration;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderMap, StatusCode};
use axum::response::Response;

use cinder_core::headers::PROXY_LOOPBACK;
use cinder_stdio as stdio;

use crate::endpoints::plain;

pub(crate) const PROXY_TIMEOUT: Duration = Duration::from_secs(5);

const HOP_BY_HOP: &[&str] = &[
    "connection",
    "keep-alive",
    "proxy-authenticate",
    "proxy-authorization",
    "te",
    "trailer",
    "trailers",
    "transfer-encoding",
    "upgrade",
];

pub(crate) fn wants_proxy(proxy: Option<&str>, headers: &HeaderMap) -> bool {
    proxy.is_some() && !headers.contains_key(PROXY_LOOPBACK)
}

/// Forward the request to `target` and relay the upstream answer verbatim
/// minus hop-by-hop headers. Any client-side failure (connect, timeout)
/// becomes a plain-text 500.
pub(crate) async fn forward(client: &reqwest::Client, target: &str, request: Request) -> Response {
    let (parts, body) = request.into_parts();

    let mut url = format!(
        "{}{}",
        target.trim_end_matches('/'),
        parts.uri.path()
    );
    if let Some(query) = parts.uri.query() {
        url.push('?');
        url.push_str(query);
    }

    let method = match reqwest::Method::from_bytes(parts.method.as_str().as_bytes()) {
        Ok(method) => method,
        Err(_) => return plain(StatusCode::INTERNAL_SERVER_ERROR, "unsupported method"),
    };

    let mut headers = reqwest::header::HeaderMap::new();
    for (name, value) in parts.headers.iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if lower == "host" || HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        let name = reqwest::header::HeaderName::from_bytes(name.as_str().as_bytes());
        let value = reqwest::header::HeaderValue::from_bytes(value.as_bytes());
        if let (Ok(name), Ok(value)) = (name, value) {
            headers.append(name, value);
        }
    }
    headers.insert(
        reqwest::header::HeaderName::from_static(PROXY_LOOPBACK),
        reqwest::header::HeaderValue::from_static("1"),
    );

    let body = axum::body::to_bytes(body, usize::MAX)
        .await
        .unwrap_or_default();
    let mut builder = client.request(method, &url).headers(headers);
    if !body.is_empty() {
        builder = builder.body(body);
    }

    match builder.send().await {
        Ok(upstream) => relay(upstream),
        Err(e) => {
            stdio::warn("proxy", &format!("upstream request failed: {}", e));
            plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("proxy request failed: {}", e),
            )
        }
    }
}

fn relay(upstream: reqwest::Response) -> Response {
    let status = StatusCode::from_u16(upstream.status().as_u16())
        .unwrap_or(StatusCode::BAD_GATEWAY);
    let mut response = Response::builder().status(status);
    for (name, value) in upstream.headers().iter() {
        let lower = name.as_str().to_ascii_lowercase();
        if HOP_BY_HOP.contains(&lower.as_str()) {
            continue;
        }
        response = response.header(name.as_str(), value.as_bytes());
    }
    response
        .body(Body::from_stream(upstream.bytes_stream()))
        .unwrap_or_else(|e| {
            plain(
                StatusCode::INTERNAL_SERVER_ERROR,
                format!("proxy relay failed: {}", e),
            )
        })
}
