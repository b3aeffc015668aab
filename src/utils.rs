use axum::extract::ConnectInfo;
use axum::http::{HeaderMap, Request};
use std::net::SocketAddr;

/// Best-effort client address for rate-limit keying and audit metadata.
///
/// Prefers proxy-set headers, then the connection peer address. The reverse
/// proxy in front of the plane is expected to set X-Forwarded-For and strip
/// inbound copies from untrusted sources.
pub fn extract_client_ip<B>(request: &Request<B>) -> String {
    if let Some(ip) = forwarded_ip(request.headers()) {
        return ip;
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn forwarded_ip(headers: &HeaderMap) -> Option<String> {
    if let Some(forwarded) = headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        if let Some(first) = forwarded.split(',').next() {
            let trimmed = first.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }

    headers
        .get("x-real-ip")
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;

    fn request_with(header: Option<(&str, &str)>) -> Request<Body> {
        let mut builder = Request::builder().uri("/");
        if let Some((name, value)) = header {
            builder = builder.header(name, value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn forwarded_for_takes_the_first_hop() {
        let req = request_with(Some(("x-forwarded-for", "10.1.2.3, 172.16.0.1")));
        assert_eq!(extract_client_ip(&req), "10.1.2.3");
    }

    #[test]
    fn real_ip_is_the_fallback_header() {
        let req = request_with(Some(("x-real-ip", "10.9.8.7")));
        assert_eq!(extract_client_ip(&req), "10.9.8.7");
    }

    #[test]
    fn unknown_without_headers_or_peer() {
        let req = request_with(None);
        assert_eq!(extract_client_ip(&req), "unknown");
    }
}
