//! Caller identity resolution for quota accounting.
//!
//! Precedence: `userId` in a JSON body, `userId` in the query string, the
//! peer address, then the literal `"unknown"`.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use axum::{
    body::{Body, Bytes},
    extract::{ConnectInfo, Query, Request},
    http::{header, HeaderMap},
};
use futures_util::{stream, StreamExt};
use serde_json::Value;
use tracing::debug;

/// Field carrying an explicit caller identity, in the body or the query.
pub const IDENTITY_FIELD: &str = "userId";

/// Identity used when nothing else is available.
pub const UNKNOWN_IDENTITY: &str = "unknown";

/// Largest body buffered while looking for an identity. Larger bodies pass
/// through uninspected.
pub const MAX_IDENTITY_BODY_BYTES: usize = 1024 * 1024;

/// Where an identity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Body,
    Query,
    PeerAddress,
    Unknown,
}

impl IdentitySource {
    pub fn as_str(self) -> &'static str {
        match self {
            IdentitySource::Body => "body",
            IdentitySource::Query => "query",
            IdentitySource::PeerAddress => "peer_address",
            IdentitySource::Unknown => "unknown",
        }
    }
}

/// Resolve the caller identity.
///
/// A JSON body is inspected and handed on unchanged, so the handler still
/// sees it. Bodies that are too large or fail to read are not inspected and
/// resolution moves on to the query string. Never rejects the request.
pub async fn resolve_identity(
    request: Request,
    trust_forwarded_headers: bool,
) -> (Request, String, IdentitySource) {
    let inspect = is_json(request.headers()) && !declared_oversize(request.headers());
    let (request, from_body) = if inspect {
        let (parts, body) = request.into_parts();
        let (body, identity) = inspect_body(body).await;
        (Request::from_parts(parts, body), identity)
    } else {
        (request, None)
    };

    if let Some(identity) = from_body {
        return (request, identity, IdentitySource::Body);
    }

    if let Some(identity) = identity_from_query(&request) {
        return (request, identity, IdentitySource::Query);
    }

    if let Some(ip) = peer_ip(&request, trust_forwarded_headers) {
        return (request, ip.to_string(), IdentitySource::PeerAddress);
    }

    (request, UNKNOWN_IDENTITY.to_string(), IdentitySource::Unknown)
}

/// `Content-Length` already says the body is over the buffering cap.
fn declared_oversize(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_LENGTH)
        .and_then(|h| h.to_str().ok())
        .and_then(|len| len.trim().parse::<u64>().ok())
        .map(|len| len > MAX_IDENTITY_BODY_BYTES as u64)
        .unwrap_or(false)
}

/// Buffer up to the cap and look for an identity.
///
/// The returned body yields exactly the bytes (and any read error) the
/// original would have, including whatever lies past the cap.
async fn inspect_body(body: Body) -> (Body, Option<String>) {
    let mut data = body.into_data_stream();
    let mut chunks: Vec<Bytes> = Vec::new();
    let mut buffered = 0usize;

    while let Some(next) = data.next().await {
        match next {
            Ok(chunk) => {
                buffered += chunk.len();
                chunks.push(chunk);
                if buffered > MAX_IDENTITY_BODY_BYTES {
                    debug!(buffered, "Body over identity cap, not inspected");
                    let prefix = stream::iter(chunks.into_iter().map(Ok::<_, axum::Error>));
                    return (Body::from_stream(prefix.chain(data)), None);
                }
            }
            Err(e) => {
                debug!(error = %e, "Body read failed, not inspected");
                let prefix = stream::iter(chunks.into_iter().map(Ok));
                return (Body::from_stream(prefix.chain(stream::once(async { Err(e) }))), None);
            }
        }
    }

    let bytes = Bytes::from(chunks.concat());
    let identity = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .and_then(|value| value.get(IDENTITY_FIELD).and_then(identity_from_value));
    (Body::from(bytes), identity)
}

fn is_json(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_TYPE)
        .and_then(|h| h.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .map(|mime| {
            let mime = mime.trim();
            mime.eq_ignore_ascii_case("application/json") || mime.ends_with("+json")
        })
        .unwrap_or(false)
}

/// Strings and numbers name a caller; anything else does not.
fn identity_from_value(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn identity_from_query(request: &Request) -> Option<String> {
    let Query(params) = Query::<HashMap<String, String>>::try_from_uri(request.uri()).ok()?;
    params
        .get(IDENTITY_FIELD)
        .filter(|value| !value.is_empty())
        .cloned()
}

/// Peer address, considering proxy headers when trusted.
fn peer_ip(request: &Request, trust_forwarded_headers: bool) -> Option<IpAddr> {
    if trust_forwarded_headers {
        // X-Forwarded-For can contain multiple IPs, take the first one
        if let Some(ip) = request
            .headers()
            .get("x-forwarded-for")
            .and_then(|h| h.to_str().ok())
            .and_then(|list| list.split(',').next())
            .and_then(|first| first.trim().parse().ok())
        {
            return Some(ip);
        }

        if let Some(ip) = request
            .headers()
            .get("x-real-ip")
            .and_then(|h| h.to_str().ok())
            .and_then(|ip| ip.trim().parse().ok())
        {
            return Some(ip);
        }
    }

    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.ip())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    fn json_request(uri: &str, body: &str) -> Result<Request, String> {
        axum::http::Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .map_err(|e| e.to_string())
    }

    fn empty_request(uri: &str) -> Result<Request, String> {
        axum::http::Request::builder()
            .uri(uri)
            .body(Body::empty())
            .map_err(|e| e.to_string())
    }

    #[tokio::test]
    async fn test_body_identity_wins_and_body_is_preserved() -> Result<(), String> {
        let body = r#"{"userId":"u1","sql":"select 1"}"#;
        let request = json_request("/q?userId=u2", body)?;
        let (request, identity, source) = resolve_identity(request, false).await;
        assert_eq!(identity, "u1");
        assert_eq!(source, IdentitySource::Body);

        let bytes = to_bytes(request.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(bytes.as_ref(), body.as_bytes());
        Ok(())
    }

    #[tokio::test]
    async fn test_numeric_body_identity() -> Result<(), String> {
        let request = json_request("/q", r#"{"userId":42}"#)?;
        let (_, identity, _) = resolve_identity(request, false).await;
        assert_eq!(identity, "42");
        Ok(())
    }

    #[tokio::test]
    async fn test_query_identity_when_body_lacks_one() -> Result<(), String> {
        let request = json_request("/q?userId=u%202", r#"{"userId":""}"#)?;
        let (_, identity, source) = resolve_identity(request, false).await;
        assert_eq!(identity, "u 2");
        assert_eq!(source, IdentitySource::Query);
        Ok(())
    }

    #[tokio::test]
    async fn test_non_json_body_is_not_inspected() -> Result<(), String> {
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/q")
            .header("content-type", "text/plain")
            .body(Body::from(r#"{"userId":"u1"}"#))
            .map_err(|e| e.to_string())?;
        let (_, identity, source) = resolve_identity(request, false).await;
        assert_eq!(identity, UNKNOWN_IDENTITY);
        assert_eq!(source, IdentitySource::Unknown);
        Ok(())
    }

    #[tokio::test]
    async fn test_peer_address() -> Result<(), String> {
        let mut request = empty_request("/q")?;
        let addr: SocketAddr = "10.1.2.3:5555".parse().map_err(|e| format!("{e}"))?;
        request.extensions_mut().insert(ConnectInfo(addr));
        let (_, identity, source) = resolve_identity(request, false).await;
        assert_eq!(identity, "10.1.2.3");
        assert_eq!(source, IdentitySource::PeerAddress);
        Ok(())
    }

    #[tokio::test]
    async fn test_forwarded_headers_need_trust() -> Result<(), String> {
        let build = || {
            axum::http::Request::builder()
                .uri("/q")
                .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
                .body(Body::empty())
                .map_err(|e| e.to_string())
        };

        let (_, identity, _) = resolve_identity(build()?, false).await;
        assert_eq!(identity, UNKNOWN_IDENTITY);

        let (_, identity, _) = resolve_identity(build()?, true).await;
        assert_eq!(identity, "203.0.113.9");
        Ok(())
    }

    fn oversized_payload() -> String {
        format!(
            r#"{{"userId":"u1","data":"{}"}}"#,
            "x".repeat(MAX_IDENTITY_BODY_BYTES + 1)
        )
    }

    #[tokio::test]
    async fn test_declared_oversize_body_falls_through_to_query() -> Result<(), String> {
        let payload = oversized_payload();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/q?userId=u2")
            .header("content-type", "application/json")
            .header("content-length", payload.len().to_string())
            .body(Body::from(payload.clone()))
            .map_err(|e| e.to_string())?;

        let (request, identity, source) = resolve_identity(request, false).await;
        assert_eq!(identity, "u2");
        assert_eq!(source, IdentitySource::Query);

        let bytes = to_bytes(request.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(bytes.len(), payload.len());
        Ok(())
    }

    #[tokio::test]
    async fn test_unsized_stream_over_cap_is_passed_on_whole() -> Result<(), String> {
        let payload = oversized_payload();
        let chunks: Vec<Result<Bytes, std::io::Error>> = payload
            .as_bytes()
            .chunks(64 * 1024)
            .map(|c| Ok(Bytes::copy_from_slice(c)))
            .collect();
        let request = axum::http::Request::builder()
            .method("POST")
            .uri("/q")
            .header("content-type", "application/json")
            .body(Body::from_stream(stream::iter(chunks)))
            .map_err(|e| e.to_string())?;

        let (request, identity, source) = resolve_identity(request, false).await;
        assert_eq!(identity, UNKNOWN_IDENTITY);
        assert_eq!(source, IdentitySource::Unknown);

        let bytes = to_bytes(request.into_body(), usize::MAX)
            .await
            .map_err(|e| e.to_string())?;
        assert_eq!(bytes.as_ref(), payload.as_bytes());
        Ok(())
    }

    #[test]
    fn test_declared_oversize() {
        let mut headers = HeaderMap::new();
        assert!(!declared_oversize(&headers));
        headers.insert(
            header::CONTENT_LENGTH,
            header::HeaderValue::from(MAX_IDENTITY_BODY_BYTES as u64),
        );
        assert!(!declared_oversize(&headers));
        headers.insert(
            header::CONTENT_LENGTH,
            header::HeaderValue::from(MAX_IDENTITY_BODY_BYTES as u64 + 1),
        );
        assert!(declared_oversize(&headers));
    }

    #[test]
    fn test_is_json() {
        let mut headers = HeaderMap::new();
        assert!(!is_json(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/json; charset=utf-8"),
        );
        assert!(is_json(&headers));
        headers.insert(
            header::CONTENT_TYPE,
            header::HeaderValue::from_static("application/vnd.api+json"),
        );
        assert!(is_json(&headers));
    }
}
