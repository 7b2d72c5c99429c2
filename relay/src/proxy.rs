//! Host-routed HTTP reverse proxy (spec.md §4.4, C4).
//!
//! Generalizes `jizhuozhi-hermes`'s `proxy::handler::handle_request` (route
//! match → upstream forward → response passthrough) down to this system's
//! single routing key: the subdomain carried in the request's host. Unlike
//! the teacher's own `relay/src/router.rs`, request and response bodies are
//! streamed straight through rather than buffered, since a tunnel's payload
//! size and shape are unknown up front.

use std::sync::Arc;

use bytes::Bytes;
use http::header::{CONTENT_ENCODING, HOST};
use http::{Request, Response, StatusCode};
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use regex::Regex;
use std::sync::OnceLock;

use crate::registry::Registry;

pub type ProxyBody = BoxBody<Bytes, hyper::Error>;

pub fn full_body(data: impl Into<Bytes>) -> ProxyBody {
    Full::new(data.into()).map_err(|never| match never {}).boxed()
}

/// Shared state the proxy handler needs per request.
#[derive(Clone)]
pub struct ProxyState {
    pub registry: Arc<Registry>,
    pub domain: String,
    pub behind_proxy: bool,
    client: Client<HttpConnector, Incoming>,
}

impl ProxyState {
    pub fn new(registry: Arc<Registry>, domain: String, behind_proxy: bool) -> Self {
        Self {
            registry,
            domain,
            behind_proxy,
            client: Client::builder(TokioExecutor::new()).build_http(),
        }
    }
}

/// Handle one inbound HTTP request: resolve its subdomain, look it up in
/// the registry, and stream the request through to the tenant's upstream.
pub async fn handle_request(
    req: Request<Incoming>,
    state: ProxyState,
) -> Result<Response<ProxyBody>, hyper::Error> {
    let host_header = req
        .headers()
        .get(effective_host_header(&state))
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .to_string();

    let subdomain = match extract_subdomain(&host_header, &state.domain, state.behind_proxy) {
        Some(s) => s,
        None => {
            tracing::debug!(host = %host_header, "proxy: could not extract a subdomain");
            return Ok(error_response(StatusCode::NOT_FOUND, "404 Not Found"));
        }
    };

    let upstream = match state.registry.lookup(&subdomain).await {
        Some(u) => u,
        None => {
            tracing::debug!(%subdomain, "proxy: no live tunnel for subdomain");
            return Ok(error_response(StatusCode::NOT_FOUND, "404 Not Found"));
        }
    };

    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_owned())
        .unwrap_or_else(|| "/".to_owned());
    let upstream_uri = format!("http://{}:{}{}", upstream.host, upstream.port, path_and_query);

    let (mut parts, body) = req.into_parts();
    parts.uri = match upstream_uri.parse() {
        Ok(uri) => uri,
        Err(_) => return Ok(error_response(StatusCode::BAD_GATEWAY, "bad gateway")),
    };
    let upstream_req = Request::from_parts(parts, body);

    match state.client.request(upstream_req).await {
        Ok(resp) => {
            let (mut parts, body) = resp.into_parts();
            // Don't let the upstream's transport-encoding decisions leak
            // through unexamined; the tunnel carries the body verbatim.
            parts.headers.remove(CONTENT_ENCODING);
            Ok(Response::from_parts(parts, body.boxed()))
        }
        Err(e) => {
            tracing::warn!(%subdomain, "proxy: upstream request failed: {e}");
            Ok(error_response(StatusCode::BAD_GATEWAY, "bad gateway"))
        }
    }
}

fn effective_host_header(state: &ProxyState) -> http::HeaderName {
    if state.behind_proxy {
        http::HeaderName::from_static("x-forwarded-host")
    } else {
        HOST
    }
}

fn fallback_host_label_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([a-zA-Z0-9-]+)\.").expect("static pattern is valid"))
}

/// Extract the leading DNS label from a `Host` (or `X-Forwarded-Host`) value
/// as the tenant's subdomain.
///
/// The direct path strips the exact `.{domain}` suffix. Behind a trusted
/// proxy that header can arrive reshaped (extra segments, a stray port, a
/// different case) so a regex fallback picks the first label instead of
/// failing outright — this fallback is deliberately not used on the direct
/// path, where an exact match is the stronger and cheaper guarantee.
fn extract_subdomain(host_header: &str, domain: &str, behind_proxy: bool) -> Option<String> {
    let host = host_header.split(':').next().unwrap_or(host_header);
    let suffix = format!(".{domain}");
    if let Some(stripped) = host.strip_suffix(&suffix) {
        if !stripped.is_empty() {
            return Some(stripped.to_string());
        }
    }

    if behind_proxy {
        if let Some(caps) = fallback_host_label_re().captures(host) {
            return Some(caps[1].to_string());
        }
    }

    None
}

fn error_response(status: StatusCode, msg: &str) -> Response<ProxyBody> {
    Response::builder()
        .status(status)
        .header("content-type", "text/plain")
        .body(full_body(msg.to_string()))
        .expect("static response is well-formed")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direct_subdomain_extraction() {
        assert_eq!(
            extract_subdomain("abc123.example.com", "example.com", false),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn direct_extraction_ignores_port() {
        assert_eq!(
            extract_subdomain("abc123.example.com:8080", "example.com", false),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn direct_extraction_rejects_bare_domain() {
        assert_eq!(extract_subdomain("example.com", "example.com", false), None);
    }

    #[test]
    fn direct_extraction_rejects_unrelated_host() {
        assert_eq!(
            extract_subdomain("abc123.other.com", "example.com", false),
            None
        );
    }

    #[test]
    fn behind_proxy_falls_back_to_leading_label() {
        assert_eq!(
            extract_subdomain("abc123.internal-lb.local", "example.com", true),
            Some("abc123".to_string())
        );
    }

    #[test]
    fn fallback_is_not_used_when_not_behind_proxy() {
        assert_eq!(
            extract_subdomain("abc123.internal-lb.local", "example.com", false),
            None
        );
    }
}
