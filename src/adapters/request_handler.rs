use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::body::Body as AxumBody;
use chrono::Utc;
use http::header::{HeaderName, HeaderValue};
use http::{HeaderMap, Method, Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use serde_json::json;

use crate::adapters::body::{full_body, json_body, ProxyBody};
use crate::adapters::http_client::HyperHttpClient;
use crate::core::ProxyService;
use crate::ports::http_client::HttpClient;
use crate::ports::http_server::{HandlerResponseFuture, HttpHandler};
use crate::upstream::UpstreamError;

/// RFC 7230 section 6.1 hop-by-hop headers: meaningful only for one
/// transport hop, never meant to be forwarded to (or from) the next. Any
/// `Proxy-*` header is stripped too (not just the two registered ones),
/// per the `Proxy-*` wildcard in the routing contract.
const HOP_BY_HOP_HEADERS: &[&str] = &[
    "connection",
    "keep-alive",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Implements the request-handling contract shared by both the TCP/TLS
/// fallback listener and the QUIC/HTTP-3 listener: route, pick a backend,
/// forward, stream the response back. Neither listener's transport details
/// leak past `handle`.
pub struct ProxyHandler {
    proxy_service: Arc<ProxyService>,
    http_client: Arc<HyperHttpClient>,
}

impl ProxyHandler {
    pub fn new(proxy_service: Arc<ProxyService>, http_client: Arc<HyperHttpClient>) -> Self {
        Self {
            proxy_service,
            http_client,
        }
    }

    pub async fn handle(
        &self,
        req: Request<ProxyBody>,
        remote_addr: SocketAddr,
    ) -> Response<ProxyBody> {
        let method = req.method().clone();
        let uri = req.uri().clone();
        let path = uri.path().to_string();

        if path == "/health" {
            return self.health_response();
        }

        let host = req
            .headers()
            .get(http::header::HOST)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let matched = match self
            .proxy_service
            .route(&method, &path, host.as_deref(), req.headers())
        {
            Some(matched) => matched,
            None => return Self::plain_status_response(StatusCode::NOT_FOUND, "no matching route"),
        };

        let group = match self.proxy_service.group(&matched.backend) {
            Some(group) => group,
            None => {
                tracing::error!(backend = %matched.backend, "matched route references unknown backend group");
                return Self::plain_status_response(
                    StatusCode::BAD_GATEWAY,
                    "backend group misconfigured",
                );
            }
        };

        let backend = match group.pick() {
            Ok(backend) => backend,
            Err(_) => {
                return Self::plain_status_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    "no healthy backends available",
                )
            }
        };

        let _in_flight = backend.begin_request();
        let mut timer = crate::metrics::BackendRequestTimer::new(matched.backend.clone());

        let request_size = content_length(req.headers());
        let (req_parts, req_body) = req.into_parts();

        let outbound = match Self::build_outbound_request(
            &req_parts,
            req_body,
            &matched.rewritten_path,
            backend.url.as_str(),
            backend.url.authority(),
            remote_addr,
        ) {
            Ok(outbound) => outbound,
            Err(message) => {
                timer.mark_failure();
                return Self::plain_status_response(StatusCode::BAD_GATEWAY, &message);
            }
        };

        let start = Instant::now();
        let dispatch = tokio::time::timeout(group.timeout, self.http_client.send_request(outbound)).await;

        let response = match dispatch {
            Ok(Ok(response)) => response,
            Ok(Err(err)) => {
                timer.mark_failure();
                Self::record_passive_failure(&backend, &group);
                let classified = UpstreamError::from(&err);
                tracing::warn!(backend = %backend.url, error = %classified, "backend dispatch failed");
                return Self::plain_status_response(classified.status_code(), "upstream request failed");
            }
            Err(_) => {
                timer.mark_failure();
                Self::record_passive_failure(&backend, &group);
                let classified = UpstreamError::timed_out(group.timeout);
                tracing::warn!(backend = %backend.url, timeout = ?group.timeout, "backend request timed out");
                return Self::plain_status_response(classified.status_code(), "upstream request timed out");
            }
        };

        crate::metrics::record_request_duration(method.as_str(), &matched.backend, start.elapsed());
        if let Some(size) = request_size {
            crate::metrics::record_request_size(&matched.backend, size);
        }

        let (mut parts, body) = response.into_parts();
        strip_hop_by_hop(&mut parts.headers);
        parts.headers.insert(
            HeaderName::from_static("via"),
            HeaderValue::from_static("2.0 quicproxy"),
        );
        if let Ok(value) = HeaderValue::from_str(&matched.backend) {
            parts.headers.insert(HeaderName::from_static("x-backend"), value);
        }

        crate::metrics::increment_requests_total(method.as_str(), parts.status.as_u16(), &matched.backend);
        if let Some(size) = content_length(&parts.headers) {
            crate::metrics::record_response_size(&matched.backend, size);
        }

        Response::from_parts(parts, body)
    }

    fn build_outbound_request(
        req_parts: &http::request::Parts,
        req_body: ProxyBody,
        rewritten_path: &str,
        backend_base: &str,
        backend_authority: &str,
        remote_addr: SocketAddr,
    ) -> Result<Request<ProxyBody>, String> {
        let query = req_parts
            .uri
            .query()
            .map(|q| format!("?{q}"))
            .unwrap_or_default();
        let target_uri: Uri = format!("{}{}{}", backend_base.trim_end_matches('/'), rewritten_path, query)
            .parse()
            .map_err(|e| format!("invalid upstream URI: {e}"))?;

        let mut builder = Request::builder().method(req_parts.method.clone()).uri(target_uri);

        let mut headers = req_parts.headers.clone();
        strip_hop_by_hop(&mut headers);
        headers.insert(
            http::header::HOST,
            HeaderValue::from_str(backend_authority).map_err(|e| e.to_string())?,
        );

        append_forwarding_headers(&mut headers, remote_addr);

        for (name, value) in headers.iter() {
            builder = builder.header(name, value);
        }

        builder
            .body(req_body)
            .map_err(|e| format!("failed to build upstream request: {e}"))
    }

    /// Feeds a transport-level upstream failure into the same flap-damped
    /// state machine active health probes use. HTTP 4xx/5xx responses never
    /// reach here; only connect/DNS/timeout/EOF failures count.
    fn record_passive_failure(backend: &crate::core::backend::Backend, group: &crate::core::BackendGroup) {
        let transitioned =
            backend.record_probe_failure(group.health_check.unhealthy_threshold);
        if transitioned {
            tracing::warn!(backend = %backend.url, "backend marked unhealthy after passive transport failures");
            crate::metrics::set_backend_health_status(backend.url.as_str(), false);
        }
    }

    fn health_response(&self) -> Response<ProxyBody> {
        let summary = self.proxy_service.health_summary();
        let body = json!({
            "status": summary.status(),
            "healthy_backends": summary.healthy_backends,
            "total_backends": summary.total_backends,
            "timestamp": Utc::now().to_rfc3339(),
        });

        Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "application/json")
            .body(json_body(&body))
            .expect("static health response is always well-formed")
    }

    fn plain_status_response(status: StatusCode, message: &str) -> Response<ProxyBody> {
        Response::builder()
            .status(status)
            .header(http::header::CONTENT_TYPE, "text/plain")
            .body(full_body(message.as_bytes().to_vec()))
            .expect("static error response is always well-formed")
    }
}

fn strip_hop_by_hop(headers: &mut HeaderMap) {
    for name in HOP_BY_HOP_HEADERS {
        headers.remove(*name);
    }
    let proxy_prefixed: Vec<HeaderName> = headers
        .keys()
        .filter(|name| name.as_str().starts_with("proxy-"))
        .cloned()
        .collect();
    for name in proxy_prefixed {
        headers.remove(name);
    }
}

fn append_forwarding_headers(headers: &mut HeaderMap, remote_addr: SocketAddr) {
    let client_ip = remote_addr.ip().to_string();

    let forwarded_for = match headers.get("x-forwarded-for").and_then(|v| v.to_str().ok()) {
        Some(existing) => format!("{existing}, {client_ip}"),
        None => client_ip.clone(),
    };
    if let Ok(value) = HeaderValue::from_str(&forwarded_for) {
        headers.insert(HeaderName::from_static("x-forwarded-for"), value);
    }

    if let Ok(value) = HeaderValue::from_str(&client_ip) {
        headers.insert(HeaderName::from_static("x-real-ip"), value);
    }

    headers.insert(
        HeaderName::from_static("x-forwarded-proto"),
        HeaderValue::from_static("https"),
    );
}

fn content_length(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(http::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse().ok())
}

impl HttpHandler for ProxyHandler {
    fn handle_request<'a>(
        &'a self,
        req: Request<AxumBody>,
        remote_addr: SocketAddr,
    ) -> HandlerResponseFuture<'a> {
        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let boxed_body = body.map_err(anyhow::Error::from).boxed();
            let req = Request::from_parts(parts, boxed_body);
            Ok(self.handle(req, remote_addr).await)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::*;
    use crate::core::ProxyService;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;

    fn config() -> ServerConfig {
        ServerConfig {
            server: ServerSection {
                listen_addr: "0.0.0.0:4433".to_string(),
                fallback_addr: None,
                tls: TlsConfig {
                    cert_path: "cert.pem".to_string(),
                    key_path: "key.pem".to_string(),
                },
                quic: QuicConfig::default(),
            },
            backend_groups: vec![BackendGroupConfig {
                name: "api".to_string(),
                targets: vec![TargetConfig {
                    url: "http://127.0.0.1:9001".to_string(),
                    weight: 1,
                }],
                strategy: Strategy::RoundRobin,
                health_check: HealthCheckSpecConfig::default(),
                timeout: Duration::from_secs(10),
                retries: 0,
            }],
            routing: RoutingConfig {
                rules: vec![RouteRuleConfig {
                    path_prefix: Some("/api".to_string()),
                    backend: "api".to_string(),
                    strip_prefix: true,
                    ..Default::default()
                }],
                default_backend: None,
            },
            telemetry: TelemetryConfig::default(),
        }
    }

    fn remote() -> SocketAddr {
        SocketAddr::new(IpAddr::V4(Ipv4Addr::new(203, 0, 113, 7)), 51000)
    }

    #[tokio::test]
    async fn unmatched_route_yields_404() {
        let service = Arc::new(ProxyService::new(Arc::new(config())).unwrap());
        let client = Arc::new(HyperHttpClient::new().unwrap());
        let handler = ProxyHandler::new(service, client);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/nowhere")
            .body(crate::adapters::body::empty_body())
            .unwrap();

        let response = handler.handle(req, remote()).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn all_backends_unhealthy_yields_503() {
        let service = Arc::new(ProxyService::new(Arc::new(config())).unwrap());
        for backend in &service.group("api").unwrap().backends {
            backend.record_probe_failure(1);
        }
        let client = Arc::new(HyperHttpClient::new().unwrap());
        let handler = ProxyHandler::new(service, client);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/api/widgets")
            .body(crate::adapters::body::empty_body())
            .unwrap();

        let response = handler.handle(req, remote()).await;
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn health_endpoint_reports_json_summary() {
        let service = Arc::new(ProxyService::new(Arc::new(config())).unwrap());
        let client = Arc::new(HyperHttpClient::new().unwrap());
        let handler = ProxyHandler::new(service, client);

        let req = Request::builder()
            .method(Method::GET)
            .uri("/health")
            .body(crate::adapters::body::empty_body())
            .unwrap();

        let response = handler.handle(req, remote()).await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(
            response.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
    }

    #[test]
    fn forwarding_headers_chain_existing_x_forwarded_for() {
        let mut headers = HeaderMap::new();
        headers.insert("x-forwarded-for", HeaderValue::from_static("198.51.100.2"));
        append_forwarding_headers(&mut headers, remote());
        assert_eq!(
            headers.get("x-forwarded-for").unwrap(),
            "198.51.100.2, 203.0.113.7"
        );
        assert_eq!(headers.get("x-real-ip").unwrap(), "203.0.113.7");
        assert_eq!(headers.get("x-forwarded-proto").unwrap(), "https");
    }

    #[test]
    fn hop_by_hop_headers_are_stripped() {
        let mut headers = HeaderMap::new();
        headers.insert("connection", HeaderValue::from_static("keep-alive"));
        headers.insert("transfer-encoding", HeaderValue::from_static("chunked"));
        headers.insert("proxy-authorization", HeaderValue::from_static("Basic xyz"));
        headers.insert("x-custom", HeaderValue::from_static("keep"));
        strip_hop_by_hop(&mut headers);
        assert!(headers.get("connection").is_none());
        assert!(headers.get("transfer-encoding").is_none());
        assert!(headers.get("proxy-authorization").is_none());
        assert!(headers.get("x-custom").is_some());
    }
}
