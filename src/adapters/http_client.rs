use std::time::Duration;

use http::{Request, Response};
use http_body_util::BodyExt;
use hyper_rustls::HttpsConnectorBuilder;
use hyper_util::client::legacy::connect::HttpConnector;
use hyper_util::client::legacy::Client;
use hyper_util::rt::TokioExecutor;
use tokio::time::timeout;

use crate::adapters::body::{empty_body, ProxyBody};
use crate::ports::http_client::{HttpClient, HttpClientError, HttpClientResult};

type Connector = hyper_rustls::HttpsConnector<HttpConnector>;

/// Upstream HTTP client backing one or more `Backend`s. Connection pooling
/// is keyed per-origin by the underlying hyper client, so a single instance
/// can safely be shared across every backend in a group.
pub struct HyperHttpClient {
    client: Client<Connector, ProxyBody>,
}

impl HyperHttpClient {
    pub fn new() -> anyhow::Result<Self> {
        // hyper-rustls needs a process-wide default `CryptoProvider` before it
        // can build a `ClientConfig`; install one defensively since quiche
        // (used by the HTTP/3 listener) links its own TLS stack and doesn't
        // install one for us. Safe to call more than once per process: a
        // second install attempt just reports already-installed and is ignored.
        let _ = rustls::crypto::aws_lc_rs::default_provider().install_default();

        let mut connector = HttpConnector::new();
        // Connect sub-deadline, independent of the per-request group timeout.
        connector.set_connect_timeout(Some(Duration::from_secs(5)));

        let https = HttpsConnectorBuilder::new()
            .with_native_roots()?
            .https_or_http()
            .enable_http1()
            .enable_http2()
            .wrap_connector(connector);

        // Defaults from the backend-pool spec: 10 idle connections per
        // origin, closed after 90s idle. hyper-util's legacy client pools
        // per-authority internally, so this single instance is safely
        // shared across every `Backend` that talks to a distinct origin.
        let client = Client::builder(TokioExecutor::new())
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(10)
            .build(https);

        Ok(Self { client })
    }
}

impl HttpClient for HyperHttpClient {
    fn send_request(
        &self,
        req: Request<ProxyBody>,
    ) -> impl std::future::Future<Output = HttpClientResult<Response<ProxyBody>>> + Send {
        let client = self.client.clone();

        async move {
            let response = client
                .request(req)
                .await
                .map_err(|e| HttpClientError::ConnectionError(e.to_string()))?;

            let (parts, body) = response.into_parts();
            let boxed_body = body.map_err(anyhow::Error::from).boxed();
            Ok(Response::from_parts(parts, boxed_body))
        }
    }

    fn health_check(
        &self,
        url: &str,
        timeout_secs: u64,
    ) -> impl std::future::Future<Output = HttpClientResult<bool>> + Send {
        let client = self.client.clone();
        let url = url.to_string();

        async move {
            let req = Request::builder()
                .method("GET")
                .uri(&url)
                .body(empty_body())
                .map_err(|e| HttpClientError::InvalidRequestError(e.to_string()))?;

            match timeout(Duration::from_secs(timeout_secs), client.request(req)).await {
                Ok(Ok(response)) => Ok(response.status().is_success()),
                Ok(Err(_)) => Ok(false),
                Err(_) => Ok(false),
            }
        }
    }
}
