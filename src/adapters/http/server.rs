use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::body::Body as AxumBody;
use axum::extract::{ConnectInfo, State};
use axum::routing::any;
use axum::Router;
use http::{Request, StatusCode};

use crate::ports::http_server::{HttpHandler, HttpServer, ServerRunFuture};
use crate::utils::graceful_shutdown::ShutdownToken;

/// Plain HTTP/1.1 (and h2c) listener bound to `server.fallback_addr`. Exists
/// only as a test ingress for clients without HTTP/3 support: every request
/// is handed to the same `HttpHandler` the QUIC listener calls into, so its
/// behavior is identical to the HTTP/3 path once a request is parsed.
pub struct FallbackServer<H: HttpHandler> {
    addr: SocketAddr,
    handler: Arc<H>,
    shutdown: ShutdownToken,
}

impl<H: HttpHandler> FallbackServer<H> {
    pub fn new(addr: SocketAddr, handler: Arc<H>, shutdown: ShutdownToken) -> Self {
        Self {
            addr,
            handler,
            shutdown,
        }
    }
}

impl<H: HttpHandler> HttpServer for FallbackServer<H> {
    fn run<'a>(&'a self) -> ServerRunFuture<'a> {
        Box::pin(async move {
            let app = Router::new()
                .fallback(any(proxy_request::<H>))
                .with_state(self.handler.clone());

            let listener = tokio::net::TcpListener::bind(self.addr)
                .await
                .with_context(|| format!("binding fallback listener on {}", self.addr))?;

            tracing::info!(addr = %self.addr, "fallback HTTP listener ready");

            let mut shutdown = self.shutdown.clone();
            axum::serve(
                listener,
                app.into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move {
                shutdown.cancelled().await;
            })
            .await
            .context("fallback HTTP server error")
        })
    }
}

async fn proxy_request<H: HttpHandler>(
    State(handler): State<Arc<H>>,
    ConnectInfo(remote_addr): ConnectInfo<SocketAddr>,
    req: Request<AxumBody>,
) -> axum::response::Response {
    match handler.handle_request(req, remote_addr).await {
        Ok(response) => {
            let (parts, body) = response.into_parts();
            axum::response::Response::from_parts(parts, AxumBody::new(body))
        }
        Err(err) => {
            tracing::error!(error = %err, "fallback handler error");
            axum::response::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .body(AxumBody::empty())
                .expect("static error response is always well-formed")
        }
    }
}
