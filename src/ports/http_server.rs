use axum::body::Body as AxumBody;
use http::{Request, Response};
use std::future::Future;
use std::net::SocketAddr;
use std::pin::Pin;
use thiserror::Error;

use crate::adapters::body::ProxyBody;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HandlerError {
    #[error("request handling error: {0}")]
    RequestError(String),
}

pub type ServerRunFuture<'a> = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;

pub type HandlerResponseFuture<'a> =
    Pin<Box<dyn Future<Output = Result<Response<ProxyBody>, HandlerError>> + Send + 'a>>;

pub trait HttpServer: Send + Sync + 'static {
    fn run<'a>(&'a self) -> ServerRunFuture<'a>;
}

/// HttpHandler is the single seam both the TCP/TLS listener (via axum) and
/// the QUIC/HTTP-3 listener (via quiche) call into, so the same router,
/// load-balancer and upstream-dispatch logic serves both transports.
pub trait HttpHandler: Send + Sync + 'static {
    fn handle_request<'a>(
        &'a self,
        req: Request<AxumBody>,
        remote_addr: SocketAddr,
    ) -> HandlerResponseFuture<'a>;
}
