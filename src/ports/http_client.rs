use http::{Request, Response, StatusCode};
use thiserror::Error;

use crate::adapters::body::ProxyBody;

/// Errors surfaced by the outbound client talking to backend targets.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum HttpClientError {
    /// TCP connect failure, DNS failure, or the connection was reset/closed
    /// before a response was read.
    #[error("connection error: {0}")]
    ConnectionError(String),

    /// The request exceeded the backend group's configured timeout.
    #[error("request timed out after {0} seconds")]
    TimeoutError(u64),

    /// The outbound request could not even be constructed.
    #[error("invalid request: {0}")]
    InvalidRequestError(String),

    /// The backend responded, but with a status the caller treats as an error.
    #[error("backend returned error status: {status}, url: {url}")]
    BackendError { url: String, status: StatusCode },
}

pub type HttpClientResult<T> = Result<T, HttpClientError>;

/// Port for sending requests to backend targets. Implementations own their
/// own connection pool; callers never see hyper/rustls types directly.
pub trait HttpClient: Send + Sync + 'static {
    fn send_request(
        &self,
        req: Request<ProxyBody>,
    ) -> impl std::future::Future<Output = HttpClientResult<Response<ProxyBody>>> + Send;

    fn health_check(
        &self,
        url: &str,
        timeout_secs: u64,
    ) -> impl std::future::Future<Output = HttpClientResult<bool>> + Send;
}
