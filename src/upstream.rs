use std::time::Duration;

use http::StatusCode;
use thiserror::Error;

use crate::ports::http_client::HttpClientError;

/// Upstream dispatch failure, classified independently of which `HttpClient`
/// implementation produced it. The request handler inspects this to choose
/// between a 502 and a 504 per the error taxonomy: every transport failure
/// before headers arrive is a 502 except an elapsed per-request deadline,
/// which is a 504.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum UpstreamError {
    #[error("connection error: {0}")]
    Connect(String),

    #[error("request timed out after {0:?}")]
    Timeout(Duration),

    #[error("TLS handshake failed: {0}")]
    Tls(String),

    #[error("DNS resolution failed: {0}")]
    Dns(String),
}

impl UpstreamError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            UpstreamError::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
            UpstreamError::Connect(_) | UpstreamError::Tls(_) | UpstreamError::Dns(_) => {
                StatusCode::BAD_GATEWAY
            }
        }
    }

    pub fn timed_out(deadline: Duration) -> Self {
        UpstreamError::Timeout(deadline)
    }
}

impl From<&HttpClientError> for UpstreamError {
    fn from(err: &HttpClientError) -> Self {
        match err {
            HttpClientError::TimeoutError(secs) => {
                UpstreamError::Timeout(Duration::from_secs(*secs))
            }
            HttpClientError::ConnectionError(message) => classify_connection_error(message),
            HttpClientError::InvalidRequestError(message) => {
                UpstreamError::Connect(message.clone())
            }
            HttpClientError::BackendError { url, status } => {
                UpstreamError::Connect(format!("{url} returned {status}"))
            }
        }
    }
}

/// hyper/rustls error messages carry enough text to tell a DNS failure and a
/// TLS failure apart from a bare connection refusal; there's no distinct
/// error type for either at the `HttpClientError` boundary.
fn classify_connection_error(message: &str) -> UpstreamError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("dns") || lower.contains("resolve") || lower.contains("name resolution") {
        UpstreamError::Dns(message.to_string())
    } else if lower.contains("tls") || lower.contains("certificate") || lower.contains("handshake")
    {
        UpstreamError::Tls(message.to_string())
    } else {
        UpstreamError::Connect(message.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_maps_to_504() {
        let err = UpstreamError::Timeout(Duration::from_secs(5));
        assert_eq!(err.status_code(), StatusCode::GATEWAY_TIMEOUT);
    }

    #[test]
    fn connect_tls_and_dns_map_to_502() {
        assert_eq!(
            UpstreamError::Connect("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            UpstreamError::Tls("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            UpstreamError::Dns("x".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
    }

    #[test]
    fn classifies_dns_failure_message() {
        let classified =
            classify_connection_error("dns error: failed to lookup address information");
        assert!(matches!(classified, UpstreamError::Dns(_)));
    }

    #[test]
    fn classifies_tls_failure_message() {
        let classified = classify_connection_error("invalid peer certificate: UnknownIssuer");
        assert!(matches!(classified, UpstreamError::Tls(_)));
    }

    #[test]
    fn falls_back_to_connect_for_generic_message() {
        let classified = classify_connection_error("connection refused");
        assert!(matches!(classified, UpstreamError::Connect(_)));
    }

    #[test]
    fn from_http_client_error_preserves_timeout_duration() {
        let err = HttpClientError::TimeoutError(7);
        let classified = UpstreamError::from(&err);
        assert!(matches!(classified, UpstreamError::Timeout(d) if d == Duration::from_secs(7)));
    }
}
