use bytes::Bytes;
use http_body_util::combinators::BoxBody;
use http_body_util::{BodyExt, Empty, Full};
use std::convert::Infallible;

/// The body currency used everywhere a request or response body crosses a
/// port boundary. Boxing erases whether the bytes come from an axum
/// `Incoming` body, a buffered `Full`, or a channel-fed stream bridging the
/// HTTP/3 event loop, so the router, load balancer and upstream client never
/// need to know which listener originated the request.
pub type ProxyBody = BoxBody<Bytes, anyhow::Error>;

pub fn empty_body() -> ProxyBody {
    Empty::<Bytes>::new()
        .map_err(|never: Infallible| match never {})
        .boxed()
}

pub fn full_body(bytes: impl Into<Bytes>) -> ProxyBody {
    Full::new(bytes.into())
        .map_err(|never: Infallible| match never {})
        .boxed()
}

pub fn json_body(value: &serde_json::Value) -> ProxyBody {
    full_body(serde_json::to_vec(value).unwrap_or_default())
}
