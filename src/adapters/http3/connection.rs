use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{Context, Result};
use bytes::{Bytes, BytesMut};
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use quiche::h3::{Event as H3Event, Header as H3Header, NameValue};
use quiche::{Connection, ConnectionId};

/// One fully-formed request collected off an HTTP/3 stream, ready to be
/// dispatched through the shared `HttpHandler`.
pub struct H3Request {
    pub stream_id: u64,
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
}

#[derive(Default)]
struct PendingRequest {
    method: Option<Method>,
    path: Option<Uri>,
    authority: Option<String>,
    scheme: Option<String>,
    headers: HeaderMap,
    body: BytesMut,
    headers_done: bool,
}

/// Wraps one accepted QUIC connection and its HTTP/3 layer. Connections
/// aren't shared across tasks; a single pump loop in `Http3Server` drives
/// every one of them in turn.
pub struct Http3Connection {
    pub conn: Connection,
    h3: Option<quiche::h3::Connection>,
    pending: HashMap<u64, PendingRequest>,
    last_activity: Instant,
}

impl Http3Connection {
    pub fn accept(
        scid: &ConnectionId<'_>,
        odcid: Option<&ConnectionId<'_>>,
        local: SocketAddr,
        peer: SocketAddr,
        config: &mut quiche::Config,
    ) -> Result<Self> {
        let conn = quiche::accept(scid, odcid, local, peer, config)
            .context("failed to accept QUIC connection")?;
        Ok(Self {
            conn,
            h3: None,
            pending: HashMap::new(),
            last_activity: Instant::now(),
        })
    }

    pub fn note_activity(&mut self) {
        self.last_activity = Instant::now();
    }

    /// Sends an ack-eliciting packet if the connection has been idle for at
    /// least `keep_alive_period`, resetting the peer's idle timer without
    /// waiting for application traffic. Returns `true` if one was sent, so
    /// the caller knows to flush egress.
    pub fn maybe_send_keepalive(&mut self, keep_alive_period: std::time::Duration) -> Result<bool> {
        if self.last_activity.elapsed() < keep_alive_period {
            return Ok(false);
        }
        match self.conn.send_ack_eliciting() {
            Ok(()) => {
                self.note_activity();
                Ok(true)
            }
            Err(quiche::Error::Done) => Ok(false),
            Err(e) => Err(anyhow::anyhow!("failed to send QUIC keepalive: {e}")),
        }
    }

    /// Establishes the HTTP/3 layer once the QUIC handshake completes, then
    /// drains every event currently available, returning requests whose
    /// headers and body have fully arrived.
    pub fn poll_requests(&mut self) -> Result<Vec<H3Request>> {
        if self.h3.is_none() && self.conn.is_established() {
            let h3_config =
                quiche::h3::Config::new().context("failed to create HTTP/3 config")?;
            self.h3 = Some(
                quiche::h3::Connection::with_transport(&mut self.conn, &h3_config)
                    .context("failed to establish HTTP/3 connection")?,
            );
        }

        self.note_activity();
        let Some(h3) = self.h3.as_mut() else {
            return Ok(Vec::new());
        };

        let mut ready = Vec::new();

        loop {
            match h3.poll(&mut self.conn) {
                Ok((stream_id, H3Event::Headers { list, more_frames })) => {
                    let pending = self.pending.entry(stream_id).or_default();
                    apply_headers(pending, list)?;
                    if !more_frames {
                        pending.headers_done = true;
                        if let Some(req) = take_if_complete(&mut self.pending, stream_id)? {
                            ready.push(req);
                        }
                    }
                }
                Ok((stream_id, H3Event::Data)) => {
                    let mut buf = [0u8; 4096];
                    loop {
                        match h3.recv_body(&mut self.conn, stream_id, &mut buf) {
                            Ok(n) => {
                                self.pending
                                    .entry(stream_id)
                                    .or_default()
                                    .body
                                    .extend_from_slice(&buf[..n]);
                            }
                            Err(quiche::h3::Error::Done) => break,
                            Err(e) => return Err(anyhow::anyhow!("HTTP/3 body read error: {e}")),
                        }
                    }
                }
                Ok((stream_id, H3Event::Finished)) => {
                    if let Some(pending) = self.pending.get_mut(&stream_id) {
                        pending.headers_done = true;
                    }
                    if let Some(req) = take_if_complete(&mut self.pending, stream_id)? {
                        ready.push(req);
                    }
                }
                Ok((stream_id, H3Event::Reset(error_code))) => {
                    tracing::debug!(stream_id, error_code, "HTTP/3 stream reset");
                    self.pending.remove(&stream_id);
                }
                Ok((_, H3Event::PriorityUpdate)) => {}
                Ok((_, H3Event::GoAway)) => {
                    tracing::info!("received HTTP/3 GOAWAY");
                }
                Err(quiche::h3::Error::Done) => break,
                Err(e) => return Err(anyhow::anyhow!("HTTP/3 poll error: {e}")),
            }
        }

        Ok(ready)
    }

    /// Sends response status/headers. `fin` should be `true` only when the
    /// caller already knows the response has no body, so the stream closes
    /// with the headers frame instead of waiting for an empty data frame.
    pub fn send_response_headers(
        &mut self,
        stream_id: u64,
        status: StatusCode,
        headers: &HeaderMap,
        fin: bool,
    ) -> Result<()> {
        let Some(h3) = self.h3.as_mut() else {
            return Err(anyhow::anyhow!("HTTP/3 layer not established for stream {stream_id}"));
        };

        let mut h3_headers = vec![H3Header::new(b":status", status.as_str().as_bytes())];
        for (name, value) in headers.iter() {
            h3_headers.push(H3Header::new(name.as_str().as_bytes(), value.as_bytes()));
        }

        h3.send_response(&mut self.conn, stream_id, &h3_headers, fin)
            .context("failed to send HTTP/3 response headers")?;

        Ok(())
    }

    /// Sends one body chunk. Callers stream the upstream response through
    /// this one chunk at a time rather than buffering the whole body, so
    /// `chunk` is expected to be bounded in size by the caller.
    pub fn send_body_chunk(&mut self, stream_id: u64, chunk: &[u8], fin: bool) -> Result<()> {
        let Some(h3) = self.h3.as_mut() else {
            return Err(anyhow::anyhow!("HTTP/3 layer not established for stream {stream_id}"));
        };

        h3.send_body(&mut self.conn, stream_id, chunk, fin)
            .context("failed to send HTTP/3 response body chunk")?;

        Ok(())
    }
}

fn apply_headers(pending: &mut PendingRequest, list: Vec<H3Header>) -> Result<()> {
    for header in list {
        let name = std::str::from_utf8(header.name()).context("invalid header name encoding")?;
        let value = std::str::from_utf8(header.value()).context("invalid header value encoding")?;

        match name {
            ":method" => {
                pending.method = Some(Method::from_bytes(value.as_bytes()).context("invalid :method")?);
            }
            ":path" => {
                pending.path = Some(value.parse().context("invalid :path")?);
            }
            ":authority" => pending.authority = Some(value.to_string()),
            ":scheme" => pending.scheme = Some(value.to_string()),
            _ => {
                let header_name =
                    HeaderName::from_bytes(name.as_bytes()).context("invalid header name")?;
                let header_value = HeaderValue::from_str(value).context("invalid header value")?;
                pending.headers.insert(header_name, header_value);
            }
        }
    }
    Ok(())
}

fn take_if_complete(
    pending_map: &mut HashMap<u64, PendingRequest>,
    stream_id: u64,
) -> Result<Option<H3Request>> {
    let Some(pending) = pending_map.get(&stream_id) else {
        return Ok(None);
    };
    if !pending.headers_done {
        return Ok(None);
    }

    let pending = pending_map.remove(&stream_id).expect("checked above");
    let method = pending
        .method
        .ok_or_else(|| anyhow::anyhow!("request missing :method pseudo-header"))?;
    let path = pending
        .path
        .ok_or_else(|| anyhow::anyhow!("request missing :path pseudo-header"))?;

    let uri = match (pending.authority, pending.scheme) {
        (Some(authority), Some(scheme)) => {
            let path_and_query = path.path_and_query().map(|pq| pq.as_str()).unwrap_or("/");
            format!("{scheme}://{authority}{path_and_query}")
                .parse()
                .context("failed to reconstruct request URI")?
        }
        _ => path,
    };

    Ok(Some(H3Request {
        stream_id,
        method,
        uri,
        headers: pending.headers,
        body: pending.body.freeze(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_request_completes_only_after_headers_done() {
        let mut map = HashMap::new();
        map.insert(
            7,
            PendingRequest {
                method: Some(Method::GET),
                path: Some(Uri::from_static("/widgets")),
                authority: Some("example.com".to_string()),
                scheme: Some("https".to_string()),
                headers: HeaderMap::new(),
                body: BytesMut::new(),
                headers_done: false,
            },
        );
        assert!(take_if_complete(&mut map, 7).unwrap().is_none());

        map.get_mut(&7).unwrap().headers_done = true;
        let req = take_if_complete(&mut map, 7).unwrap().unwrap();
        assert_eq!(req.uri, Uri::from_static("https://example.com/widgets"));
        assert!(map.is_empty());
    }

    #[test]
    fn missing_method_is_rejected() {
        let mut map = HashMap::new();
        map.insert(
            3,
            PendingRequest {
                method: None,
                path: Some(Uri::from_static("/")),
                headers_done: true,
                ..Default::default()
            },
        );
        assert!(take_if_complete(&mut map, 3).is_err());
    }
}
