use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use http::{Request, Response, StatusCode};
use http_body_util::BodyExt;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use crate::adapters::body::{full_body, ProxyBody};
use crate::adapters::http3::connection::{H3Request, Http3Connection};
use crate::ports::http_server::HttpHandler;
use crate::utils::graceful_shutdown::ShutdownToken;

const MAX_DATAGRAM_SIZE: usize = 1350;

struct DispatchResult {
    conn_key: Vec<u8>,
    stream_id: u64,
    response: Response<ProxyBody>,
}

/// Terminates QUIC/TLS and speaks HTTP/3 on a single UDP socket. Every
/// completed request is handed to the same `HttpHandler` the TCP fallback
/// listener calls into, so proxying behavior is identical once a request is
/// parsed; only how bytes arrived differs.
///
/// The UDP socket is supplied already bound and the quiche transport config
/// (which loads the TLS certificate/key) already built, passed into `run`,
/// so the two ways startup can fail - a bad bind address versus a bad
/// certificate - stay distinguishable to the caller.
pub struct Http3Server<H: HttpHandler> {
    socket: Arc<UdpSocket>,
    local_addr: SocketAddr,
    handler: Arc<H>,
}

impl<H: HttpHandler> Http3Server<H> {
    pub fn new(socket: UdpSocket, local_addr: SocketAddr, handler: Arc<H>) -> Self {
        Self {
            socket: Arc::new(socket),
            local_addr,
            handler,
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Runs the UDP recv/send pump until `shutdown` fires, then keeps
    /// delivering responses for already-dispatched requests (stream data
    /// already read off the wire, handler already invoked) for up to
    /// `drain_deadline` before returning. New QUIC packets are never
    /// accepted once shutdown has fired, even during the drain phase.
    pub async fn run(
        &self,
        mut config: quiche::Config,
        mut shutdown: ShutdownToken,
        drain_deadline: Duration,
        keep_alive_period: Duration,
    ) -> Result<()> {
        let mut connections: HashMap<Vec<u8>, Http3Connection> = HashMap::new();
        let mut recv_buf = vec![0u8; 65535];
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<DispatchResult>();
        let mut gc = tokio::time::interval(Duration::from_secs(1));

        tracing::info!(addr = %self.local_addr, "HTTP/3 listener running");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("HTTP/3 listener stopping new connections, draining in-flight streams");
                    break;
                }
                recv = self.socket.recv_from(&mut recv_buf) => {
                    let (len, peer) = recv.context("UDP recv failed")?;
                    if let Err(e) = self
                        .handle_packet(&mut recv_buf[..len], peer, &mut config, &mut connections, &result_tx)
                        .await
                    {
                        tracing::warn!(peer = %peer, error = %e, "failed to process QUIC packet");
                    }
                }
                Some(result) = result_rx.recv() => {
                    self.deliver_response(&mut connections, result).await;
                }
                _ = gc.tick() => {
                    self.expire_connections(&mut connections);
                    self.send_keepalives(&mut connections, keep_alive_period).await;
                }
            }
        }

        let drain = tokio::time::sleep(drain_deadline);
        tokio::pin!(drain);
        loop {
            tokio::select! {
                _ = &mut drain => {
                    tracing::warn!("HTTP/3 drain deadline elapsed, closing remaining connections");
                    break;
                }
                Some(result) = result_rx.recv() => {
                    self.deliver_response(&mut connections, result).await;
                }
                _ = gc.tick() => {
                    self.expire_connections(&mut connections);
                    self.send_keepalives(&mut connections, keep_alive_period).await;
                    if connections.is_empty() {
                        break;
                    }
                }
            }
        }

        Ok(())
    }

    async fn handle_packet(
        &self,
        packet: &mut [u8],
        peer: SocketAddr,
        config: &mut quiche::Config,
        connections: &mut HashMap<Vec<u8>, Http3Connection>,
        result_tx: &mpsc::UnboundedSender<DispatchResult>,
    ) -> Result<()> {
        let hdr = quiche::Header::from_slice(packet, quiche::MAX_CONN_ID_LEN)
            .context("invalid QUIC packet header")?;
        let conn_key = hdr.dcid.to_vec();

        if !connections.contains_key(&conn_key) {
            let conn = Http3Connection::accept(&hdr.dcid, None, self.local_addr, peer, config)?;
            connections.insert(conn_key.clone(), conn);
            tracing::debug!(peer = %peer, "accepted new QUIC connection");
        }

        let conn = connections.get_mut(&conn_key).expect("just inserted above");

        let recv_info = quiche::RecvInfo {
            from: peer,
            to: self.local_addr,
        };
        conn.conn.recv(packet, recv_info).context("QUIC recv failed")?;

        for request in conn.poll_requests()? {
            self.dispatch(conn_key.clone(), peer, request, result_tx.clone());
        }

        self.flush_egress(&conn_key, connections).await?;
        Ok(())
    }

    fn dispatch(
        &self,
        conn_key: Vec<u8>,
        remote_addr: SocketAddr,
        request: H3Request,
        result_tx: mpsc::UnboundedSender<DispatchResult>,
    ) {
        let handler = self.handler.clone();

        tokio::spawn(async move {
            let stream_id = request.stream_id;
            let mut builder = Request::builder().method(request.method).uri(request.uri);
            for (name, value) in request.headers.iter() {
                builder = builder.header(name, value);
            }

            let req = match builder.body(axum::body::Body::from(request.body)) {
                Ok(req) => req,
                Err(e) => {
                    tracing::warn!(stream_id, error = %e, "failed to build HTTP/3 request");
                    return;
                }
            };

            let response = match handler.handle_request(req, remote_addr).await {
                Ok(response) => response,
                Err(e) => {
                    tracing::error!(stream_id, error = %e, "HTTP/3 handler error");
                    Response::builder()
                        .status(StatusCode::INTERNAL_SERVER_ERROR)
                        .body(full_body(Vec::new()))
                        .expect("static error response is always well-formed")
                }
            };

            let _ = result_tx.send(DispatchResult {
                conn_key,
                stream_id,
                response,
            });
        });
    }

    /// Streams the handler's response to the peer one `http_body` frame at a
    /// time instead of buffering it, peeking one frame ahead so the last
    /// data frame can carry `fin` rather than trailing with an empty one.
    async fn deliver_response(
        &self,
        connections: &mut HashMap<Vec<u8>, Http3Connection>,
        result: DispatchResult,
    ) {
        let DispatchResult {
            conn_key,
            stream_id,
            response,
        } = result;

        let (parts, mut body) = response.into_parts();

        let Some(conn) = connections.get_mut(&conn_key) else {
            tracing::debug!(stream_id, "connection gone before response could be sent");
            return;
        };
        if let Err(e) = conn.send_response_headers(stream_id, parts.status, &parts.headers, false) {
            tracing::warn!(stream_id, error = %e, "failed to send HTTP/3 response headers");
            return;
        }

        let mut fin_sent = false;
        let mut next = body.frame().await;
        while let Some(frame_result) = next {
            let frame = match frame_result {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!(stream_id, error = %e, "failed to read HTTP/3 response body frame");
                    return;
                }
            };
            next = body.frame().await;
            let is_last = next.is_none();

            if let Some(data) = frame.data_ref() {
                let Some(conn) = connections.get_mut(&conn_key) else {
                    tracing::debug!(stream_id, "connection gone mid-stream");
                    return;
                };
                if let Err(e) = conn.send_body_chunk(stream_id, data, is_last) {
                    tracing::warn!(stream_id, error = %e, "failed to send HTTP/3 response body chunk");
                    return;
                }
                fin_sent = is_last;
                if let Err(e) = self.flush_egress(&conn_key, connections).await {
                    tracing::warn!(error = %e, "failed to flush HTTP/3 egress");
                }
            } else if is_last {
                let Some(conn) = connections.get_mut(&conn_key) else {
                    tracing::debug!(stream_id, "connection gone mid-stream");
                    return;
                };
                if let Err(e) = conn.send_body_chunk(stream_id, &[], true) {
                    tracing::warn!(stream_id, error = %e, "failed to terminate HTTP/3 stream");
                    return;
                }
                fin_sent = true;
            }
        }

        if !fin_sent {
            if let Some(conn) = connections.get_mut(&conn_key) {
                if let Err(e) = conn.send_body_chunk(stream_id, &[], true) {
                    tracing::warn!(stream_id, error = %e, "failed to terminate HTTP/3 stream");
                    return;
                }
            }
        }

        if let Err(e) = self.flush_egress(&conn_key, connections).await {
            tracing::warn!(error = %e, "failed to flush HTTP/3 egress");
        }
    }

    async fn flush_egress(
        &self,
        conn_key: &[u8],
        connections: &mut HashMap<Vec<u8>, Http3Connection>,
    ) -> Result<()> {
        let Some(conn) = connections.get_mut(conn_key) else {
            return Ok(());
        };
        let mut out = [0u8; MAX_DATAGRAM_SIZE];

        loop {
            let (len, send_info) = match conn.conn.send(&mut out) {
                Ok(v) => v,
                Err(quiche::Error::Done) => break,
                Err(e) => return Err(anyhow::anyhow!("QUIC send failed: {e}")),
            };
            self.socket
                .send_to(&out[..len], send_info.to)
                .await
                .context("UDP send failed")?;
        }

        Ok(())
    }

    /// Nudges every connection that has gone quiet for `keep_alive_period`
    /// with an ack-eliciting packet, resetting the peer's idle timer without
    /// waiting for the next request.
    async fn send_keepalives(
        &self,
        connections: &mut HashMap<Vec<u8>, Http3Connection>,
        keep_alive_period: Duration,
    ) {
        let due: Vec<Vec<u8>> = connections
            .iter_mut()
            .filter_map(|(key, conn)| match conn.maybe_send_keepalive(keep_alive_period) {
                Ok(true) => Some(key.clone()),
                Ok(false) => None,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to send QUIC keepalive");
                    None
                }
            })
            .collect();

        for key in due {
            if let Err(e) = self.flush_egress(&key, connections).await {
                tracing::warn!(error = %e, "failed to flush keepalive egress");
            }
        }
    }

    fn expire_connections(&self, connections: &mut HashMap<Vec<u8>, Http3Connection>) {
        let expired: Vec<Vec<u8>> = connections
            .iter_mut()
            .filter_map(|(key, conn)| {
                conn.conn.on_timeout();
                conn.conn.is_closed().then(|| key.clone())
            })
            .collect();

        if !expired.is_empty() {
            tracing::debug!(count = expired.len(), "reaping closed QUIC connections");
        }
        for key in &expired {
            connections.remove(key);
        }
    }
}
