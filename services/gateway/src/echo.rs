//! Downstream handler that echoes connection metadata as JSON.
//!
//! Reads one HTTP/1.1 request head (no body, no keep-alive), answers with
//! a JSON document describing the PROXY header, the direct peer and the
//! request, then closes the stream.

use std::collections::BTreeMap;
use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use ppedge_wire::ProxyHeader;
use serde::Serialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::time::timeout;
use tracing::debug;

use crate::conn::{BoxedStream, ConnectionHandler, DispatchedConnection};

/// Largest request head accepted.
pub const MAX_REQUEST_HEAD: usize = 16 * 1024;

/// Default bound on reading the request head after dispatch.
pub const DEFAULT_HEAD_TIMEOUT: Duration = Duration::from_secs(10);

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

/// Request line and headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHead {
    pub method: String,
    pub path: String,
    pub version: String,
    /// Lowercased names; a repeated header keeps its last value.
    pub headers: BTreeMap<String, String>,
    /// Bytes up to and including the blank line.
    pub length: usize,
}

/// Parse a request head once the blank line has arrived.
pub fn parse_request_head(buf: &[u8]) -> Option<RequestHead> {
    let end = buf
        .windows(HEAD_TERMINATOR.len())
        .position(|w| w == HEAD_TERMINATOR)?;
    let text = String::from_utf8_lossy(&buf[..end]);

    let mut lines = text.split("\r\n");
    let request_line = lines.next().unwrap_or_default();
    let mut parts = request_line.split(' ');
    let method = parts.next().unwrap_or_default().to_string();
    let path = parts.next().unwrap_or_default().to_string();
    let version = parts.next().unwrap_or_default().to_string();

    let mut headers = BTreeMap::new();
    for line in lines {
        if let Some(idx) = line.find(':').filter(|&idx| idx > 0) {
            let name = line[..idx].trim().to_lowercase();
            let value = line[idx + 1..].trim().to_string();
            headers.insert(name, value);
        }
    }

    Some(RequestHead {
        method,
        path,
        version,
        headers,
        length: end + HEAD_TERMINATOR.len(),
    })
}

#[derive(Debug, Serialize)]
pub struct HttpLine {
    pub method: String,
    pub path: String,
    pub version: String,
}

/// JSON body of the echo response.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EchoReport {
    /// `v1`, `v2` or `none`.
    pub proxy_protocol_version: &'static str,
    /// Directly connected peer.
    pub connection_source_ip: String,
    pub proxy_protocol_source_ip: Option<String>,
    #[serde(rename = "isTLS")]
    pub is_tls: bool,
    pub http: HttpLine,
    pub http_headers: BTreeMap<String, String>,
}

impl EchoReport {
    pub fn new(
        head: RequestHead,
        header: Option<&ProxyHeader>,
        peer_addr: SocketAddr,
        is_tls: bool,
    ) -> Self {
        Self {
            proxy_protocol_version: header.map_or("none", |h| h.version.as_str()),
            connection_source_ip: peer_addr.ip().to_string(),
            proxy_protocol_source_ip: header.and_then(|h| h.source_ip.clone()),
            is_tls,
            http: HttpLine {
                method: head.method,
                path: head.path,
                version: head.version,
            },
            http_headers: head.headers,
        }
    }
}

/// Render a complete `200 OK` response.
pub fn build_response(report: &EchoReport) -> io::Result<Vec<u8>> {
    let body = serde_json::to_string_pretty(report).map_err(io::Error::other)?;

    let mut response = format!(
        "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\nContent-Length: {}\r\n\r\n",
        body.len()
    )
    .into_bytes();
    response.extend_from_slice(body.as_bytes());
    Ok(response)
}

/// Answers one request per connection with an [`EchoReport`].
#[derive(Debug, Clone, Copy)]
pub struct EchoHandler {
    head_timeout: Duration,
}

impl EchoHandler {
    pub fn new(head_timeout: Duration) -> Self {
        Self { head_timeout }
    }
}

impl Default for EchoHandler {
    fn default() -> Self {
        Self::new(DEFAULT_HEAD_TIMEOUT)
    }
}

/// Read until a full head is buffered. `Ok(None)` on EOF.
async fn read_request_head(
    stream: &mut BoxedStream,
    buf: &mut BytesMut,
) -> io::Result<Option<RequestHead>> {
    loop {
        if let Some(head) = parse_request_head(buf) {
            return Ok(Some(head));
        }
        if buf.len() > MAX_REQUEST_HEAD {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "request head too large",
            ));
        }
        if stream.read_buf(buf).await? == 0 {
            debug!(buffered = buf.len(), "Client closed before a full request head");
            return Ok(None);
        }
    }
}

#[async_trait]
impl ConnectionHandler for EchoHandler {
    async fn handle(&self, conn: DispatchedConnection) -> io::Result<()> {
        let DispatchedConnection {
            mut stream,
            prefix,
            header,
            peer_addr,
            is_tls,
        } = conn;

        let mut buf = BytesMut::from(&prefix[..]);
        let head = match timeout(self.head_timeout, read_request_head(&mut stream, &mut buf)).await
        {
            Ok(Ok(Some(head))) => head,
            Ok(Ok(None)) => return Ok(()),
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "request head timed out",
                ))
            }
        };

        debug!(method = %head.method, path = %head.path, is_tls, "Request received");

        let report = EchoReport::new(head, header.as_ref(), peer_addr, is_tls);
        let response = build_response(&report)?;
        stream.write_all(&response).await?;
        stream.shutdown().await?;
        Ok(())
    }
}
