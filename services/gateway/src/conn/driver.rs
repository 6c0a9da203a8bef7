//! Async glue between a socket and the classification state machine.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use ppedge_wire::ProxyHeader;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite};
use tokio::time::timeout;
use tracing::debug;

use super::error::ConnectionError;
use super::handoff::TlsHandoff;
use super::state::{
    ConnectionContext, ConnectionOptions, Dispatch, HeaderKind, HeaderPolicy, Route, Step,
    DEFAULT_MAX_PREFIX_BYTES,
};

/// Socket read size during detection.
pub const READ_CHUNK_SIZE: usize = 8192;

/// Default bound on header + classification.
pub const DEFAULT_DETECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Any duplex byte stream a handler can be given.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

pub type BoxedStream = Box<dyn AsyncStream>;

/// A connection after protocol detection.
pub struct DispatchedConnection {
    /// Raw socket for plaintext, decrypted session for TLS.
    pub stream: BoxedStream,
    /// Application bytes already read off the socket. Always empty for TLS,
    /// where these bytes were fed to the TLS engine instead.
    pub prefix: Bytes,
    pub header: Option<ProxyHeader>,
    /// Address of the directly connected peer (the proxy, if any).
    pub peer_addr: SocketAddr,
    pub is_tls: bool,
}

/// Downstream application protocol.
///
/// Implementations parse their own protocol and must not assume `prefix`
/// is empty.
#[async_trait]
pub trait ConnectionHandler: Send + Sync {
    async fn handle(&self, conn: DispatchedConnection) -> io::Result<()>;
}

/// Immutable per-process state shared by every connection.
pub struct GatewayContext {
    policy: HeaderPolicy,
    max_prefix_bytes: usize,
    detect_timeout: Duration,
    tls: Option<TlsHandoff>,
    handler: Arc<dyn ConnectionHandler>,
}

impl GatewayContext {
    /// Lenient policy, default limits, no TLS.
    pub fn new(handler: Arc<dyn ConnectionHandler>) -> Self {
        Self {
            policy: HeaderPolicy::default(),
            max_prefix_bytes: DEFAULT_MAX_PREFIX_BYTES,
            detect_timeout: DEFAULT_DETECT_TIMEOUT,
            tls: None,
            handler,
        }
    }

    pub fn with_policy(mut self, policy: HeaderPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_max_prefix_bytes(mut self, max_prefix_bytes: usize) -> Self {
        self.max_prefix_bytes = max_prefix_bytes;
        self
    }

    pub fn with_detect_timeout(mut self, detect_timeout: Duration) -> Self {
        self.detect_timeout = detect_timeout;
        self
    }

    pub fn with_tls(mut self, tls: TlsHandoff) -> Self {
        self.tls = Some(tls);
        self
    }

    pub fn tls_enabled(&self) -> bool {
        self.tls.is_some()
    }

    pub fn policy(&self) -> HeaderPolicy {
        self.policy
    }

    fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            policy: self.policy,
            max_prefix_bytes: self.max_prefix_bytes,
            tls_enabled: self.tls.is_some(),
        }
    }
}

/// How a connection was dispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionSummary {
    pub header_kind: HeaderKind,
    pub route: Route,
}

/// Detect, dispatch and serve one connection.
pub async fn serve_connection<S>(
    mut stream: S,
    peer_addr: SocketAddr,
    gateway: &GatewayContext,
) -> Result<ConnectionSummary, ConnectionError>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    let mut conn = ConnectionContext::new(gateway.connection_options());

    let dispatch = match timeout(gateway.detect_timeout, detect(&mut stream, &mut conn)).await {
        Ok(result) => result?,
        Err(_) => {
            conn.on_close();
            return Err(ConnectionError::DetectionTimeout(gateway.detect_timeout));
        }
    };

    let Dispatch {
        route,
        prefix,
        header,
        header_kind,
    } = dispatch;
    debug!(
        route = ?route,
        header = ?header_kind,
        prefix_len = prefix.len(),
        "Protocol detected"
    );

    let prefix = prefix.freeze();
    let dispatched = match (route, &gateway.tls) {
        (Route::Tls, Some(handoff)) => {
            let tls_stream = handoff.accept(stream, prefix).await?;
            debug!("TLS handshake complete");
            DispatchedConnection {
                stream: Box::new(tls_stream),
                prefix: Bytes::new(),
                header,
                peer_addr,
                is_tls: true,
            }
        }
        _ => DispatchedConnection {
            stream: Box::new(stream),
            prefix,
            header,
            peer_addr,
            is_tls: false,
        },
    };

    gateway
        .handler
        .handle(dispatched)
        .await
        .map_err(ConnectionError::Handler)?;

    Ok(ConnectionSummary { header_kind, route })
}

/// Read until the state machine dispatches.
async fn detect<S: AsyncRead + Unpin>(
    stream: &mut S,
    conn: &mut ConnectionContext,
) -> Result<Dispatch, ConnectionError> {
    let mut buf = vec![0u8; READ_CHUNK_SIZE];

    loop {
        let n = match stream.read(&mut buf).await {
            Ok(n) => n,
            Err(e) => {
                conn.on_error(&e);
                return Err(e.into());
            }
        };

        if n == 0 {
            conn.on_close();
            return Err(ConnectionError::ClosedBeforeDispatch);
        }

        match conn.on_data(&buf[..n])? {
            Step::Dispatch(dispatch) => return Ok(dispatch),
            // Forward only happens after dispatch, which ends this loop.
            Step::Pending | Step::Forward(_) => {}
        }
    }
}
