//! Test harness for gateway integration tests.
//!
//! Provides helpers to spawn a gateway listener, generate throwaway TLS
//! material and drive plaintext or TLS clients through it.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, PrivateKeyDer, PrivatePkcs8KeyDer, ServerName};
use rustls::ServerConfig;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_rustls::TlsConnector;

use ppedge_gateway::{tls, GatewayContext, Listener, ListenerConfig, ListenerStats};

pub const REQUEST: &[u8] = b"GET /whoami HTTP/1.1\r\nHost: gateway.test\r\n\r\n";

pub struct GatewayHandle {
    pub listen_addr: SocketAddr,
    listener: Arc<Listener>,
    task: tokio::task::JoinHandle<()>,
}

impl GatewayHandle {
    pub async fn spawn(gateway: GatewayContext) -> io::Result<Self> {
        let config = ListenerConfig::new("127.0.0.1:0".parse().unwrap());
        let listener = Listener::bind(config, Arc::new(gateway)).await?;

        let listen_addr = listener.local_addr()?;
        let listener = Arc::new(listener);

        let runner = Arc::clone(&listener);
        let task = tokio::spawn(async move {
            let _ = runner.run().await;
        });

        Ok(Self {
            listen_addr,
            listener,
            task,
        })
    }

    pub fn stats(&self) -> &ListenerStats {
        self.listener.stats()
    }

    /// Wait until `counter` reaches `expected`, failing after two seconds.
    pub async fn wait_for<F>(&self, counter: F, expected: u64)
    where
        F: Fn(&ListenerStats) -> &AtomicU64,
    {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            let value = counter(self.stats()).load(Ordering::Relaxed);
            if value >= expected {
                assert_eq!(value, expected);
                return;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "counter stuck at {value}, expected {expected}"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }
}

impl Drop for GatewayHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

pub struct TestCert {
    pub cert_der: Vec<u8>,
    pub server_config: Arc<ServerConfig>,
}

impl TestCert {
    pub fn generate(server_name: &str) -> Self {
        let cert = rcgen::generate_simple_self_signed(vec![server_name.to_string()]).unwrap();
        let cert_der = cert.cert.der().to_vec();
        let key = PrivateKeyDer::Pkcs8(PrivatePkcs8KeyDer::from(cert.key_pair.serialize_der()));

        let server_config =
            tls::build_server_config(vec![CertificateDer::from(cert_der.clone())], key).unwrap();

        Self {
            cert_der,
            server_config,
        }
    }
}

/// Connect, send `preface` in the clear, then run a TLS handshake.
pub async fn tls_client_connect(
    addr: SocketAddr,
    server_name: &str,
    cert_der: &[u8],
    preface: &[u8],
) -> io::Result<tokio_rustls::client::TlsStream<TcpStream>> {
    let mut root_store = rustls::RootCertStore::empty();
    root_store
        .add(CertificateDer::from(cert_der.to_vec()))
        .map_err(io::Error::other)?;

    let provider = Arc::new(rustls::crypto::ring::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(io::Error::other)?
        .with_root_certificates(root_store)
        .with_no_client_auth();

    let connector = TlsConnector::from(Arc::new(config));
    let mut stream = TcpStream::connect(addr).await?;
    if !preface.is_empty() {
        stream.write_all(preface).await?;
    }
    let server_name = ServerName::try_from(server_name.to_string())
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    connector.connect(server_name, stream).await
}

/// Send [`REQUEST`] and return the parsed JSON body of the response.
pub async fn request_json<S>(stream: &mut S) -> io::Result<serde_json::Value>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    stream.write_all(REQUEST).await?;
    stream.flush().await?;

    let mut response = Vec::new();
    read_to_close(stream, &mut response).await?;

    let text = String::from_utf8(response).map_err(io::Error::other)?;
    let (head, body) = text
        .split_once("\r\n\r\n")
        .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidData, "no response head"))?;
    assert!(head.starts_with("HTTP/1.1 200 OK"), "unexpected head: {head}");

    serde_json::from_str(body).map_err(io::Error::other)
}

/// Read until EOF. A reset after the peer closed counts as EOF.
pub async fn read_to_close<S>(stream: &mut S, out: &mut Vec<u8>) -> io::Result<()>
where
    S: AsyncRead + Unpin,
{
    let mut buf = [0u8; 4096];
    loop {
        match tokio::time::timeout(Duration::from_secs(5), stream.read(&mut buf)).await {
            Ok(Ok(0)) => return Ok(()),
            Ok(Ok(n)) => out.extend_from_slice(&buf[..n]),
            Ok(Err(e)) if e.kind() == io::ErrorKind::ConnectionReset => return Ok(()),
            Ok(Err(e)) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(()),
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(io::Error::new(io::ErrorKind::TimedOut, "read timed out")),
        }
    }
}
