//! TCP listener and connection handling.
//!
//! This module accepts TCP connections and runs each one through
//! [`serve_connection`] in its own task. A failure on one connection
//! (malformed header, failed handshake, handler error) never stops the
//! accept loop.

use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn, Instrument};

use crate::conn::{
    serve_connection, ConnectionError, ConnectionSummary, GatewayContext, HeaderKind, Route,
};

/// Default maximum concurrent connections per listener.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10000;

/// Configuration for a listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
}

impl ListenerConfig {
    /// Create a new listener configuration.
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            max_connections: DEFAULT_MAX_CONNECTIONS,
        }
    }
}

/// Statistics for a listener.
///
/// Header and route counters only cover connections that were served to
/// completion.
#[derive(Debug, Default)]
pub struct ListenerStats {
    /// Total connections accepted.
    pub connections_accepted: AtomicU64,
    /// Total connections currently active.
    pub connections_active: AtomicU64,
    /// Total connections closed.
    pub connections_closed: AtomicU64,
    /// Connections rejected due to max limit.
    pub connections_rejected: AtomicU64,
    pub headers_v1: AtomicU64,
    pub headers_v2: AtomicU64,
    pub headers_absent: AtomicU64,
    /// Malformed headers passed through under the lenient policy.
    pub headers_ignored: AtomicU64,
    pub routed_tls: AtomicU64,
    pub routed_plaintext: AtomicU64,
    /// TLS handshake failures and timeouts.
    pub handshake_failures: AtomicU64,
    /// Strict rejections, oversized prefixes, timeouts and early closes.
    pub detection_failures: AtomicU64,
    pub handler_failures: AtomicU64,
}

impl ListenerStats {
    fn record(&self, result: &Result<ConnectionSummary, ConnectionError>) {
        match result {
            Ok(summary) => {
                let header = match summary.header_kind {
                    HeaderKind::V1 => &self.headers_v1,
                    HeaderKind::V2 => &self.headers_v2,
                    HeaderKind::Absent => &self.headers_absent,
                    HeaderKind::Ignored => &self.headers_ignored,
                };
                header.fetch_add(1, Ordering::Relaxed);

                let route = match summary.route {
                    Route::Tls => &self.routed_tls,
                    Route::PlainText => &self.routed_plaintext,
                };
                route.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_handshake_failure() => {
                self.handshake_failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) if e.is_detection_failure() => {
                self.detection_failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(ConnectionError::Handler(_)) => {
                self.handler_failures.fetch_add(1, Ordering::Relaxed);
            }
            Err(_) => {}
        }
    }
}

/// A TCP listener feeding the gateway.
pub struct Listener {
    /// The TCP listener.
    listener: TcpListener,
    /// Shared per-process state.
    gateway: Arc<GatewayContext>,
    /// Connection semaphore for limiting concurrent connections.
    conn_semaphore: Arc<Semaphore>,
    /// Statistics.
    stats: Arc<ListenerStats>,
}

impl Listener {
    /// Create a new listener.
    pub async fn bind(config: ListenerConfig, gateway: Arc<GatewayContext>) -> io::Result<Self> {
        let listener = TcpListener::bind(config.bind_addr).await?;
        let local_addr = listener.local_addr()?;

        info!(
            bind_addr = %local_addr,
            max_connections = config.max_connections,
            tls_enabled = gateway.tls_enabled(),
            header_policy = ?gateway.policy(),
            "Listener bound"
        );

        Ok(Self {
            conn_semaphore: Arc::new(Semaphore::new(config.max_connections)),
            listener,
            gateway,
            stats: Arc::new(ListenerStats::default()),
        })
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Get listener statistics.
    pub fn stats(&self) -> &ListenerStats {
        &self.stats
    }

    /// Run the listener, accepting and handling connections.
    pub async fn run(self: Arc<Self>) -> io::Result<()> {
        let local_addr = self.listener.local_addr()?;
        info!(bind_addr = %local_addr, "Listener started");

        loop {
            match self.listener.accept().await {
                Ok((stream, peer_addr)) => {
                    let permit = match self.conn_semaphore.clone().try_acquire_owned() {
                        Ok(permit) => permit,
                        Err(_) => {
                            self.stats
                                .connections_rejected
                                .fetch_add(1, Ordering::Relaxed);
                            warn!(peer_addr = %peer_addr, "Connection rejected: max connections reached");
                            continue;
                        }
                    };

                    self.stats
                        .connections_accepted
                        .fetch_add(1, Ordering::Relaxed);
                    self.stats
                        .connections_active
                        .fetch_add(1, Ordering::Relaxed);

                    let gateway = Arc::clone(&self.gateway);
                    let stats = Arc::clone(&self.stats);

                    tokio::spawn(
                        async move {
                            let result = serve_connection(stream, peer_addr, &gateway).await;
                            stats.record(&result);

                            match &result {
                                Ok(summary) => {
                                    debug!(
                                        header = ?summary.header_kind,
                                        route = ?summary.route,
                                        "Connection closed"
                                    );
                                }
                                Err(e) if e.is_handshake_failure() => {
                                    warn!(error = %e, "TLS handshake failed");
                                }
                                Err(e) => {
                                    debug!(error = %e, "Connection error");
                                }
                            }

                            stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                            stats.connections_closed.fetch_add(1, Ordering::Relaxed);
                            drop(permit);
                        }
                        .instrument(tracing::info_span!("connection", peer = %peer_addr)),
                    );
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    // Brief sleep to avoid tight loop on persistent errors
                    tokio::time::sleep(Duration::from_millis(100)).await;
                }
            }
        }
    }
}
