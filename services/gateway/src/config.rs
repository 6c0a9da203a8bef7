//! Gateway configuration.
//!
//! Everything is read once at startup from the environment.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::conn::{
    HeaderPolicy, DEFAULT_DETECT_TIMEOUT, DEFAULT_HANDSHAKE_TIMEOUT, DEFAULT_MAX_PREFIX_BYTES,
};
use crate::listener::DEFAULT_MAX_CONNECTIONS;

const DEFAULT_PORT: u16 = 3000;

/// Gateway configuration (env-driven).
#[derive(Debug, Clone)]
pub struct Config {
    /// Address to accept connections on.
    pub listen_addr: SocketAddr,

    /// PEM certificate chain. TLS is disabled if the file is missing.
    pub tls_cert: PathBuf,

    /// PEM private key. TLS is disabled if the file is missing.
    pub tls_key: PathBuf,

    pub header_policy: HeaderPolicy,

    /// Ceiling for bytes buffered before a connection is dispatched.
    pub max_prefix_bytes: usize,

    /// Bound on PROXY header + protocol detection.
    pub detect_timeout: Duration,

    pub handshake_timeout: Duration,

    pub max_connections: usize,

    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let listen_addr = match lookup("EDGE_LISTEN_ADDR") {
            Some(addr) => addr
                .parse()
                .context("EDGE_LISTEN_ADDR must be a socket address (example: 0.0.0.0:3000).")?,
            None => {
                let port: u16 = lookup("PORT")
                    .map(|v| v.parse())
                    .transpose()
                    .context("PORT must be a port number.")?
                    .unwrap_or(DEFAULT_PORT);
                SocketAddr::from(([0, 0, 0, 0], port))
            }
        };

        let tls_cert = lookup("EDGE_TLS_CERT")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./certificate.pem"));

        let tls_key = lookup("EDGE_TLS_KEY")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("./private-key.pem"));

        let header_policy = lookup("EDGE_HEADER_POLICY")
            .map(|v| v.parse())
            .transpose()
            .context("EDGE_HEADER_POLICY must be \"lenient\" or \"strict\".")?
            .unwrap_or_default();

        let max_prefix_bytes: usize = lookup("EDGE_MAX_PREFIX_BYTES")
            .map(|v| v.parse())
            .transpose()
            .context("EDGE_MAX_PREFIX_BYTES must be an integer (bytes).")?
            .unwrap_or(DEFAULT_MAX_PREFIX_BYTES)
            .max(ppedge_wire::MIN_CLASSIFY_LEN);

        let detect_timeout = lookup("EDGE_DETECT_TIMEOUT_MS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("EDGE_DETECT_TIMEOUT_MS must be an integer (milliseconds).")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_DETECT_TIMEOUT);

        let handshake_timeout = lookup("EDGE_HANDSHAKE_TIMEOUT_MS")
            .map(|v| v.parse::<u64>())
            .transpose()
            .context("EDGE_HANDSHAKE_TIMEOUT_MS must be an integer (milliseconds).")?
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_HANDSHAKE_TIMEOUT);

        let max_connections: usize = lookup("EDGE_MAX_CONNECTIONS")
            .map(|v| v.parse())
            .transpose()
            .context("EDGE_MAX_CONNECTIONS must be an integer.")?
            .unwrap_or(DEFAULT_MAX_CONNECTIONS)
            .max(1);

        let log_level = lookup("EDGE_LOG_LEVEL").unwrap_or_else(|| "info".to_string());

        Ok(Self {
            listen_addr,
            tls_cert,
            tls_key,
            header_policy,
            max_prefix_bytes,
            detect_timeout,
            handshake_timeout,
            max_connections,
            log_level,
        })
    }
}
