//! ppedge gateway
//!
//! Connection gateway that accepts PROXY protocol v1/v2 headers from an
//! upstream load balancer and serves TLS and plaintext on one port.
//!
//! This service:
//! - Strips and records an optional PROXY protocol header
//! - Detects TLS from the first record header
//! - Terminates TLS when a certificate is configured
//! - Answers each request with a JSON description of the connection

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use ppedge_gateway::{
    tls, Config, EchoHandler, GatewayContext, Listener, ListenerConfig, TlsHandoff,
};

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    // Initialize tracing (prefer RUST_LOG, fallback to EDGE_LOG_LEVEL)
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_level.clone().into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    info!("Starting ppedge gateway");
    info!(
        listen_addr = %config.listen_addr,
        header_policy = ?config.header_policy,
        max_prefix_bytes = config.max_prefix_bytes,
        max_connections = config.max_connections,
        "Configuration loaded"
    );

    let mut gateway = GatewayContext::new(Arc::new(EchoHandler::default()))
        .with_policy(config.header_policy)
        .with_max_prefix_bytes(config.max_prefix_bytes)
        .with_detect_timeout(config.detect_timeout);

    if let Some(server_config) = tls::load_server_config(&config.tls_cert, &config.tls_key)? {
        gateway = gateway.with_tls(TlsHandoff::new(server_config, config.handshake_timeout));
    }

    let mut listener_config = ListenerConfig::new(config.listen_addr);
    listener_config.max_connections = config.max_connections;

    let listener = Listener::bind(listener_config, Arc::new(gateway))
        .await
        .with_context(|| format!("Failed to bind {}", config.listen_addr))?;
    let listener = Arc::new(listener);

    tokio::select! {
        result = listener.run() => {
            if let Err(e) = &result {
                error!(error = %e, "Listener error");
            }
            result.context("Listener stopped")
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
            Ok(())
        }
    }
}
