//! TLS server configuration.
//!
//! The certificate and key are loaded once at startup. If either file is
//! missing, the gateway runs without TLS and serves TLS-looking traffic as
//! plaintext.

use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use rustls::pki_types::{CertificateDer, PrivateKeyDer};
use rustls::ServerConfig;
use tracing::info;

/// ALPN protocols offered to clients.
const ALPN_PROTOCOLS: &[&[u8]] = &[b"http/1.1"];

/// Load a server configuration from PEM files.
///
/// Returns `Ok(None)` when either file does not exist. Files that exist
/// but cannot be parsed are an error.
pub fn load_server_config(cert_path: &Path, key_path: &Path) -> Result<Option<Arc<ServerConfig>>> {
    if !cert_path.exists() || !key_path.exists() {
        info!(
            cert = %cert_path.display(),
            key = %key_path.display(),
            "TLS material not found, TLS disabled"
        );
        return Ok(None);
    }

    let certs = read_certs(cert_path)?;
    let key = read_private_key(key_path)?;
    let config = build_server_config(certs, key)?;

    info!(cert = %cert_path.display(), "TLS enabled");
    Ok(Some(config))
}

/// Build a server configuration from DER material.
pub fn build_server_config(
    certs: Vec<CertificateDer<'static>>,
    key: PrivateKeyDer<'static>,
) -> Result<Arc<ServerConfig>> {
    let provider = Arc::new(rustls::crypto::ring::default_provider());

    let mut config = ServerConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .context("Failed to select TLS protocol versions")?
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .context("Invalid TLS certificate or key")?;
    config.alpn_protocols = ALPN_PROTOCOLS.iter().map(|p| p.to_vec()).collect();

    Ok(Arc::new(config))
}

fn read_certs(path: &Path) -> Result<Vec<CertificateDer<'static>>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    let certs = rustls_pemfile::certs(&mut BufReader::new(file))
        .collect::<Result<Vec<_>, _>>()
        .with_context(|| format!("Failed to parse certificates in {}", path.display()))?;

    if certs.is_empty() {
        return Err(anyhow!("No certificates found in {}", path.display()));
    }
    Ok(certs)
}

fn read_private_key(path: &Path) -> Result<PrivateKeyDer<'static>> {
    let file = File::open(path).with_context(|| format!("Failed to open {}", path.display()))?;
    rustls_pemfile::private_key(&mut BufReader::new(file))
        .with_context(|| format!("Failed to parse private key in {}", path.display()))?
        .ok_or_else(|| anyhow!("No private key found in {}", path.display()))
}
