//! Per-connection classification state machine.
//!
//! The machine owns the undecided prefix and is driven by three events:
//! [`ConnectionContext::on_data`], [`ConnectionContext::on_error`] and
//! [`ConnectionContext::on_close`]. It never performs I/O, so it can be
//! suspended between reads and resumed from its buffered state.
//!
//! ```text
//! AwaitingHeader --(Header | Absent | Malformed+lenient)--> Classified
//! Classified ----------------(Tls | PlainText)------------> Dispatched
//! any phase ------------(close | error | rejection)-------> Closed
//! ```
//!
//! The PROXY header is resolved exactly once. A connection that stalls in
//! `Classified` only re-runs the classifier on later data.

use std::io;
use std::str::FromStr;

use bytes::{Buf, Bytes, BytesMut};
use ppedge_wire::{classify, decode, Classification, DecodeOutcome, ProxyHeader, ProxyVersion};
use thiserror::Error;
use tracing::{debug, warn};

use super::error::ConnectionError;

/// Default ceiling for the undecided prefix: the largest possible v2
/// header plus room for the first TLS record header.
pub const DEFAULT_MAX_PREFIX_BYTES: usize = 70 * 1024;

/// What to do with a header whose signature matched but whose body did not
/// parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HeaderPolicy {
    /// Treat it as if no header were present and keep the bytes.
    #[default]
    Lenient,
    /// Close the connection.
    Strict,
}

#[derive(Debug, Error)]
#[error("unknown header policy {0:?} (expected \"lenient\" or \"strict\")")]
pub struct ParsePolicyError(String);

impl FromStr for HeaderPolicy {
    type Err = ParsePolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lenient" => Ok(HeaderPolicy::Lenient),
            "strict" => Ok(HeaderPolicy::Strict),
            _ => Err(ParsePolicyError(s.to_string())),
        }
    }
}

/// Connection phase. Ordered: a connection only moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    AwaitingHeader,
    Classified,
    Dispatched,
    Closed,
}

/// Handler chosen at dispatch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Tls,
    PlainText,
}

/// How the PROXY header step resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderKind {
    V1,
    V2,
    /// No signature.
    Absent,
    /// Malformed header passed through under the lenient policy.
    Ignored,
}

/// Everything a handler needs, produced once at dispatch.
#[derive(Debug)]
pub struct Dispatch {
    pub route: Route,
    /// Bytes read past the PROXY header; never yet seen by any handler.
    pub prefix: BytesMut,
    pub header: Option<ProxyHeader>,
    pub header_kind: HeaderKind,
}

/// Result of feeding one data event.
#[derive(Debug)]
pub enum Step {
    /// Need more bytes.
    Pending,
    /// Detection finished; hand off.
    Dispatch(Dispatch),
    /// Post-dispatch bytes, passed through untouched.
    Forward(Bytes),
}

/// Per-connection knobs, derived from the gateway configuration.
#[derive(Debug, Clone)]
pub struct ConnectionOptions {
    pub policy: HeaderPolicy,
    pub max_prefix_bytes: usize,
    /// Whether a TLS engine exists to hand off to.
    pub tls_enabled: bool,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            policy: HeaderPolicy::default(),
            max_prefix_bytes: DEFAULT_MAX_PREFIX_BYTES,
            tls_enabled: false,
        }
    }
}

/// State for one accepted connection.
#[derive(Debug)]
pub struct ConnectionContext {
    options: ConnectionOptions,
    buffer: BytesMut,
    header: Option<ProxyHeader>,
    header_kind: HeaderKind,
    phase: Phase,
}

impl ConnectionContext {
    pub fn new(options: ConnectionOptions) -> Self {
        Self {
            options,
            buffer: BytesMut::new(),
            header: None,
            header_kind: HeaderKind::Absent,
            phase: Phase::AwaitingHeader,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The decoded PROXY header, once resolved.
    pub fn header(&self) -> Option<&ProxyHeader> {
        self.header.as_ref()
    }

    /// Bytes held in the undecided prefix.
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Feed bytes read from the socket.
    pub fn on_data(&mut self, chunk: &[u8]) -> Result<Step, ConnectionError> {
        match self.phase {
            Phase::Closed => return Err(ConnectionError::Closed),
            Phase::Dispatched => return Ok(Step::Forward(Bytes::copy_from_slice(chunk))),
            Phase::AwaitingHeader | Phase::Classified => {}
        }

        if self.buffer.len() + chunk.len() > self.options.max_prefix_bytes {
            let limit = self.options.max_prefix_bytes;
            self.close();
            return Err(ConnectionError::PrefixTooLarge { limit });
        }
        self.buffer.extend_from_slice(chunk);

        if self.phase == Phase::AwaitingHeader && !self.resolve_header()? {
            return Ok(Step::Pending);
        }

        Ok(self.classify_prefix())
    }

    /// Peer closed the connection.
    pub fn on_close(&mut self) {
        if self.phase < Phase::Dispatched {
            debug!(phase = ?self.phase, buffered = self.buffer.len(), "Closed during detection");
        }
        self.close();
    }

    /// Socket error.
    pub fn on_error(&mut self, err: &io::Error) {
        debug!(phase = ?self.phase, error = %err, "Socket error");
        self.close();
    }

    /// Returns false while the header is still incomplete.
    fn resolve_header(&mut self) -> Result<bool, ConnectionError> {
        match decode(&self.buffer) {
            DecodeOutcome::Incomplete => return Ok(false),
            DecodeOutcome::Header(header, consumed) => {
                self.buffer.advance(consumed);
                self.header_kind = match header.version {
                    ProxyVersion::V1 => HeaderKind::V1,
                    ProxyVersion::V2 => HeaderKind::V2,
                };
                debug!(
                    version = %header.version,
                    source_ip = header.source_ip.as_deref().unwrap_or("-"),
                    source_port = header.source_port,
                    consumed,
                    "PROXY header decoded"
                );
                self.header = Some(header);
            }
            DecodeOutcome::Absent => {
                self.header_kind = HeaderKind::Absent;
            }
            DecodeOutcome::Malformed(reason) => match self.options.policy {
                HeaderPolicy::Lenient => {
                    debug!(reason = %reason, "Ignoring malformed PROXY header");
                    self.header_kind = HeaderKind::Ignored;
                }
                HeaderPolicy::Strict => {
                    self.close();
                    return Err(ConnectionError::MalformedHeader(reason));
                }
            },
        }

        self.phase = Phase::Classified;
        Ok(true)
    }

    fn classify_prefix(&mut self) -> Step {
        let route = match classify(&self.buffer) {
            Classification::Unknown => return Step::Pending,
            Classification::Tls if self.options.tls_enabled => Route::Tls,
            Classification::Tls => {
                warn!("TLS client but no TLS configuration loaded, serving as plaintext");
                Route::PlainText
            }
            Classification::PlainText => Route::PlainText,
        };

        self.phase = Phase::Dispatched;
        Step::Dispatch(Dispatch {
            route,
            prefix: std::mem::take(&mut self.buffer),
            header: self.header.clone(),
            header_kind: self.header_kind,
        })
    }

    fn close(&mut self) {
        self.phase = Phase::Closed;
        self.buffer = BytesMut::new();
    }
}
