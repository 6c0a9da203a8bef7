//! Per-connection protocol detection and dispatch.
//!
//! This module provides:
//! - The classification state machine (PROXY header, then TLS sniff)
//! - TLS handoff that replays already-read bytes into the TLS engine
//! - The async driver that connects a socket to both
//!
//! ## Architecture
//!
//! ```text
//! Socket -> ConnectionContext -> decode (strip PROXY header) -> classify
//!                                                                  |
//!                              TlsHandoff (PrefixedStream) <-- Tls | PlainText --> handler
//!                                        |
//!                                     handler
//! ```

mod driver;
mod error;
mod handoff;
mod state;

pub use driver::{
    serve_connection, AsyncStream, BoxedStream, ConnectionHandler, ConnectionSummary,
    DispatchedConnection, GatewayContext, DEFAULT_DETECT_TIMEOUT, READ_CHUNK_SIZE,
};
pub use error::ConnectionError;
pub use handoff::{PrefixedStream, TlsHandoff, DEFAULT_HANDSHAKE_TIMEOUT};
pub use state::{
    ConnectionContext, ConnectionOptions, Dispatch, HeaderKind, HeaderPolicy, ParsePolicyError,
    Phase, Route, Step, DEFAULT_MAX_PREFIX_BYTES,
};
