//! Connection-scoped errors.
//!
//! None of these escape the task that owns the connection; the listener
//! logs them and counts them in its stats.

use std::io;
use std::time::Duration;

use ppedge_wire::MalformedHeader;
use thiserror::Error;

/// Why a connection ended before or during dispatch.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// Socket read/write failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// PROXY header rejected under the strict policy.
    #[error("malformed PROXY header: {0}")]
    MalformedHeader(#[from] MalformedHeader),

    /// The undecided prefix grew past the configured ceiling.
    #[error("undecided prefix exceeded {limit} bytes")]
    PrefixTooLarge { limit: usize },

    /// Header and classification were not resolved in time.
    #[error("protocol detection timed out after {0:?}")]
    DetectionTimeout(Duration),

    /// Peer closed the connection while detection was pending.
    #[error("connection closed before protocol detection completed")]
    ClosedBeforeDispatch,

    /// Data arrived after the connection was closed.
    #[error("connection already closed")]
    Closed,

    /// TLS engine rejected the client.
    #[error("TLS handshake failed: {0}")]
    Handshake(io::Error),

    /// TLS handshake did not complete in time.
    #[error("TLS handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),

    /// Downstream handler failed.
    #[error("handler error: {0}")]
    Handler(io::Error),
}

impl ConnectionError {
    /// Returns true for TLS-layer failures.
    pub fn is_handshake_failure(&self) -> bool {
        matches!(
            self,
            ConnectionError::Handshake(_) | ConnectionError::HandshakeTimeout(_)
        )
    }

    /// Returns true if the connection never got past header/classification.
    pub fn is_detection_failure(&self) -> bool {
        matches!(
            self,
            ConnectionError::MalformedHeader(_)
                | ConnectionError::PrefixTooLarge { .. }
                | ConnectionError::DetectionTimeout(_)
                | ConnectionError::ClosedBeforeDispatch
        )
    }
}
