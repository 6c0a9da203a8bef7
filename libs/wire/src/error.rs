//! Error types for PROXY header decoding.

use thiserror::Error;

/// A bounds-checked read ran past the end of its buffer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Not enough bytes left for the requested field.
    #[error("truncated field: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
}

/// Reasons a buffer that matched a PROXY signature was rejected.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MalformedHeader {
    /// v2 version nibble was not 2.
    #[error("unsupported PROXY v2 version nibble: {0}")]
    UnsupportedVersion(u8),

    /// v1 line had fewer than the six required tokens.
    #[error("PROXY v1 line has {0} fields, expected at least 6")]
    TooFewFields(usize),

    /// v1 line not terminated by CRLF within 108 bytes.
    #[error("PROXY v1 line exceeds 108 bytes without CRLF")]
    LineTooLong,

    /// A field read ran past the announced header length.
    #[error(transparent)]
    Truncated(#[from] WireError),
}
