//! TLS record signature sniffing.
//!
//! Only the record header is inspected: content type 0x16 (handshake) and
//! major version 3. This can misclassify plaintext that happens to start
//! with those bytes; the handshake itself is left to the TLS engine.

use serde::Serialize;

/// Record content type for a handshake message.
pub const TLS_HANDSHAKE_RECORD: u8 = 0x16;

/// Major protocol version shared by SSL 3.0 and TLS 1.x.
pub const TLS_MAJOR_VERSION: u8 = 0x03;

/// Bytes needed before a decision is made.
pub const MIN_CLASSIFY_LEN: usize = 3;

/// What the remaining stream looks like.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Classification {
    /// Starts with a TLS handshake record header.
    Tls,
    /// Anything else.
    PlainText,
    /// Fewer than three bytes buffered.
    Unknown,
}

/// Classify the bytes following any PROXY header.
pub fn classify(buf: &[u8]) -> Classification {
    if buf.len() < MIN_CLASSIFY_LEN {
        return Classification::Unknown;
    }

    if buf[0] == TLS_HANDSHAKE_RECORD && buf[1] == TLS_MAJOR_VERSION {
        Classification::Tls
    } else {
        Classification::PlainText
    }
}
