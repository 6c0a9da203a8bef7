//! Decoded PROXY header types.

use serde::Serialize;

use crate::error::MalformedHeader;

/// PROXY protocol version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyVersion {
    V1,
    V2,
}

impl ProxyVersion {
    /// Short lowercase name (`v1` / `v2`).
    pub fn as_str(self) -> &'static str {
        match self {
            ProxyVersion::V1 => "v1",
            ProxyVersion::V2 => "v2",
        }
    }
}

impl std::fmt::Display for ProxyVersion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Address family from the high nibble of v2 byte 13.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AddressFamily {
    Unspecified,
    Inet,
    Inet6,
    Unix,
    Other(u8),
}

impl AddressFamily {
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble {
            0x0 => AddressFamily::Unspecified,
            0x1 => AddressFamily::Inet,
            0x2 => AddressFamily::Inet6,
            0x3 => AddressFamily::Unix,
            other => AddressFamily::Other(other),
        }
    }
}

/// Transport protocol from the low nibble of v2 byte 13.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportProtocol {
    Unspecified,
    Stream,
    Datagram,
    Other(u8),
}

impl TransportProtocol {
    pub fn from_nibble(nibble: u8) -> Self {
        match nibble {
            0x0 => TransportProtocol::Unspecified,
            0x1 => TransportProtocol::Stream,
            0x2 => TransportProtocol::Datagram,
            other => TransportProtocol::Other(other),
        }
    }
}

/// Transport family indicator carried by a header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum Transport {
    /// v1 protocol token as written on the wire (`TCP4`, `TCP6`, ...).
    Text { protocol: String },
    /// v2 family and transport nibbles.
    Binary {
        family: AddressFamily,
        protocol: TransportProtocol,
    },
}

/// A decoded PROXY header.
///
/// Addresses are kept in textual form. A v2 header of an unrecognized
/// family, or with an address block shorter than the family requires,
/// carries no address fields.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProxyHeader {
    pub version: ProxyVersion,
    pub transport: Transport,
    pub source_ip: Option<String>,
    pub destination_ip: Option<String>,
    pub source_port: Option<u16>,
    pub destination_port: Option<u16>,
    /// Bytes the header occupied in the stream.
    pub length: usize,
}

impl ProxyHeader {
    /// Returns true if the header carried source and destination addresses.
    pub fn has_addresses(&self) -> bool {
        self.source_ip.is_some() && self.destination_ip.is_some()
    }
}

/// Result of running the decoder over a buffer prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// A complete header and the number of bytes it occupied.
    Header(ProxyHeader, usize),
    /// The buffer does not start with a PROXY signature.
    Absent,
    /// A signature matched (or may still match) but more bytes are needed.
    Incomplete,
    /// A signature matched but the header is structurally invalid.
    Malformed(MalformedHeader),
}

impl DecodeOutcome {
    /// Bytes the outcome claims from the front of the buffer.
    pub fn consumed(&self) -> usize {
        match self {
            DecodeOutcome::Header(_, n) => *n,
            _ => 0,
        }
    }
}
