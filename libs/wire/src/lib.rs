//! Wire-level helpers for the gateway.
//!
//! This library provides:
//! - PROXY protocol v1 (text) and v2 (binary) header decoding
//! - PROXY header generation, for load balancers and test clients
//! - TLS record signature sniffing
//!
//! Everything here is pure: functions take the bytes received so far and
//! never perform I/O, so they can be re-run on a growing buffer.

mod classify;
mod cursor;
mod decode;
mod encode;
mod error;
mod header;
mod ipv6;

pub use classify::{classify, Classification, MIN_CLASSIFY_LEN};
pub use cursor::Cursor;
pub use decode::{decode, MAX_V2_HEADER_LEN, V1_MAX_LINE_LEN, V1_SIGNATURE, V2_SIGNATURE};
pub use encode::{ProxyHeaderV1, ProxyHeaderV2};
pub use error::{MalformedHeader, WireError};
pub use header::{
    AddressFamily, DecodeOutcome, ProxyHeader, ProxyVersion, Transport, TransportProtocol,
};
pub use ipv6::format_ipv6;
