//! PROXY protocol v1/v2 header decoder.
//!
//! [`decode`] is a pure function over the bytes received so far. It never
//! reads past the slice it is handed and never reports more consumed bytes
//! than the slice holds, so callers can re-run it on a growing buffer until
//! it stops returning [`DecodeOutcome::Incomplete`].
//!
//! Wire formats (HAProxy PROXY protocol):
//! - v1: `PROXY <proto> <src ip> <dst ip> <src port> <dst port>\r\n`, at most 108 bytes
//! - v2: 12 byte signature, version/command, family/transport, 16-bit length,
//!   then the address block (and any TLVs, which are skipped)

use std::net::Ipv4Addr;

use crate::cursor::Cursor;
use crate::error::{MalformedHeader, WireError};
use crate::header::{
    AddressFamily, DecodeOutcome, ProxyHeader, ProxyVersion, Transport, TransportProtocol,
};
use crate::ipv6::format_ipv6;

/// PROXY v1 signature.
pub const V1_SIGNATURE: &[u8] = b"PROXY ";

/// PROXY v2 signature (12 bytes).
pub const V2_SIGNATURE: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

/// Window scanned for the v1 CRLF terminator.
pub const V1_MAX_LINE_LEN: usize = 108;

/// Signature, version/command, family/transport and length.
pub const V2_FIXED_LEN: usize = 16;

/// Largest header a v2 length field can announce.
pub const MAX_V2_HEADER_LEN: usize = V2_FIXED_LEN + u16::MAX as usize;

/// IPv4 address block: 4 + 4 + 2 + 2.
const IPV4_BLOCK_LEN: usize = 12;

/// IPv6 address block: 16 + 16 + 2 + 2.
const IPV6_BLOCK_LEN: usize = 36;

/// Decode a PROXY header from the start of `buf`.
pub fn decode(buf: &[u8]) -> DecodeOutcome {
    if buf.starts_with(V1_SIGNATURE) {
        return decode_v1(buf);
    }

    if buf.starts_with(&V2_SIGNATURE) {
        return decode_v2(buf);
    }

    // "PRO" or "\r\n\r" may still grow into a signature.
    if is_signature_prefix(buf) {
        return DecodeOutcome::Incomplete;
    }

    DecodeOutcome::Absent
}

fn is_signature_prefix(buf: &[u8]) -> bool {
    buf.is_empty()
        || (buf.len() < V1_SIGNATURE.len() && V1_SIGNATURE.starts_with(buf))
        || (buf.len() < V2_SIGNATURE.len() && V2_SIGNATURE.starts_with(buf))
}

fn decode_v1(buf: &[u8]) -> DecodeOutcome {
    let window = &buf[..buf.len().min(V1_MAX_LINE_LEN)];

    let Some(line_end) = window.windows(2).position(|w| w == b"\r\n") else {
        if buf.len() < V1_MAX_LINE_LEN {
            return DecodeOutcome::Incomplete;
        }
        return DecodeOutcome::Malformed(MalformedHeader::LineTooLong);
    };

    match parse_v1_line(&buf[..line_end]) {
        Ok(mut header) => {
            let consumed = line_end + 2;
            header.length = consumed;
            DecodeOutcome::Header(header, consumed)
        }
        Err(reason) => DecodeOutcome::Malformed(reason),
    }
}

/// Only the token count can reject a line. Non-text bytes are replaced and
/// a port that is not a `u16` is recorded as `None`.
fn parse_v1_line(line: &[u8]) -> Result<ProxyHeader, MalformedHeader> {
    let line = String::from_utf8_lossy(line);

    let parts: Vec<&str> = line.split(' ').collect();
    if parts.len() < 6 {
        return Err(MalformedHeader::TooFewFields(parts.len()));
    }

    Ok(ProxyHeader {
        version: ProxyVersion::V1,
        transport: Transport::Text {
            protocol: parts[1].to_string(),
        },
        source_ip: Some(parts[2].to_string()),
        destination_ip: Some(parts[3].to_string()),
        source_port: parts[4].parse().ok(),
        destination_port: parts[5].parse().ok(),
        length: 0,
    })
}

fn decode_v2(buf: &[u8]) -> DecodeOutcome {
    match parse_v2(buf) {
        Ok(Some(header)) => {
            let consumed = header.length;
            DecodeOutcome::Header(header, consumed)
        }
        Ok(None) => DecodeOutcome::Incomplete,
        Err(reason) => DecodeOutcome::Malformed(reason),
    }
}

/// Returns `Ok(None)` while the announced header is not fully buffered.
fn parse_v2(buf: &[u8]) -> Result<Option<ProxyHeader>, MalformedHeader> {
    if buf.len() < V2_FIXED_LEN {
        return Ok(None);
    }

    let mut cursor = Cursor::new(buf);
    cursor.skip(V2_SIGNATURE.len())?;

    // High nibble = version, low nibble = command (PROXY / LOCAL, not used).
    let version = cursor.read_u8()? >> 4;
    if version != 2 {
        return Err(MalformedHeader::UnsupportedVersion(version));
    }

    let family_protocol = cursor.read_u8()?;
    let block_len = cursor.read_u16_be()? as usize;
    if cursor.remaining() < block_len {
        return Ok(None);
    }
    let block = cursor.take(block_len)?;

    let family = AddressFamily::from_nibble(family_protocol >> 4);
    let protocol = TransportProtocol::from_nibble(family_protocol & 0x0f);
    let addresses = parse_addresses(family, block)?;

    let mut header = ProxyHeader {
        version: ProxyVersion::V2,
        transport: Transport::Binary { family, protocol },
        source_ip: None,
        destination_ip: None,
        source_port: None,
        destination_port: None,
        length: cursor.position(),
    };

    if let Some(addrs) = addresses {
        header.source_ip = Some(addrs.source_ip);
        header.destination_ip = Some(addrs.destination_ip);
        header.source_port = Some(addrs.source_port);
        header.destination_port = Some(addrs.destination_port);
    }

    Ok(Some(header))
}

struct Addresses {
    source_ip: String,
    destination_ip: String,
    source_port: u16,
    destination_port: u16,
}

/// Read the address block for the families that carry one.
///
/// Bytes after the family's fixed block are TLVs and are left alone.
fn parse_addresses(family: AddressFamily, block: &[u8]) -> Result<Option<Addresses>, WireError> {
    let mut cursor = Cursor::new(block);

    let (source_ip, destination_ip) = match family {
        AddressFamily::Inet if block.len() >= IPV4_BLOCK_LEN => {
            let src = Ipv4Addr::from(cursor.read_array::<4>()?);
            let dst = Ipv4Addr::from(cursor.read_array::<4>()?);
            (src.to_string(), dst.to_string())
        }
        AddressFamily::Inet6 if block.len() >= IPV6_BLOCK_LEN => {
            let src = cursor.read_array::<16>()?;
            let dst = cursor.read_array::<16>()?;
            (format_ipv6(&src), format_ipv6(&dst))
        }
        _ => return Ok(None),
    };

    let source_port = cursor.read_u16_be()?;
    let destination_port = cursor.read_u16_be()?;

    Ok(Some(Addresses {
        source_ip,
        destination_ip,
        source_port,
        destination_port,
    }))
}
