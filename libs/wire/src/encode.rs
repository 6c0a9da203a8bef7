//! PROXY protocol header generation.
//!
//! Builds v1 lines and v2 binary headers for a client/listener address
//! pair, as a load balancer in front of the gateway would. The decoder in
//! this crate accepts everything produced here.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::decode::{V2_FIXED_LEN, V2_SIGNATURE};

/// Version 2 with PROXY command (high nibble = version, low nibble = command).
const VERSION_COMMAND_PROXY: u8 = 0x21;

/// Version 2 with LOCAL command (health checks, no addresses).
const VERSION_COMMAND_LOCAL: u8 = 0x20;

/// Address family: AF_UNSPEC.
const AF_UNSPEC: u8 = 0x00;

/// Address family: AF_INET (IPv4).
const AF_INET: u8 = 0x10;

/// Address family: AF_INET6 (IPv6).
const AF_INET6: u8 = 0x20;

/// Transport protocol: STREAM (TCP).
const TRANSPORT_STREAM: u8 = 0x01;

/// Length of IPv4 address block (4 + 4 + 2 + 2 = 12 bytes).
const IPV4_ADDR_LEN: u16 = 12;

/// Length of IPv6 address block (16 + 16 + 2 + 2 = 36 bytes).
const IPV6_ADDR_LEN: u16 = 36;

/// PROXY v1 text header.
#[derive(Debug, Clone)]
pub struct ProxyHeaderV1 {
    /// Original client address.
    pub src_addr: SocketAddr,
    /// Address the client connected to.
    pub dst_addr: SocketAddr,
}

impl ProxyHeaderV1 {
    pub fn new(src_addr: SocketAddr, dst_addr: SocketAddr) -> Self {
        Self { src_addr, dst_addr }
    }

    /// Render the header line including its CRLF.
    ///
    /// Mixed address families fall back to `PROXY UNKNOWN`, which carries
    /// no addresses.
    pub fn encode(&self) -> String {
        let protocol = match (self.src_addr.ip(), self.dst_addr.ip()) {
            (IpAddr::V4(_), IpAddr::V4(_)) => "TCP4",
            (IpAddr::V6(_), IpAddr::V6(_)) => "TCP6",
            _ => return "PROXY UNKNOWN\r\n".to_string(),
        };

        format!(
            "PROXY {} {} {} {} {}\r\n",
            protocol,
            self.src_addr.ip(),
            self.dst_addr.ip(),
            self.src_addr.port(),
            self.dst_addr.port()
        )
    }
}

/// PROXY v2 binary header.
#[derive(Debug, Clone)]
pub struct ProxyHeaderV2 {
    /// Original client address; `None` for a LOCAL header.
    pub src_addr: Option<SocketAddr>,
    /// Address the client connected to.
    pub dst_addr: Option<SocketAddr>,
}

impl ProxyHeaderV2 {
    /// A PROXY command header for the given connection.
    pub fn new(src_addr: SocketAddr, dst_addr: SocketAddr) -> Self {
        Self {
            src_addr: Some(src_addr),
            dst_addr: Some(dst_addr),
        }
    }

    /// A LOCAL command header with no address block.
    pub fn local() -> Self {
        Self {
            src_addr: None,
            dst_addr: None,
        }
    }

    /// Generate the header bytes.
    pub fn encode(&self) -> Vec<u8> {
        let (Some(src), Some(dst)) = (self.src_addr, self.dst_addr) else {
            return encode_block(VERSION_COMMAND_LOCAL, AF_UNSPEC, &[]);
        };

        // Both sides should share a family; if not, try to narrow to IPv4.
        match (src.ip(), dst.ip()) {
            (IpAddr::V4(src_ip), IpAddr::V4(dst_ip)) => encode_v4(src_ip, dst_ip, src, dst),
            (IpAddr::V6(src_ip), IpAddr::V6(dst_ip)) => encode_v6(src_ip, dst_ip, src, dst),
            (IpAddr::V4(src_ip), IpAddr::V6(dst_ip)) => {
                let dst_v4 = extract_v4_from_v6(dst_ip).unwrap_or(Ipv4Addr::UNSPECIFIED);
                encode_v4(src_ip, dst_v4, src, dst)
            }
            (IpAddr::V6(src_ip), IpAddr::V4(dst_ip)) => {
                let src_v4 = extract_v4_from_v6(src_ip).unwrap_or(Ipv4Addr::UNSPECIFIED);
                encode_v4(src_v4, dst_ip, src, dst)
            }
        }
    }
}

fn encode_v4(src_ip: Ipv4Addr, dst_ip: Ipv4Addr, src: SocketAddr, dst: SocketAddr) -> Vec<u8> {
    let mut block = Vec::with_capacity(IPV4_ADDR_LEN as usize);
    block.extend_from_slice(&src_ip.octets());
    block.extend_from_slice(&dst_ip.octets());
    block.extend_from_slice(&src.port().to_be_bytes());
    block.extend_from_slice(&dst.port().to_be_bytes());
    encode_block(VERSION_COMMAND_PROXY, AF_INET | TRANSPORT_STREAM, &block)
}

fn encode_v6(src_ip: Ipv6Addr, dst_ip: Ipv6Addr, src: SocketAddr, dst: SocketAddr) -> Vec<u8> {
    let mut block = Vec::with_capacity(IPV6_ADDR_LEN as usize);
    block.extend_from_slice(&src_ip.octets());
    block.extend_from_slice(&dst_ip.octets());
    block.extend_from_slice(&src.port().to_be_bytes());
    block.extend_from_slice(&dst.port().to_be_bytes());
    encode_block(VERSION_COMMAND_PROXY, AF_INET6 | TRANSPORT_STREAM, &block)
}

fn encode_block(version_command: u8, family_protocol: u8, block: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(V2_FIXED_LEN + block.len());
    buf.extend_from_slice(&V2_SIGNATURE);
    buf.push(version_command);
    buf.push(family_protocol);
    buf.extend_from_slice(&(block.len() as u16).to_be_bytes());
    buf.extend_from_slice(block);
    buf
}

/// Extract IPv4 from an IPv4-mapped or IPv4-compatible IPv6 address.
fn extract_v4_from_v6(addr: Ipv6Addr) -> Option<Ipv4Addr> {
    let octets = addr.octets();

    // ::ffff:a.b.c.d
    if octets[..10].iter().all(|&b| b == 0) && octets[10] == 0xff && octets[11] == 0xff {
        return Some(Ipv4Addr::new(
            octets[12], octets[13], octets[14], octets[15],
        ));
    }

    // ::a.b.c.d (deprecated)
    if octets[..12].iter().all(|&b| b == 0) {
        return Some(Ipv4Addr::new(
            octets[12], octets[13], octets[14], octets[15],
        ));
    }

    None
}
