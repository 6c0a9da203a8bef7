//! IPv6 text formatting for addresses carried in PROXY v2 headers.
//!
//! The output is always eight lowercase hextets with leading zeros removed,
//! where the longest run of two or more all-zero groups (leftmost on ties)
//! is replaced by `::`. A single zero group is written as `0`. Unlike
//! [`std::net::Ipv6Addr`]'s `Display`, IPv4-mapped addresses keep the hextet
//! form instead of an embedded dotted quad.

use std::fmt::Write;

/// Format 16 network-order bytes as IPv6 text.
pub fn format_ipv6(octets: &[u8; 16]) -> String {
    let mut groups = [0u16; 8];
    for (i, group) in groups.iter_mut().enumerate() {
        *group = u16::from_be_bytes([octets[2 * i], octets[2 * i + 1]]);
    }

    let (run_start, run_len) = longest_zero_run(&groups);

    let mut out = String::with_capacity(39);
    if run_len < 2 {
        write_groups(&mut out, &groups);
        return out;
    }

    write_groups(&mut out, &groups[..run_start]);
    out.push_str("::");
    write_groups(&mut out, &groups[run_start + run_len..]);
    out
}

fn write_groups(out: &mut String, groups: &[u16]) {
    for (i, group) in groups.iter().enumerate() {
        if i > 0 {
            out.push(':');
        }
        // Writing to a String cannot fail.
        let _ = write!(out, "{:x}", group);
    }
}

/// Start index and length of the longest run of zero groups.
fn longest_zero_run(groups: &[u16; 8]) -> (usize, usize) {
    let mut best = (0, 0);
    let mut current_start = 0;
    let mut current_len = 0;

    for (i, &group) in groups.iter().enumerate() {
        if group == 0 {
            if current_len == 0 {
                current_start = i;
            }
            current_len += 1;
            if current_len > best.1 {
                best = (current_start, current_len);
            }
        } else {
            current_len = 0;
        }
    }

    best
}
