//! PROXY protocol v1/v2 preamble decoding
//!
//! Load balancers in front of the proxy can convey the original client
//! address through a PROXY protocol preamble sent before any MySQL bytes.
//! Both the v1 text form and the v2 binary form are supported. Per the
//! protocol, a receiver configured to expect the preamble must reject
//! connections that do not carry one.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use crate::error::{ProxyError, Result};

/// The 12-byte signature that opens a v2 preamble.
pub const SIG_V2: [u8; 12] = [
    0x0D, 0x0A, 0x0D, 0x0A, 0x00, 0x0D, 0x0A, 0x51, 0x55, 0x49, 0x54, 0x0A,
];

/// Maximum length of a v1 line after "PROXY ", excluding CRLF.
pub const V1_MAX_LEN: usize = 101;

/// Decoded PROXY protocol preamble.
///
/// `source` is absent for `PROXY UNKNOWN` (v1) and `LOCAL` (v2)
/// connections, where the sender does not relay a client address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyHeader {
    /// The original client address as reported by the load balancer
    pub source: Option<SocketAddr>,
}

/// Parse a v1 preamble line: the part after `"PROXY "` with CRLF stripped,
/// e.g. `"TCP4 192.0.2.1 198.51.100.1 56324 443"`.
pub fn parse_v1(line: &[u8]) -> Result<ProxyHeader> {
    let line = std::str::from_utf8(line)
        .map_err(|_| ProxyError::Protocol("PROXY v1 preamble is not ASCII".into()))?;
    let mut parts = line.split(' ');

    let family = parts
        .next()
        .ok_or_else(|| ProxyError::Protocol("PROXY v1 preamble missing protocol".into()))?;

    match family {
        "UNKNOWN" => Ok(ProxyHeader { source: None }),
        "TCP4" | "TCP6" => {
            let src_ip = parts
                .next()
                .and_then(|s| s.parse::<IpAddr>().ok())
                .ok_or_else(|| ProxyError::Protocol("invalid PROXY v1 source address".into()))?;
            let _dst_ip = parts
                .next()
                .and_then(|s| s.parse::<IpAddr>().ok())
                .ok_or_else(|| {
                    ProxyError::Protocol("invalid PROXY v1 destination address".into())
                })?;
            let src_port = parts
                .next()
                .and_then(|s| s.parse::<u16>().ok())
                .ok_or_else(|| ProxyError::Protocol("invalid PROXY v1 source port".into()))?;

            Ok(ProxyHeader {
                source: Some(SocketAddr::new(src_ip, src_port)),
            })
        }
        other => Err(ProxyError::Protocol(format!(
            "unsupported PROXY v1 protocol: {}",
            other
        ))),
    }
}

/// Parse the v2 address block.
///
/// `ver_cmd` and `family` are the two bytes following the signature;
/// `body` is the variable-length address block announced by the 16-bit
/// length field.
pub fn parse_v2(ver_cmd: u8, family: u8, body: &[u8]) -> Result<ProxyHeader> {
    if ver_cmd >> 4 != 0x2 {
        return Err(ProxyError::Protocol(format!(
            "unsupported PROXY v2 version: {:#x}",
            ver_cmd >> 4
        )));
    }

    match ver_cmd & 0x0F {
        // LOCAL: health checks and the like, no relayed address
        0x0 => return Ok(ProxyHeader { source: None }),
        0x1 => {}
        cmd => {
            return Err(ProxyError::Protocol(format!(
                "unsupported PROXY v2 command: {:#x}",
                cmd
            )))
        }
    }

    match family {
        // AF_INET, STREAM
        0x11 => {
            if body.len() < 12 {
                return Err(ProxyError::Protocol(
                    "PROXY v2 IPv4 address block too short".into(),
                ));
            }
            let src_ip = Ipv4Addr::new(body[0], body[1], body[2], body[3]);
            let src_port = u16::from_be_bytes([body[8], body[9]]);
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(IpAddr::V4(src_ip), src_port)),
            })
        }
        // AF_INET6, STREAM
        0x21 => {
            if body.len() < 36 {
                return Err(ProxyError::Protocol(
                    "PROXY v2 IPv6 address block too short".into(),
                ));
            }
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&body[0..16]);
            let src_ip = Ipv6Addr::from(octets);
            let src_port = u16::from_be_bytes([body[32], body[33]]);
            Ok(ProxyHeader {
                source: Some(SocketAddr::new(IpAddr::V6(src_ip), src_port)),
            })
        }
        // AF_UNSPEC: sender relays nothing useful
        0x00 => Ok(ProxyHeader { source: None }),
        other => Err(ProxyError::Protocol(format!(
            "unsupported PROXY v2 address family: {:#x}",
            other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_v1_tcp4() {
        let header = parse_v1(b"TCP4 192.0.2.1 198.51.100.1 56324 443").unwrap();
        assert_eq!(header.source, Some("192.0.2.1:56324".parse().unwrap()));
    }

    #[test]
    fn test_parse_v1_tcp6() {
        let header = parse_v1(b"TCP6 2001:db8::1 2001:db8::2 4000 443").unwrap();
        assert_eq!(header.source, Some("[2001:db8::1]:4000".parse().unwrap()));
    }

    #[test]
    fn test_parse_v1_unknown() {
        let header = parse_v1(b"UNKNOWN").unwrap();
        assert_eq!(header.source, None);
    }

    #[test]
    fn test_parse_v1_garbage() {
        assert!(parse_v1(b"TCP4 not-an-ip x 1 2").is_err());
        assert!(parse_v1(b"SCTP 192.0.2.1 198.51.100.1 1 2").is_err());
    }

    #[test]
    fn test_parse_v2_ipv4() {
        let mut body = Vec::new();
        body.extend_from_slice(&[192, 0, 2, 1]); // src
        body.extend_from_slice(&[198, 51, 100, 1]); // dst
        body.extend_from_slice(&56324u16.to_be_bytes()); // src port
        body.extend_from_slice(&443u16.to_be_bytes()); // dst port

        let header = parse_v2(0x21, 0x11, &body).unwrap();
        assert_eq!(header.source, Some("192.0.2.1:56324".parse().unwrap()));
    }

    #[test]
    fn test_parse_v2_ipv6() {
        let src: Ipv6Addr = "2001:db8::1".parse().unwrap();
        let dst: Ipv6Addr = "2001:db8::2".parse().unwrap();
        let mut body = Vec::new();
        body.extend_from_slice(&src.octets());
        body.extend_from_slice(&dst.octets());
        body.extend_from_slice(&4000u16.to_be_bytes());
        body.extend_from_slice(&443u16.to_be_bytes());

        let header = parse_v2(0x21, 0x21, &body).unwrap();
        assert_eq!(header.source, Some("[2001:db8::1]:4000".parse().unwrap()));
    }

    #[test]
    fn test_parse_v2_local() {
        let header = parse_v2(0x20, 0x00, &[]).unwrap();
        assert_eq!(header.source, None);
    }

    #[test]
    fn test_parse_v2_bad_version() {
        assert!(parse_v2(0x11, 0x11, &[]).is_err());
    }
}
