//! Frame decoding specialized to TCP extraction.
//!
//! The assembler only ever needs the IP endpoints and the TCP header of a
//! captured frame, so instead of a general layered packet model the walk
//! here goes Ethernet -> optional 802.1Q tag -> IPv4/IPv6 -> TCP in one
//! pass and returns just that tuple. Frames that are well-formed but not
//! TCP decode to `None`; truncated headers are errors.

pub mod tcp;

use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use tcp::TcpHeader;

const ETHERNET_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const ETHERTYPE_IPV6: u16 = 0x86DD;
const ETHERTYPE_VLAN: u16 = 0x8100;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IPV6_HEADER_LEN: usize = 40;
const IP_PROTO_TCP: u8 = 6;

/// Errors from frame decoding.
#[derive(Debug)]
pub enum ParseError {
    /// Not enough bytes for the header being decoded.
    TooShort { expected: usize, actual: usize },
    /// Invalid header values.
    InvalidHeader(String),
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ParseError::TooShort { expected, actual } => {
                write!(f, "frame too short: need {} bytes, got {}", expected, actual)
            }
            ParseError::InvalidHeader(msg) => write!(f, "invalid header: {}", msg),
        }
    }
}

impl std::error::Error for ParseError {}

/// A decoded TCP packet: the flow endpoints plus the borrowed header.
#[derive(Debug)]
pub struct TcpPacket<'a> {
    pub src_ip: IpAddr,
    pub dst_ip: IpAddr,
    pub tcp: TcpHeader<'a>,
}

/// Decode an Ethernet frame down to its TCP header, if it carries one.
///
/// `Ok(None)` covers ARP, non-TCP transports, and non-first IPv4
/// fragments (fragment reassembly happens upstream or not at all).
pub fn parse_tcp_packet(data: &[u8]) -> Result<Option<TcpPacket<'_>>, ParseError> {
    if data.len() < ETHERNET_HEADER_LEN {
        return Err(ParseError::TooShort {
            expected: ETHERNET_HEADER_LEN,
            actual: data.len(),
        });
    }
    let mut ether_type = u16::from_be_bytes([data[12], data[13]]);
    let mut offset = ETHERNET_HEADER_LEN;

    if ether_type == ETHERTYPE_VLAN {
        if data.len() < offset + 4 {
            return Err(ParseError::TooShort {
                expected: offset + 4,
                actual: data.len(),
            });
        }
        ether_type = u16::from_be_bytes([data[offset + 2], data[offset + 3]]);
        offset += 4;
    }

    match ether_type {
        ETHERTYPE_IPV4 => parse_ipv4(&data[offset..]),
        ETHERTYPE_IPV6 => parse_ipv6(&data[offset..]),
        _ => Ok(None),
    }
}

fn parse_ipv4(data: &[u8]) -> Result<Option<TcpPacket<'_>>, ParseError> {
    if data.len() < IPV4_MIN_HEADER_LEN {
        return Err(ParseError::TooShort {
            expected: IPV4_MIN_HEADER_LEN,
            actual: data.len(),
        });
    }
    if data[0] >> 4 != 4 {
        return Err(ParseError::InvalidHeader(format!(
            "IPv4 version field is {}",
            data[0] >> 4
        )));
    }
    let header_len = (data[0] & 0x0F) as usize * 4;
    if header_len < IPV4_MIN_HEADER_LEN {
        return Err(ParseError::InvalidHeader(format!(
            "IPv4 IHL too small: {}",
            header_len
        )));
    }
    if data.len() < header_len {
        return Err(ParseError::TooShort {
            expected: header_len,
            actual: data.len(),
        });
    }

    if data[9] != IP_PROTO_TCP {
        return Ok(None);
    }
    // Later fragments carry no TCP header.
    let fragment_offset = u16::from_be_bytes([data[6], data[7]]) & 0x1FFF;
    if fragment_offset != 0 {
        return Ok(None);
    }

    let src_ip = IpAddr::V4(Ipv4Addr::new(data[12], data[13], data[14], data[15]));
    let dst_ip = IpAddr::V4(Ipv4Addr::new(data[16], data[17], data[18], data[19]));

    // Cap the TCP slice at the IP total length so Ethernet padding never
    // leaks into the payload; tolerate captures shorter than advertised.
    let total_len = u16::from_be_bytes([data[2], data[3]]) as usize;
    let end = if total_len >= header_len {
        total_len.min(data.len())
    } else {
        data.len()
    };

    let tcp = TcpHeader::parse(&data[header_len..end])?;
    Ok(Some(TcpPacket { src_ip, dst_ip, tcp }))
}

fn parse_ipv6(data: &[u8]) -> Result<Option<TcpPacket<'_>>, ParseError> {
    if data.len() < IPV6_HEADER_LEN {
        return Err(ParseError::TooShort {
            expected: IPV6_HEADER_LEN,
            actual: data.len(),
        });
    }
    if data[0] >> 4 != 6 {
        return Err(ParseError::InvalidHeader(format!(
            "IPv6 version field is {}",
            data[0] >> 4
        )));
    }
    // No extension-header walk: TCP directly after the fixed header
    // covers the traffic a tap for HTTP sees.
    if data[6] != IP_PROTO_TCP {
        return Ok(None);
    }

    let mut src = [0u8; 16];
    src.copy_from_slice(&data[8..24]);
    let mut dst = [0u8; 16];
    dst.copy_from_slice(&data[24..40]);

    let payload_len = u16::from_be_bytes([data[4], data[5]]) as usize;
    let end = (IPV6_HEADER_LEN + payload_len).min(data.len());

    let tcp = TcpHeader::parse(&data[IPV6_HEADER_LEN..end])?;
    Ok(Some(TcpPacket {
        src_ip: IpAddr::V6(Ipv6Addr::from(src)),
        dst_ip: IpAddr::V6(Ipv6Addr::from(dst)),
        tcp,
    }))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Ethernet + IPv4 + TCP frame with the given payload.
    pub(crate) fn make_ipv4_tcp(
        src_ip: [u8; 4],
        dst_ip: [u8; 4],
        src_port: u16,
        dst_port: u16,
        seq: u32,
        flag_bits: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut pkt = vec![0u8; ETHERNET_HEADER_LEN];
        pkt[12] = 0x08; // IPv4

        let total_len = (IPV4_MIN_HEADER_LEN + tcp::TCP_MIN_HEADER_LEN + payload.len()) as u16;
        let mut ip = vec![0u8; IPV4_MIN_HEADER_LEN];
        ip[0] = 0x45;
        ip[2..4].copy_from_slice(&total_len.to_be_bytes());
        ip[8] = 64; // ttl
        ip[9] = IP_PROTO_TCP;
        ip[12..16].copy_from_slice(&src_ip);
        ip[16..20].copy_from_slice(&dst_ip);
        pkt.extend_from_slice(&ip);

        let mut tcp_hdr = vec![0u8; tcp::TCP_MIN_HEADER_LEN];
        tcp_hdr[0..2].copy_from_slice(&src_port.to_be_bytes());
        tcp_hdr[2..4].copy_from_slice(&dst_port.to_be_bytes());
        tcp_hdr[4..8].copy_from_slice(&seq.to_be_bytes());
        tcp_hdr[12] = 0x50;
        tcp_hdr[13] = flag_bits;
        pkt.extend_from_slice(&tcp_hdr);
        pkt.extend_from_slice(payload);
        pkt
    }

    #[test]
    fn decodes_ipv4_tcp_frame() {
        let frame = make_ipv4_tcp(
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            5000,
            80,
            1000,
            tcp::flags::ACK,
            b"GET / HTTP/1.1\r\n\r\n",
        );
        let packet = parse_tcp_packet(&frame).unwrap().unwrap();
        assert_eq!(packet.src_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)));
        assert_eq!(packet.dst_ip, IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        assert_eq!(packet.tcp.src_port(), 5000);
        assert_eq!(packet.tcp.dst_port(), 80);
        assert_eq!(packet.tcp.payload(), b"GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn ethernet_padding_does_not_leak_into_payload() {
        let mut frame = make_ipv4_tcp(
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            5000,
            80,
            1000,
            tcp::flags::ACK,
            b"hi",
        );
        frame.extend_from_slice(&[0u8; 8]); // pad to minimum frame size
        let packet = parse_tcp_packet(&frame).unwrap().unwrap();
        assert_eq!(packet.tcp.payload(), b"hi");
    }

    #[test]
    fn vlan_tagged_frame_is_unwrapped() {
        let inner = make_ipv4_tcp(
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            5000,
            80,
            1,
            tcp::flags::SYN,
            b"",
        );
        let mut frame = inner[..12].to_vec();
        frame.extend_from_slice(&[0x81, 0x00, 0x00, 0x2A]); // VLAN 42
        frame.extend_from_slice(&inner[12..]);
        let packet = parse_tcp_packet(&frame).unwrap().unwrap();
        assert!(packet.tcp.syn());
    }

    #[test]
    fn non_tcp_frames_decode_to_none() {
        // ARP
        let mut arp = vec![0u8; 42];
        arp[12] = 0x08;
        arp[13] = 0x06;
        assert!(parse_tcp_packet(&arp).unwrap().is_none());

        // UDP
        let mut frame = make_ipv4_tcp([1, 1, 1, 1], [2, 2, 2, 2], 53, 53, 0, 0, b"");
        frame[ETHERNET_HEADER_LEN + 9] = 17;
        assert!(parse_tcp_packet(&frame).unwrap().is_none());
    }

    #[test]
    fn later_fragment_is_skipped() {
        let mut frame = make_ipv4_tcp([1, 1, 1, 1], [2, 2, 2, 2], 80, 80, 0, 0, b"x");
        frame[ETHERNET_HEADER_LEN + 7] = 0x10; // fragment offset 16
        assert!(parse_tcp_packet(&frame).unwrap().is_none());
    }

    #[test]
    fn truncated_frame_is_an_error() {
        assert!(parse_tcp_packet(&[0u8; 10]).is_err());
        let frame = make_ipv4_tcp([1, 1, 1, 1], [2, 2, 2, 2], 80, 80, 0, 0, b"");
        assert!(parse_tcp_packet(&frame[..20]).is_err());
    }
}
