//! IPv4 + TCP/UDP Header Parser
//!
//! Parses the raw packets a tunnel device hands us. Only IPv4 is
//! understood; anything else is reported as unparseable and the caller
//! forwards it untouched.
//!
//! Layout consumed:
//! - IPv4: version/IHL at 0, protocol at 9, source at 12..16, destination at 16..20
//! - TCP/UDP: source port at +0, destination port at +2 (big-endian)
//!
//! The TCP payload is taken to start 20 bytes after the IP header. The TCP
//! data-offset field (and therefore any TCP options) is ignored, so for
//! segments carrying options the payload view starts inside the options.

use std::fmt;
use std::net::Ipv4Addr;

/// Minimum IPv4 header length (IHL = 5)
pub const MIN_IPV4_HEADER_LEN: usize = 20;

/// Fixed TCP header length assumed when locating the payload
pub const TCP_HEADER_LEN: usize = 20;

/// UDP header length
pub const UDP_HEADER_LEN: usize = 8;

/// IANA protocol number for TCP
pub const PROTO_TCP: u8 = 6;

/// IANA protocol number for UDP
pub const PROTO_UDP: u8 = 17;

/// Well-known ports the filter cares about
pub const DNS_PORT: u16 = 53;
pub const HTTP_PORT: u16 = 80;
pub const HTTPS_PORT: u16 = 443;

const PROTOCOL_OFFSET: usize = 9;
const SOURCE_OFFSET: usize = 12;
const DESTINATION_OFFSET: usize = 16;

/// Transport protocol carried by an IPv4 packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransportProtocol {
    Tcp,
    Udp,
    /// Any other protocol number (ICMP, GRE, ...)
    Other(u8),
}

impl TransportProtocol {
    /// IANA protocol number
    pub fn number(self) -> u8 {
        match self {
            Self::Tcp => PROTO_TCP,
            Self::Udp => PROTO_UDP,
            Self::Other(n) => n,
        }
    }

    /// Whether this protocol carries 16-bit ports
    pub fn has_ports(self) -> bool {
        matches!(self, Self::Tcp | Self::Udp)
    }
}

impl From<u8> for TransportProtocol {
    fn from(value: u8) -> Self {
        match value {
            PROTO_TCP => Self::Tcp,
            PROTO_UDP => Self::Udp,
            other => Self::Other(other),
        }
    }
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => write!(f, "TCP"),
            Self::Udp => write!(f, "UDP"),
            Self::Other(n) => write!(f, "IP({})", n),
        }
    }
}

/// A parsed IPv4 packet.
///
/// `payload` borrows the buffer the packet was parsed from, so a `Packet`
/// cannot outlive the read cycle that filled that buffer: the borrow
/// checker rejects any attempt to keep it across the next read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Packet<'a> {
    /// IP version (always 4)
    pub version: u8,
    /// Transport protocol
    pub protocol: TransportProtocol,
    /// Source address
    pub source: Ipv4Addr,
    /// Destination address
    pub destination: Ipv4Addr,
    /// Source port (0 unless TCP/UDP)
    pub source_port: u16,
    /// Destination port (0 unless TCP/UDP)
    pub destination_port: u16,
    /// Bytes after the transport header (or after the IP header for other protocols)
    pub payload: &'a [u8],
}

impl<'a> Packet<'a> {
    /// Parse an IPv4 packet from the start of `data`.
    ///
    /// Returns `None` if the data is shorter than any header it claims to
    /// carry, if the version nibble is not 4, or if the IHL is below the
    /// 20-byte minimum. `data` is only borrowed; nothing about it changes.
    pub fn parse(data: &'a [u8]) -> Option<Self> {
        if data.len() < MIN_IPV4_HEADER_LEN {
            return None;
        }

        let version = data[0] >> 4;
        if version != 4 {
            return None;
        }

        let header_len = usize::from(data[0] & 0x0F) * 4;
        if header_len < MIN_IPV4_HEADER_LEN || data.len() < header_len {
            return None;
        }

        let protocol = TransportProtocol::from(data[PROTOCOL_OFFSET]);
        let source = read_addr(data, SOURCE_OFFSET);
        let destination = read_addr(data, DESTINATION_OFFSET);

        let transport = &data[header_len..];
        let (source_port, destination_port, payload) = match protocol {
            TransportProtocol::Tcp => split_ports(transport, TCP_HEADER_LEN)?,
            TransportProtocol::Udp => split_ports(transport, UDP_HEADER_LEN)?,
            TransportProtocol::Other(_) => (0, 0, transport),
        };

        Some(Self {
            version,
            protocol,
            source,
            destination,
            source_port,
            destination_port,
            payload,
        })
    }
}

fn read_addr(data: &[u8], offset: usize) -> Ipv4Addr {
    Ipv4Addr::new(
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    )
}

/// Read the two port fields and return the bytes after a `header_len` header.
fn split_ports(transport: &[u8], header_len: usize) -> Option<(u16, u16, &[u8])> {
    if transport.len() < header_len {
        return None;
    }
    let source = u16::from_be_bytes([transport[0], transport[1]]);
    let destination = u16::from_be_bytes([transport[2], transport[3]]);
    Some((source, destination, &transport[header_len..]))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header(protocol: u8, ihl: u8) -> Vec<u8> {
        let mut ip = vec![0u8; usize::from(ihl) * 4];
        ip[0] = 0x40 | ihl;
        ip[8] = 64;
        ip[9] = protocol;
        ip[12..16].copy_from_slice(&[10, 0, 0, 2]);
        ip[16..20].copy_from_slice(&[93, 184, 216, 34]);
        ip
    }

    fn tcp_packet(src_port: u16, dst_port: u16, payload: &[u8]) -> Vec<u8> {
        let mut packet = header(PROTO_TCP, 5);
        let mut tcp = [0u8; TCP_HEADER_LEN];
        tcp[0..2].copy_from_slice(&src_port.to_be_bytes());
        tcp[2..4].copy_from_slice(&dst_port.to_be_bytes());
        tcp[12] = 5 << 4;
        packet.extend_from_slice(&tcp);
        packet.extend_from_slice(payload);
        packet
    }

    #[test]
    fn test_parse_tcp() {
        let data = tcp_packet(51000, 443, b"hello");
        let packet = Packet::parse(&data).unwrap();

        assert_eq!(packet.version, 4);
        assert_eq!(packet.protocol, TransportProtocol::Tcp);
        assert_eq!(packet.source, Ipv4Addr::new(10, 0, 0, 2));
        assert_eq!(packet.destination, Ipv4Addr::new(93, 184, 216, 34));
        assert_eq!(packet.source_port, 51000);
        assert_eq!(packet.destination_port, 443);
        assert_eq!(packet.payload, b"hello");
    }

    #[test]
    fn test_parse_udp() {
        let mut data = header(PROTO_UDP, 5);
        data.extend_from_slice(&[0xC3, 0x50, 0x00, 0x35, 0x00, 0x0C, 0x00, 0x00]);
        data.extend_from_slice(&[1, 2, 3, 4]);
        let packet = Packet::parse(&data).unwrap();

        assert_eq!(packet.protocol, TransportProtocol::Udp);
        assert_eq!(packet.source_port, 50000);
        assert_eq!(packet.destination_port, DNS_PORT);
        assert_eq!(packet.payload, &[1, 2, 3, 4]);
    }

    #[test]
    fn test_other_protocol_has_no_ports() {
        let mut data = header(1, 5); // ICMP
        data.extend_from_slice(&[8, 0, 0xF7, 0xFF]);
        let packet = Packet::parse(&data).unwrap();

        assert_eq!(packet.protocol, TransportProtocol::Other(1));
        assert_eq!(packet.source_port, 0);
        assert_eq!(packet.destination_port, 0);
        assert_eq!(packet.payload, &[8, 0, 0xF7, 0xFF]);
    }

    #[test]
    fn test_ip_options_shift_transport_header() {
        let mut data = header(PROTO_TCP, 6);
        let mut tcp = [0u8; TCP_HEADER_LEN];
        tcp[2..4].copy_from_slice(&80u16.to_be_bytes());
        data.extend_from_slice(&tcp);
        let packet = Packet::parse(&data).unwrap();

        assert_eq!(packet.destination_port, 80);
        assert!(packet.payload.is_empty());
    }

    #[test]
    fn test_tcp_options_are_not_skipped() {
        // Data offset of 6 words: 4 bytes of options before the payload.
        let mut data = tcp_packet(1234, 443, &[0x01, 0x01, 0x01, 0x00, 0x16]);
        data[MIN_IPV4_HEADER_LEN + 12] = 6 << 4;
        let packet = Packet::parse(&data).unwrap();

        // The payload view still starts right after the fixed 20-byte header.
        assert_eq!(packet.payload, &[0x01, 0x01, 0x01, 0x00, 0x16]);
    }

    #[test]
    fn test_rejects_ipv6() {
        let mut data = vec![0u8; 60];
        data[0] = 0x60;
        assert!(Packet::parse(&data).is_none());
    }

    #[test]
    fn test_rejects_short_buffers() {
        let data = tcp_packet(1, 2, &[]);

        for len in 0..data.len() {
            assert!(Packet::parse(&data[..len]).is_none(), "len {} parsed", len);
        }
        assert!(Packet::parse(&data).is_some());
    }

    #[test]
    fn test_rejects_truncated_udp_header() {
        let mut data = header(PROTO_UDP, 5);
        data.extend_from_slice(&[0, 53, 0, 53, 0, 8, 0]);
        assert!(Packet::parse(&data).is_none());
    }

    #[test]
    fn test_rejects_ihl_beyond_buffer() {
        let mut data = header(PROTO_TCP, 5);
        data[0] = 0x4F; // claims a 60-byte header
        data.extend_from_slice(&[0u8; 20]);
        assert!(Packet::parse(&data).is_none());
    }

    #[test]
    fn test_rejects_ihl_below_minimum() {
        let mut data = tcp_packet(1, 443, &[]);
        data[0] = 0x44;
        assert!(Packet::parse(&data).is_none());
    }

    #[test]
    fn test_failed_parse_leaves_input_untouched() {
        let data = tcp_packet(40000, 443, b"payload");
        let truncated = &data[..30];
        let before = truncated.to_vec();

        assert!(Packet::parse(truncated).is_none());
        assert_eq!(truncated, before.as_slice());

        // Parsing is repeatable on the same bytes.
        let first = Packet::parse(&data).unwrap();
        let second = Packet::parse(&data).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_protocol_display() {
        assert_eq!(TransportProtocol::Tcp.to_string(), "TCP");
        assert_eq!(TransportProtocol::from(47).to_string(), "IP(47)");
        assert!(!TransportProtocol::Other(1).has_ports());
    }
}
