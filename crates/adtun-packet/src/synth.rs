//! Synthetic packet builders.
//!
//! Produces well-formed IPv4/TCP/UDP packets carrying a TLS ClientHello or
//! a DNS query. Enabled by the `synth` feature for use in tests.

use crate::ip::{MIN_IPV4_HEADER_LEN, PROTO_TCP, PROTO_UDP, TCP_HEADER_LEN, UDP_HEADER_LEN};
use std::net::Ipv4Addr;

/// Source address used by the convenience builders
pub const CLIENT_ADDR: Ipv4Addr = Ipv4Addr::new(10, 0, 0, 2);

/// Wrap a transport segment in a 20-byte IPv4 header.
pub fn ipv4(protocol: u8, source: Ipv4Addr, destination: Ipv4Addr, segment: &[u8]) -> Vec<u8> {
    let total_len = (MIN_IPV4_HEADER_LEN + segment.len()) as u16;
    let mut packet = vec![0u8; MIN_IPV4_HEADER_LEN];
    packet[0] = 0x45;
    packet[2..4].copy_from_slice(&total_len.to_be_bytes());
    packet[8] = 64;
    packet[9] = protocol;
    packet[12..16].copy_from_slice(&source.octets());
    packet[16..20].copy_from_slice(&destination.octets());
    packet.extend_from_slice(segment);
    packet
}

/// TCP segment with a bare 20-byte header.
pub fn tcp(source_port: u16, destination_port: u16, payload: &[u8]) -> Vec<u8> {
    let mut segment = vec![0u8; TCP_HEADER_LEN];
    segment[0..2].copy_from_slice(&source_port.to_be_bytes());
    segment[2..4].copy_from_slice(&destination_port.to_be_bytes());
    segment[12] = 5 << 4;
    segment[13] = 0x18; // PSH | ACK
    segment.extend_from_slice(payload);
    segment
}

/// UDP datagram.
pub fn udp(source_port: u16, destination_port: u16, payload: &[u8]) -> Vec<u8> {
    let len = (UDP_HEADER_LEN + payload.len()) as u16;
    let mut datagram = Vec::with_capacity(len as usize);
    datagram.extend_from_slice(&source_port.to_be_bytes());
    datagram.extend_from_slice(&destination_port.to_be_bytes());
    datagram.extend_from_slice(&len.to_be_bytes());
    datagram.extend_from_slice(&[0, 0]);
    datagram.extend_from_slice(payload);
    datagram
}

/// TLS 1.2-framed ClientHello whose only `server_name` entry is `host`.
///
/// A `supported_groups` extension precedes the SNI so parsers have to
/// walk past at least one extension.
pub fn client_hello(host: &str) -> Vec<u8> {
    let name = host.as_bytes();

    let mut server_name = ((name.len() + 3) as u16).to_be_bytes().to_vec();
    server_name.push(0x00);
    server_name.extend_from_slice(&(name.len() as u16).to_be_bytes());
    server_name.extend_from_slice(name);

    let mut extensions = vec![0x00, 0x0A, 0x00, 0x04, 0x00, 0x02, 0x00, 0x1D];
    extensions.extend_from_slice(&[0x00, 0x00]);
    extensions.extend_from_slice(&(server_name.len() as u16).to_be_bytes());
    extensions.extend_from_slice(&server_name);

    let mut hello = vec![0x03, 0x03];
    hello.extend_from_slice(&[0x5A; 32]);
    hello.push(0);
    hello.extend_from_slice(&[0x00, 0x02, 0x13, 0x01]);
    hello.extend_from_slice(&[0x01, 0x00]);
    hello.extend_from_slice(&(extensions.len() as u16).to_be_bytes());
    hello.extend_from_slice(&extensions);

    let mut handshake = vec![0x01];
    handshake.extend_from_slice(&(hello.len() as u32).to_be_bytes()[1..]);
    handshake.extend_from_slice(&hello);

    let mut record = vec![0x16, 0x03, 0x01];
    record.extend_from_slice(&(handshake.len() as u16).to_be_bytes());
    record.extend_from_slice(&handshake);
    record
}

/// DNS A query for `name`.
pub fn dns_query(name: &str) -> Vec<u8> {
    let mut msg = vec![0xBE, 0xEF, 0x01, 0x00, 0x00, 0x01, 0, 0, 0, 0, 0, 0];
    for label in name.split('.').filter(|l| !l.is_empty()) {
        msg.push(label.len() as u8);
        msg.extend_from_slice(label.as_bytes());
    }
    msg.push(0);
    msg.extend_from_slice(&[0x00, 0x01, 0x00, 0x01]);
    msg
}

/// IPv4/TCP packet from [`CLIENT_ADDR`] carrying a ClientHello for `host`.
pub fn tls_packet(destination: Ipv4Addr, destination_port: u16, host: &str) -> Vec<u8> {
    ipv4(
        PROTO_TCP,
        CLIENT_ADDR,
        destination,
        &tcp(49152, destination_port, &client_hello(host)),
    )
}

/// IPv4/UDP packet from [`CLIENT_ADDR`] carrying a DNS query for `name`.
pub fn dns_packet(resolver: Ipv4Addr, name: &str) -> Vec<u8> {
    ipv4(
        PROTO_UDP,
        CLIENT_ADDR,
        resolver,
        &udp(53000, crate::ip::DNS_PORT, &dns_query(name)),
    )
}
