//! adtun Packet Layer
//!
//! Zero-copy parsing of the packets read from the tunnel device.
//!
//! Layers:
//! 1. [`Packet::parse`]: IPv4 header + TCP/UDP ports, payload view
//! 2. [`extract_sni`]: TLS ClientHello → server name
//! 3. [`extract_query_name`]: DNS message → question name
//!
//! None of these return errors. Untrusted input that does not parse is
//! reported as `None`, and the caller decides what to do with the raw
//! bytes (adtun forwards them unchanged).

mod dns;
mod ip;
mod reader;
mod tls;

#[cfg(feature = "synth")]
pub mod synth;

pub use dns::{extract_query_name, DNS_HEADER_LEN, MAX_LABELS, MAX_NAME_LEN};
pub use ip::{
    Packet, TransportProtocol, DNS_PORT, HTTPS_PORT, HTTP_PORT, MIN_IPV4_HEADER_LEN, PROTO_TCP,
    PROTO_UDP, TCP_HEADER_LEN, UDP_HEADER_LEN,
};
pub use reader::ByteReader;
pub use tls::{extract_sni, MAX_HOSTNAME_LEN};
