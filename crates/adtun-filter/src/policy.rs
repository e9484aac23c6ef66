//! Packet Filter
//!
//! Per-packet forward/drop decision. Only one narrow category of traffic
//! can ever be dropped: TCP to port 80 or 443 whose hostname matches the
//! blocklist. Everything else is forwarded untouched.
//!
//! Flow for TCP 80/443:
//! 1. SNI from the ClientHello in the payload
//! 2. Otherwise a reverse lookup of the destination address
//! 3. Hostname matched against the blocklist → drop, else forward
//!
//! No state is carried from one packet to the next.
//!
//! The reverse lookup in step 2 runs on the caller's thread. In the pump
//! that is the only thread moving packets, so an uncached address stalls
//! every flow for up to `lookup_timeout_ms`. Answers and misses are both
//! cached, so each address costs at most one stall per cache TTL. Keep
//! the timeout short, or disable `reverse_lookup`, where latency matters.

use crate::blocklist::Blocklist;
use crate::pattern::DenyPattern;
use crate::resolver::{NoReverseLookup, ReverseLookup};
use adtun_packet::{
    DNS_PORT, HTTPS_PORT, HTTP_PORT, Packet, TransportProtocol, extract_query_name, extract_sni,
};
use std::fmt;
use std::net::SocketAddrV4;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

/// Forward or drop
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    /// Write the packet back unchanged
    Forward,
    /// Write nothing
    Drop(BlockReason),
}

impl Decision {
    pub fn is_forward(&self) -> bool {
        matches!(self, Self::Forward)
    }
}

/// Application protocol implied by the destination port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppProtocol {
    Http,
    Https,
}

impl AppProtocol {
    fn from_port(port: u16) -> Option<Self> {
        match port {
            HTTP_PORT => Some(Self::Http),
            HTTPS_PORT => Some(Self::Https),
            _ => None,
        }
    }
}

impl fmt::Display for AppProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http => f.write_str("HTTP"),
            Self::Https => f.write_str("HTTPS"),
        }
    }
}

/// Where the hostname came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostSource {
    Sni,
    ReverseLookup,
}

/// Why a packet was dropped
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockReason {
    pub protocol: AppProtocol,
    pub host: String,
    pub destination: SocketAddrV4,
    pub source: HostSource,
    /// Pattern that matched, as written
    pub pattern: String,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ({}) matched '{}'",
            self.protocol, self.host, self.destination, self.pattern
        )
    }
}

/// Filter statistics
#[derive(Debug, Default)]
pub struct FilterStats {
    /// TCP 80/443 packets checked against the blocklist
    pub inspected: AtomicU64,
    pub blocked: AtomicU64,
    pub sni_hits: AtomicU64,
    pub reverse_hits: AtomicU64,
}

/// Point-in-time copy of [`FilterStats`]
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FilterStatsSnapshot {
    pub inspected: u64,
    pub blocked: u64,
    pub sni_hits: u64,
    pub reverse_hits: u64,
}

impl FilterStats {
    pub fn snapshot(&self) -> FilterStatsSnapshot {
        FilterStatsSnapshot {
            inspected: self.inspected.load(Ordering::Relaxed),
            blocked: self.blocked.load(Ordering::Relaxed),
            sni_hits: self.sni_hits.load(Ordering::Relaxed),
            reverse_hits: self.reverse_hits.load(Ordering::Relaxed),
        }
    }
}

/// Stateless per-packet filter
pub struct PacketFilter {
    blocklist: Blocklist,
    lookup: Box<dyn ReverseLookup>,
    stats: FilterStats,
}

impl PacketFilter {
    /// Filter without reverse lookups
    pub fn new(blocklist: Blocklist) -> Self {
        Self::with_lookup(blocklist, Box::new(NoReverseLookup))
    }

    pub fn with_lookup(blocklist: Blocklist, lookup: Box<dyn ReverseLookup>) -> Self {
        Self {
            blocklist,
            lookup,
            stats: FilterStats::default(),
        }
    }

    /// Decide what to do with a parsed packet.
    ///
    /// This is the HOT PATH: it runs once for every packet read from the
    /// tunnel.
    pub fn decide(&self, packet: &Packet<'_>) -> Decision {
        match packet.protocol {
            TransportProtocol::Udp if packet.destination_port == DNS_PORT => {
                if let Some(name) = extract_query_name(packet.payload) {
                    debug!(query = %name, resolver = %packet.destination, "DNS query");
                } else {
                    trace!("Unparseable DNS query to {}", packet.destination);
                }
                Decision::Forward
            }
            TransportProtocol::Tcp => match AppProtocol::from_port(packet.destination_port) {
                Some(protocol) => self.decide_web(packet, protocol),
                None => Decision::Forward,
            },
            _ => Decision::Forward,
        }
    }

    fn decide_web(&self, packet: &Packet<'_>, protocol: AppProtocol) -> Decision {
        self.stats.inspected.fetch_add(1, Ordering::Relaxed);

        let (host, source) = if let Some(host) = extract_sni(packet.payload) {
            self.stats.sni_hits.fetch_add(1, Ordering::Relaxed);
            (host, HostSource::Sni)
        } else if let Some(host) = self.lookup.lookup(packet.destination) {
            self.stats.reverse_hits.fetch_add(1, Ordering::Relaxed);
            (host, HostSource::ReverseLookup)
        } else {
            trace!("No hostname for {}:{}", packet.destination, packet.destination_port);
            return Decision::Forward;
        };

        match self.blocklist.matching(&host) {
            Some(pattern) => {
                self.stats.blocked.fetch_add(1, Ordering::Relaxed);
                Decision::Drop(BlockReason {
                    protocol,
                    host,
                    destination: SocketAddrV4::new(packet.destination, packet.destination_port),
                    source,
                    pattern: pattern.as_str().to_string(),
                })
            }
            None => Decision::Forward,
        }
    }

    /// Pattern that would block `host`, if any
    pub fn check_host(&self, host: &str) -> Option<&DenyPattern> {
        self.blocklist.matching(host)
    }

    pub fn blocklist(&self) -> &Blocklist {
        &self.blocklist
    }

    pub fn stats(&self) -> &FilterStats {
        &self.stats
    }
}
