//! adtun Filter Layer
//!
//! Decides, packet by packet, whether traffic leaving the tunnel is
//! forwarded or dropped.
//!
//! Architecture:
//! 1. [`DenyPattern`]: case-insensitive whole-string match (literal or regex)
//! 2. [`Blocklist`]: built-in ad list plus an optional list file
//! 3. [`ReverseLookup`]: destination address → hostname when there is no SNI
//! 4. [`PacketFilter`]: the decision policy, failing open on anything unclear

mod blocklist;
mod config;
mod pattern;
mod policy;
mod resolver;

pub use blocklist::{Blocklist, BlocklistError};
pub use config::FilterConfig;
pub use pattern::{DenyPattern, PatternError, PatternKind};
pub use policy::{
    AppProtocol, BlockReason, Decision, FilterStats, FilterStatsSnapshot, HostSource, PacketFilter,
};
pub use resolver::{
    CachedLookup, DnsReverseLookup, LookupCache, LookupConfig, NoReverseLookup, ReverseLookup,
};
