//! Tunnel Configuration
//!
//! What the tunnel device is asked for (address, routes, DNS, MTU,
//! application scoping) and how the pump reads from it.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::Ipv4Addr;
use std::str::FromStr;
use std::time::Duration;

/// Smallest MTU every IPv4 host must accept
pub const MIN_MTU: u16 = 576;

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Invalid route '{0}'")]
    InvalidRoute(String),

    #[error("MTU {0} below the IPv4 minimum of 576")]
    InvalidMtu(u16),

    #[error("Prefix length {0} exceeds 32")]
    InvalidPrefix(u8),

    #[error("Read buffer of {buffer} bytes cannot hold an MTU of {mtu}")]
    BufferTooSmall { buffer: usize, mtu: u16 },

    #[error("Idle pause must be non-zero")]
    ZeroIdlePause,
}

/// An IPv4 route, written `network/prefix`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Route {
    pub network: Ipv4Addr,
    pub prefix_len: u8,
}

impl Route {
    pub fn new(network: Ipv4Addr, prefix_len: u8) -> Result<Self, ConfigError> {
        if prefix_len > 32 {
            return Err(ConfigError::InvalidPrefix(prefix_len));
        }
        Ok(Self {
            network,
            prefix_len,
        })
    }

    /// The default route, 0.0.0.0/0
    pub fn default_route() -> Self {
        Self {
            network: Ipv4Addr::UNSPECIFIED,
            prefix_len: 0,
        }
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.network, self.prefix_len)
    }
}

impl FromStr for Route {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ConfigError::InvalidRoute(s.to_string());
        let (network, prefix) = s.trim().split_once('/').ok_or_else(invalid)?;
        let network = network.parse().map_err(|_| invalid())?;
        let prefix_len = prefix.parse().map_err(|_| invalid())?;
        Self::new(network, prefix_len)
    }
}

impl TryFrom<String> for Route {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Route> for String {
    fn from(route: Route) -> Self {
        route.to_string()
    }
}

/// Netmask for a prefix length of at most 32
pub fn netmask(prefix_len: u8) -> Ipv4Addr {
    let bits = match prefix_len {
        0 => 0,
        p if p >= 32 => u32::MAX,
        p => u32::MAX << (32 - u32::from(p)),
    };
    Ipv4Addr::from(bits)
}

/// `[tunnel]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TunnelConfig {
    /// Interface name
    #[serde(default = "default_name")]
    pub name: String,
    /// Local address of the interface
    #[serde(default = "default_address")]
    pub address: Ipv4Addr,
    #[serde(default = "default_prefix_len")]
    pub prefix_len: u8,
    /// DNS servers, in order of preference
    #[serde(default = "default_dns_servers")]
    pub dns_servers: Vec<Ipv4Addr>,
    #[serde(default = "default_routes")]
    pub routes: Vec<Route>,
    #[serde(default = "default_mtu")]
    pub mtu: u16,
    /// Applications whose traffic enters the tunnel; empty means all
    #[serde(default = "default_allowed_applications")]
    pub allowed_applications: Vec<String>,
}

fn default_name() -> String {
    "adtun0".to_string()
}

fn default_address() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 2)
}

fn default_prefix_len() -> u8 {
    32
}

fn default_dns_servers() -> Vec<Ipv4Addr> {
    vec![
        Ipv4Addr::new(1, 1, 1, 1), // Cloudflare
        Ipv4Addr::new(9, 9, 9, 9), // Quad9
        Ipv4Addr::new(8, 8, 8, 8), // Google
    ]
}

fn default_routes() -> Vec<Route> {
    vec![
        Route::default_route(),
        Route {
            network: Ipv4Addr::new(192, 168, 0, 0),
            prefix_len: 16,
        },
    ]
}

fn default_mtu() -> u16 {
    1420
}

fn default_allowed_applications() -> Vec<String> {
    vec!["com.spotify.music".to_string()]
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            address: default_address(),
            prefix_len: default_prefix_len(),
            dns_servers: default_dns_servers(),
            routes: default_routes(),
            mtu: default_mtu(),
            allowed_applications: default_allowed_applications(),
        }
    }
}

impl TunnelConfig {
    pub fn netmask(&self) -> Ipv4Addr {
        netmask(self.prefix_len)
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mtu < MIN_MTU {
            return Err(ConfigError::InvalidMtu(self.mtu));
        }
        if self.prefix_len > 32 {
            return Err(ConfigError::InvalidPrefix(self.prefix_len));
        }
        if let Some(route) = self.routes.iter().find(|r| r.prefix_len > 32) {
            return Err(ConfigError::InvalidPrefix(route.prefix_len));
        }
        Ok(())
    }
}

/// `[pump]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PumpConfig {
    /// Read buffer capacity, in bytes
    #[serde(default = "default_buffer_size")]
    pub buffer_size: usize,
    /// Pause after an empty read; also bounds how long a stop takes to land
    #[serde(default = "default_idle_pause_ms")]
    pub idle_pause_ms: u64,
}

fn default_buffer_size() -> usize {
    32767
}

fn default_idle_pause_ms() -> u64 {
    10
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            buffer_size: default_buffer_size(),
            idle_pause_ms: default_idle_pause_ms(),
        }
    }
}

impl PumpConfig {
    pub fn idle_pause(&self) -> Duration {
        Duration::from_millis(self.idle_pause_ms)
    }

    /// Validate against the tunnel MTU
    pub fn validate(&self, mtu: u16) -> Result<(), ConfigError> {
        if self.idle_pause_ms == 0 {
            return Err(ConfigError::ZeroIdlePause);
        }
        if self.buffer_size < usize::from(mtu) {
            return Err(ConfigError::BufferTooSmall {
                buffer: self.buffer_size,
                mtu,
            });
        }
        Ok(())
    }
}
