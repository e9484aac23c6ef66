//! Filter Configuration

use crate::blocklist::{Blocklist, BlocklistError};
use crate::policy::PacketFilter;
use crate::resolver::{DnsReverseLookup, LookupConfig, NoReverseLookup, ReverseLookup};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};

/// `[filter]` section
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterConfig {
    /// Include the built-in ad denylist
    #[serde(default = "default_true")]
    pub builtin: bool,
    /// Extra pattern list file
    #[serde(default)]
    pub list_path: Option<PathBuf>,
    /// Fall back to PTR lookups when a packet has no SNI
    #[serde(default = "default_true")]
    pub reverse_lookup: bool,
    #[serde(default = "default_cache_ttl")]
    pub lookup_cache_ttl_secs: u64,
    #[serde(default = "default_negative_ttl")]
    pub lookup_negative_ttl_secs: u64,
    #[serde(default = "default_cache_entries")]
    pub lookup_cache_entries: usize,
    #[serde(default = "default_lookup_timeout")]
    pub lookup_timeout_ms: u64,
}

fn default_true() -> bool {
    true
}

fn default_cache_ttl() -> u64 {
    300
}

fn default_negative_ttl() -> u64 {
    60
}

fn default_cache_entries() -> usize {
    4096
}

fn default_lookup_timeout() -> u64 {
    1000
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            builtin: true,
            list_path: None,
            reverse_lookup: true,
            lookup_cache_ttl_secs: default_cache_ttl(),
            lookup_negative_ttl_secs: default_negative_ttl(),
            lookup_cache_entries: default_cache_entries(),
            lookup_timeout_ms: default_lookup_timeout(),
        }
    }
}

impl FilterConfig {
    /// Built-in list plus the list file, if any
    pub fn blocklist(&self) -> Result<Blocklist, BlocklistError> {
        let mut list = if self.builtin {
            Blocklist::builtin()
        } else {
            Blocklist::new("custom")
        };

        if let Some(path) = &self.list_path {
            list.extend(Blocklist::from_path(path)?);
        }

        if list.is_empty() {
            return Err(BlocklistError::EmptyList);
        }
        Ok(list)
    }

    pub fn lookup_config(&self) -> LookupConfig {
        LookupConfig {
            cache_ttl: Duration::from_secs(self.lookup_cache_ttl_secs),
            negative_cache_ttl: Duration::from_secs(self.lookup_negative_ttl_secs),
            max_cache_entries: self.lookup_cache_entries.max(1),
            timeout: Duration::from_millis(self.lookup_timeout_ms),
        }
    }

    /// Reverse lookup per this config.
    ///
    /// A resolver that cannot be created disables reverse lookups rather
    /// than failing startup.
    pub fn reverse_lookup(&self) -> Box<dyn ReverseLookup> {
        if !self.reverse_lookup {
            return Box::new(NoReverseLookup);
        }
        match DnsReverseLookup::new(self.lookup_config()) {
            Ok(lookup) => Box::new(lookup),
            Err(e) => {
                warn!("Reverse lookup disabled: {}", e);
                Box::new(NoReverseLookup)
            }
        }
    }

    /// Build the packet filter
    pub fn build(&self) -> Result<PacketFilter, BlocklistError> {
        let blocklist = self.blocklist()?;
        info!(
            "Filter ready: {} patterns, reverse lookup {}",
            blocklist.len(),
            if self.reverse_lookup { "on" } else { "off" }
        );
        Ok(PacketFilter::with_lookup(blocklist, self.reverse_lookup()))
    }
}
