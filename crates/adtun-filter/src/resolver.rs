//! Reverse Lookup with Caching
//!
//! Maps a destination address back to a hostname when a packet carries no
//! SNI. Lookups run on the pump thread, so answers (and failures) are
//! cached per address to keep repeat packets off the network.

use hickory_resolver::Resolver;
use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::system_conf::read_system_conf;
use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Address → hostname lookup
pub trait ReverseLookup: Send + Sync {
    /// Hostname for `addr`, or `None` when unknown or the lookup failed
    fn lookup(&self, addr: Ipv4Addr) -> Option<String>;
}

/// Lookup that never resolves anything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoReverseLookup;

impl ReverseLookup for NoReverseLookup {
    fn lookup(&self, _addr: Ipv4Addr) -> Option<String> {
        None
    }
}

/// Reverse lookup cache configuration
#[derive(Debug, Clone)]
pub struct LookupConfig {
    /// Cache TTL for resolved names
    pub cache_ttl: Duration,
    /// Cache TTL for failed lookups
    pub negative_cache_ttl: Duration,
    /// Maximum cache size
    pub max_cache_entries: usize,
    /// Timeout for a single PTR query
    pub timeout: Duration,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            cache_ttl: Duration::from_secs(300),
            negative_cache_ttl: Duration::from_secs(60),
            max_cache_entries: 4096,
            timeout: Duration::from_millis(1000),
        }
    }
}

#[derive(Clone)]
struct CacheEntry {
    host: Option<String>,
    expires_at: Instant,
}

/// Address-keyed cache with positive and negative TTLs
pub struct LookupCache {
    entries: Mutex<HashMap<Ipv4Addr, CacheEntry>>,
    config: LookupConfig,
}

impl LookupCache {
    pub fn new(config: LookupConfig) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            config,
        }
    }

    /// `Some(answer)` on an unexpired hit, where the answer itself may be a
    /// cached failure
    pub fn get(&self, addr: Ipv4Addr) -> Option<Option<String>> {
        let cache = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        cache
            .get(&addr)
            .filter(|entry| entry.expires_at > Instant::now())
            .map(|entry| entry.host.clone())
    }

    pub fn insert(&self, addr: Ipv4Addr, host: Option<String>) {
        let mut cache = self.entries.lock().unwrap_or_else(PoisonError::into_inner);

        if cache.len() >= self.config.max_cache_entries {
            let now = Instant::now();
            cache.retain(|_, v| v.expires_at > now);

            // Still full: drop a quarter, oldest expiry first
            if cache.len() >= self.config.max_cache_entries {
                let mut by_expiry: Vec<_> = cache
                    .iter()
                    .map(|(addr, entry)| (entry.expires_at, *addr))
                    .collect();
                by_expiry.sort_unstable();
                let evict = (cache.len() / 4).max(1);
                for (_, key) in by_expiry.into_iter().take(evict) {
                    cache.remove(&key);
                }
            }
        }

        let ttl = if host.is_some() {
            self.config.cache_ttl
        } else {
            self.config.negative_cache_ttl
        };
        cache.insert(
            addr,
            CacheEntry {
                host,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Cached answer for `addr`, resolving and caching it on a miss
    pub fn get_or_resolve(
        &self,
        addr: Ipv4Addr,
        resolve: impl FnOnce(Ipv4Addr) -> Option<String>,
    ) -> Option<String> {
        if let Some(cached) = self.get(addr) {
            return cached;
        }
        // Lock is not held across the resolve, so concurrent misses may both query
        let host = resolve(addr);
        self.insert(addr, host.clone());
        host
    }

    /// (total entries, unexpired entries)
    pub fn stats(&self) -> (usize, usize) {
        let cache = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Instant::now();
        let total = cache.len();
        let valid = cache.values().filter(|e| e.expires_at > now).count();
        (total, valid)
    }

    pub fn clear(&self) {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Resolves through any uncached lookup function
pub struct CachedLookup<F> {
    resolve: F,
    cache: LookupCache,
}

impl<F> CachedLookup<F>
where
    F: Fn(Ipv4Addr) -> Option<String> + Send + Sync,
{
    pub fn new(resolve: F, config: LookupConfig) -> Self {
        Self {
            resolve,
            cache: LookupCache::new(config),
        }
    }

    pub fn cache(&self) -> &LookupCache {
        &self.cache
    }
}

impl<F> ReverseLookup for CachedLookup<F>
where
    F: Fn(Ipv4Addr) -> Option<String> + Send + Sync,
{
    fn lookup(&self, addr: Ipv4Addr) -> Option<String> {
        self.cache.get_or_resolve(addr, &self.resolve)
    }
}

/// PTR lookups through the system resolver
pub struct DnsReverseLookup {
    resolver: Resolver,
    cache: LookupCache,
}

impl DnsReverseLookup {
    /// Use the system resolver configuration, or Cloudflare when there is none
    pub fn new(config: LookupConfig) -> std::io::Result<Self> {
        let (resolver_config, mut opts) = match read_system_conf() {
            Ok(system) => system,
            Err(e) => {
                warn!("System resolver config unavailable ({}), using Cloudflare", e);
                (ResolverConfig::cloudflare(), ResolverOpts::default())
            }
        };
        opts.timeout = config.timeout;
        opts.attempts = 1;

        let resolver = Resolver::new(resolver_config, opts)?;
        info!("Reverse lookup resolver initialized");

        Ok(Self {
            resolver,
            cache: LookupCache::new(config),
        })
    }

    pub fn cache(&self) -> &LookupCache {
        &self.cache
    }

    fn resolve(&self, addr: Ipv4Addr) -> Option<String> {
        match self.resolver.reverse_lookup(IpAddr::V4(addr)) {
            Ok(names) => names
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string())
                .filter(|name| !name.is_empty()),
            Err(e) => {
                debug!("Reverse lookup for {} failed: {}", addr, e);
                None
            }
        }
    }
}

impl ReverseLookup for DnsReverseLookup {
    fn lookup(&self, addr: Ipv4Addr) -> Option<String> {
        self.cache.get_or_resolve(addr, |addr| self.resolve(addr))
    }
}
