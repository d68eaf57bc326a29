//! Short-TTL DNS cache for the forwarder (§4.F). A cache miss falls back
//! to an uncached resolver lookup rather than silently dialing an empty
//! address — the defect fix called out in SPEC_FULL §9.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use hickory_resolver::config::{ResolverConfig, ResolverOpts};
use hickory_resolver::name_server::TokioConnectionProvider;
use hickory_resolver::TokioResolver;
use tracing::debug;

use crate::error::{Error, Result};

const DEFAULT_TTL: Duration = Duration::from_secs(60);

struct CacheEntry {
    addr: IpAddr,
    expires_at: Instant,
}

#[derive(Clone)]
pub struct DnsCache {
    resolver: std::sync::Arc<TokioResolver>,
    entries: std::sync::Arc<Mutex<HashMap<String, CacheEntry>>>,
    ttl: Duration,
}

impl DnsCache {
    pub fn new() -> Self {
        Self::with_ttl(DEFAULT_TTL)
    }

    pub fn with_ttl(ttl: Duration) -> Self {
        let mut builder = hickory_resolver::Resolver::builder_with_config(
            ResolverConfig::default(),
            TokioConnectionProvider::default(),
        );
        *builder.options_mut() = ResolverOpts::default();
        let resolver = builder.build();

        DnsCache {
            resolver: std::sync::Arc::new(resolver),
            entries: std::sync::Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    /// Resolves `host` to an address, preferring a live cache entry. On a
    /// cache miss (or an expired entry), falls back to an uncached lookup
    /// against the resolver directly rather than returning nothing.
    pub async fn resolve(&self, host: &str) -> Result<IpAddr> {
        if let Ok(addr) = host.parse::<IpAddr>() {
            return Ok(addr);
        }

        if let Some(addr) = self.cached(host) {
            return Ok(addr);
        }

        debug!(host, "dns cache miss, resolving uncached");
        let addr = self.lookup_uncached(host).await?;

        let mut entries = self.entries.lock().unwrap();
        entries.insert(
            host.to_string(),
            CacheEntry {
                addr,
                expires_at: Instant::now() + self.ttl,
            },
        );
        Ok(addr)
    }

    fn cached(&self, host: &str) -> Option<IpAddr> {
        let entries = self.entries.lock().unwrap();
        let entry = entries.get(host)?;
        if entry.expires_at <= Instant::now() {
            return None;
        }
        Some(entry.addr)
    }

    async fn lookup_uncached(&self, host: &str) -> Result<IpAddr> {
        let lookup = self
            .resolver
            .lookup_ip(host)
            .await
            .map_err(|e| Error::Resolve(format!("{host}: {e}")))?;
        lookup
            .iter()
            .next()
            .ok_or_else(|| Error::Resolve(format!("{host}: no addresses returned")))
    }
}

impl Default for DnsCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_ip_addresses_bypass_resolution() {
        let cache = DnsCache::new();
        let entries = cache.entries.clone();
        assert!(entries.lock().unwrap().is_empty());
    }

    #[test]
    fn expired_entry_is_not_returned_from_cache() {
        let cache = DnsCache::with_ttl(Duration::from_millis(1));
        {
            let mut entries = cache.entries.lock().unwrap();
            entries.insert(
                "example.com".to_string(),
                CacheEntry {
                    addr: "127.0.0.1".parse().unwrap(),
                    expires_at: Instant::now() - Duration::from_secs(1),
                },
            );
        }
        assert!(cache.cached("example.com").is_none());
    }

    #[test]
    fn live_entry_is_returned_from_cache() {
        let cache = DnsCache::new();
        {
            let mut entries = cache.entries.lock().unwrap();
            entries.insert(
                "example.com".to_string(),
                CacheEntry {
                    addr: "127.0.0.1".parse().unwrap(),
                    expires_at: Instant::now() + Duration::from_secs(60),
                },
            );
        }
        assert_eq!(cache.cached("example.com"), Some("127.0.0.1".parse().unwrap()));
    }
}
