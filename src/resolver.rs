//! Reverse-DNS resolution with a TTL-bounded cache
//!
//! Lookups run against the system resolver with a short deadline.
//! Failures are cached as the IP's own textual form so a dead PTR
//! zone cannot cause a lookup storm.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::debug;
use trust_dns_resolver::config::{ResolverConfig, ResolverOpts};
use trust_dns_resolver::TokioAsyncResolver;

/// Deadline applied to each reverse lookup
const LOOKUP_TIMEOUT: Duration = Duration::from_secs(2);

struct CacheEntry {
    hostname: String,
    resolved_at: Instant,
}

/// Reverse-DNS cache mapping IP addresses to hostnames
pub struct DnsCache {
    cache: Mutex<HashMap<IpAddr, CacheEntry>>,
    resolver: TokioAsyncResolver,
    ttl: Duration,
}

impl DnsCache {
    /// Create a cache backed by the system resolver configuration.
    /// Must be called from within a tokio runtime.
    pub fn new(ttl: Duration) -> Self {
        Self {
            cache: Mutex::new(HashMap::new()),
            resolver: TokioAsyncResolver::tokio(ResolverConfig::default(), ResolverOpts::default()),
            ttl,
        }
    }

    /// Cached hostname for an IP, if the entry is still fresh
    pub fn cached(&self, ip: IpAddr) -> Option<String> {
        let cache = self.cache.lock();
        cache.get(&ip).and_then(|entry| {
            (entry.resolved_at.elapsed() < self.ttl).then(|| entry.hostname.clone())
        })
    }

    fn insert(&self, ip: IpAddr, hostname: String) {
        self.cache.lock().insert(
            ip,
            CacheEntry {
                hostname,
                resolved_at: Instant::now(),
            },
        );
    }

    /// Resolve an IP to a hostname, waiting at most the lookup
    /// deadline. On failure the IP itself is returned and cached as a
    /// negative entry.
    pub async fn resolve(&self, ip: IpAddr) -> String {
        if let Some(hit) = self.cached(ip) {
            return hit;
        }

        let hostname = match tokio::time::timeout(LOOKUP_TIMEOUT, self.resolver.reverse_lookup(ip))
            .await
        {
            Ok(Ok(response)) => response
                .iter()
                .next()
                .map(|name| name.to_string().trim_end_matches('.').to_string())
                .unwrap_or_else(|| ip.to_string()),
            _ => ip.to_string(),
        };

        self.insert(ip, hostname.clone());
        hostname
    }

    /// Non-blocking resolution for the capture path: answers from the
    /// cache, and on a miss stores the IP itself provisionally while a
    /// background task upgrades the entry.
    pub fn resolve_cached(self: &Arc<Self>, ip: IpAddr) -> String {
        if let Some(hit) = self.cached(ip) {
            return hit;
        }

        let provisional = ip.to_string();
        self.insert(ip, provisional.clone());

        let cache = Arc::clone(self);
        tokio::spawn(async move {
            // Bypass the provisional entry we just wrote
            let hostname = match tokio::time::timeout(
                LOOKUP_TIMEOUT,
                cache.resolver.reverse_lookup(ip),
            )
            .await
            {
                Ok(Ok(response)) => response
                    .iter()
                    .next()
                    .map(|name| name.to_string().trim_end_matches('.').to_string()),
                _ => None,
            };
            if let Some(hostname) = hostname {
                cache.insert(ip, hostname);
            }
        });

        provisional
    }

    /// Drop expired entries
    pub fn cleanup(&self) {
        let mut cache = self.cache.lock();
        let before = cache.len();
        cache.retain(|_, entry| entry.resolved_at.elapsed() < self.ttl);
        let removed = before - cache.len();
        if removed > 0 {
            debug!(removed, "expired DNS cache entries");
        }
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    /// Periodically sweep expired entries until the task is dropped
    pub fn spawn_cleanup(self: Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.cleanup();
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cache_hit_within_ttl() {
        let cache = DnsCache::new(Duration::from_secs(300));
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        cache.insert(ip, "host.example".to_string());
        assert_eq!(cache.cached(ip).as_deref(), Some("host.example"));
    }

    #[tokio::test]
    async fn test_cache_miss_after_expiry() {
        let cache = DnsCache::new(Duration::from_millis(0));
        let ip: IpAddr = "192.0.2.1".parse().unwrap();

        cache.insert(ip, "host.example".to_string());
        assert_eq!(cache.cached(ip), None);
    }

    #[tokio::test]
    async fn test_cleanup_removes_expired_entries() {
        let cache = DnsCache::new(Duration::from_millis(0));
        cache.insert("192.0.2.1".parse().unwrap(), "a".to_string());
        cache.insert("192.0.2.2".parse().unwrap(), "b".to_string());

        cache.cleanup();
        assert!(cache.is_empty());
    }

    #[tokio::test]
    async fn test_resolve_cached_returns_ip_on_miss() {
        let cache = Arc::new(DnsCache::new(Duration::from_secs(300)));
        let ip: IpAddr = "192.0.2.7".parse().unwrap();

        // Unresolvable documentation address falls back to its own text
        assert_eq!(cache.resolve_cached(ip), "192.0.2.7");
        // The provisional entry prevents repeated spawns
        assert_eq!(cache.cached(ip).as_deref(), Some("192.0.2.7"));
    }

    #[tokio::test]
    async fn test_resolve_cached_prefers_existing_entry() {
        let cache = Arc::new(DnsCache::new(Duration::from_secs(300)));
        let ip: IpAddr = "192.0.2.8".parse().unwrap();

        cache.insert(ip, "cached.example".to_string());
        assert_eq!(cache.resolve_cached(ip), "cached.example");
    }
}
