//! Request key to tenant resolution
//!
//! A request key is either a `Host` value or an explicit tenant header. Hosts
//! under a configured suffix (`acme.sites.example.com`) resolve by subdomain.
//! Any other multi-label host must be a claimed custom domain; with suffixes
//! configured it is never matched against subdomains, so an unclaimed
//! foreign host cannot reach a tenant that happens to own its first label.
//!
//! Positive lookups are cached for `cache_ttl`, which bounds how long a
//! renamed subdomain keeps resolving to its previous owner. Misses are never
//! cached, so a newly created tenant is visible immediately.

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::debug;

use siteforge_core::ident::{canonical_host, normalize_request_key};
use siteforge_core::store::Directory;
use siteforge_core::{Error, Result, TenantId};

/// Resolver settings.
#[derive(Debug, Clone)]
pub struct ResolverConfig {
    /// Base domains tenants are served under, e.g. `sites.example.com`
    pub suffixes: Vec<String>,
    /// How long a positive lookup is trusted
    pub cache_ttl: Duration,
    /// Maximum number of cached keys
    pub cache_capacity: usize,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            suffixes: Vec::new(),
            cache_ttl: Duration::from_secs(5),
            cache_capacity: 10_000,
        }
    }
}

impl ResolverConfig {
    pub fn with_suffix(mut self, suffix: impl Into<String>) -> Self {
        self.suffixes.push(suffix.into());
        self
    }

    pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
        self.cache_ttl = ttl;
        self
    }

    pub fn with_cache_capacity(mut self, capacity: usize) -> Self {
        self.cache_capacity = capacity;
        self
    }
}

#[derive(Debug, Clone, Copy)]
struct CacheEntry {
    tenant_id: TenantId,
    expires_at: Instant,
}

/// Maps request keys to tenant identifiers.
pub struct TenantResolver {
    directory: Arc<dyn Directory>,
    suffixes: Vec<String>,
    cache_ttl: Duration,
    cache_capacity: usize,
    /// Keyed by canonical subdomain or, for custom domains, the full host
    cache: DashMap<String, CacheEntry>,
}

impl TenantResolver {
    pub fn new(directory: Arc<dyn Directory>, config: ResolverConfig) -> Self {
        let suffixes = config
            .suffixes
            .iter()
            .map(|s| s.trim().trim_matches('.').to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect();

        Self {
            directory,
            suffixes,
            cache_ttl: config.cache_ttl,
            cache_capacity: config.cache_capacity,
            cache: DashMap::new(),
        }
    }

    /// Resolve a request key to the owning tenant.
    ///
    /// # Errors
    /// - `Error::AmbiguousKey` if no subdomain can be derived (IP access,
    ///   `localhost`, a bare base domain, an unclaimed foreign host)
    /// - `Error::TenantNotFound` if the subdomain is not registered
    /// - `Error::Database` if the directory lookup fails
    pub async fn resolve(&self, request_key: &str) -> Result<TenantId> {
        let host = canonical_host(request_key);

        if self.is_custom_domain_candidate(&host) {
            if let Some(tenant_id) = self.cached(&host) {
                return Ok(tenant_id);
            }
            if let Some(claim) = self.directory.find_domain(&host).await? {
                debug!(host = %host, tenant_id = %claim.tenant_id, "Resolved custom domain");
                self.remember(host, claim.tenant_id);
                return Ok(claim.tenant_id);
            }
        }

        let subdomain = normalize_request_key(request_key, &self.suffixes)?;
        if let Some(tenant_id) = self.cached(&subdomain) {
            return Ok(tenant_id);
        }

        match self.directory.find_by_subdomain(&subdomain).await? {
            Some(tenant) => {
                debug!(subdomain = %subdomain, tenant_id = %tenant.id, "Resolved subdomain");
                self.remember(subdomain, tenant.id);
                Ok(tenant.id)
            }
            None => Err(Error::TenantNotFound(subdomain)),
        }
    }

    /// Drop the cached entry for a subdomain or custom domain.
    pub fn invalidate(&self, key: &str) {
        self.cache.remove(&canonical_host(key));
    }

    /// Drop every cached entry pointing at a tenant, e.g. after a rename.
    pub fn invalidate_tenant(&self, tenant_id: TenantId) {
        self.cache.retain(|_, entry| entry.tenant_id != tenant_id);
    }

    pub fn cached_len(&self) -> usize {
        self.cache.len()
    }

    fn is_custom_domain_candidate(&self, host: &str) -> bool {
        host.contains('.')
            && host.parse::<IpAddr>().is_err()
            && !self
                .suffixes
                .iter()
                .any(|s| host == s || host.ends_with(&format!(".{s}")))
    }

    fn cached(&self, key: &str) -> Option<TenantId> {
        let entry = *self.cache.get(key)?;
        if entry.expires_at > Instant::now() {
            return Some(entry.tenant_id);
        }
        self.cache
            .remove_if(key, |_, current| current.expires_at <= Instant::now());
        None
    }

    fn remember(&self, key: String, tenant_id: TenantId) {
        if self.cache_capacity == 0 {
            return;
        }
        if self.cache.len() >= self.cache_capacity {
            let now = Instant::now();
            self.cache.retain(|_, entry| entry.expires_at > now);
            if self.cache.len() >= self.cache_capacity {
                self.cache.clear();
            }
        }
        self.cache.insert(
            key,
            CacheEntry {
                tenant_id,
                expires_at: Instant::now() + self.cache_ttl,
            },
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteforge_core::memory::InMemoryDirectory;
    use siteforge_core::{DomainClaim, WebsiteId};

    fn resolver(directory: Arc<InMemoryDirectory>) -> TenantResolver {
        TenantResolver::new(
            directory,
            ResolverConfig::default()
                .with_suffix("sites.example.com")
                .with_cache_ttl(Duration::from_secs(5)),
        )
    }

    #[tokio::test]
    async fn test_resolve_subdomain() {
        let directory = Arc::new(InMemoryDirectory::new());
        let acme = directory.create_tenant("acme", "Acme").await.unwrap();
        let resolver = resolver(directory);

        assert_eq!(resolver.resolve("acme.sites.example.com").await.unwrap(), acme.id);
        assert_eq!(
            resolver.resolve("ACME.sites.example.com:443").await.unwrap(),
            acme.id
        );
        assert_eq!(resolver.resolve("acme").await.unwrap(), acme.id);
        assert_eq!(resolver.cached_len(), 1);
    }

    #[tokio::test]
    async fn test_unknown_and_ambiguous_keys() {
        let directory = Arc::new(InMemoryDirectory::new());
        let resolver = resolver(directory.clone());

        let err = resolver.resolve("ghost.sites.example.com").await.unwrap_err();
        assert!(matches!(err, Error::TenantNotFound(ref s) if s == "ghost"));

        for key in ["sites.example.com", "127.0.0.1:8080", "localhost", ""] {
            let err = resolver.resolve(key).await.unwrap_err();
            assert!(matches!(err, Error::AmbiguousKey(_)), "key {key:?} gave {err:?}");
        }

        // Misses are not cached
        let ghost = directory.create_tenant("ghost", "Ghost").await.unwrap();
        assert_eq!(
            resolver.resolve("ghost.sites.example.com").await.unwrap(),
            ghost.id
        );
    }

    #[tokio::test]
    async fn test_custom_domain() {
        let directory = Arc::new(InMemoryDirectory::new());
        let acme = directory.create_tenant("acme", "Acme").await.unwrap();
        directory
            .claim_domain(
                "shop.acme.com",
                DomainClaim {
                    tenant_id: acme.id,
                    website_id: WebsiteId::new(),
                },
            )
            .await
            .unwrap();
        let resolver = resolver(directory);

        assert_eq!(resolver.resolve("Shop.Acme.com").await.unwrap(), acme.id);
    }

    #[tokio::test]
    async fn test_unclaimed_foreign_host_does_not_reach_tenant() {
        let directory = Arc::new(InMemoryDirectory::new());
        directory.create_tenant("blog", "Blog").await.unwrap();
        let resolver = resolver(directory);

        let err = resolver.resolve("blog.globex.com").await.unwrap_err();
        assert_eq!(err.kind(), "ambiguous_key");
        assert_eq!(resolver.cached_len(), 0);

        // The subdomain and header forms still work
        assert!(resolver.resolve("blog.sites.example.com").await.is_ok());
        assert!(resolver.resolve("blog").await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rename_staleness_is_bounded_by_ttl() {
        let directory = Arc::new(InMemoryDirectory::new());
        let t1 = directory.create_tenant("acme", "Acme").await.unwrap();
        let resolver = resolver(directory.clone());

        assert_eq!(resolver.resolve("acme.sites.example.com").await.unwrap(), t1.id);

        directory.rename_tenant(t1.id, "acme-old").await.unwrap();
        let t2 = directory.create_tenant("acme", "New Acme").await.unwrap();

        // Within the TTL the previous owner may still be returned
        tokio::time::advance(Duration::from_secs(2)).await;
        assert_eq!(resolver.resolve("acme.sites.example.com").await.unwrap(), t1.id);

        tokio::time::advance(Duration::from_secs(4)).await;
        assert_eq!(resolver.resolve("acme.sites.example.com").await.unwrap(), t2.id);
        assert_eq!(
            resolver.resolve("acme-old.sites.example.com").await.unwrap(),
            t1.id
        );
    }

    #[tokio::test]
    async fn test_invalidate() {
        let directory = Arc::new(InMemoryDirectory::new());
        let t1 = directory.create_tenant("acme", "Acme").await.unwrap();
        let resolver = resolver(directory.clone());
        resolver.resolve("acme").await.unwrap();

        directory.rename_tenant(t1.id, "acme-old").await.unwrap();
        let t2 = directory.create_tenant("acme", "New Acme").await.unwrap();
        resolver.invalidate("ACME");
        assert_eq!(resolver.resolve("acme").await.unwrap(), t2.id);

        resolver.invalidate_tenant(t2.id);
        assert_eq!(resolver.cached_len(), 0);
    }

    #[tokio::test]
    async fn test_cache_capacity() {
        let directory = Arc::new(InMemoryDirectory::new());
        for name in ["a1", "a2", "a3"] {
            directory.create_tenant(name, name).await.unwrap();
        }
        let resolver = TenantResolver::new(
            directory,
            ResolverConfig::default().with_cache_capacity(2),
        );

        for name in ["a1", "a2", "a3"] {
            resolver.resolve(name).await.unwrap();
        }
        assert!(resolver.cached_len() <= 2);
    }
}
