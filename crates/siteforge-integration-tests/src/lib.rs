//! End-to-end test harness for siteforge
//!
//! Wires the SQLite directory and tenant stores, the resolver, the registry
//! and the page editor together inside a temporary data directory.

use async_trait::async_trait;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;

use siteforge_core::store::{Directory, StoreProvisioner, TenantStore};
use siteforge_core::{NewWebsite, Page, Result, Tenant, TenantId, Website};
use siteforge_editor::{EditorConfig, PageEditor};
use siteforge_store_sqlite::{SqliteDirectory, SqliteProvisioner, SqliteStoreConfig};
use siteforge_tenancy::{
    RegistryConfig, ResolverConfig, TenantResolver, TenantStoreRegistry, WebsiteService,
};

/// Base domain used by every harness resolver.
pub const SUFFIX: &str = "sites.example.com";

/// SQLite provisioner that counts provisioning side effects.
pub struct CountingProvisioner {
    inner: SqliteProvisioner,
    provisions: AtomicUsize,
}

impl CountingProvisioner {
    pub fn new(inner: SqliteProvisioner) -> Self {
        Self {
            inner,
            provisions: AtomicUsize::new(0),
        }
    }

    pub fn provisions(&self) -> usize {
        self.provisions.load(Ordering::SeqCst)
    }

    pub fn inner(&self) -> &SqliteProvisioner {
        &self.inner
    }
}

#[async_trait]
impl StoreProvisioner for CountingProvisioner {
    async fn provision(&self, tenant_id: TenantId) -> Result<Arc<dyn TenantStore>> {
        let n = self.provisions.fetch_add(1, Ordering::SeqCst) + 1;
        tracing::debug!(tenant_id = %tenant_id, provisions = n, "Provisioning tenant store");
        self.inner.provision(tenant_id).await
    }
}

pub struct TestEnv {
    pub dir: TempDir,
    pub directory: Arc<SqliteDirectory>,
    pub provisioner: Arc<CountingProvisioner>,
    pub registry: Arc<TenantStoreRegistry>,
    pub resolver: Arc<TenantResolver>,
    pub websites: Arc<WebsiteService>,
    pub editor: Arc<PageEditor>,
}

impl TestEnv {
    pub async fn new() -> Result<Self> {
        Self::with_cache_ttl(Duration::from_secs(5)).await
    }

    pub async fn with_cache_ttl(cache_ttl: Duration) -> Result<Self> {
        let dir = TempDir::new()?;
        let store_config = SqliteStoreConfig::default();

        let directory =
            Arc::new(SqliteDirectory::open(&dir.path().join("directory.db"), &store_config).await?);
        let provisioner = Arc::new(CountingProvisioner::new(SqliteProvisioner::new(
            dir.path(),
            store_config,
        )));
        let registry = Arc::new(TenantStoreRegistry::new(
            provisioner.clone(),
            RegistryConfig::default().with_backoff(Duration::from_millis(1)),
        ));
        let resolver = Arc::new(TenantResolver::new(
            directory.clone(),
            ResolverConfig::default()
                .with_suffix(SUFFIX)
                .with_cache_ttl(cache_ttl),
        ));

        let websites =
            Arc::new(WebsiteService::new(directory.clone()).with_resolver(resolver.clone()));

        Ok(Self {
            dir,
            directory,
            provisioner,
            registry,
            resolver,
            websites,
            editor: Arc::new(PageEditor::new(EditorConfig::default())),
        })
    }

    /// Host name of a tenant subdomain under the harness suffix.
    pub fn host(subdomain: &str) -> String {
        format!("{}.{}", subdomain, SUFFIX)
    }

    /// Register a tenant and create one website with a home page.
    pub async fn tenant_with_page(
        &self,
        subdomain: &str,
    ) -> Result<(Tenant, Arc<dyn TenantStore>, Website, Page)> {
        let tenant = self.directory.create_tenant(subdomain, subdomain).await?;
        let store = self.registry.acquire(tenant.id).await?;
        let website = store
            .create_website(NewWebsite::new(format!("{} site", subdomain)).into_website())
            .await?;
        let page = store
            .create_page(Page::new(website.id, "/", "Home").with_meta("og:title", "Home"))
            .await?;
        Ok((tenant, store, website, page))
    }

    pub async fn shutdown(&self) {
        self.registry.close_all().await;
        self.directory.close().await;
    }
}
