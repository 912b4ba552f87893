//! Process-scoped services
//!
//! `App::init` opens the tenant directory and builds the resolver, registry,
//! website service and editor; `App::shutdown` closes every tenant store and
//! the directory.

use std::str::FromStr;
use std::sync::Arc;
use tracing::info;

use siteforge_core::store::{Directory, TenantStore};
use siteforge_core::{Result, Tenant, TenantId, Website, WebsiteId};
use siteforge_editor::{EditorConfig, PageEditor};
use siteforge_store_sqlite::{SqliteDirectory, SqliteProvisioner};
use siteforge_tenancy::{TenantResolver, TenantStoreRegistry, WebsiteService};

use crate::config::SiteforgeConfig;

pub struct App {
    pub directory: Arc<SqliteDirectory>,
    pub resolver: Arc<TenantResolver>,
    pub registry: TenantStoreRegistry,
    pub websites: WebsiteService,
    pub editor: PageEditor,
}

impl App {
    /// # Errors
    /// - `Error::Io` / `Error::Database` if the directory database cannot be opened
    pub async fn init(config: &SiteforgeConfig) -> Result<Self> {
        let data_dir = config.expanded_data_dir();
        let store_config = config.store_config();

        let directory =
            Arc::new(SqliteDirectory::open(&config.directory_db_path(), &store_config).await?);
        let resolver = Arc::new(TenantResolver::new(
            directory.clone(),
            config.resolver_config(),
        ));
        let websites = WebsiteService::new(directory.clone()).with_resolver(resolver.clone());
        let provisioner = Arc::new(SqliteProvisioner::new(&data_dir, store_config));
        let registry = TenantStoreRegistry::new(provisioner, config.registry_config());

        info!("Initialized siteforge with data directory {:?}", data_dir);

        Ok(Self {
            directory,
            resolver,
            registry,
            websites,
            editor: PageEditor::new(EditorConfig::default()),
        })
    }

    /// Accept either a tenant id or any request key the resolver understands.
    pub async fn tenant_id(&self, key: &str) -> Result<TenantId> {
        match TenantId::from_str(key.trim()) {
            Ok(id) => {
                self.directory.get_tenant(id).await?;
                Ok(id)
            }
            Err(_) => self.resolver.resolve(key).await,
        }
    }

    pub async fn store_for(&self, key: &str) -> Result<Arc<dyn TenantStore>> {
        let tenant_id = self.tenant_id(key).await?;
        self.registry.acquire(tenant_id).await
    }

    /// Rename a tenant and drop resolver entries for its old subdomain.
    pub async fn rename_tenant(&self, key: &str, new_subdomain: &str) -> Result<Tenant> {
        let tenant_id = self.tenant_id(key).await?;
        let previous = self.directory.get_tenant(tenant_id).await?;
        let renamed = self.directory.rename_tenant(tenant_id, new_subdomain).await?;

        self.resolver.invalidate(&previous.subdomain);
        self.resolver.invalidate_tenant(tenant_id);
        info!(
            tenant_id = %tenant_id,
            from = %previous.subdomain,
            to = %renamed.subdomain,
            "Renamed tenant"
        );
        Ok(renamed)
    }

    /// Create a website, claiming its custom domain first if it has one.
    ///
    /// # Errors
    /// - `Error::DomainTaken` if another website owns the domain
    pub async fn create_website(&self, key: &str, website: Website) -> Result<Website> {
        let store = self.store_for(key).await?;
        self.websites.create_website(store.as_ref(), website).await
    }

    /// Apply `change` to a stored website, moving its domain claim if needed.
    ///
    /// # Errors
    /// - `Error::WebsiteNotFound` if the tenant has no such website
    /// - `Error::DomainTaken` if another website owns the new domain
    pub async fn update_website(
        &self,
        key: &str,
        website_id: WebsiteId,
        change: impl FnOnce(&mut Website),
    ) -> Result<Website> {
        let store = self.store_for(key).await?;
        let mut website = store.get_website(website_id).await?;
        change(&mut website);
        self.websites.update_website(store.as_ref(), website).await
    }

    pub async fn shutdown(&self) {
        let closed = self.registry.close_all().await;
        self.directory.close().await;
        info!(closed, "Shut down");
    }
}
