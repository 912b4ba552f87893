//! Storage contracts
//!
//! Two kinds of store back the service:
//! - a single shared [`Directory`] holding tenants and global domain claims
//! - one isolated [`TenantStore`] per tenant holding its websites and pages,
//!   created on demand by a [`StoreProvisioner`]
//!
//! Implementations:
//! - `InMemoryDirectory` / `InMemoryTenantStore`: tests and embedding
//! - `SqliteDirectory` / `SqliteTenantStore`: one SQLite file per tenant

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::Result;
use crate::site::{Page, PageId, Website, WebsiteId};
use crate::tenant::{Tenant, TenantId};
use crate::tree::ComponentTree;

/// Owner of a claimed custom domain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainClaim {
    pub tenant_id: TenantId,
    pub website_id: WebsiteId,
}

/// Shared, non-isolated directory of tenants.
#[async_trait]
pub trait Directory: Send + Sync {
    /// Register a new tenant.
    ///
    /// # Errors
    /// - `Error::InvalidSubdomain` if the subdomain is not a usable label
    /// - `Error::SubdomainTaken` if another tenant already uses it
    async fn create_tenant(&self, subdomain: &str, display_name: &str) -> Result<Tenant>;

    /// # Errors
    /// - `Error::TenantNotFound` if no tenant has this id
    async fn get_tenant(&self, tenant_id: TenantId) -> Result<Tenant>;

    /// Look up a tenant by canonical subdomain.
    async fn find_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>>;

    /// Change a tenant's subdomain. The identifier is unchanged.
    ///
    /// # Errors
    /// - `Error::TenantNotFound` if no tenant has this id
    /// - `Error::InvalidSubdomain` / `Error::SubdomainTaken`
    async fn rename_tenant(&self, tenant_id: TenantId, new_subdomain: &str) -> Result<Tenant>;

    async fn list_tenants(&self) -> Result<Vec<Tenant>>;

    /// Claim a custom domain for a website. Re-claiming by the same owner is a
    /// no-op.
    ///
    /// # Errors
    /// - `Error::DomainTaken` if another website owns the domain
    async fn claim_domain(&self, domain: &str, claim: DomainClaim) -> Result<()>;

    /// Release a custom domain. Releasing an unclaimed domain is a no-op.
    async fn release_domain(&self, domain: &str) -> Result<()>;

    async fn find_domain(&self, domain: &str) -> Result<Option<DomainClaim>>;
}

/// A tenant-isolated data store handle.
///
/// Handles are shared by every worker serving the tenant and must be safe
/// for concurrent use; implementations serialize at their connection pool.
#[async_trait]
pub trait TenantStore: Send + Sync {
    /// Tenant this handle is bound to.
    fn tenant_id(&self) -> TenantId;

    /// Store a new website as given.
    ///
    /// The store does not see other tenants, so it cannot check that a
    /// custom domain is free; callers claim it in the [`Directory`] first
    /// (see `WebsiteService` in `siteforge-tenancy`).
    async fn create_website(&self, website: Website) -> Result<Website>;

    /// # Errors
    /// - `Error::WebsiteNotFound` if the website does not exist
    async fn get_website(&self, website_id: WebsiteId) -> Result<Website>;

    async fn list_websites(&self) -> Result<Vec<Website>>;

    /// Replace a website's attributes. Domain claims are the caller's
    /// concern, as for [`TenantStore::create_website`].
    ///
    /// # Errors
    /// - `Error::WebsiteNotFound` if the website does not exist
    async fn update_website(&self, website: &Website) -> Result<()>;

    /// # Errors
    /// - `Error::WebsiteNotFound` if the owning website does not exist
    /// - `Error::PathTaken` if the website already has a page at this path
    async fn create_page(&self, page: Page) -> Result<Page>;

    /// # Errors
    /// - `Error::PageNotFound` if the page does not exist
    async fn get_page(&self, page_id: PageId) -> Result<Page>;

    /// # Errors
    /// - `Error::PageNotFound` if the website has no page at this path
    async fn get_page_by_path(&self, website_id: WebsiteId, path: &str) -> Result<Page>;

    async fn list_pages(&self, website_id: WebsiteId) -> Result<Vec<Page>>;

    /// # Errors
    /// - `Error::PageNotFound` if the page does not exist
    async fn delete_page(&self, page_id: PageId) -> Result<()>;

    /// Persist a new tree for a page if its stored version still equals
    /// `expected_version`. Returns the new version.
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page does not exist
    /// - `Error::VersionConflict` if the page changed since it was loaded
    async fn save_tree(
        &self,
        page_id: PageId,
        expected_version: u64,
        tree: &ComponentTree,
    ) -> Result<u64>;

    /// Release the underlying resources. Further calls may fail. Closing
    /// twice is a no-op.
    async fn close(&self) {}
}

/// Creates or opens the isolated store of a tenant.
#[async_trait]
pub trait StoreProvisioner: Send + Sync {
    /// # Errors
    /// - `Error::Provisioning` if the store cannot be created or opened
    async fn provision(&self, tenant_id: TenantId) -> Result<Arc<dyn TenantStore>>;
}
