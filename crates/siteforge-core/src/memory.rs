//! In-memory store implementations for tests and embedding

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::debug;

use crate::ident::{normalize_domain, normalize_page_path, normalize_subdomain};
use crate::site::{Page, PageId, Website, WebsiteId};
use crate::store::{Directory, DomainClaim, StoreProvisioner, TenantStore};
use crate::tenant::{Tenant, TenantId};
use crate::tree::ComponentTree;
use crate::{Error, Result};

#[derive(Default)]
struct DirectoryState {
    tenants: HashMap<TenantId, Tenant>,
    domains: HashMap<String, DomainClaim>,
}

/// `HashMap`-backed tenant directory.
#[derive(Default)]
pub struct InMemoryDirectory {
    state: RwLock<DirectoryState>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl Directory for InMemoryDirectory {
    async fn create_tenant(&self, subdomain: &str, display_name: &str) -> Result<Tenant> {
        let subdomain = normalize_subdomain(subdomain)?;
        let mut state = self.state.write().await;
        if state.tenants.values().any(|t| t.subdomain == subdomain) {
            return Err(Error::SubdomainTaken(subdomain));
        }
        let tenant = Tenant::new(subdomain, display_name);
        state.tenants.insert(tenant.id, tenant.clone());
        Ok(tenant)
    }

    async fn get_tenant(&self, tenant_id: TenantId) -> Result<Tenant> {
        self.state
            .read()
            .await
            .tenants
            .get(&tenant_id)
            .cloned()
            .ok_or_else(|| Error::TenantNotFound(tenant_id.to_string()))
    }

    async fn find_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>> {
        let subdomain = subdomain.to_ascii_lowercase();
        Ok(self
            .state
            .read()
            .await
            .tenants
            .values()
            .find(|t| t.subdomain == subdomain)
            .cloned())
    }

    async fn rename_tenant(&self, tenant_id: TenantId, new_subdomain: &str) -> Result<Tenant> {
        let subdomain = normalize_subdomain(new_subdomain)?;
        let mut state = self.state.write().await;
        if state
            .tenants
            .values()
            .any(|t| t.subdomain == subdomain && t.id != tenant_id)
        {
            return Err(Error::SubdomainTaken(subdomain));
        }
        let tenant = state
            .tenants
            .get_mut(&tenant_id)
            .ok_or_else(|| Error::TenantNotFound(tenant_id.to_string()))?;
        tenant.subdomain = subdomain;
        tenant.updated_at = Utc::now();
        Ok(tenant.clone())
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self.state.read().await.tenants.values().cloned().collect();
        tenants.sort_by(|a, b| a.subdomain.cmp(&b.subdomain));
        Ok(tenants)
    }

    async fn claim_domain(&self, domain: &str, claim: DomainClaim) -> Result<()> {
        let domain = normalize_domain(domain)?;
        let mut state = self.state.write().await;
        match state.domains.get(&domain) {
            Some(existing) if *existing != claim => Err(Error::DomainTaken(domain)),
            Some(_) => Ok(()),
            None => {
                state.domains.insert(domain, claim);
                Ok(())
            }
        }
    }

    async fn release_domain(&self, domain: &str) -> Result<()> {
        let domain = normalize_domain(domain)?;
        self.state.write().await.domains.remove(&domain);
        Ok(())
    }

    async fn find_domain(&self, domain: &str) -> Result<Option<DomainClaim>> {
        let Ok(domain) = normalize_domain(domain) else {
            return Ok(None);
        };
        Ok(self.state.read().await.domains.get(&domain).copied())
    }
}

/// Durable part of an in-memory tenant store; survives close and re-open.
#[derive(Default)]
pub struct TenantData {
    websites: HashMap<WebsiteId, Website>,
    pages: HashMap<PageId, Page>,
}

/// `HashMap`-backed tenant store.
pub struct InMemoryTenantStore {
    tenant_id: TenantId,
    data: Arc<RwLock<TenantData>>,
    closed: AtomicBool,
}

impl InMemoryTenantStore {
    pub fn new(tenant_id: TenantId) -> Self {
        Self::with_data(tenant_id, Arc::new(RwLock::new(TenantData::default())))
    }

    pub fn with_data(tenant_id: TenantId, data: Arc<RwLock<TenantData>>) -> Self {
        Self {
            tenant_id,
            data,
            closed: AtomicBool::new(false),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            return Err(Error::Database(format!(
                "store for tenant {} is closed",
                self.tenant_id
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl TenantStore for InMemoryTenantStore {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    async fn create_website(&self, website: Website) -> Result<Website> {
        self.ensure_open()?;
        self.data
            .write()
            .await
            .websites
            .insert(website.id, website.clone());
        Ok(website)
    }

    async fn get_website(&self, website_id: WebsiteId) -> Result<Website> {
        self.ensure_open()?;
        self.data
            .read()
            .await
            .websites
            .get(&website_id)
            .cloned()
            .ok_or_else(|| Error::WebsiteNotFound(website_id.to_string()))
    }

    async fn list_websites(&self) -> Result<Vec<Website>> {
        self.ensure_open()?;
        let mut websites: Vec<Website> =
            self.data.read().await.websites.values().cloned().collect();
        websites.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.name.cmp(&b.name)));
        Ok(websites)
    }

    async fn update_website(&self, website: &Website) -> Result<()> {
        self.ensure_open()?;
        let mut data = self.data.write().await;
        let slot = data
            .websites
            .get_mut(&website.id)
            .ok_or_else(|| Error::WebsiteNotFound(website.id.to_string()))?;
        *slot = website.clone();
        slot.updated_at = Utc::now();
        Ok(())
    }

    async fn create_page(&self, mut page: Page) -> Result<Page> {
        self.ensure_open()?;
        page.path = normalize_page_path(&page.path)?;
        let mut data = self.data.write().await;
        if !data.websites.contains_key(&page.website_id) {
            return Err(Error::WebsiteNotFound(page.website_id.to_string()));
        }
        if data
            .pages
            .values()
            .any(|p| p.website_id == page.website_id && p.path == page.path)
        {
            return Err(Error::PathTaken(page.path));
        }
        data.pages.insert(page.id, page.clone());
        Ok(page)
    }

    async fn get_page(&self, page_id: PageId) -> Result<Page> {
        self.ensure_open()?;
        self.data
            .read()
            .await
            .pages
            .get(&page_id)
            .cloned()
            .ok_or_else(|| Error::PageNotFound(page_id.to_string()))
    }

    async fn get_page_by_path(&self, website_id: WebsiteId, path: &str) -> Result<Page> {
        self.ensure_open()?;
        let path = normalize_page_path(path)?;
        self.data
            .read()
            .await
            .pages
            .values()
            .find(|p| p.website_id == website_id && p.path == path)
            .cloned()
            .ok_or(Error::PageNotFound(path))
    }

    async fn list_pages(&self, website_id: WebsiteId) -> Result<Vec<Page>> {
        self.ensure_open()?;
        let mut pages: Vec<Page> = self
            .data
            .read()
            .await
            .pages
            .values()
            .filter(|p| p.website_id == website_id)
            .cloned()
            .collect();
        pages.sort_by(|a, b| a.path.cmp(&b.path));
        Ok(pages)
    }

    async fn delete_page(&self, page_id: PageId) -> Result<()> {
        self.ensure_open()?;
        self.data
            .write()
            .await
            .pages
            .remove(&page_id)
            .map(|_| ())
            .ok_or_else(|| Error::PageNotFound(page_id.to_string()))
    }

    async fn save_tree(
        &self,
        page_id: PageId,
        expected_version: u64,
        tree: &ComponentTree,
    ) -> Result<u64> {
        self.ensure_open()?;
        let mut data = self.data.write().await;
        let page = data
            .pages
            .get_mut(&page_id)
            .ok_or_else(|| Error::PageNotFound(page_id.to_string()))?;
        if page.version != expected_version {
            return Err(Error::VersionConflict {
                expected: expected_version,
                actual: page.version,
            });
        }
        page.tree = tree.clone();
        page.version += 1;
        page.updated_at = Utc::now();
        Ok(page.version)
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            debug!(tenant_id = %self.tenant_id, "Closed in-memory tenant store");
        }
    }
}

/// Provisioner handing out [`InMemoryTenantStore`]s.
///
/// Tenant data outlives individual handles, so an evicted tenant that is
/// provisioned again sees its previous content. Provisioning attempts are
/// counted, and an artificial delay or failures can be injected to exercise
/// callers.
#[derive(Default)]
pub struct InMemoryProvisioner {
    data: Mutex<HashMap<TenantId, Arc<RwLock<TenantData>>>>,
    attempts: AtomicUsize,
    failures_remaining: AtomicUsize,
    delay: Option<Duration>,
}

impl InMemoryProvisioner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleep for `delay` inside every provisioning attempt.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make the next `count` provisioning attempts fail.
    pub fn fail_next(&self, count: usize) {
        self.failures_remaining.store(count, Ordering::SeqCst);
    }

    /// Number of provisioning attempts so far, failed ones included.
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl StoreProvisioner for InMemoryProvisioner {
    async fn provision(&self, tenant_id: TenantId) -> Result<Arc<dyn TenantStore>> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let failed = self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(Error::Provisioning {
                tenant: tenant_id.to_string(),
                reason: "injected failure".to_string(),
            });
        }

        let data = {
            let mut map = self
                .data
                .lock()
                .map_err(|_| Error::Database("provisioner state poisoned".to_string()))?;
            map.entry(tenant_id).or_default().clone()
        };
        Ok(Arc::new(InMemoryTenantStore::with_data(tenant_id, data)))
    }
}
