//! Provisioning of per-tenant SQLite databases
//!
//! Each tenant gets its own database file under `<data_dir>/tenants/`.
//! Provisioning creates the file and schema on first use and simply reopens
//! it afterwards; eviction closes the pool but never deletes the file.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use siteforge_core::store::{StoreProvisioner, TenantStore};
use siteforge_core::{Error, Result, TenantId};

use crate::config::SqliteStoreConfig;
use crate::tenant_store::SqliteTenantStore;

/// Creates or opens `SqliteTenantStore`s.
#[derive(Debug, Clone)]
pub struct SqliteProvisioner {
    tenants_dir: PathBuf,
    config: SqliteStoreConfig,
}

impl SqliteProvisioner {
    /// # Arguments
    /// * `data_dir` - Root data directory; tenant databases live in `data_dir/tenants`
    /// * `config` - Pool settings applied to every tenant database
    pub fn new(data_dir: impl Into<PathBuf>, config: SqliteStoreConfig) -> Self {
        Self {
            tenants_dir: data_dir.into().join("tenants"),
            config,
        }
    }

    pub fn tenants_dir(&self) -> &Path {
        &self.tenants_dir
    }

    /// Location of a tenant's database file.
    pub fn db_path(&self, tenant_id: TenantId) -> PathBuf {
        self.tenants_dir.join(format!("{}.db", tenant_id))
    }
}

#[async_trait]
impl StoreProvisioner for SqliteProvisioner {
    async fn provision(&self, tenant_id: TenantId) -> Result<Arc<dyn TenantStore>> {
        let path = self.db_path(tenant_id);
        let existed = tokio::fs::try_exists(&path).await.unwrap_or(false);

        match SqliteTenantStore::open(tenant_id, &path, &self.config).await {
            Ok(store) => {
                if existed {
                    info!(tenant_id = %tenant_id, "Opened existing tenant store");
                } else {
                    info!(tenant_id = %tenant_id, "Provisioned new tenant store at {:?}", path);
                }
                Ok(Arc::new(store))
            }
            Err(e) => {
                warn!(tenant_id = %tenant_id, error = %e, "Tenant store provisioning failed");
                Err(Error::Provisioning {
                    tenant: tenant_id.to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteforge_core::NewWebsite;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_provision_creates_and_reopens() {
        let dir = TempDir::new().unwrap();
        let provisioner = SqliteProvisioner::new(dir.path(), SqliteStoreConfig::default());
        let tenant = TenantId::new();

        let store = provisioner.provision(tenant).await.unwrap();
        assert_eq!(store.tenant_id(), tenant);
        assert!(provisioner.db_path(tenant).exists());
        store
            .create_website(NewWebsite::new("Persisted").into_website())
            .await
            .unwrap();
        store.close().await;

        let reopened = provisioner.provision(tenant).await.unwrap();
        assert_eq!(reopened.list_websites().await.unwrap()[0].name, "Persisted");
    }

    #[tokio::test]
    async fn test_tenants_are_isolated() {
        let dir = TempDir::new().unwrap();
        let provisioner = SqliteProvisioner::new(dir.path(), SqliteStoreConfig::default());

        let a = provisioner.provision(TenantId::new()).await.unwrap();
        let b = provisioner.provision(TenantId::new()).await.unwrap();
        a.create_website(NewWebsite::new("Only A").into_website())
            .await
            .unwrap();
        assert!(b.list_websites().await.unwrap().is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_location_is_provisioning_error() {
        let dir = TempDir::new().unwrap();
        // A regular file where the tenants directory should be
        let blocker = dir.path().join("data");
        std::fs::write(&blocker, b"not a directory").unwrap();

        let provisioner = SqliteProvisioner::new(&blocker, SqliteStoreConfig::default());
        let err = provisioner.provision(TenantId::new()).await.err().unwrap();
        assert!(matches!(err, Error::Provisioning { .. }));
        assert!(err.is_retryable());
    }
}
