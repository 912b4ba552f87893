//! SqliteDirectory - Directory trait implementation backed by one shared SQLite database

use async_trait::async_trait;
use chrono::Utc;
use sqlx::SqlitePool;
use sqlx::sqlite::SqliteRow;
use std::path::Path;
use tracing::{debug, info};

use siteforge_core::ident::{normalize_domain, normalize_subdomain};
use siteforge_core::store::{Directory, DomainClaim};
use siteforge_core::{Error, Result, Tenant, TenantId, WebsiteId};

use crate::config::SqliteStoreConfig;
use crate::migrations::init_directory_schema;
use crate::row::{db_error, format_timestamp, is_unique_violation, text, timestamp, uuid};

/// Shared directory of tenants and custom domains.
#[derive(Clone)]
pub struct SqliteDirectory {
    pool: SqlitePool,
}

impl SqliteDirectory {
    /// Open (creating if needed) the directory database at `db_path`.
    ///
    /// # Errors
    /// - `Error::Io` if the parent directory cannot be created
    /// - `Error::Database` if the connection or schema setup fails
    pub async fn open(db_path: &Path, config: &SqliteStoreConfig) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = config
            .pool_options()
            .connect_with(config.connect_options(db_path))
            .await
            .map_err(|e| Error::Database(format!("Failed to open directory database: {}", e)))?;

        init_directory_schema(&pool).await?;
        info!("Opened tenant directory at {:?}", db_path);

        Ok(Self { pool })
    }

    /// Create from an existing pool (useful for testing)
    pub async fn from_pool(pool: SqlitePool) -> Result<Self> {
        init_directory_schema(&pool).await?;
        Ok(Self { pool })
    }

    /// Close the underlying pool.
    pub async fn close(&self) {
        self.pool.close().await;
    }

    fn tenant_from_row(row: &SqliteRow) -> Result<Tenant> {
        Ok(Tenant {
            id: TenantId::from_uuid(uuid(row, "id")?),
            subdomain: text(row, "subdomain")?,
            display_name: text(row, "display_name")?,
            created_at: timestamp(row, "created_at")?,
            updated_at: timestamp(row, "updated_at")?,
        })
    }
}

#[async_trait]
impl Directory for SqliteDirectory {
    async fn create_tenant(&self, subdomain: &str, display_name: &str) -> Result<Tenant> {
        let subdomain = normalize_subdomain(subdomain)?;
        let tenant = Tenant::new(subdomain, display_name);

        sqlx::query(
            r#"
            INSERT INTO tenants (id, subdomain, display_name, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            "#,
        )
        .bind(tenant.id.to_string())
        .bind(&tenant.subdomain)
        .bind(&tenant.display_name)
        .bind(format_timestamp(&tenant.created_at))
        .bind(format_timestamp(&tenant.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::SubdomainTaken(tenant.subdomain.clone())
            } else {
                db_error(e)
            }
        })?;

        info!(tenant_id = %tenant.id, subdomain = %tenant.subdomain, "Created tenant");
        Ok(tenant)
    }

    async fn get_tenant(&self, tenant_id: TenantId) -> Result<Tenant> {
        let row = sqlx::query("SELECT * FROM tenants WHERE id = ?")
            .bind(tenant_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| Error::TenantNotFound(tenant_id.to_string()))?;
        Self::tenant_from_row(&row)
    }

    async fn find_by_subdomain(&self, subdomain: &str) -> Result<Option<Tenant>> {
        let row = sqlx::query("SELECT * FROM tenants WHERE subdomain = ?")
            .bind(subdomain.to_ascii_lowercase())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        row.as_ref().map(Self::tenant_from_row).transpose()
    }

    async fn rename_tenant(&self, tenant_id: TenantId, new_subdomain: &str) -> Result<Tenant> {
        let subdomain = normalize_subdomain(new_subdomain)?;

        let result = sqlx::query("UPDATE tenants SET subdomain = ?, updated_at = ? WHERE id = ?")
            .bind(&subdomain)
            .bind(format_timestamp(&Utc::now()))
            .bind(tenant_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(|e| {
                if is_unique_violation(&e) {
                    Error::SubdomainTaken(subdomain.clone())
                } else {
                    db_error(e)
                }
            })?;

        if result.rows_affected() == 0 {
            return Err(Error::TenantNotFound(tenant_id.to_string()));
        }

        info!(tenant_id = %tenant_id, subdomain = %subdomain, "Renamed tenant");
        self.get_tenant(tenant_id).await
    }

    async fn list_tenants(&self) -> Result<Vec<Tenant>> {
        let rows = sqlx::query("SELECT * FROM tenants ORDER BY subdomain")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(Self::tenant_from_row).collect()
    }

    async fn claim_domain(&self, domain: &str, claim: DomainClaim) -> Result<()> {
        let domain = normalize_domain(domain)?;

        let inserted = sqlx::query(
            "INSERT INTO domains (domain, tenant_id, website_id, created_at) VALUES (?, ?, ?, ?) \
             ON CONFLICT(domain) DO NOTHING",
        )
        .bind(&domain)
        .bind(claim.tenant_id.to_string())
        .bind(claim.website_id.to_string())
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if inserted.rows_affected() == 1 {
            debug!(domain = %domain, tenant_id = %claim.tenant_id, "Claimed custom domain");
            return Ok(());
        }

        // Already claimed: fine only if the owner is the same website
        match self.find_domain(&domain).await? {
            Some(existing) if existing == claim => Ok(()),
            _ => Err(Error::DomainTaken(domain)),
        }
    }

    async fn release_domain(&self, domain: &str) -> Result<()> {
        let domain = normalize_domain(domain)?;
        sqlx::query("DELETE FROM domains WHERE domain = ?")
            .bind(&domain)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        debug!(domain = %domain, "Released custom domain");
        Ok(())
    }

    async fn find_domain(&self, domain: &str) -> Result<Option<DomainClaim>> {
        let Ok(domain) = normalize_domain(domain) else {
            return Ok(None);
        };
        let row = sqlx::query("SELECT tenant_id, website_id FROM domains WHERE domain = ?")
            .bind(&domain)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;

        row.map(|row| {
            Ok(DomainClaim {
                tenant_id: TenantId::from_uuid(uuid(&row, "tenant_id")?),
                website_id: WebsiteId::from_uuid(uuid(&row, "website_id")?),
            })
        })
        .transpose()
    }
}
