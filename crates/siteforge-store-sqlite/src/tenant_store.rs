//! SqliteTenantStore - TenantStore trait implementation, one SQLite database per tenant

use async_trait::async_trait;
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use siteforge_core::ident::normalize_page_path;
use siteforge_core::store::TenantStore;
use siteforge_core::{
    ComponentTree, Error, MetaTag, Page, PageId, Result, TenantId, Website, WebsiteId,
};

use crate::config::SqliteStoreConfig;
use crate::migrations::init_tenant_schema;
use crate::row::{db_error, format_timestamp, is_unique_violation, text, timestamp, uuid};

/// Isolated store of a single tenant.
///
/// The handle wraps a connection pool, so it is cheap to share and safe to
/// use from many workers at once.
#[derive(Clone)]
pub struct SqliteTenantStore {
    tenant_id: TenantId,
    db_path: PathBuf,
    pool: SqlitePool,
}

impl SqliteTenantStore {
    /// Open (creating if needed) the database of `tenant_id` at `db_path`.
    ///
    /// # Errors
    /// - `Error::Io` if the parent directory cannot be created
    /// - `Error::Database` if the connection or schema setup fails
    pub async fn open(
        tenant_id: TenantId,
        db_path: &Path,
        config: &SqliteStoreConfig,
    ) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let pool = config
            .pool_options()
            .connect_with(config.connect_options(db_path))
            .await
            .map_err(|e| Error::Database(format!("Failed to open tenant database: {}", e)))?;

        if let Err(e) = init_tenant_schema(&pool).await {
            pool.close().await;
            return Err(e);
        }

        debug!(tenant_id = %tenant_id, "Opened tenant database at {:?}", db_path);

        Ok(Self {
            tenant_id,
            db_path: db_path.to_path_buf(),
            pool,
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    pub fn is_closed(&self) -> bool {
        self.pool.is_closed()
    }

    fn website_from_row(row: &SqliteRow) -> Result<Website> {
        let settings: BTreeMap<String, String> = serde_json::from_str(&text(row, "settings")?)?;
        let published: i64 = row.try_get("published").map_err(db_error)?;
        Ok(Website {
            id: WebsiteId::from_uuid(uuid(row, "id")?),
            name: text(row, "name")?,
            domain: row.try_get::<Option<String>, _>("domain").map_err(db_error)?,
            theme: text(row, "theme")?,
            settings,
            published: published != 0,
            created_at: timestamp(row, "created_at")?,
            updated_at: timestamp(row, "updated_at")?,
        })
    }

    fn page_from_row(row: &SqliteRow) -> Result<Page> {
        let meta: Vec<MetaTag> = serde_json::from_str(&text(row, "meta")?)?;
        let tree: ComponentTree = serde_json::from_str(&text(row, "tree")?)?;
        let version: i64 = row.try_get("version").map_err(db_error)?;
        Ok(Page {
            id: PageId::from_uuid(uuid(row, "id")?),
            website_id: WebsiteId::from_uuid(uuid(row, "website_id")?),
            path: text(row, "path")?,
            title: text(row, "title")?,
            meta,
            tree,
            version: version as u64,
            created_at: timestamp(row, "created_at")?,
            updated_at: timestamp(row, "updated_at")?,
        })
    }

    async fn current_version(&self, page_id: PageId) -> Result<Option<u64>> {
        let version: Option<i64> = sqlx::query_scalar("SELECT version FROM pages WHERE id = ?")
            .bind(page_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(version.map(|v| v as u64))
    }
}

#[async_trait]
impl TenantStore for SqliteTenantStore {
    fn tenant_id(&self) -> TenantId {
        self.tenant_id
    }

    async fn create_website(&self, website: Website) -> Result<Website> {
        sqlx::query(
            r#"
            INSERT INTO websites
                (id, name, domain, theme, settings, published, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(website.id.to_string())
        .bind(&website.name)
        .bind(&website.domain)
        .bind(&website.theme)
        .bind(serde_json::to_string(&website.settings)?)
        .bind(website.published as i64)
        .bind(format_timestamp(&website.created_at))
        .bind(format_timestamp(&website.updated_at))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        info!(tenant_id = %self.tenant_id, website_id = %website.id, "Created website");
        Ok(website)
    }

    async fn get_website(&self, website_id: WebsiteId) -> Result<Website> {
        let row = sqlx::query("SELECT * FROM websites WHERE id = ?")
            .bind(website_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| Error::WebsiteNotFound(website_id.to_string()))?;
        Self::website_from_row(&row)
    }

    async fn list_websites(&self) -> Result<Vec<Website>> {
        let rows = sqlx::query("SELECT * FROM websites ORDER BY created_at, name")
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(Self::website_from_row).collect()
    }

    async fn update_website(&self, website: &Website) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE websites
            SET name = ?, domain = ?, theme = ?, settings = ?, published = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&website.name)
        .bind(&website.domain)
        .bind(&website.theme)
        .bind(serde_json::to_string(&website.settings)?)
        .bind(website.published as i64)
        .bind(format_timestamp(&Utc::now()))
        .bind(website.id.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 0 {
            return Err(Error::WebsiteNotFound(website.id.to_string()));
        }
        Ok(())
    }

    async fn create_page(&self, mut page: Page) -> Result<Page> {
        page.path = normalize_page_path(&page.path)?;

        // Checked up front so a missing website is reported as such rather
        // than as a foreign key failure
        self.get_website(page.website_id).await?;

        sqlx::query(
            r#"
            INSERT INTO pages
                (id, website_id, path, title, meta, tree, version, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(page.id.to_string())
        .bind(page.website_id.to_string())
        .bind(&page.path)
        .bind(&page.title)
        .bind(serde_json::to_string(&page.meta)?)
        .bind(serde_json::to_string(&page.tree)?)
        .bind(page.version as i64)
        .bind(format_timestamp(&page.created_at))
        .bind(format_timestamp(&page.updated_at))
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                Error::PathTaken(page.path.clone())
            } else {
                db_error(e)
            }
        })?;

        debug!(tenant_id = %self.tenant_id, page_id = %page.id, path = %page.path, "Created page");
        Ok(page)
    }

    async fn get_page(&self, page_id: PageId) -> Result<Page> {
        let row = sqlx::query("SELECT * FROM pages WHERE id = ?")
            .bind(page_id.to_string())
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or_else(|| Error::PageNotFound(page_id.to_string()))?;
        Self::page_from_row(&row)
    }

    async fn get_page_by_path(&self, website_id: WebsiteId, path: &str) -> Result<Page> {
        let path = normalize_page_path(path)?;
        let row = sqlx::query("SELECT * FROM pages WHERE website_id = ? AND path = ?")
            .bind(website_id.to_string())
            .bind(&path)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_error)?
            .ok_or(Error::PageNotFound(path))?;
        Self::page_from_row(&row)
    }

    async fn list_pages(&self, website_id: WebsiteId) -> Result<Vec<Page>> {
        let rows = sqlx::query("SELECT * FROM pages WHERE website_id = ? ORDER BY path")
            .bind(website_id.to_string())
            .fetch_all(&self.pool)
            .await
            .map_err(db_error)?;
        rows.iter().map(Self::page_from_row).collect()
    }

    async fn delete_page(&self, page_id: PageId) -> Result<()> {
        let result = sqlx::query("DELETE FROM pages WHERE id = ?")
            .bind(page_id.to_string())
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        if result.rows_affected() == 0 {
            return Err(Error::PageNotFound(page_id.to_string()));
        }
        Ok(())
    }

    async fn save_tree(
        &self,
        page_id: PageId,
        expected_version: u64,
        tree: &ComponentTree,
    ) -> Result<u64> {
        let payload = serde_json::to_string(tree)?;

        // Compare-and-swap on the version column
        let result = sqlx::query(
            r#"
            UPDATE pages
            SET tree = ?, version = version + 1, updated_at = ?
            WHERE id = ? AND version = ?
            "#,
        )
        .bind(payload)
        .bind(format_timestamp(&Utc::now()))
        .bind(page_id.to_string())
        .bind(expected_version as i64)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if result.rows_affected() == 1 {
            return Ok(expected_version + 1);
        }

        match self.current_version(page_id).await? {
            None => Err(Error::PageNotFound(page_id.to_string())),
            Some(actual) => Err(Error::VersionConflict {
                expected: expected_version,
                actual,
            }),
        }
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            debug!(tenant_id = %self.tenant_id, "Closed tenant database");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteforge_core::{ComponentKind, NewComponent, NewWebsite};
    use tempfile::TempDir;

    async fn open_store() -> (TempDir, SqliteTenantStore) {
        let dir = TempDir::new().unwrap();
        let tenant = TenantId::new();
        let store = SqliteTenantStore::open(
            tenant,
            &dir.path().join(format!("{}.db", tenant)),
            &SqliteStoreConfig::default(),
        )
        .await
        .unwrap();
        (dir, store)
    }

    #[tokio::test]
    async fn test_website_round_trip() {
        let (_dir, store) = open_store().await;
        let website = store
            .create_website(
                NewWebsite::new("Acme")
                    .with_theme("ocean")
                    .with_setting("lang", "en")
                    .into_website(),
            )
            .await
            .unwrap();

        let mut loaded = store.get_website(website.id).await.unwrap();
        assert_eq!(loaded.theme, "ocean");
        assert_eq!(loaded.settings.get("lang").map(String::as_str), Some("en"));
        assert!(!loaded.published);

        loaded.published = true;
        loaded.domain = Some("acme.com".to_string());
        store.update_website(&loaded).await.unwrap();
        let reloaded = store.get_website(website.id).await.unwrap();
        assert!(reloaded.published);
        assert_eq!(reloaded.domain.as_deref(), Some("acme.com"));

        assert!(matches!(
            store.get_website(WebsiteId::new()).await,
            Err(Error::WebsiteNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_page_paths_unique_per_website() {
        let (_dir, store) = open_store().await;
        let a = store.create_website(NewWebsite::new("A").into_website()).await.unwrap();
        let b = store.create_website(NewWebsite::new("B").into_website()).await.unwrap();

        store.create_page(Page::new(a.id, "/about", "About")).await.unwrap();
        store.create_page(Page::new(b.id, "about", "About B")).await.unwrap();
        assert!(matches!(
            store.create_page(Page::new(a.id, "about/", "Again")).await,
            Err(Error::PathTaken(_))
        ));
        assert!(matches!(
            store.create_page(Page::new(WebsiteId::new(), "/x", "Orphan")).await,
            Err(Error::WebsiteNotFound(_))
        ));

        let page = store.get_page_by_path(b.id, "/about").await.unwrap();
        assert_eq!(page.title, "About B");
        assert_eq!(store.list_pages(a.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_save_tree_compare_and_swap() {
        let (_dir, store) = open_store().await;
        let site = store.create_website(NewWebsite::new("S").into_website()).await.unwrap();
        let page = store.create_page(Page::new(site.id, "/", "Home")).await.unwrap();

        let (tree, id) = page
            .tree
            .insert(None, NewComponent::new(ComponentKind::Text).with_prop("text", "hi"), 0)
            .unwrap();
        assert_eq!(store.save_tree(page.id, 1, &tree).await.unwrap(), 2);

        let loaded = store.get_page(page.id).await.unwrap();
        assert_eq!(loaded.version, 2);
        assert_eq!(loaded.tree, tree);
        assert!(loaded.tree.contains(&id));

        assert!(matches!(
            store.save_tree(page.id, 1, &ComponentTree::new()).await,
            Err(Error::VersionConflict { expected: 1, actual: 2 })
        ));
        assert!(matches!(
            store.save_tree(PageId::new(), 1, &tree).await,
            Err(Error::PageNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let (_dir, store) = open_store().await;
        store.close().await;
        store.close().await;
        assert!(store.is_closed());
        assert!(store.list_websites().await.is_err());
    }

    #[tokio::test]
    async fn test_delete_page() {
        let (_dir, store) = open_store().await;
        let site = store.create_website(NewWebsite::new("S").into_website()).await.unwrap();
        let page = store.create_page(Page::new(site.id, "/gone", "Gone")).await.unwrap();
        store.delete_page(page.id).await.unwrap();
        assert!(matches!(store.delete_page(page.id).await, Err(Error::PageNotFound(_))));
    }
}
