//! Schema creation for the directory and tenant databases

use sqlx::SqlitePool;

use siteforge_core::{Error, Result};

/// Schema version written by this release.
pub const SCHEMA_VERSION: i64 = 1;

fn db_err(context: &str) -> impl Fn(sqlx::Error) -> Error + '_ {
    move |e| Error::Database(format!("{}: {}", context, e))
}

async fn ensure_schema_version(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err("Failed to create schema_version table"))?;

    sqlx::query("INSERT OR IGNORE INTO schema_version (version) VALUES (?)")
        .bind(SCHEMA_VERSION)
        .execute(pool)
        .await
        .map_err(db_err("Failed to record schema version"))?;

    let version: i64 = sqlx::query_scalar("SELECT MAX(version) FROM schema_version")
        .fetch_one(pool)
        .await
        .map_err(db_err("Failed to read schema version"))?;

    if version != SCHEMA_VERSION {
        return Err(Error::Database(format!(
            "Unsupported schema version: {}",
            version
        )));
    }
    Ok(())
}

/// Create the shared directory schema.
pub async fn init_directory_schema(pool: &SqlitePool) -> Result<()> {
    ensure_schema_version(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tenants (
            id TEXT PRIMARY KEY,
            subdomain TEXT NOT NULL UNIQUE,
            display_name TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err("Failed to create tenants table"))?;

    // Custom domains are unique across all tenants
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS domains (
            domain TEXT PRIMARY KEY,
            tenant_id TEXT NOT NULL,
            website_id TEXT NOT NULL,
            created_at TEXT NOT NULL,
            FOREIGN KEY (tenant_id) REFERENCES tenants(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err("Failed to create domains table"))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_domains_tenant ON domains(tenant_id)")
        .execute(pool)
        .await
        .map_err(db_err("Failed to create domains index"))?;

    Ok(())
}

/// Create the schema of one tenant database.
pub async fn init_tenant_schema(pool: &SqlitePool) -> Result<()> {
    ensure_schema_version(pool).await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS websites (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            domain TEXT,
            theme TEXT NOT NULL,
            settings TEXT NOT NULL DEFAULT '{}',
            published INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err("Failed to create websites table"))?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS pages (
            id TEXT PRIMARY KEY,
            website_id TEXT NOT NULL,
            path TEXT NOT NULL,
            title TEXT NOT NULL,
            meta TEXT NOT NULL DEFAULT '[]',
            tree TEXT NOT NULL DEFAULT '[]',
            version INTEGER NOT NULL DEFAULT 1,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (website_id, path),
            FOREIGN KEY (website_id) REFERENCES websites(id) ON DELETE CASCADE
        )
        "#,
    )
    .execute(pool)
    .await
    .map_err(db_err("Failed to create pages table"))?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_pages_website ON pages(website_id, path)")
        .execute(pool)
        .await
        .map_err(db_err("Failed to create pages index"))?;

    Ok(())
}
