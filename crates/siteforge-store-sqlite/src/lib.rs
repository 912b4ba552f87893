//! SQLite storage for siteforge
//!
//! This crate implements the storage traits from `siteforge-core`:
//! - `SqliteDirectory`: the shared tenant directory and custom domain claims
//! - `SqliteTenantStore`: one isolated database file per tenant
//! - `SqliteProvisioner`: creates or reopens tenant databases on demand
//!
//! # Example
//! ```no_run
//! # use siteforge_store_sqlite::{SqliteProvisioner, SqliteStoreConfig};
//! # use siteforge_core::{StoreProvisioner, TenantId};
//! # async fn example() -> siteforge_core::Result<()> {
//! let provisioner = SqliteProvisioner::new("/var/lib/siteforge", SqliteStoreConfig::default());
//! let store = provisioner.provision(TenantId::new()).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod directory;
mod migrations;
mod provisioner;
mod row;
mod tenant_store;

pub use config::SqliteStoreConfig;
pub use directory::SqliteDirectory;
pub use migrations::SCHEMA_VERSION;
pub use provisioner::SqliteProvisioner;
pub use tenant_store::SqliteTenantStore;
