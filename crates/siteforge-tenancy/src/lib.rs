//! Tenant routing for siteforge
//!
//! - [`TenantResolver`] maps an inbound request key (a `Host` value or an
//!   explicit tenant header) to a tenant identifier
//! - [`TenantStoreRegistry`] hands out one shared store handle per tenant,
//!   provisioning it on first use
//! - [`WebsiteService`] writes websites while keeping their custom domains
//!   unique across tenants
//!
//! A request is served by resolving its key, then acquiring the tenant's
//! store from the registry:
//!
//! ```no_run
//! # use std::sync::Arc;
//! # use siteforge_core::memory::{InMemoryDirectory, InMemoryProvisioner};
//! # use siteforge_tenancy::{RegistryConfig, ResolverConfig, TenantResolver, TenantStoreRegistry};
//! # async fn example() -> siteforge_core::Result<()> {
//! let resolver = TenantResolver::new(
//!     Arc::new(InMemoryDirectory::new()),
//!     ResolverConfig::default().with_suffix("sites.example.com"),
//! );
//! let registry = TenantStoreRegistry::new(
//!     Arc::new(InMemoryProvisioner::new()),
//!     RegistryConfig::default(),
//! );
//!
//! let tenant_id = resolver.resolve("acme.sites.example.com").await?;
//! let store = registry.acquire(tenant_id).await?;
//! let websites = store.list_websites().await?;
//! # Ok(())
//! # }
//! ```

mod registry;
mod resolver;
mod websites;

pub use registry::{RegistryConfig, TenantStoreRegistry};
pub use resolver::{ResolverConfig, TenantResolver};
pub use websites::WebsiteService;
