//! Website writes that keep custom domain claims consistent
//!
//! A website's custom domain is unique across tenants. The claim lives in
//! the shared directory while the website lives in the tenant's store, so
//! every create or update that touches `domain` goes through
//! [`WebsiteService`]: claim the new domain first, write the website, then
//! release the domain it no longer uses. A failed write gives the new claim
//! back.

use std::sync::Arc;

use tracing::{info, warn};

use siteforge_core::ident::normalize_domain;
use siteforge_core::store::{Directory, DomainClaim, TenantStore};
use siteforge_core::{Result, Website};

use crate::resolver::TenantResolver;

/// Creates and updates websites together with their domain claims.
pub struct WebsiteService {
    directory: Arc<dyn Directory>,
    resolver: Option<Arc<TenantResolver>>,
}

impl WebsiteService {
    pub fn new(directory: Arc<dyn Directory>) -> Self {
        Self {
            directory,
            resolver: None,
        }
    }

    /// Drop resolver cache entries for domains this service releases.
    pub fn with_resolver(mut self, resolver: Arc<TenantResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Create a website, claiming its custom domain first if it has one.
    ///
    /// # Errors
    /// - `Error::InvalidSubdomain` if the domain is malformed
    /// - `Error::DomainTaken` if another website owns the domain
    /// - any error of the store write; the claim is released again
    pub async fn create_website(
        &self,
        store: &dyn TenantStore,
        mut website: Website,
    ) -> Result<Website> {
        website.domain = website.domain.as_deref().map(normalize_domain).transpose()?;
        let Some(domain) = website.domain.clone() else {
            return store.create_website(website).await;
        };

        let claim = DomainClaim {
            tenant_id: store.tenant_id(),
            website_id: website.id,
        };
        self.directory.claim_domain(&domain, claim).await?;

        match store.create_website(website).await {
            Ok(website) => {
                info!(
                    tenant_id = %claim.tenant_id,
                    website_id = %claim.website_id,
                    domain = %domain,
                    "Created website with custom domain"
                );
                Ok(website)
            }
            Err(e) => {
                self.give_back(&domain).await;
                Err(e)
            }
        }
    }

    /// Replace a website's attributes, moving its domain claim when the
    /// domain changes.
    ///
    /// # Errors
    /// - `Error::WebsiteNotFound` if the website does not exist
    /// - `Error::InvalidSubdomain` if the new domain is malformed
    /// - `Error::DomainTaken` if another website owns the new domain
    /// - any error of the store write; the new claim is released again and
    ///   the old one is kept
    pub async fn update_website(
        &self,
        store: &dyn TenantStore,
        mut website: Website,
    ) -> Result<Website> {
        let previous = store.get_website(website.id).await?;
        website.domain = website.domain.as_deref().map(normalize_domain).transpose()?;

        if website.domain == previous.domain {
            store.update_website(&website).await?;
            return store.get_website(website.id).await;
        }

        let claim = DomainClaim {
            tenant_id: store.tenant_id(),
            website_id: website.id,
        };
        if let Some(domain) = &website.domain {
            self.directory.claim_domain(domain, claim).await?;
        }

        if let Err(e) = store.update_website(&website).await {
            if let Some(domain) = &website.domain {
                self.give_back(domain).await;
            }
            return Err(e);
        }

        if let Some(old) = &previous.domain {
            self.directory.release_domain(old).await?;
            if let Some(resolver) = &self.resolver {
                resolver.invalidate(old);
            }
        }
        info!(
            tenant_id = %claim.tenant_id,
            website_id = %claim.website_id,
            from = ?previous.domain,
            to = ?website.domain,
            "Moved website domain"
        );
        store.get_website(website.id).await
    }

    /// Release a claim taken for a write that did not happen.
    async fn give_back(&self, domain: &str) {
        if let Err(e) = self.directory.release_domain(domain).await {
            warn!(domain = %domain, error = %e, "Failed to release domain claim");
        }
    }
}
