//! Error types for siteforge core

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    // Tenant resolution and store lifecycle
    #[error("Tenant not found: {0}")]
    TenantNotFound(String),

    #[error("Ambiguous request key: {0}")]
    AmbiguousKey(String),

    #[error("Invalid subdomain: {0}")]
    InvalidSubdomain(String),

    #[error("Subdomain already taken: {0}")]
    SubdomainTaken(String),

    #[error("Domain already claimed: {0}")]
    DomainTaken(String),

    #[error("Store provisioning failed for tenant {tenant}: {reason}")]
    Provisioning { tenant: String, reason: String },

    #[error("Tenant store registry is closed")]
    RegistryClosed,

    #[error("Invalid identifier: {0}")]
    InvalidId(String),

    // Content entities
    #[error("Website not found: {0}")]
    WebsiteNotFound(String),

    #[error("Page not found: {0}")]
    PageNotFound(String),

    #[error("Invalid path: {0}")]
    InvalidPath(String),

    #[error("Path already exists in website: {0}")]
    PathTaken(String),

    #[error("Page is busy with another edit: {0}")]
    PageBusy(String),

    // Component tree structure
    #[error("Parent component not found: {0}")]
    ParentNotFound(String),

    #[error("Component not found: {0}")]
    ComponentNotFound(String),

    #[error("Duplicate component id: {0}")]
    DuplicateId(String),

    #[error("Cannot move component {component} inside itself or its descendant {target}")]
    CycleDetected { component: String, target: String },

    #[error("Component tree depth limit of {limit} exceeded")]
    DepthExceeded { limit: usize },

    #[error("The page root cannot be used as a component: {0}")]
    RootNotAddressable(String),

    #[error("Version conflict: expected {expected}, found {actual}")]
    VersionConflict { expected: u64, actual: u64 },

    // Infrastructure
    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Stable machine-readable code for the error kind.
    ///
    /// Editing clients switch on this to show a targeted message instead of a
    /// generic failure.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::TenantNotFound(_) => "tenant_not_found",
            Error::AmbiguousKey(_) => "ambiguous_key",
            Error::InvalidSubdomain(_) => "invalid_subdomain",
            Error::SubdomainTaken(_) => "subdomain_taken",
            Error::DomainTaken(_) => "domain_taken",
            Error::Provisioning { .. } => "provisioning_error",
            Error::RegistryClosed => "registry_closed",
            Error::InvalidId(_) => "invalid_id",
            Error::WebsiteNotFound(_) => "website_not_found",
            Error::PageNotFound(_) => "page_not_found",
            Error::InvalidPath(_) => "invalid_path",
            Error::PathTaken(_) => "path_taken",
            Error::PageBusy(_) => "page_busy",
            Error::ParentNotFound(_) => "parent_not_found",
            Error::ComponentNotFound(_) => "component_not_found",
            Error::DuplicateId(_) => "duplicate_id",
            Error::CycleDetected { .. } => "cycle_detected",
            Error::DepthExceeded { .. } => "depth_exceeded",
            Error::RootNotAddressable(_) => "root_not_addressable",
            Error::VersionConflict { .. } => "version_conflict",
            Error::Database(_) => "database_error",
            Error::Config(_) => "config_error",
            Error::Serialization(_) => "serialization_error",
            Error::Io(_) => "io_error",
        }
    }

    /// Whether the caller may retry the same request with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::Provisioning { .. }
                | Error::VersionConflict { .. }
                | Error::PageBusy(_)
                | Error::Database(_)
        )
    }

    /// Structural tree errors leave the prior tree untouched and are always
    /// recoverable by the editing client.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            Error::ParentNotFound(_)
                | Error::ComponentNotFound(_)
                | Error::DuplicateId(_)
                | Error::CycleDetected { .. }
                | Error::DepthExceeded { .. }
                | Error::RootNotAddressable(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
