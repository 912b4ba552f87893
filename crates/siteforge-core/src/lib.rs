//! Siteforge Core Types and Traits
//!
//! This crate provides the fundamental types used throughout siteforge:
//! - Tenant, website and page entities
//! - The component tree model and its structural mutation engine
//! - Deterministic HTML rendering
//! - Storage traits for the tenant directory and per-tenant stores
//! - Core error types

pub mod component;
pub mod error;
pub mod ident;
pub mod memory;
pub mod mutation;
pub mod render;
pub mod site;
pub mod store;
pub mod tenant;
pub mod tree;

pub use component::{
    Component, ComponentId, ComponentKind, NewComponent, PropValue, Props, PropsPatch,
};
pub use error::{Error, Result};
pub use mutation::{Applied, Mutation};
pub use render::{Document, Fragment, RenderWarning};
pub use site::{MetaTag, NewWebsite, Page, PageId, Website, WebsiteId};
pub use store::{Directory, DomainClaim, StoreProvisioner, TenantStore};
pub use tenant::{Tenant, TenantId};
pub use tree::{ComponentPath, ComponentTree, MAX_DEPTH};
