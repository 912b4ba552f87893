//! Websites and pages owned by a tenant

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::tree::ComponentTree;
use crate::{Error, Result};

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $what:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Uuid::parse_str(s)
                    .map(Self)
                    .map_err(|e| {
                        Error::InvalidId(format!(concat!("Invalid ", $what, " id: {}"), e))
                    })
            }
        }
    };
}

uuid_id!(
    /// Identifier of a website, unique across all tenants.
    WebsiteId,
    "website"
);

uuid_id!(
    /// Identifier of a page.
    PageId,
    "page"
);

/// A website belonging to exactly one tenant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Website {
    pub id: WebsiteId,
    pub name: String,
    /// Custom domain, globally unique across tenants when present
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    pub theme: String,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
    #[serde(default)]
    pub published: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Fields supplied when creating a website.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewWebsite {
    pub name: String,
    #[serde(default)]
    pub domain: Option<String>,
    #[serde(default = "default_theme")]
    pub theme: String,
    #[serde(default)]
    pub settings: BTreeMap<String, String>,
}

fn default_theme() -> String {
    "default".to_string()
}

impl NewWebsite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            domain: None,
            theme: default_theme(),
            settings: BTreeMap::new(),
        }
    }

    pub fn with_theme(mut self, theme: impl Into<String>) -> Self {
        self.theme = theme.into();
        self
    }

    pub fn with_domain(mut self, domain: impl Into<String>) -> Self {
        self.domain = Some(domain.into());
        self
    }

    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    /// Materialize the record. `domain` must already be normalized.
    pub fn into_website(self) -> Website {
        let now = Utc::now();
        Website {
            id: WebsiteId::new(),
            name: self.name,
            domain: self.domain,
            theme: self.theme,
            settings: self.settings,
            published: false,
            created_at: now,
            updated_at: now,
        }
    }
}

/// A single `<meta>` entry of a page. Entries keep their insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaTag {
    pub key: String,
    pub value: String,
}

impl MetaTag {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A page of a website with its component tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Page {
    pub id: PageId,
    pub website_id: WebsiteId,
    /// Normalized routing path, unique within the website
    pub path: String,
    pub title: String,
    #[serde(default)]
    pub meta: Vec<MetaTag>,
    #[serde(default)]
    pub tree: ComponentTree,
    /// Tree version for optimistic concurrency; bumped by every saved edit
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Page {
    /// A fresh, empty page at version 1. `path` must already be normalized.
    pub fn new(website_id: WebsiteId, path: impl Into<String>, title: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: PageId::new(),
            website_id,
            path: path.into(),
            title: title.into(),
            meta: Vec::new(),
            tree: ComponentTree::new(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_meta(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.meta.push(MetaTag::new(key, value));
        self
    }
}
