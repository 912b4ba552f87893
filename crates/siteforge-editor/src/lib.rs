//! Page editing for siteforge
//!
//! [`PageEditor`] applies structural mutations from the editing client to a
//! stored page. Edits to the same page are serialized behind a per-page lock
//! and checked against the version the client loaded, so a client working
//! from a stale tree gets `Error::VersionConflict` instead of silently
//! overwriting someone else's change. Edits to different pages never wait on
//! each other.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use siteforge_core::render::{self, FALLBACK_THEME};
use siteforge_core::{
    Applied, Document, Error, Fragment, Mutation, Page, PageId, RenderWarning, Result, TenantStore,
};

/// A mutation submitted against a page version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationRequest {
    pub page_id: PageId,
    /// Version of the page the client's tree was loaded at
    pub expected_version: u64,
    pub mutation: Mutation,
}

/// Result of a successful edit.
#[derive(Debug, Clone, Serialize)]
pub struct MutationOutcome {
    /// The page as saved
    pub page: Page,
    pub version: u64,
    /// Re-rendered markup of the affected component, or of the parent a
    /// component was removed from. `None` when a root-level component was
    /// removed and the client should drop the node itself.
    pub fragment: Option<Fragment>,
    pub warnings: Vec<RenderWarning>,
}

#[derive(Debug, Clone)]
pub struct EditorConfig {
    /// Longest time an edit waits for another edit of the same page
    pub lock_timeout: Duration,
}

impl Default for EditorConfig {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::from_secs(5),
        }
    }
}

/// Applies mutations to stored pages.
#[derive(Default)]
pub struct PageEditor {
    config: EditorConfig,
    locks: DashMap<PageId, Arc<Mutex<()>>>,
}

impl PageEditor {
    pub fn new(config: EditorConfig) -> Self {
        Self {
            config,
            locks: DashMap::new(),
        }
    }

    fn page_lock(&self, page_id: PageId) -> Arc<Mutex<()>> {
        self.locks.entry(page_id).or_default().clone()
    }

    /// Forget a page's lock once nobody else holds it.
    fn release_lock(&self, page_id: PageId) {
        self.locks
            .remove_if(&page_id, |_, lock| Arc::strong_count(lock) == 1);
    }

    /// Apply a mutation and persist the new tree.
    ///
    /// The edit is all-or-nothing: on any error the stored page is unchanged.
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page does not exist
    /// - `Error::VersionConflict` if the page changed since `expected_version`
    /// - `Error::PageBusy` if another edit held the page for `lock_timeout`
    /// - structural errors from the mutation (`ParentNotFound`,
    ///   `ComponentNotFound`, `DuplicateId`, `CycleDetected`, ...)
    pub async fn apply(
        &self,
        store: &dyn TenantStore,
        request: &MutationRequest,
    ) -> Result<MutationOutcome> {
        let page_id = request.page_id;
        let lock = self.page_lock(page_id);

        let result = match tokio::time::timeout(self.config.lock_timeout, lock.lock()).await {
            Ok(guard) => {
                let result = self.apply_locked(store, request).await;
                drop(guard);
                result
            }
            Err(_) => {
                warn!(page_id = %page_id, "Timed out waiting for page lock");
                Err(Error::PageBusy(page_id.to_string()))
            }
        };

        drop(lock);
        self.release_lock(page_id);
        result
    }

    async fn apply_locked(
        &self,
        store: &dyn TenantStore,
        request: &MutationRequest,
    ) -> Result<MutationOutcome> {
        let page = store.get_page(request.page_id).await?;
        if page.version != request.expected_version {
            warn!(
                page_id = %page.id,
                expected = request.expected_version,
                actual = page.version,
                "Rejected edit against stale page version"
            );
            return Err(Error::VersionConflict {
                expected: request.expected_version,
                actual: page.version,
            });
        }

        let Applied { tree, affected } = page.tree.apply(&request.mutation).inspect_err(|e| {
            debug!(
                page_id = %page.id,
                op = request.mutation.name(),
                error = %e,
                "Mutation rejected"
            );
        })?;

        let version = store.save_tree(page.id, page.version, &tree).await?;

        let fragment = affected
            .as_ref()
            .map(|id| render::render_node(&tree, id))
            .transpose()?;
        let warnings = fragment
            .as_ref()
            .map(|f| f.warnings.clone())
            .unwrap_or_default();

        info!(
            tenant_id = %store.tenant_id(),
            page_id = %page.id,
            op = request.mutation.name(),
            version,
            "Applied page mutation"
        );

        let page = Page {
            tree,
            version,
            updated_at: Utc::now(),
            ..page
        };
        Ok(MutationOutcome {
            page,
            version,
            fragment,
            warnings,
        })
    }

    /// Render a stored page with its website's theme.
    ///
    /// # Errors
    /// - `Error::PageNotFound` / `Error::WebsiteNotFound`
    pub async fn render(&self, store: &dyn TenantStore, page_id: PageId) -> Result<Document> {
        let page = store.get_page(page_id).await?;
        let theme = match store.get_website(page.website_id).await {
            Ok(website) => website.theme,
            Err(Error::WebsiteNotFound(_)) => FALLBACK_THEME.to_string(),
            Err(e) => return Err(e),
        };
        Ok(render::render_page(&page, &theme))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use siteforge_core::memory::InMemoryTenantStore;
    use siteforge_core::{ComponentId, NewComponent, NewWebsite, PropsPatch, TenantId};

    async fn setup() -> (Arc<InMemoryTenantStore>, Page) {
        let store = Arc::new(InMemoryTenantStore::new(TenantId::new()));
        let website = store
            .create_website(NewWebsite::new("Acme").with_theme("sunset").into_website())
            .await
            .unwrap();
        let page = store
            .create_page(Page::new(website.id, "/", "Home"))
            .await
            .unwrap();
        (store, page)
    }

    fn insert(page: &Page, version: u64, id: &str, parent: Option<&str>) -> MutationRequest {
        MutationRequest {
            page_id: page.id,
            expected_version: version,
            mutation: Mutation::Insert {
                parent: parent.map(ComponentId::from),
                component: NewComponent::new("container").with_id(id),
                index: usize::MAX,
            },
        }
    }

    #[tokio::test]
    async fn test_apply_insert_returns_fragment() {
        let (store, page) = setup().await;
        let editor = PageEditor::default();

        let outcome = editor
            .apply(store.as_ref(), &insert(&page, 1, "A", None))
            .await
            .unwrap();

        assert_eq!(outcome.version, 2);
        assert_eq!(outcome.page.version, 2);
        let fragment = outcome.fragment.unwrap();
        assert_eq!(fragment.id, ComponentId::new("A"));
        assert!(fragment.html.contains("data-sf-id=\"A\""));

        let stored = store.get_page(page.id).await.unwrap();
        assert_eq!(stored.version, 2);
        assert!(stored.tree.contains(&ComponentId::new("A")));
    }

    #[tokio::test]
    async fn test_stale_version_is_rejected() {
        let (store, page) = setup().await;
        let editor = PageEditor::default();
        editor
            .apply(store.as_ref(), &insert(&page, 1, "A", None))
            .await
            .unwrap();

        let err = editor
            .apply(store.as_ref(), &insert(&page, 1, "B", None))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            Error::VersionConflict {
                expected: 1,
                actual: 2
            }
        ));
        let stored = store.get_page(page.id).await.unwrap();
        assert!(!stored.tree.contains(&ComponentId::new("B")));
    }

    #[tokio::test]
    async fn test_structural_error_leaves_page_unchanged() {
        let (store, page) = setup().await;
        let editor = PageEditor::default();
        editor
            .apply(store.as_ref(), &insert(&page, 1, "A", None))
            .await
            .unwrap();
        editor
            .apply(store.as_ref(), &insert(&page, 2, "B", Some("A")))
            .await
            .unwrap();

        let request = MutationRequest {
            page_id: page.id,
            expected_version: 3,
            mutation: Mutation::Move {
                id: ComponentId::new("A"),
                parent: Some(ComponentId::new("B")),
                index: 0,
            },
        };
        let err = editor.apply(store.as_ref(), &request).await.unwrap_err();
        assert_eq!(err.kind(), "cycle_detected");

        let stored = store.get_page(page.id).await.unwrap();
        assert_eq!(stored.version, 3);
        assert_eq!(
            stored.tree.parent_of(&ComponentId::new("B")).unwrap(),
            Some(&ComponentId::new("A"))
        );
    }

    #[tokio::test]
    async fn test_remove_fragments() {
        let (store, page) = setup().await;
        let editor = PageEditor::default();
        editor
            .apply(store.as_ref(), &insert(&page, 1, "A", None))
            .await
            .unwrap();
        editor
            .apply(store.as_ref(), &insert(&page, 2, "B", Some("A")))
            .await
            .unwrap();

        let remove = |version, id: &str| MutationRequest {
            page_id: page.id,
            expected_version: version,
            mutation: Mutation::Remove {
                id: ComponentId::new(id),
            },
        };

        // Nested removal re-renders the former parent
        let outcome = editor.apply(store.as_ref(), &remove(3, "B")).await.unwrap();
        let fragment = outcome.fragment.unwrap();
        assert_eq!(fragment.id, ComponentId::new("A"));
        assert!(!fragment.html.contains("data-sf-id=\"B\""));

        let outcome = editor.apply(store.as_ref(), &remove(4, "A")).await.unwrap();
        assert!(outcome.fragment.is_none());
        assert!(outcome.page.tree.is_empty());
    }

    #[tokio::test]
    async fn test_update_with_empty_patch_bumps_version_only() {
        let (store, page) = setup().await;
        let editor = PageEditor::default();
        let first = editor
            .apply(store.as_ref(), &insert(&page, 1, "A", None))
            .await
            .unwrap();

        let request = MutationRequest {
            page_id: page.id,
            expected_version: 2,
            mutation: Mutation::Update {
                id: ComponentId::new("A"),
                props: PropsPatch::new(),
            },
        };
        let outcome = editor.apply(store.as_ref(), &request).await.unwrap();
        assert_eq!(outcome.version, 3);
        assert_eq!(outcome.page.tree, first.page.tree);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_edits_of_one_page_conflict() {
        let (store, page) = setup().await;
        let editor = Arc::new(PageEditor::default());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let editor = editor.clone();
            let request = insert(&page, 1, &format!("c{i}"), None);
            handles.push(tokio::spawn(async move {
                editor.apply(store.as_ref(), &request).await
            }));
        }

        let mut applied = 0;
        for handle in handles {
            match handle.await.unwrap() {
                Ok(_) => applied += 1,
                Err(e) => assert!(matches!(e, Error::VersionConflict { .. })),
            }
        }
        assert_eq!(applied, 1);

        let stored = store.get_page(page.id).await.unwrap();
        assert_eq!(stored.version, 2);
        assert_eq!(stored.tree.len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_retrying_clients_keep_orders_dense() {
        let (store, page) = setup().await;
        let editor = Arc::new(PageEditor::default());

        let mut handles = Vec::new();
        for i in 0..8 {
            let store = store.clone();
            let editor = editor.clone();
            let page_id = page.id;
            handles.push(tokio::spawn(async move {
                loop {
                    let current = store.get_page(page_id).await.unwrap();
                    let request = MutationRequest {
                        page_id,
                        expected_version: current.version,
                        mutation: Mutation::Insert {
                            parent: None,
                            component: NewComponent::new("text").with_id(format!("c{i}")),
                            index: 0,
                        },
                    };
                    match editor.apply(store.as_ref(), &request).await {
                        Ok(_) => break,
                        Err(Error::VersionConflict { .. }) => tokio::task::yield_now().await,
                        Err(e) => panic!("unexpected error: {e}"),
                    }
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let stored = store.get_page(page.id).await.unwrap();
        assert_eq!(stored.version, 9);
        let orders: Vec<i64> = stored.tree.to_components().iter().map(|c| c.order).collect();
        assert_eq!(orders, (0..8).collect::<Vec<i64>>());
        assert!(editor.locks.is_empty());
    }

    #[tokio::test]
    async fn test_busy_page_does_not_block_other_pages() {
        let (store, page) = setup().await;
        let other = store
            .create_page(Page::new(page.website_id, "/other", "Other"))
            .await
            .unwrap();
        let editor = PageEditor::new(EditorConfig {
            lock_timeout: Duration::from_millis(20),
        });

        let lock = editor.page_lock(page.id);
        let _held = lock.lock().await;

        let err = editor
            .apply(store.as_ref(), &insert(&page, 1, "A", None))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PageBusy(_)));
        assert!(err.is_retryable());

        editor
            .apply(store.as_ref(), &insert(&other, 1, "A", None))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_render_uses_website_theme() {
        let (store, page) = setup().await;
        let editor = PageEditor::default();
        editor
            .apply(store.as_ref(), &insert(&page, 1, "A", None))
            .await
            .unwrap();

        let first = editor.render(store.as_ref(), page.id).await.unwrap();
        let second = editor.render(store.as_ref(), page.id).await.unwrap();
        assert_eq!(first, second);
        assert!(first.html.contains("/themes/sunset.css"));
        assert!(first.html.contains("<title>Home</title>"));
    }

    #[test]
    fn test_request_wire_format() {
        let json = r#"{
            "page_id": "6f1c2f0e-8a57-4a43-9d0c-2a4b8d1f3e21",
            "expected_version": 4,
            "mutation": { "op": "move", "id": "hero", "parent": "root", "index": 2 }
        }"#;
        let request: MutationRequest = serde_json::from_str(json).unwrap();
        assert_eq!(request.expected_version, 4);
        assert_eq!(request.mutation.name(), "move");
    }
}
