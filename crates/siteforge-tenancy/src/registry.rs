//! Per-tenant store handle registry
//!
//! The registry keeps at most one live [`TenantStore`] per tenant. The first
//! `acquire` for a tenant provisions the handle; concurrent callers for the
//! same tenant wait on that single attempt and receive the same handle.
//! Callers for different tenants never wait on each other: the registry lock
//! only guards the slot map and is never held across an await.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use siteforge_core::store::{StoreProvisioner, TenantStore};
use siteforge_core::{Error, Result, TenantId};

/// How many times `acquire` re-provisions after losing a race with `evict`.
const MAX_EVICTION_RETRIES: usize = 3;

/// Registry tuning.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Provisioning attempts per acquire before giving up
    pub provision_attempts: u32,
    /// Delay before the second attempt; doubled for every further attempt
    pub backoff: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            provision_attempts: 3,
            backoff: Duration::from_millis(50),
        }
    }
}

impl RegistryConfig {
    pub fn with_provision_attempts(mut self, attempts: u32) -> Self {
        self.provision_attempts = attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }
}

/// One tenant's entry. The cell stays empty until provisioning succeeds, so
/// a failed attempt leaves nothing behind for the next caller.
struct Slot {
    store: OnceCell<Arc<dyn TenantStore>>,
    evicted: AtomicBool,
}

impl Slot {
    fn new() -> Self {
        Self {
            store: OnceCell::new(),
            evicted: AtomicBool::new(false),
        }
    }
}

#[derive(Default)]
struct RegistryState {
    slots: HashMap<TenantId, Arc<Slot>>,
    closed: bool,
}

/// Shared registry of tenant store handles.
pub struct TenantStoreRegistry {
    provisioner: Arc<dyn StoreProvisioner>,
    config: RegistryConfig,
    state: Mutex<RegistryState>,
}

impl TenantStoreRegistry {
    pub fn new(provisioner: Arc<dyn StoreProvisioner>, config: RegistryConfig) -> Self {
        Self {
            provisioner,
            config,
            state: Mutex::new(RegistryState::default()),
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, RegistryState> {
        // The map is only touched by short non-panicking sections
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Return the tenant's store handle, provisioning it on first use.
    ///
    /// Cancelling the returned future before it completes leaves the registry
    /// unchanged: no half-initialized handle is ever cached.
    ///
    /// # Errors
    /// - `Error::RegistryClosed` after `close_all`
    /// - `Error::Provisioning` if every provisioning attempt failed
    pub async fn acquire(&self, tenant_id: TenantId) -> Result<Arc<dyn TenantStore>> {
        for _ in 0..=MAX_EVICTION_RETRIES {
            let slot = {
                let mut state = self.lock_state();
                if state.closed {
                    return Err(Error::RegistryClosed);
                }
                state
                    .slots
                    .entry(tenant_id)
                    .or_insert_with(|| Arc::new(Slot::new()))
                    .clone()
            };

            let store = slot
                .store
                .get_or_try_init(|| self.provision_with_retry(tenant_id))
                .await?
                .clone();

            if self.is_closed() {
                // close_all drained the map while we were provisioning
                store.close().await;
                return Err(Error::RegistryClosed);
            }
            if slot.evicted.load(Ordering::Acquire) {
                drop(slot);
                if Arc::strong_count(&store) == 1 {
                    store.close().await;
                }
                debug!(tenant_id = %tenant_id, "Slot evicted during acquire, retrying");
                continue;
            }
            return Ok(store);
        }

        Err(Error::Provisioning {
            tenant: tenant_id.to_string(),
            reason: "store was evicted repeatedly while being acquired".to_string(),
        })
    }

    async fn provision_with_retry(&self, tenant_id: TenantId) -> Result<Arc<dyn TenantStore>> {
        let attempts = self.config.provision_attempts.max(1);
        let mut delay = self.config.backoff;
        let mut last_error = None;

        for attempt in 1..=attempts {
            match self.provisioner.provision(tenant_id).await {
                Ok(store) => {
                    info!(tenant_id = %tenant_id, attempt, "Tenant store provisioned");
                    return Ok(store);
                }
                Err(e) => {
                    warn!(
                        tenant_id = %tenant_id,
                        attempt,
                        max_attempts = attempts,
                        error = %e,
                        "Tenant store provisioning attempt failed"
                    );
                    last_error = Some(e);
                    if attempt < attempts {
                        tokio::time::sleep(delay).await;
                        delay = delay.saturating_mul(2);
                    }
                }
            }
        }

        Err(match last_error {
            Some(e @ Error::Provisioning { .. }) => e,
            Some(e) => Error::Provisioning {
                tenant: tenant_id.to_string(),
                reason: e.to_string(),
            },
            None => Error::Provisioning {
                tenant: tenant_id.to_string(),
                reason: "no provisioning attempt was made".to_string(),
            },
        })
    }

    /// Remove a tenant's handle. Returns whether anything was cached.
    ///
    /// The handle is closed right away when the registry held the last
    /// reference. Callers that already acquired it keep a working handle, and
    /// it is released when the last of them drops it. The next `acquire`
    /// provisions a fresh handle.
    pub async fn evict(&self, tenant_id: TenantId) -> bool {
        let slot = {
            let mut state = self.lock_state();
            let slot = state.slots.remove(&tenant_id);
            if let Some(slot) = &slot {
                slot.evicted.store(true, Ordering::Release);
            }
            slot
        };

        let Some(slot) = slot else {
            return false;
        };

        match slot.store.get() {
            Some(store) if Arc::strong_count(store) == 1 => {
                store.close().await;
                info!(tenant_id = %tenant_id, "Evicted and closed tenant store");
            }
            Some(_) => {
                info!(tenant_id = %tenant_id, "Evicted tenant store, still in use by callers");
            }
            None => {
                debug!(tenant_id = %tenant_id, "Evicted tenant slot before provisioning finished");
            }
        }
        true
    }

    /// Close every handle and refuse further acquires. Returns the number of
    /// handles closed. Calling it again is a no-op.
    pub async fn close_all(&self) -> usize {
        let slots: Vec<(TenantId, Arc<Slot>)> = {
            let mut state = self.lock_state();
            if state.closed {
                return 0;
            }
            state.closed = true;
            state.slots.drain().collect()
        };

        let mut closed = 0;
        for (tenant_id, slot) in slots {
            slot.evicted.store(true, Ordering::Release);
            if let Some(store) = slot.store.get() {
                store.close().await;
                debug!(tenant_id = %tenant_id, "Closed tenant store");
                closed += 1;
            }
        }
        info!(closed, "Tenant store registry closed");
        closed
    }

    /// Number of tenant slots, including ones still provisioning.
    pub fn len(&self) -> usize {
        self.lock_state().slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether a provisioned handle is cached for the tenant.
    pub fn is_cached(&self, tenant_id: TenantId) -> bool {
        self.lock_state()
            .slots
            .get(&tenant_id)
            .is_some_and(|slot| slot.store.initialized())
    }

    /// Tenants that currently have a provisioned handle.
    pub fn tenant_ids(&self) -> Vec<TenantId> {
        self.lock_state()
            .slots
            .iter()
            .filter(|(_, slot)| slot.store.initialized())
            .map(|(id, _)| *id)
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.lock_state().closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use siteforge_core::memory::{InMemoryProvisioner, InMemoryTenantStore};
    use siteforge_core::NewWebsite;
    use std::sync::Weak;
    use std::sync::atomic::AtomicUsize;

    fn registry(provisioner: Arc<InMemoryProvisioner>) -> TenantStoreRegistry {
        TenantStoreRegistry::new(
            provisioner,
            RegistryConfig::default().with_backoff(Duration::from_millis(1)),
        )
    }

    /// Remembers every handle it hands out, without keeping it alive.
    #[derive(Default)]
    struct TrackingProvisioner {
        handles: Mutex<Vec<Weak<InMemoryTenantStore>>>,
        provisions: AtomicUsize,
    }

    impl TrackingProvisioner {
        /// Closed, or dropped by every holder.
        fn released(&self, index: usize) -> bool {
            match self.handles.lock().unwrap()[index].upgrade() {
                Some(store) => store.is_closed(),
                None => true,
            }
        }
    }

    #[async_trait]
    impl StoreProvisioner for TrackingProvisioner {
        async fn provision(&self, tenant_id: TenantId) -> Result<Arc<dyn TenantStore>> {
            self.provisions.fetch_add(1, Ordering::SeqCst);
            let store = Arc::new(InMemoryTenantStore::new(tenant_id));
            self.handles.lock().unwrap().push(Arc::downgrade(&store));
            Ok(store)
        }
    }

    #[tokio::test]
    async fn test_cold_then_cached() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        let registry = registry(provisioner.clone());
        let tenant = TenantId::new();

        assert!(!registry.is_cached(tenant));
        let first = registry.acquire(tenant).await.unwrap();
        assert!(registry.is_cached(tenant));
        let second = registry.acquire(tenant).await.unwrap();

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(provisioner.attempts(), 1);
        assert_eq!(registry.tenant_ids(), vec![tenant]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_acquire_provisions_once() {
        let provisioner =
            Arc::new(InMemoryProvisioner::new().with_delay(Duration::from_millis(50)));
        let registry = Arc::new(registry(provisioner.clone()));
        let tenant = TenantId::new();

        let mut handles = Vec::new();
        for _ in 0..16 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move { registry.acquire(tenant).await }));
        }

        let mut stores = Vec::new();
        for handle in handles {
            stores.push(handle.await.unwrap().unwrap());
        }

        assert_eq!(provisioner.attempts(), 1);
        assert!(stores.iter().all(|s| Arc::ptr_eq(s, &stores[0])));
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_different_tenants_provision_in_parallel() {
        let provisioner =
            Arc::new(InMemoryProvisioner::new().with_delay(Duration::from_millis(100)));
        let registry = Arc::new(registry(provisioner.clone()));

        let started = tokio::time::Instant::now();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = registry.clone();
            handles.push(tokio::spawn(async move {
                registry.acquire(TenantId::new()).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        // Serialized provisioning would take 800ms of virtual time
        assert!(started.elapsed() < Duration::from_millis(200));
        assert_eq!(provisioner.attempts(), 8);
        assert_eq!(registry.len(), 8);
    }

    #[tokio::test]
    async fn test_transient_failure_is_retried() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        provisioner.fail_next(2);
        let registry = registry(provisioner.clone());

        registry.acquire(TenantId::new()).await.unwrap();
        assert_eq!(provisioner.attempts(), 3);
    }

    #[tokio::test]
    async fn test_failure_is_not_cached() {
        let provisioner = Arc::new(InMemoryProvisioner::new());
        provisioner.fail_next(3);
        let registry = registry(provisioner.clone());
        let tenant = TenantId::new();

        let err = registry.acquire(tenant).await.err().unwrap();
        assert!(matches!(err, Error::Provisioning { .. }));
        assert!(!registry.is_cached(tenant));
        assert_eq!(provisioner.attempts(), 3);

        // The next call starts from scratch and succeeds
        registry.acquire(tenant).await.unwrap();
        assert_eq!(provisioner.attempts(), 4);
        assert!(registry.is_cached(tenant));
    }

    #[tokio::test]
    async fn test_evict_provisions_fresh_handle() {
        let provisioner = Arc::new(TrackingProvisioner::default());
        let registry = TenantStoreRegistry::new(provisioner.clone(), RegistryConfig::default());
        let tenant = TenantId::new();

        let first = registry.acquire(tenant).await.unwrap();
        first
            .create_website(NewWebsite::new("Kept").into_website())
            .await
            .unwrap();
        drop(first);

        assert!(registry.evict(tenant).await);
        assert!(provisioner.released(0));
        assert!(!registry.is_cached(tenant));
        assert!(!registry.evict(tenant).await);

        let second = registry.acquire(tenant).await.unwrap();
        assert_eq!(provisioner.provisions.load(Ordering::SeqCst), 2);
        assert!(!provisioner.released(1));
        assert!(second.list_websites().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_evict_leaves_in_use_handle_open() {
        let provisioner = Arc::new(TrackingProvisioner::default());
        let registry = TenantStoreRegistry::new(provisioner.clone(), RegistryConfig::default());
        let tenant = TenantId::new();

        let held = registry.acquire(tenant).await.unwrap();
        assert!(registry.evict(tenant).await);

        assert!(!provisioner.released(0));
        held.list_websites().await.unwrap();

        let fresh = registry.acquire(tenant).await.unwrap();
        assert!(!Arc::ptr_eq(&held, &fresh));
    }

    #[tokio::test]
    async fn test_evict_during_provisioning() {
        let provisioner =
            Arc::new(InMemoryProvisioner::new().with_delay(Duration::from_millis(50)));
        let registry = Arc::new(registry(provisioner.clone()));
        let tenant = TenantId::new();

        let pending = {
            let registry = registry.clone();
            tokio::spawn(async move { registry.acquire(tenant).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(registry.evict(tenant).await);

        // The orphaned handle is discarded and a fresh one provisioned
        let store = pending.await.unwrap().unwrap();
        assert_eq!(provisioner.attempts(), 2);
        let cached = registry.acquire(tenant).await.unwrap();
        assert!(Arc::ptr_eq(&store, &cached));
    }

    #[tokio::test]
    async fn test_cancelled_acquire_leaves_no_handle() {
        let provisioner =
            Arc::new(InMemoryProvisioner::new().with_delay(Duration::from_millis(200)));
        let registry = registry(provisioner.clone());
        let tenant = TenantId::new();

        let timed_out =
            tokio::time::timeout(Duration::from_millis(10), registry.acquire(tenant)).await;
        assert!(timed_out.is_err());
        assert!(!registry.is_cached(tenant));

        registry.acquire(tenant).await.unwrap();
        assert!(registry.is_cached(tenant));
        assert_eq!(provisioner.attempts(), 2);
    }

    #[tokio::test]
    async fn test_close_all() {
        let provisioner = Arc::new(TrackingProvisioner::default());
        let registry = TenantStoreRegistry::new(provisioner.clone(), RegistryConfig::default());

        let held = registry.acquire(TenantId::new()).await.unwrap();
        registry.acquire(TenantId::new()).await.unwrap();

        assert_eq!(registry.close_all().await, 2);
        assert!(registry.is_closed());
        assert!(registry.is_empty());
        assert!(provisioner.released(0));
        assert!(provisioner.released(1));
        assert!(held.list_websites().await.is_err());

        let err = registry.acquire(TenantId::new()).await.err().unwrap();
        assert!(matches!(err, Error::RegistryClosed));
        assert_eq!(registry.close_all().await, 0);
    }
}
