//! Registry of live configuration resources.
//!
//! [`ConfigCenter`] hands out [`ConfigConnection`]s, shares one
//! [`ConfigResource`] per identity between them, records each connection's
//! reference with the [`RefManager`] and evicts a resource once the manager
//! purges it.

#[cfg(test)]
mod tests;

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use tracing::{debug, info, instrument};

use crate::{
    Result,
    refs::{RefLease, RefManager},
    resource::{ConfigConnection, ConfigResource, FileStorage, LayerStorage},
    schema::{ResourceId, SchemaLoader},
    settings::DaemonSettings,
};

#[derive(Default)]
struct Registry {
    resources: HashMap<String, Arc<ConfigResource>>,
    connections: HashMap<String, Vec<ConfigConnection>>,
}

struct CenterInner {
    loader: SchemaLoader,
    storage: Arc<dyn LayerStorage>,
    refs: RefManager,
    registry: Mutex<Registry>,
    next_watcher: AtomicU64,
}

impl CenterInner {
    fn lock_registry(&self) -> MutexGuard<'_, Registry> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Drops a purged resource unless it was referenced again meanwhile.
    fn evict(&self, key: &str) {
        let mut registry = self.lock_registry();
        if self.refs.is_tracked(key) {
            debug!(resource = key, "Resource re-referenced before eviction");
            return;
        }

        if registry.resources.remove(key).is_some() {
            info!(resource = key, "Resource evicted");
        }
    }

    /// Removes a released connection from its service's list.
    fn forget_connection(&self, service: &str, watcher_id: u64) {
        let mut registry = self.lock_registry();
        let Some(connections) = registry.connections.get_mut(service) else {
            return;
        };

        connections.retain(|c| c.watcher_id() != watcher_id);
        if connections.is_empty() {
            registry.connections.remove(service);
        }
    }
}

/// Entry point for opening configuration resources.
///
/// Cheap to clone; clones share the same registry.
#[derive(Clone)]
pub struct ConfigCenter {
    inner: Arc<CenterInner>,
}

impl ConfigCenter {
    /// Creates a center over the file layout described by `settings`.
    ///
    /// # Errors
    /// Returns an error if the cache directory cannot be determined.
    pub fn new(settings: &DaemonSettings) -> Result<Self> {
        let roots = settings.effective_roots();
        let cache_dir = settings.effective_cache_dir()?;

        info!(
            roots = ?roots,
            cache_dir = %cache_dir.display(),
            "Configuration center starting"
        );

        Ok(Self::with_parts(
            SchemaLoader::new(roots.clone()),
            Arc::new(FileStorage::new(roots, cache_dir)),
            settings.delay_release_ms,
        ))
    }

    /// Creates a center from explicit collaborators.
    pub fn with_parts(
        loader: SchemaLoader,
        storage: Arc<dyn LayerStorage>,
        delay_release_ms: u64,
    ) -> Self {
        let inner = Arc::new(CenterInner {
            loader,
            storage,
            refs: RefManager::with_delay(delay_release_ms),
            registry: Mutex::new(Registry::default()),
            next_watcher: AtomicU64::new(1),
        });

        let weak: Weak<CenterInner> = Arc::downgrade(&inner);
        inner.refs.on_release(Arc::new(move |key| {
            if let Some(inner) = weak.upgrade() {
                inner.evict(key);
            }
        }));

        Self { inner }
    }

    /// Opens a connection to the resource `(app_id, file_name, subpath)` for `service`.
    ///
    /// Reuses the registered resource for the identity if there is one.
    ///
    /// # Errors
    /// * `DConfigError::InvalidIdentity` - If the parts do not form a valid identity
    /// * `DConfigError::NotFound` - If no schema exists for the identity
    /// * `DConfigError::Malformed` - If the schema or the cache layer is invalid
    #[instrument(skip(self))]
    pub fn open(
        &self,
        service: &str,
        app_id: &str,
        file_name: &str,
        subpath: &str,
    ) -> Result<ConfigConnection> {
        let id = ResourceId::new(app_id, file_name, subpath)?;
        let key = id.key();

        let registry = self.inner.lock_registry();
        let registered = registry.resources.get(&key).cloned();
        if let Some(resource) = registered {
            return self.connect(registry, service, &resource);
        }
        drop(registry);

        let schema = self.inner.loader.load_id(&id)?;
        let loaded = ConfigResource::new(schema, Arc::clone(&self.inner.storage))?;

        let mut registry = self.inner.lock_registry();
        let resource = Arc::clone(
            registry
                .resources
                .entry(key)
                .or_insert_with(|| Arc::clone(&loaded)),
        );
        if !Arc::ptr_eq(&resource, &loaded) {
            debug!("Resource loaded concurrently, reusing registered one");
        }

        self.connect(registry, service, &resource)
    }

    /// Records the reference and mints a connection while holding the registry lock.
    fn connect(
        &self,
        mut registry: MutexGuard<'_, Registry>,
        service: &str,
        resource: &Arc<ConfigResource>,
    ) -> Result<ConfigConnection> {
        let key = resource.id().key();
        let watcher_id = self.inner.next_watcher.fetch_add(1, Ordering::Relaxed);

        self.inner.refs.ref_resource(service, &key);
        let center = Arc::downgrade(&self.inner);
        let owner = service.to_string();
        let lease = RefLease::new(self.inner.refs.clone(), service, key).with_release_hook(
            move || {
                if let Some(inner) = center.upgrade() {
                    inner.forget_connection(&owner, watcher_id);
                }
            },
        );

        let connection = match resource.create_connection(watcher_id, Some(lease)) {
            Ok(connection) => connection,
            Err(e) => {
                drop(registry);
                self.inner.refs.deref_resource(service, &resource.id().key());
                return Err(e);
            }
        };

        registry
            .connections
            .entry(service.to_string())
            .or_default()
            .push(connection.clone());

        Ok(connection)
    }

    /// Releases every connection of `service` and drops its references.
    #[instrument(skip(self))]
    pub fn release_service(&self, service: &str) {
        let connections = self
            .inner
            .lock_registry()
            .connections
            .remove(service)
            .unwrap_or_default();

        debug!("Releasing {} connections", connections.len());
        for connection in connections {
            connection.release();
        }

        self.inner.refs.release_service(service);
    }

    /// Live connections opened by `service`.
    ///
    /// Released connections leave the list as part of their release.
    pub fn connections(&self, service: &str) -> Vec<ConfigConnection> {
        self.inner
            .lock_registry()
            .connections
            .get(service)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of registered resources, including those inside their grace window.
    pub fn resource_count(&self) -> usize {
        self.inner.lock_registry().resources.len()
    }

    /// The registered resource for `id`, if any.
    pub fn resource(&self, id: &ResourceId) -> Option<Arc<ConfigResource>> {
        self.inner.lock_registry().resources.get(&id.key()).cloned()
    }

    /// Reference manager tracking the resources of this center
    pub fn refs(&self) -> &RefManager {
        &self.inner.refs
    }

    /// Sets the grace window for resources released from now on.
    pub fn set_delay_release_time(&self, delay_ms: u64) {
        info!(delay_ms, "Release delay changed");
        self.inner.refs.set_delay_release_time(delay_ms);
    }

    /// Grace window in milliseconds.
    pub fn delay_release_time(&self) -> u64 {
        self.inner.refs.delay_release_time()
    }
}
