//! Reference-counted resource lifecycle with debounced teardown.
//!
//! [`RefManager`] records which services reference which resources. When a
//! resource's total count reaches zero it becomes *pending*; after the
//! configured grace window it is *purged* and a release notification fires
//! exactly once. Re-referencing a pending resource cancels the teardown.

mod graph;


use std::{
    sync::{
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use futures::Stream;
use tokio::{runtime::Handle, sync::broadcast};
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::{debug, info, instrument, warn};

use graph::{Drained, Graph, PendingTeardown};

/// Synchronous callback invoked with the key of every purged resource.
pub type ReleaseHook = Arc<dyn Fn(&str) + Send + Sync>;

const RELEASE_CAPACITY: usize = 256;

/// Tracks service → resource references and tears resources down once unreferenced.
///
/// Cheap to clone; clones share the same graph.
#[derive(Clone)]
pub struct RefManager {
    graph: Arc<Mutex<Graph>>,
    delay_ms: Arc<AtomicU64>,
    generation: Arc<AtomicU64>,
    release_tx: broadcast::Sender<String>,
    hooks: Arc<RwLock<Vec<ReleaseHook>>>,
}

impl Default for RefManager {
    fn default() -> Self {
        Self::new()
    }
}

impl RefManager {
    /// Creates an empty manager with a zero grace window.
    pub fn new() -> Self {
        let (release_tx, _) = broadcast::channel(RELEASE_CAPACITY);

        Self {
            graph: Arc::new(Mutex::new(Graph::default())),
            delay_ms: Arc::new(AtomicU64::new(0)),
            generation: Arc::new(AtomicU64::new(1)),
            release_tx,
            hooks: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Creates an empty manager with the given grace window.
    pub fn with_delay(delay_ms: u64) -> Self {
        let manager = Self::new();
        manager.set_delay_release_time(delay_ms);
        manager
    }

    /// Sets the grace window for teardowns armed from now on.
    pub fn set_delay_release_time(&self, delay_ms: u64) {
        self.delay_ms.store(delay_ms, Ordering::Relaxed);
    }

    /// Grace window in milliseconds.
    pub fn delay_release_time(&self) -> u64 {
        self.delay_ms.load(Ordering::Relaxed)
    }

    /// Registers a callback run synchronously for every purged resource.
    ///
    /// Hooks run after the graph lock is released and before the key is
    /// broadcast to [`subscribe_releases`](Self::subscribe_releases) receivers.
    pub fn on_release(&self, hook: ReleaseHook) {
        let mut hooks = self.hooks.write().unwrap_or_else(PoisonError::into_inner);
        hooks.push(hook);
    }

    /// Receiver of purged resource keys.
    pub fn subscribe_releases(&self) -> broadcast::Receiver<String> {
        self.release_tx.subscribe()
    }

    /// Stream of purged resource keys, starting now.
    pub fn releases(&self) -> impl Stream<Item = String> + Send + use<> {
        BroadcastStream::new(self.subscribe_releases()).filter_map(|key| key.ok())
    }

    /// Adds one reference from `service` to `resource`.
    ///
    /// Cancels a pending teardown of `resource`.
    #[instrument(skip(self))]
    pub fn ref_resource(&self, service: &str, resource: &str) {
        let cancelled = self.lock_graph().add(service, resource);

        if let Some(PendingTeardown { task, .. }) = cancelled {
            if let Some(task) = task {
                task.abort();
            }
            debug!("Cancelled pending teardown");
        }
    }

    /// Drops one reference from `service` to `resource`.
    ///
    /// Dropping a reference that does not exist is a no-op. When the
    /// resource's total count reaches zero its teardown is armed.
    #[instrument(skip(self))]
    pub fn deref_resource(&self, service: &str, resource: &str) {
        let purged = {
            let mut graph = self.lock_graph();
            match graph.remove(service, resource, 1) {
                Some(Drained::Zero(resource)) => self.arm_teardown(&mut graph, resource),
                _ => Vec::new(),
            }
        };

        self.announce(purged);
    }

    /// Drops every reference held by `service` and removes the service.
    #[instrument(skip(self))]
    pub fn release_service(&self, service: &str) {
        let purged = {
            let mut graph = self.lock_graph();
            let drained = graph.remove_service(service);

            drained
                .into_iter()
                .flat_map(|resource| self.arm_teardown(&mut graph, resource))
                .collect::<Vec<_>>()
        };

        self.announce(purged);
    }

    /// Number of distinct services holding references.
    pub fn service_count(&self) -> usize {
        self.lock_graph().services.len()
    }

    /// Number of tracked resources, live or pending.
    pub fn resource_count(&self) -> usize {
        self.lock_graph().resources.len()
    }

    /// Whether `resource` is live or pending.
    pub fn is_tracked(&self, resource: &str) -> bool {
        self.lock_graph().resources.contains_key(resource)
    }

    /// Whether `resource` is waiting for its teardown.
    pub fn is_pending(&self, resource: &str) -> bool {
        self.lock_graph()
            .resources
            .get(resource)
            .is_some_and(|node| node.pending.is_some())
    }

    /// Number of services referencing `resource`.
    pub fn service_count_on_resource(&self, resource: &str) -> usize {
        self.lock_graph()
            .resources
            .get(resource)
            .map_or(0, |node| node.edges.len())
    }

    /// Number of distinct resources `service` references.
    pub fn resource_count_on_service(&self, service: &str) -> usize {
        self.lock_graph()
            .services
            .get(service)
            .map_or(0, |node| node.edges.len())
    }

    /// Total references on `resource` across all services.
    pub fn ref_count_on_resource(&self, resource: &str) -> usize {
        self.lock_graph()
            .resources
            .get(resource)
            .map_or(0, |node| node.total)
    }

    /// Total references `service` holds across all resources.
    pub fn ref_count_on_service(&self, service: &str) -> usize {
        self.lock_graph()
            .services
            .get(service)
            .map_or(0, |node| node.total)
    }

    /// References held by one (service, resource) pair.
    pub fn ref_count(&self, service: &str, resource: &str) -> usize {
        self.lock_graph().pair_weight(service, resource)
    }

    /// Arms the teardown of a drained resource, or purges it right away.
    ///
    /// Returns the resources purged synchronously.
    fn arm_teardown(&self, graph: &mut Graph, resource: String) -> Vec<String> {
        let delay = self.delay_release_time();

        let handle = match (delay, Handle::try_current()) {
            (0, _) => None,
            (_, Ok(handle)) => Some(handle),
            (_, Err(_)) => {
                warn!(%resource, "No async runtime for delayed teardown, purging now");
                None
            }
        };

        let Some(handle) = handle else {
            graph.resources.remove(&resource);
            return vec![resource];
        };

        let generation = self.generation.fetch_add(1, Ordering::Relaxed);
        let Some(node) = graph.resources.get_mut(&resource) else {
            return Vec::new();
        };

        let manager = self.clone();
        let key = resource.clone();
        let task = handle.spawn(async move {
            tokio::time::sleep(Duration::from_millis(delay)).await;
            manager.fire_teardown(&key, generation);
        });

        if let Some(previous) = node.pending.replace(PendingTeardown {
            generation,
            task: Some(task),
        }) {
            if let Some(task) = previous.task {
                task.abort();
            }
        }

        debug!(%resource, delay, "Teardown armed");
        Vec::new()
    }

    /// Purges `resource` if the teardown armed with `generation` is still pending.
    fn fire_teardown(&self, resource: &str, generation: u64) {
        let purged = {
            let mut graph = self.lock_graph();
            let still_pending = graph.resources.get(resource).is_some_and(|node| {
                node.total == 0
                    && node
                        .pending
                        .as_ref()
                        .is_some_and(|p| p.generation == generation)
            });

            if still_pending {
                graph.resources.remove(resource);
                vec![resource.to_string()]
            } else {
                Vec::new()
            }
        };

        self.announce(purged);
    }

    fn announce(&self, purged: Vec<String>) {
        if purged.is_empty() {
            return;
        }

        let hooks: Vec<ReleaseHook> = self
            .hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        for resource in purged {
            info!(%resource, "Resource released");
            for hook in &hooks {
                hook(&resource);
            }
            let _ = self.release_tx.send(resource);
        }
    }

    fn lock_graph(&self) -> MutexGuard<'_, Graph> {
        self.graph.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// A reference held by one connection, dropped when the connection is released.
pub struct RefLease {
    refs: RefManager,
    service: String,
    resource: String,
    on_release: Option<Box<dyn Fn() + Send + Sync>>,
}

impl RefLease {
    /// Wraps a reference already recorded in `refs`.
    pub fn new(refs: RefManager, service: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            refs,
            service: service.into(),
            resource: resource.into(),
            on_release: None,
        }
    }

    /// Runs `hook` on release, before the reference is dropped.
    ///
    /// The hook may take locks that the resource release hooks also take.
    #[must_use]
    pub fn with_release_hook(mut self, hook: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_release = Some(Box::new(hook));
        self
    }

    /// Service holding the reference
    pub fn service(&self) -> &str {
        &self.service
    }

    /// Resource key the reference points at
    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub(crate) fn release(&self) {
        if let Some(hook) = &self.on_release {
            hook();
        }
        self.refs.deref_resource(&self.service, &self.resource);
    }
}
