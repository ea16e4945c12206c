use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::broadcast;
use tracing::{debug, info, instrument, warn};

use super::{
    ConfigConnection, ConnectionEvent, LayerStorage, OverrideStore,
    overrides::{OverrideLayer, StagedLayer},
};
use crate::{
    DConfigError, Result,
    refs::RefLease,
    schema::{ConfigSchema, KeyDefinition, Permissions, ResourceId, SchemaLoader},
    value::Value,
};

struct Subscriber {
    id: usize,
    sender: broadcast::Sender<ConnectionEvent>,
}

struct ResourceState {
    overrides: OverrideStore,
    subscribers: Vec<Subscriber>,
    next_subscriber: usize,
}

impl ResourceState {
    fn notify(&self, event: &ConnectionEvent) {
        for subscriber in &self.subscribers {
            let _ = subscriber.sender.send(event.clone());
        }
    }
}

/// The single in-memory representation of one configuration resource.
///
/// Owns the schema and the override layers; every [`ConfigConnection`]
/// bound to it reads and writes through this instance.
pub struct ConfigResource {
    schema: Arc<ConfigSchema>,
    storage: Arc<dyn LayerStorage>,
    state: Mutex<ResourceState>,
    // Serializes writers across stage, persist and install.
    writer: Mutex<()>,
}

impl ConfigResource {
    /// Loads the schema for an identity and the layers stored for it.
    ///
    /// # Errors
    /// * `DConfigError::InvalidIdentity` - If the parts do not form a valid identity
    /// * `DConfigError::NotFound` - If the schema does not exist in any root
    /// * `DConfigError::Malformed` - If the schema or the cache layer is invalid
    pub fn load(
        loader: &SchemaLoader,
        storage: Arc<dyn LayerStorage>,
        app_id: &str,
        file_name: &str,
        subpath: &str,
    ) -> Result<Arc<Self>> {
        let schema = loader.load(app_id, file_name, subpath)?;
        Self::new(schema, storage)
    }

    /// Creates a resource over a parsed schema, loading its layers from `storage`.
    ///
    /// # Errors
    /// Returns the storage error if the layers cannot be loaded.
    #[instrument(skip_all, fields(resource = %schema.id()))]
    pub fn new(schema: ConfigSchema, storage: Arc<dyn LayerStorage>) -> Result<Arc<Self>> {
        let layers = storage.load_layers(&schema)?;
        info!("Resource created with {} keys", schema.len());

        Ok(Arc::new(Self {
            schema: Arc::new(schema),
            storage,
            state: Mutex::new(ResourceState {
                overrides: OverrideStore::new(layers),
                subscribers: Vec::new(),
                next_subscriber: 0,
            }),
            writer: Mutex::new(()),
        }))
    }

    /// Identity of the resource
    pub fn id(&self) -> &ResourceId {
        self.schema.id()
    }

    /// Schema of the resource
    pub fn schema(&self) -> &ConfigSchema {
        &self.schema
    }

    /// Effective value of `key`.
    ///
    /// # Errors
    /// Returns `DConfigError::UnknownKey` if the key is not declared.
    pub fn value(&self, key: &str) -> Result<Value> {
        let definition = self.schema.require(key)?;
        let state = self.lock_state()?;

        Ok(state.overrides.effective(definition).clone())
    }

    /// Whether no layer overrides `key`.
    ///
    /// # Errors
    /// Returns `DConfigError::UnknownKey` if the key is not declared.
    pub fn is_default_value(&self, key: &str) -> Result<bool> {
        let definition = self.schema.require(key)?;
        let state = self.lock_state()?;

        Ok(state.overrides.is_default(definition))
    }

    /// Writes `value` for `key` into the highest writable layer.
    ///
    /// Subscribers are notified only if the effective value changed.
    ///
    /// # Errors
    /// * `DConfigError::UnknownKey` - If the key is not declared
    /// * `DConfigError::ReadOnly` - If the key is declared read-only
    /// * `DConfigError::PersistenceError` - If the layer could not be written;
    ///   the effective value is then unchanged
    #[instrument(skip(self, value), fields(resource = %self.id()))]
    pub fn set_value(&self, key: &str, value: Value) -> Result<()> {
        let definition = self.require_writable(key)?;

        let _writer = self.lock_writer()?;
        let (previous, staged) = {
            let state = self.lock_state()?;
            let previous = state.overrides.effective(definition).clone();
            (previous, vec![state.overrides.stage_set(key, value)])
        };

        self.commit(definition, previous, staged)
    }

    /// Removes `key` from every writable layer, falling back to lower layers
    /// or the schema default.
    ///
    /// # Errors
    /// * `DConfigError::UnknownKey` - If the key is not declared
    /// * `DConfigError::ReadOnly` - If the key is declared read-only
    /// * `DConfigError::PersistenceError` - If a layer could not be written;
    ///   layers already written are restored
    #[instrument(skip(self), fields(resource = %self.id()))]
    pub fn reset(&self, key: &str) -> Result<()> {
        let definition = self.require_writable(key)?;

        let _writer = self.lock_writer()?;
        let (previous, staged) = {
            let state = self.lock_state()?;
            let previous = state.overrides.effective(definition).clone();
            (previous, state.overrides.stage_reset(key))
        };

        if staged.is_empty() {
            debug!("Nothing to reset for {key}");
            return Ok(());
        }

        self.commit(definition, previous, staged)
    }

    /// Persists staged layers, then installs them and notifies on change.
    ///
    /// Must be called with the writer lock held.
    fn commit(
        &self,
        definition: &KeyDefinition,
        previous: Value,
        staged: Vec<StagedLayer>,
    ) -> Result<()> {
        for (written, layer) in staged.iter().enumerate() {
            if let Err(e) = self.storage.persist(self.id(), layer.layer()) {
                self.restore(&staged[..written]);
                return Err(e);
            }
        }

        let mut state = self.lock_state()?;
        for layer in staged {
            state.overrides.install(layer);
        }

        let current = state.overrides.effective(definition).clone();
        if current != previous {
            debug!("Value of {} changed", definition.key);
            state.notify(&ConnectionEvent::ValueChanged {
                key: definition.key.clone(),
                value: current,
            });
        }

        Ok(())
    }

    /// Writes the installed contents back over layers a failed commit already persisted.
    fn restore(&self, written: &[StagedLayer]) {
        if written.is_empty() {
            return;
        }

        let installed: Vec<OverrideLayer> = match self.lock_state() {
            Ok(state) => written
                .iter()
                .filter_map(|staged| state.overrides.layers().get(staged.index).cloned())
                .collect(),
            Err(e) => {
                warn!(error = %e, "Cannot restore layers after failed commit");
                return;
            }
        };

        for layer in &installed {
            if let Err(e) = self.storage.persist(self.id(), layer) {
                warn!(layer = layer.name(), error = %e, "Layer left diverged from memory");
            }
        }
    }

    fn require_writable(&self, key: &str) -> Result<&KeyDefinition> {
        let definition = self.schema.require(key)?;
        if definition.permissions == Permissions::ReadOnly {
            return Err(DConfigError::ReadOnly {
                resource: self.id().key(),
                key: key.to_string(),
            });
        }

        Ok(definition)
    }

    /// Mints a connection for `watcher_id` and subscribes it to changes.
    ///
    /// `lease` is the RefManager reference dropped when the connection is released.
    pub fn create_connection(
        self: &Arc<Self>,
        watcher_id: u64,
        lease: Option<RefLease>,
    ) -> Result<ConfigConnection> {
        let (sender, _) = broadcast::channel(super::EVENT_CAPACITY);

        let subscriber_id = {
            let mut state = self.lock_state()?;
            let id = state.next_subscriber;
            state.next_subscriber += 1;
            state.subscribers.push(Subscriber {
                id,
                sender: sender.clone(),
            });
            id
        };

        debug!(resource = %self.id(), watcher_id, "Connection created");
        Ok(ConfigConnection::new(
            Arc::clone(self),
            watcher_id,
            subscriber_id,
            sender,
            lease,
        ))
    }

    /// Number of connections currently subscribed.
    pub fn connection_count(&self) -> usize {
        match self.state.lock() {
            Ok(state) => state.subscribers.len(),
            Err(poisoned) => poisoned.into_inner().subscribers.len(),
        }
    }

    /// Snapshot of the current layers, lowest precedence first.
    ///
    /// # Errors
    /// Returns `DConfigError::LockError` if the state lock is poisoned.
    pub fn layers(&self) -> Result<Vec<OverrideLayer>> {
        Ok(self.lock_state()?.overrides.layers().to_vec())
    }

    pub(super) fn unsubscribe(&self, subscriber_id: usize) {
        let mut state = match self.state.lock() {
            Ok(state) => state,
            Err(poisoned) => poisoned.into_inner(),
        };
        state.subscribers.retain(|s| s.id != subscriber_id);
    }

    fn lock_state(&self) -> Result<MutexGuard<'_, ResourceState>> {
        self.state.lock().map_err(|e| DConfigError::lock("state", e))
    }

    fn lock_writer(&self) -> Result<MutexGuard<'_, ()>> {
        self.writer.lock().map_err(|e| DConfigError::lock("writer", e))
    }
}
