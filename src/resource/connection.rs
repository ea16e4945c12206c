use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use futures::Stream;
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, wrappers::BroadcastStream};
use tracing::{debug, instrument};

use super::ConfigResource;
use crate::{
    DConfigError, Result,
    refs::RefLease,
    schema::{KeyFlags, Permissions, Visibility},
    value::Value,
};

/// Notification delivered to watchers of a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// The effective value of a key changed
    ValueChanged {
        /// Key whose value changed
        key: String,
        /// New effective value
        value: Value,
    },
    /// The connection was released
    Released,
}

struct ConnectionInner {
    resource: Arc<ConfigResource>,
    watcher_id: u64,
    subscriber_id: usize,
    released: AtomicBool,
    events: broadcast::Sender<ConnectionEvent>,
    lease: Option<RefLease>,
}

/// Per-watcher handle bound to one [`ConfigResource`].
///
/// Holds no configuration data of its own; every operation forwards to the
/// shared resource. Once released, all operations fail with
/// `DConfigError::Released`.
#[derive(Clone)]
pub struct ConfigConnection {
    inner: Arc<ConnectionInner>,
}

impl ConfigConnection {
    pub(super) fn new(
        resource: Arc<ConfigResource>,
        watcher_id: u64,
        subscriber_id: usize,
        events: broadcast::Sender<ConnectionEvent>,
        lease: Option<RefLease>,
    ) -> Self {
        Self {
            inner: Arc::new(ConnectionInner {
                resource,
                watcher_id,
                subscriber_id,
                released: AtomicBool::new(false),
                events,
                lease,
            }),
        }
    }

    /// Watcher id this connection was created for
    pub fn watcher_id(&self) -> u64 {
        self.inner.watcher_id
    }

    /// The resource this connection is bound to
    pub fn resource(&self) -> &Arc<ConfigResource> {
        &self.inner.resource
    }

    /// Service holding the reference of this connection, if any
    pub fn service(&self) -> Option<&str> {
        self.inner.lease.as_ref().map(RefLease::service)
    }

    /// Whether [`release`](Self::release) has been called
    pub fn is_released(&self) -> bool {
        self.inner.released.load(Ordering::Acquire)
    }

    /// Effective value of `key`.
    ///
    /// # Errors
    /// * `DConfigError::Released` - If the connection has been released
    /// * `DConfigError::UnknownKey` - If the key is not declared
    pub fn value(&self, key: &str) -> Result<Value> {
        self.live()?.value(key)
    }

    /// Writes `value` for `key`; every connection on the resource is notified on change.
    ///
    /// # Errors
    /// * `DConfigError::Released` - If the connection has been released
    /// * `DConfigError::UnknownKey` - If the key is not declared
    /// * `DConfigError::ReadOnly` - If the key is read-only
    /// * `DConfigError::PersistenceError` - If the write could not be persisted
    pub fn set_value(&self, key: &str, value: Value) -> Result<()> {
        self.live()?.set_value(key, value)
    }

    /// Resets `key` to its default; every connection on the resource is notified on change.
    ///
    /// # Errors
    /// * `DConfigError::Released` - If the connection has been released
    /// * `DConfigError::UnknownKey` - If the key is not declared
    /// * `DConfigError::ReadOnly` - If the key is read-only
    /// * `DConfigError::PersistenceError` - If the reset could not be persisted
    pub fn reset(&self, key: &str) -> Result<()> {
        self.live()?.reset(key)
    }

    /// Whether `key` currently resolves to its schema default.
    ///
    /// # Errors
    /// Fails like [`value`](Self::value).
    pub fn is_default_value(&self, key: &str) -> Result<bool> {
        self.live()?.is_default_value(key)
    }

    /// Name of `key` in `locale`; the empty locale selects the unlocalized name.
    ///
    /// # Errors
    /// Fails like [`value`](Self::value).
    pub fn name(&self, key: &str, locale: &str) -> Result<String> {
        let resource = self.live()?;
        let definition = resource.schema().require(key)?;
        Ok(definition.name.resolve(locale).to_string())
    }

    /// Description of `key` in `locale`; the empty locale selects the unlocalized text.
    ///
    /// # Errors
    /// Fails like [`value`](Self::value).
    pub fn description(&self, key: &str, locale: &str) -> Result<String> {
        let resource = self.live()?;
        let definition = resource.schema().require(key)?;
        Ok(definition.description.resolve(locale).to_string())
    }

    /// Flags of `key`.
    ///
    /// # Errors
    /// Fails like [`value`](Self::value).
    pub fn flags(&self, key: &str) -> Result<KeyFlags> {
        Ok(self.live()?.schema().require(key)?.flags)
    }

    /// Visibility of `key`.
    ///
    /// # Errors
    /// Fails like [`value`](Self::value).
    pub fn visibility(&self, key: &str) -> Result<Visibility> {
        Ok(self.live()?.schema().require(key)?.visibility)
    }

    /// Permissions of `key`.
    ///
    /// # Errors
    /// Fails like [`value`](Self::value).
    pub fn permissions(&self, key: &str) -> Result<Permissions> {
        Ok(self.live()?.schema().require(key)?.permissions)
    }

    /// Declared keys in schema order.
    ///
    /// # Errors
    /// Returns `DConfigError::Released` if the connection has been released.
    pub fn key_list(&self) -> Result<Vec<String>> {
        Ok(self.live()?.schema().key_names())
    }

    /// Schema document version.
    ///
    /// # Errors
    /// Returns `DConfigError::Released` if the connection has been released.
    pub fn version(&self) -> Result<String> {
        Ok(self.live()?.schema().version().to_string())
    }

    /// Subscribes to this connection's events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.inner.events.subscribe()
    }

    /// Stream of this connection's events, starting now.
    pub fn events(&self) -> impl Stream<Item = ConnectionEvent> + Send + use<> {
        BroadcastStream::new(self.subscribe()).filter_map(|event| event.ok())
    }

    /// Releases the connection.
    ///
    /// The first call unsubscribes from the resource, emits
    /// [`ConnectionEvent::Released`] and drops the connection's reference;
    /// later calls do nothing.
    #[instrument(skip(self), fields(resource = %self.inner.resource.id(), watcher = self.inner.watcher_id))]
    pub fn release(&self) {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return;
        }

        self.inner.resource.unsubscribe(self.inner.subscriber_id);
        let _ = self.inner.events.send(ConnectionEvent::Released);

        if let Some(lease) = &self.inner.lease {
            lease.release();
        }

        debug!("Connection released");
    }

    fn live(&self) -> Result<&ConfigResource> {
        if self.is_released() {
            return Err(DConfigError::Released {
                resource: self.inner.resource.id().key(),
                watcher: self.inner.watcher_id,
            });
        }

        Ok(self.inner.resource.as_ref())
    }
}
