use std::pin::pin;

use futures::{Stream, StreamExt};
use tokio::task;
use tracing::{debug, warn};
use zbus::{Connection, fdo, interface, object_server::SignalEmitter};

use crate::{
    Result,
    resource::{ConfigConnection, ConnectionEvent},
    value::Value,
};

/// Bus object wrapping one [`ConfigConnection`].
pub struct ConnectionInterface {
    connection: ConfigConnection,
}

impl ConnectionInterface {
    /// Wraps a connection for export.
    pub fn new(connection: ConfigConnection) -> Self {
        Self { connection }
    }

    /// Runs a write on the blocking pool; writes wait on the resource's writer and fsync.
    pub(super) async fn write<F>(&self, op: F) -> fdo::Result<()>
    where
        F: FnOnce(&ConfigConnection) -> Result<()> + Send + 'static,
    {
        let connection = self.connection.clone();
        task::spawn_blocking(move || op(&connection))
            .await
            .map_err(|e| fdo::Error::Failed(format!("Write task failed: {e}")))?
            .map_err(fdo::Error::from)
    }
}

#[interface(name = "org.desktopspec.ConfigManager.Manager")]
impl ConnectionInterface {
    /// Effective value of `key` as JSON text
    #[zbus(name = "value")]
    async fn value(&self, key: String) -> fdo::Result<String> {
        Ok(self.connection.value(&key)?.to_json_string())
    }

    /// Writes `value`, given as JSON text, for `key`
    #[zbus(name = "setValue")]
    async fn set_value(&self, key: String, value: String) -> fdo::Result<()> {
        let value = Value::from_json_str(&value)?;
        self.write(move |connection| connection.set_value(&key, value)).await
    }

    #[zbus(name = "reset")]
    async fn reset(&self, key: String) -> fdo::Result<()> {
        self.write(move |connection| connection.reset(&key)).await
    }

    #[zbus(name = "isDefaultValue")]
    async fn is_default_value(&self, key: String) -> fdo::Result<bool> {
        Ok(self.connection.is_default_value(&key)?)
    }

    #[zbus(name = "name")]
    async fn name(&self, key: String, locale: String) -> fdo::Result<String> {
        Ok(self.connection.name(&key, &locale)?)
    }

    #[zbus(name = "description")]
    async fn description(&self, key: String, locale: String) -> fdo::Result<String> {
        Ok(self.connection.description(&key, &locale)?)
    }

    #[zbus(name = "visibility")]
    async fn visibility(&self, key: String) -> fdo::Result<String> {
        Ok(self.connection.visibility(&key)?.as_str().to_string())
    }

    #[zbus(name = "permissions")]
    async fn permissions(&self, key: String) -> fdo::Result<String> {
        Ok(self.connection.permissions(&key)?.as_str().to_string())
    }

    #[zbus(name = "flags")]
    async fn flags(&self, key: String) -> fdo::Result<u32> {
        Ok(self.connection.flags(&key)?.bits())
    }

    /// Releases the connection; the object disappears once `released` is emitted
    #[zbus(name = "release")]
    async fn release(&self) {
        self.connection.release();
    }

    #[zbus(property, name = "keyList")]
    async fn key_list(&self) -> fdo::Result<Vec<String>> {
        Ok(self.connection.key_list()?)
    }

    #[zbus(property, name = "version")]
    async fn version(&self) -> fdo::Result<String> {
        Ok(self.connection.version()?)
    }

    /// Emitted after the effective value of `key` changed
    #[zbus(signal, name = "valueChanged")]
    async fn value_changed(emitter: &SignalEmitter<'_>, key: &str, value: &str)
    -> zbus::Result<()>;

    /// Emitted once when the connection is released
    #[zbus(signal, name = "released")]
    async fn released(emitter: &SignalEmitter<'_>) -> zbus::Result<()>;
}

/// Turns connection events into signals on `path` until the connection is released,
/// then removes the object.
pub(super) async fn forward_events(
    bus: Connection,
    path: String,
    events: impl Stream<Item = ConnectionEvent>,
) {
    let emitter = match SignalEmitter::new(&bus, path.as_str()) {
        Ok(emitter) => emitter,
        Err(e) => {
            warn!(%path, "Cannot emit signals: {e}");
            return;
        }
    };

    let mut events = pin!(events);
    while let Some(event) = events.next().await {
        match event {
            ConnectionEvent::ValueChanged { key, value } => {
                let text = value.to_json_string();
                if let Err(e) = ConnectionInterface::value_changed(&emitter, &key, &text).await {
                    warn!(%path, %key, "Failed to emit valueChanged: {e}");
                }
            }
            ConnectionEvent::Released => {
                if let Err(e) = ConnectionInterface::released(&emitter).await {
                    warn!(%path, "Failed to emit released: {e}");
                }
                break;
            }
        }
    }

    match bus
        .object_server()
        .remove::<ConnectionInterface, _>(path.as_str())
        .await
    {
        Ok(_) => debug!(%path, "Connection object removed"),
        Err(e) => warn!(%path, "Failed to remove connection object: {e}"),
    }
}
