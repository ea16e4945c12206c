use tracing::{info, warn};
use zbus::{
    Connection, ObjectServer, fdo, interface, message::Header, zvariant::OwnedObjectPath,
};

use super::{ConnectionInterface, connection::forward_events, connection_path};
use crate::center::ConfigCenter;

/// Manager object handing out per-connection objects.
pub struct ManagerInterface {
    center: ConfigCenter,
}

impl ManagerInterface {
    /// Creates the manager object for `center`.
    pub fn new(center: ConfigCenter) -> Self {
        Self { center }
    }
}

#[interface(name = "org.desktopspec.ConfigManager")]
impl ManagerInterface {
    /// Opens `(appid, name, subpath)` for the calling client and exports
    /// the connection object; returns its path.
    #[zbus(name = "acquireManager")]
    async fn acquire_manager(
        &self,
        appid: String,
        name: String,
        subpath: String,
        #[zbus(header)] header: Header<'_>,
        #[zbus(object_server)] server: &ObjectServer,
        #[zbus(connection)] bus: &Connection,
    ) -> fdo::Result<OwnedObjectPath> {
        let service = header
            .sender()
            .map(ToString::to_string)
            .ok_or_else(|| fdo::Error::Failed("message has no sender".to_string()))?;

        let connection = self.center.open(&service, &appid, &name, &subpath)?;
        let path = connection_path(connection.watcher_id());
        let object_path = OwnedObjectPath::try_from(path.clone())
            .map_err(|e| fdo::Error::Failed(e.to_string()))?;

        let events = connection.events();
        if let Err(e) = server
            .at(path.as_str(), ConnectionInterface::new(connection.clone()))
            .await
        {
            warn!("Failed to export connection: {e}");
            connection.release();
            return Err(e.into());
        }

        tokio::spawn(forward_events(bus.clone(), path, events));

        info!(%service, path = %object_path.as_str(), "Connection acquired");
        Ok(object_path)
    }

    /// Sets the grace window in milliseconds
    #[zbus(name = "setDelayReleaseTime")]
    async fn set_delay_release_time(&self, ms: i32) -> fdo::Result<()> {
        let ms = u64::try_from(ms)
            .map_err(|_| fdo::Error::InvalidArgs(format!("negative delay {ms}")))?;
        self.center.set_delay_release_time(ms);
        Ok(())
    }

    #[zbus(name = "delayReleaseTime")]
    async fn delay_release_time(&self) -> i32 {
        i32::try_from(self.center.delay_release_time()).unwrap_or(i32::MAX)
    }

    /// Number of resources currently held by the center
    #[zbus(name = "resourceSize")]
    async fn resource_size(&self) -> i32 {
        i32::try_from(self.center.resource_count()).unwrap_or(i32::MAX)
    }
}
