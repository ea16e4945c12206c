//! D-Bus front-end of the configuration center.
//!
//! The manager object at `/` hands out one object per connection. Values
//! cross the bus as JSON text.

mod connection;
mod manager;
mod owners;


use tracing::{info, instrument};
use zbus::{Connection, fdo};

pub use connection::ConnectionInterface;
pub use manager::ManagerInterface;

use crate::{DConfigError, Result, center::ConfigCenter, settings::BusKind};

/// Well-known name the daemon owns.
pub const BUS_NAME: &str = "org.desktopspec.ConfigManager";
/// Path of the manager object.
pub const MANAGER_PATH: &str = "/";

/// Connects to `bus`, exports the manager object, claims [`BUS_NAME`] and
/// starts watching for clients leaving the bus.
///
/// # Errors
/// Returns `DConfigError::Bus` if the bus is unreachable or the name is taken.
#[instrument(skip(center))]
pub async fn serve(center: ConfigCenter, bus: BusKind) -> Result<Connection> {
    let builder = match bus {
        BusKind::Session => zbus::connection::Builder::session()?,
        BusKind::System => zbus::connection::Builder::system()?,
    };

    let connection = builder
        .name(BUS_NAME)?
        .serve_at(MANAGER_PATH, ManagerInterface::new(center.clone()))?
        .build()
        .await?;

    owners::watch_name_owners(&connection, center).await?;

    info!("Serving {BUS_NAME}");
    Ok(connection)
}

/// Object path of the connection minted for `watcher_id`.
pub fn connection_path(watcher_id: u64) -> String {
    format!("/connections/{watcher_id}")
}

impl From<DConfigError> for fdo::Error {
    fn from(error: DConfigError) -> Self {
        match error {
            DConfigError::Bus(e) => fdo::Error::ZBus(e),
            DConfigError::NotFound { .. } => fdo::Error::FileNotFound(error.to_string()),
            DConfigError::UnknownKey { .. }
            | DConfigError::InvalidIdentity { .. }
            | DConfigError::Malformed { .. } => fdo::Error::InvalidArgs(error.to_string()),
            DConfigError::ReadOnly { .. } => fdo::Error::AccessDenied(error.to_string()),
            DConfigError::Released { .. } => fdo::Error::UnknownObject(error.to_string()),
            DConfigError::PersistenceError { .. } | DConfigError::Io(_) => {
                fdo::Error::IOError(error.to_string())
            }
            DConfigError::LockError { .. } | DConfigError::SettingsParse { .. } => {
                fdo::Error::Failed(error.to_string())
            }
        }
    }
}
