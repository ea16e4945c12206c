use futures::StreamExt;
use tracing::{debug, info, instrument};
use zbus::{Connection, fdo};

use crate::{Result, center::ConfigCenter};

/// Releases a client's connections when its unique name leaves the bus.
///
/// # Errors
/// Returns `DConfigError::Bus` if the watcher cannot subscribe to `NameOwnerChanged`.
#[instrument(skip_all)]
pub(super) async fn watch_name_owners(bus: &Connection, center: ConfigCenter) -> Result<()> {
    let dbus_proxy = fdo::DBusProxy::new(bus).await?;
    let mut name_owner_changed = dbus_proxy.receive_name_owner_changed().await?;

    tokio::spawn(async move {
        while let Some(signal) = name_owner_changed.next().await {
            let Ok(args) = signal.args() else {
                continue;
            };

            if !args.name().starts_with(':') {
                continue;
            }

            if let (Some(_), None) = (args.old_owner().as_deref(), args.new_owner().as_deref()) {
                let service = args.name().to_string();
                debug!(%service, "Client left the bus");
                center.release_service(&service);
            }
        }

        info!("Name owner watcher stopped");
    });

    Ok(())
}
