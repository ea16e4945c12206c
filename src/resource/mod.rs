//! Configuration resources and the connections bound to them.
//!
//! A [`ConfigResource`] owns one schema and its layered overrides and is the
//! single source of truth for one identity. [`ConfigConnection`]s are thin
//! per-watcher handles that forward to it and receive its change
//! notifications.

mod config_resource;
mod connection;
mod overrides;
mod storage;

#[cfg(test)]
mod tests;

pub use config_resource::ConfigResource;
pub use connection::{ConfigConnection, ConnectionEvent};
pub use overrides::{LayerEntry, LayerKind, OverrideLayer, OverrideStore, StagedLayer};
pub use storage::{CACHE_MAGIC, FileStorage, LayerStorage, OVERRIDE_MAGIC};

/// Capacity of each connection's event channel.
pub(crate) const EVENT_CAPACITY: usize = 256;
