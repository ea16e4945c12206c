//! Daemon settings.
//!
//! Settings are read from a TOML file, then adjusted by the environment.
//! Command line flags are applied on top by the binary. Every field has a
//! default so an absent or empty file is valid.

mod loading;
mod paths;


use std::path::{Path, PathBuf};

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

pub use paths::{DATA_DIRS_ENV, DEFAULT_DATA_DIR, SettingsPaths};

/// Default grace window before an unreferenced resource is torn down.
pub const DEFAULT_DELAY_RELEASE_MS: u64 = 1000;

/// Message bus the daemon registers on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum BusKind {
    /// Per-login session bus
    #[default]
    Session,
    /// System-wide bus
    System,
}

/// Runtime settings of the configuration daemon.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonSettings {
    /// Schema search roots, highest precedence first
    pub search_roots: Vec<PathBuf>,

    /// Directory prepended to every search root and the cache directory.
    pub local_prefix: Option<PathBuf>,

    /// Directory of the per-user cache layers; the XDG cache directory when unset
    pub cache_dir: Option<PathBuf>,

    /// Grace window in milliseconds before unreferenced resources are released
    pub delay_release_ms: u64,

    /// Bus to serve on
    pub bus: BusKind,

    /// Also write logs to daily rotated files
    pub log_to_file: bool,
}

impl Default for DaemonSettings {
    fn default() -> Self {
        Self {
            search_roots: vec![PathBuf::from(DEFAULT_DATA_DIR)],
            local_prefix: None,
            cache_dir: None,
            delay_release_ms: DEFAULT_DELAY_RELEASE_MS,
            bus: BusKind::default(),
            log_to_file: false,
        }
    }
}

impl DaemonSettings {
    /// Search roots with the local prefix applied.
    pub fn effective_roots(&self) -> Vec<PathBuf> {
        self.search_roots
            .iter()
            .map(|root| self.prefixed(root))
            .collect()
    }

    /// Cache directory with the local prefix applied.
    ///
    /// # Errors
    /// Returns an error if no cache directory is configured and the XDG
    /// cache directory cannot be determined.
    pub fn effective_cache_dir(&self) -> std::io::Result<PathBuf> {
        let cache_dir = match &self.cache_dir {
            Some(dir) => dir.clone(),
            None => SettingsPaths::cache_dir()?,
        };

        Ok(self.prefixed(&cache_dir))
    }

    fn prefixed(&self, path: &Path) -> PathBuf {
        match &self.local_prefix {
            Some(prefix) => prefix.join(path.strip_prefix("/").unwrap_or(path)),
            None => path.to_path_buf(),
        }
    }
}
