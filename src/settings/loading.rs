use std::{env, fs, path::Path};

use tracing::{debug, info};

use super::{DATA_DIRS_ENV, DaemonSettings, SettingsPaths, paths::parse_data_dirs};
use crate::{DConfigError, Result};

impl DaemonSettings {
    /// Loads settings from `path`, or the default settings file when `None`.
    ///
    /// A missing default file yields the defaults; an explicitly named file
    /// must exist. `DSG_DATA_DIRS` then replaces the search roots.
    ///
    /// # Errors
    /// * `DConfigError::Io` - If an explicitly named file cannot be read
    /// * `DConfigError::SettingsParse` - If the file is not valid settings TOML
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::load_file(path)?,
            None => match SettingsPaths::settings_file() {
                Ok(default_path) if default_path.exists() => Self::load_file(&default_path)?,
                _ => {
                    debug!("No settings file, using defaults");
                    Self::default()
                }
            },
        };

        if let Ok(data_dirs) = env::var(DATA_DIRS_ENV) {
            debug!(%data_dirs, "Search roots taken from environment");
            settings.apply_data_dirs(&data_dirs);
        }

        Ok(settings)
    }

    /// Reads and parses a settings file.
    ///
    /// # Errors
    /// Fails like [`load`](Self::load), without environment handling.
    pub fn load_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let settings = Self::from_toml_str(&content, Some(path))?;

        info!(path = %path.display(), "Settings loaded");
        Ok(settings)
    }

    /// Parses settings from TOML text.
    ///
    /// # Errors
    /// Returns `DConfigError::SettingsParse` if the text is not valid settings TOML.
    pub fn from_toml_str(content: &str, path: Option<&Path>) -> Result<Self> {
        toml::from_str(content).map_err(|e| DConfigError::SettingsParse {
            location: path.map_or_else(|| "string".to_string(), |p| p.display().to_string()),
            details: e.to_string(),
        })
    }

    /// Replaces the search roots with a colon separated list, ignoring an empty one.
    pub fn apply_data_dirs(&mut self, value: &str) {
        let roots = parse_data_dirs(value);
        if !roots.is_empty() {
            self.search_roots = roots;
        }
    }
}
