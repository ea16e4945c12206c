use std::{
    env,
    io::{Error, ErrorKind},
    path::PathBuf,
};

/// Environment variable listing schema search roots, colon separated.
pub const DATA_DIRS_ENV: &str = "DSG_DATA_DIRS";

/// Search root used when neither settings nor environment provide one.
pub const DEFAULT_DATA_DIR: &str = "/usr/share/dsg";

/// Utility struct for locating daemon files
///
/// Provides methods to locate settings, cache and log directories following
/// the XDG Base Directory specification
pub struct SettingsPaths;

impl SettingsPaths {
    /// Returns the settings directory of the daemon
    ///
    /// - First checks `XDG_CONFIG_HOME`
    /// - Falls back to `$HOME/.config`
    /// - Appends "dconfig" to the base config directory
    ///
    /// # Errors
    /// Returns an error if neither `XDG_CONFIG_HOME` nor `HOME` environment variables are set
    pub fn config_dir() -> Result<PathBuf, Error> {
        Ok(xdg_home("XDG_CONFIG_HOME", ".config")?.join("dconfig"))
    }

    /// Returns the path of the settings file, `daemon.toml` in [`config_dir`](Self::config_dir)
    ///
    /// # Errors
    /// Returns an error if the settings directory cannot be determined
    pub fn settings_file() -> Result<PathBuf, Error> {
        Ok(Self::config_dir()?.join("daemon.toml"))
    }

    /// Returns the directory holding the per-user cache layers
    ///
    /// - First checks `XDG_CACHE_HOME`
    /// - Falls back to `$HOME/.cache`
    /// - Appends "dsg/configs"
    ///
    /// # Errors
    /// Returns an error if neither `XDG_CACHE_HOME` nor `HOME` environment variables are set
    pub fn cache_dir() -> Result<PathBuf, Error> {
        Ok(xdg_home("XDG_CACHE_HOME", ".cache")?.join("dsg").join("configs"))
    }

    /// Get the daemon log directory
    ///
    /// Creates the directory if it doesn't exist.
    ///
    /// # Errors
    /// Returns error if neither `XDG_STATE_HOME` nor `HOME` is set or the directory cannot be created
    pub fn log_dir() -> Result<PathBuf, Error> {
        let log_dir = xdg_home("XDG_STATE_HOME", ".local/state")?
            .join("dconfig")
            .join("logs");

        if !log_dir.exists() {
            std::fs::create_dir_all(&log_dir)?;
        }

        Ok(log_dir)
    }
}

fn xdg_home(var: &str, home_fallback: &str) -> Result<PathBuf, Error> {
    resolve_xdg_home(var, env::var(var).ok(), env::var("HOME").ok(), home_fallback)
}

/// Picks `$var`, else `$HOME/{home_fallback}`; empty values count as unset.
pub(crate) fn resolve_xdg_home(
    var: &str,
    xdg: Option<String>,
    home: Option<String>,
    home_fallback: &str,
) -> Result<PathBuf, Error> {
    if let Some(dir) = xdg.filter(|dir| !dir.is_empty()) {
        return Ok(PathBuf::from(dir));
    }

    home.filter(|home| !home.is_empty())
        .map(|home| PathBuf::from(home).join(home_fallback))
        .ok_or_else(|| {
            Error::new(
                ErrorKind::NotFound,
                format!("Neither {var} nor HOME environment variable found"),
            )
        })
}

/// Splits a colon separated root list, dropping empty entries.
pub(crate) fn parse_data_dirs(value: &str) -> Vec<PathBuf> {
    value
        .split(':')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(PathBuf::from)
        .collect()
}
